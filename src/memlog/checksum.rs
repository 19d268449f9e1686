//! CRC32 checksums for committed records
//!
//! A record checksum covers the sequence number, the transaction id,
//! every captured region (offset, length, bytes) and the payload, in
//! that order. Integers are hashed little-endian.

use crc32fast::Hasher;

use super::group_commit::CapturedRegion;

/// Computes a CRC32 checksum over the provided data.
pub fn compute_checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Verifies that the computed checksum matches the expected checksum.
pub fn verify_checksum(data: &[u8], expected: u32) -> bool {
    compute_checksum(data) == expected
}

/// Checksum of one committed transaction record
pub fn record_checksum(
    sequence: u64,
    tx_id: u64,
    regions: &[CapturedRegion],
    payload: &[u8],
) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&sequence.to_le_bytes());
    hasher.update(&tx_id.to_le_bytes());
    for region in regions {
        hasher.update(&region.offset.to_le_bytes());
        hasher.update(&(region.data.len() as u64).to_le_bytes());
        hasher.update(&region.data);
    }
    hasher.update(payload);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(offset: u64, data: &[u8]) -> CapturedRegion {
        CapturedRegion {
            offset,
            data: data.to_vec(),
        }
    }

    #[test]
    fn test_checksum_deterministic() {
        let data = b"test data for checksum verification";
        assert_eq!(compute_checksum(data), compute_checksum(data));
        assert!(verify_checksum(data, compute_checksum(data)));
    }

    #[test]
    fn test_record_checksum_covers_every_field() {
        let regions = [region(0, b"abc"), region(8, b"de")];
        let base = record_checksum(1, 7, &regions, b"payload");

        assert_ne!(base, record_checksum(2, 7, &regions, b"payload"));
        assert_ne!(base, record_checksum(1, 8, &regions, b"payload"));
        assert_ne!(base, record_checksum(1, 7, &regions[..1], b"payload"));
        assert_ne!(base, record_checksum(1, 7, &regions, b"payloaD"));
        assert_ne!(
            base,
            record_checksum(1, 7, &[region(1, b"abc"), region(8, b"de")], b"payload")
        );
    }

    #[test]
    fn test_region_boundaries_matter() {
        // same concatenated bytes, different split
        let a = record_checksum(1, 1, &[region(0, b"ab"), region(0, b"c")], b"");
        let b = record_checksum(1, 1, &[region(0, b"a"), region(0, b"bc")], b"");
        assert_ne!(a, b);
    }
}
