//! Worker placement
//!
//! Decides, once at pool construction, which partition each worker
//! serves and which locality it runs on.
//!
//! With no more partitions than localities, worker `i` runs on locality
//! `i % L` and serves partition `locality % P`.
//!
//! Otherwise partitions are dealt to localities in contiguous runs of
//! `ceil(P / L)` (one fewer from locality `P % L` on), and workers are
//! dealt to partitions in order, `W / P` each, with the last `W % P`
//! partitions taking one extra.
//!
//! Either way every partition gets at least one worker when `W >= P`.
//! When partitions are dealt, per-partition worker counts differ by at
//! most one.

use serde::Serialize;

/// Where one worker runs and what it serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Placement {
    pub worker: usize,
    pub partition: usize,
    pub locality: usize,
}

/// Places `workers` workers over `partitions` partitions and
/// `localities` localities
///
/// Returns one entry per worker, indexed by worker. Zero partitions or
/// localities yield an empty placement.
pub fn placement(workers: usize, partitions: usize, localities: usize) -> Vec<Placement> {
    if workers == 0 || partitions == 0 || localities == 0 {
        return Vec::new();
    }

    let mut out = Vec::with_capacity(workers);
    if partitions <= localities {
        for worker in 0..workers {
            let locality = worker % localities;
            out.push(Placement {
                worker,
                partition: locality % partitions,
                locality,
            });
        }
        return out;
    }

    let mut per_partition = workers / partitions;
    let mut per_locality = partitions.div_ceil(localities);
    let mut partition = 0;
    for locality in 0..localities {
        if locality != 0 && locality == partitions % localities {
            per_locality -= 1;
        }
        for _ in 0..per_locality {
            if partition >= partitions {
                break;
            }
            if partition == partitions - workers % partitions {
                per_partition += 1;
            }
            for _ in 0..per_partition {
                out.push(Placement {
                    worker: out.len(),
                    partition,
                    locality,
                });
            }
            partition += 1;
        }
    }
    debug_assert!(workers < partitions || out.len() == workers);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn workers_per_partition(placements: &[Placement]) -> BTreeMap<usize, usize> {
        let mut counts = BTreeMap::new();
        for p in placements {
            *counts.entry(p.partition).or_insert(0) += 1;
        }
        counts
    }

    fn triples(placements: &[Placement]) -> Vec<(usize, usize, usize)> {
        placements
            .iter()
            .map(|p| (p.worker, p.partition, p.locality))
            .collect()
    }

    // ==================== Few Partitions Tests ====================

    #[test]
    fn test_one_partition_many_localities() {
        let out = placement(4, 1, 4);
        assert_eq!(
            triples(&out),
            vec![(0, 0, 0), (1, 0, 1), (2, 0, 2), (3, 0, 3)]
        );
    }

    #[test]
    fn test_workers_wrap_localities() {
        let out = placement(6, 2, 4);
        assert_eq!(
            triples(&out),
            vec![
                (0, 0, 0),
                (1, 1, 1),
                (2, 0, 2),
                (3, 1, 3),
                (4, 0, 0),
                (5, 1, 1)
            ]
        );
    }

    // ==================== Many Partitions Tests ====================

    #[test]
    fn test_uneven_partitions_and_workers() {
        let out = placement(7, 5, 2);
        assert_eq!(
            triples(&out),
            vec![
                (0, 0, 0),
                (1, 1, 0),
                (2, 2, 0),
                (3, 3, 1),
                (4, 3, 1),
                (5, 4, 1),
                (6, 4, 1)
            ]
        );
    }

    #[test]
    fn test_single_locality() {
        let out = placement(4, 4, 1);
        assert_eq!(
            triples(&out),
            vec![(0, 0, 0), (1, 1, 0), (2, 2, 0), (3, 3, 0)]
        );
    }

    #[test]
    fn test_even_split() {
        let out = placement(8, 4, 2);
        let counts = workers_per_partition(&out);
        assert_eq!(counts.values().copied().collect::<Vec<_>>(), vec![2, 2, 2, 2]);
        assert!(out[..4].iter().all(|p| p.locality == 0));
        assert!(out[4..].iter().all(|p| p.locality == 1));
    }

    #[test]
    fn test_zero_counts() {
        assert!(placement(0, 1, 1).is_empty());
        assert!(placement(1, 0, 1).is_empty());
        assert!(placement(1, 1, 0).is_empty());
    }

    // ==================== Coverage Tests ====================

    #[test]
    fn test_every_partition_served() {
        for localities in 1..=6 {
            for partitions in 1..=9 {
                for workers in partitions..=partitions * 3 {
                    let out = placement(workers, partitions, localities);
                    assert_eq!(out.len(), workers);
                    for (i, p) in out.iter().enumerate() {
                        assert_eq!(p.worker, i);
                        assert!(p.locality < localities);
                        assert!(p.partition < partitions);
                    }
                    let counts = workers_per_partition(&out);
                    assert_eq!(counts.len(), partitions, "W={workers} P={partitions} L={localities}");
                    if partitions <= localities {
                        continue;
                    }
                    let min = counts.values().min().copied().unwrap_or(0);
                    let max = counts.values().max().copied().unwrap_or(0);
                    assert!(max - min <= 1, "W={workers} P={partitions} L={localities}");
                }
            }
        }
    }
}
