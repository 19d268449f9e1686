//! Result codes carried by ops, transactions and the bulk pool
//!
//! Codes follow the negative-errno convention of the log backend:
//! zero is success, anything below zero is a failure.

/// Success
pub const OK: i32 = 0;
/// I/O error while persisting a transaction
pub const EIO: i32 = -5;
/// Out of memory during preallocation
pub const ENOMEM: i32 = -12;
/// Argument list too long: a transaction asked for more than the log admits
pub const E2BIG: i32 = -7;
/// Invalid argument
pub const EINVAL: i32 = -22;
/// No space left in the log
pub const ENOSPC: i32 = -28;
/// Operation canceled
pub const ECANCELED: i32 = -125;

/// Human readable name of a result code
pub fn name(rc: i32) -> &'static str {
    match rc {
        OK => "OK",
        EIO => "EIO",
        ENOMEM => "ENOMEM",
        E2BIG => "E2BIG",
        EINVAL => "EINVAL",
        ENOSPC => "ENOSPC",
        ECANCELED => "ECANCELED",
        _ => "UNKNOWN",
    }
}
