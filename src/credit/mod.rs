//! Transaction credit
//!
//! A credit is an estimate of how much log space a transaction consumes:
//! the number of captured regions, their total size in bytes, and the
//! number of callbacks the transaction will register. Credits size
//! transactions before they are opened and decide whether another work
//! item still fits into the current batch.
//!
//! Credits are plain values. Arithmetic saturates at `u64::MAX` so that
//! `TxCredit::INVALID` stays invalid when anything is added to it.
//! Saturation loses information: once a component of `a + b` reaches
//! `u64::MAX`, subtracting `b` no longer gives `a` back.
//!
//! In debug builds every credit also carries a per-category balance
//! (`CreditUser`) so accounting mistakes in one subsystem can be traced
//! back. The balance never takes part in comparisons.

use std::fmt;
use std::iter::Sum;
use std::mem;
use std::ops::{Add, AddAssign, Mul, Sub};

use serde::{Deserialize, Serialize};

/// Subsystems that account credit separately in debug builds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CreditUser {
    BtreeInsert,
    BtreeDelete,
    BtreeUpdate,
    EmapSplit,
    EmapPaste,
}

impl CreditUser {
    /// Number of accounted categories
    pub const COUNT: usize = 5;

    /// All categories in declaration order
    pub const ALL: [CreditUser; CreditUser::COUNT] = [
        CreditUser::BtreeInsert,
        CreditUser::BtreeDelete,
        CreditUser::BtreeUpdate,
        CreditUser::EmapSplit,
        CreditUser::EmapPaste,
    ];

    #[cfg_attr(not(debug_assertions), allow(dead_code))]
    fn index(self) -> usize {
        match self {
            CreditUser::BtreeInsert => 0,
            CreditUser::BtreeDelete => 1,
            CreditUser::BtreeUpdate => 2,
            CreditUser::EmapSplit => 3,
            CreditUser::EmapPaste => 4,
        }
    }
}

/// Resource estimate for one transaction
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TxCredit {
    /// Number of captured regions
    pub regions: u64,
    /// Total size of captured regions in bytes
    pub bytes: u64,
    /// Number of callbacks registered with the transaction
    #[serde(default)]
    pub callbacks: u64,
    #[cfg(debug_assertions)]
    #[serde(skip)]
    balance: [u64; CreditUser::COUNT],
}

impl TxCredit {
    /// Empty credit
    pub const ZERO: TxCredit = TxCredit::with_callbacks(0, 0, 0);

    /// A credit no transaction can ever satisfy
    pub const INVALID: TxCredit = TxCredit::with_callbacks(u64::MAX, u64::MAX, 0);

    /// Credit for `regions` regions totalling `bytes` bytes
    pub const fn new(regions: u64, bytes: u64) -> Self {
        Self::with_callbacks(regions, bytes, 0)
    }

    /// Credit including a callback count
    pub const fn with_callbacks(regions: u64, bytes: u64, callbacks: u64) -> Self {
        Self {
            regions,
            bytes,
            callbacks,
            #[cfg(debug_assertions)]
            balance: [0; CreditUser::COUNT],
        }
    }

    /// Credit for one region of `bytes` bytes
    pub const fn of_bytes(bytes: u64) -> Self {
        Self::new(1, bytes)
    }

    /// Credit for capturing one value of type `T`
    pub const fn of_type<T>() -> Self {
        Self::new(1, mem::size_of::<T>() as u64)
    }

    /// Credit attributed to `user`
    ///
    /// The attribution is only recorded in debug builds.
    #[cfg_attr(not(debug_assertions), allow(unused_variables))]
    pub fn for_user(user: CreditUser, regions: u64, bytes: u64) -> Self {
        #[allow(unused_mut)]
        let mut credit = Self::new(regions, bytes);
        #[cfg(debug_assertions)]
        {
            credit.balance[user.index()] = regions;
        }
        credit
    }

    /// Regions attributed to `user` (always zero in release builds)
    #[cfg_attr(not(debug_assertions), allow(unused_variables))]
    pub fn balance(&self, user: CreditUser) -> u64 {
        #[cfg(debug_assertions)]
        {
            self.balance[user.index()]
        }
        #[cfg(not(debug_assertions))]
        {
            0
        }
    }

    /// True for the all-max credit
    pub fn is_invalid(&self) -> bool {
        self.regions == u64::MAX && self.bytes == u64::MAX
    }

    /// True when both regions and bytes are zero
    pub fn is_zero(&self) -> bool {
        self.regions == 0 && self.bytes == 0 && self.callbacks == 0
    }

    /// Subtraction that fails when any component of `other` exceeds `self`
    pub fn checked_sub(&self, other: &TxCredit) -> Option<TxCredit> {
        #[allow(unused_mut)]
        let mut out = TxCredit::with_callbacks(
            self.regions.checked_sub(other.regions)?,
            self.bytes.checked_sub(other.bytes)?,
            self.callbacks.checked_sub(other.callbacks)?,
        );
        #[cfg(debug_assertions)]
        for i in 0..CreditUser::COUNT {
            out.balance[i] = self.balance[i].saturating_sub(other.balance[i]);
        }
        Some(out)
    }

    /// Scales every component by `k`
    pub fn mul(&self, k: u64) -> TxCredit {
        #[allow(unused_mut)]
        let mut out = TxCredit::with_callbacks(
            self.regions.saturating_mul(k),
            self.bytes.saturating_mul(k),
            self.callbacks.saturating_mul(k),
        );
        #[cfg(debug_assertions)]
        for i in 0..CreditUser::COUNT {
            out.balance[i] = self.balance[i].saturating_mul(k);
        }
        out
    }

    /// Scales regions and bytes by `bp` basis points (`bp / 10000`)
    pub fn mul_bp(&self, bp: u32) -> TxCredit {
        let scale = |v: u64| -> u64 {
            let scaled = u128::from(v) * u128::from(bp) / 10_000;
            u64::try_from(scaled).unwrap_or(u64::MAX)
        };
        TxCredit::with_callbacks(scale(self.regions), scale(self.bytes), self.callbacks)
    }

    /// `self += c * k`
    pub fn mac(&mut self, c: &TxCredit, k: u64) {
        *self += c.mul(k);
    }

    /// Component-wise maximum
    pub fn max(&self, other: &TxCredit) -> TxCredit {
        #[allow(unused_mut)]
        let mut out = TxCredit::with_callbacks(
            self.regions.max(other.regions),
            self.bytes.max(other.bytes),
            self.callbacks.max(other.callbacks),
        );
        #[cfg(debug_assertions)]
        for i in 0..CreditUser::COUNT {
            out.balance[i] = self.balance[i].max(other.balance[i]);
        }
        out
    }

    /// `self += max(a, b)`
    pub fn add_max(&mut self, a: &TxCredit, b: &TxCredit) {
        *self += a.max(b);
    }

    /// Partial order over the log-space dimensions (regions and bytes)
    ///
    /// Callbacks do not consume log space and are not compared.
    pub fn le(&self, other: &TxCredit) -> bool {
        self.regions <= other.regions && self.bytes <= other.bytes
    }
}

impl PartialEq for TxCredit {
    fn eq(&self, other: &Self) -> bool {
        self.regions == other.regions
            && self.bytes == other.bytes
            && self.callbacks == other.callbacks
    }
}

impl Eq for TxCredit {}

/// Component-wise saturating sum
impl Add for TxCredit {
    type Output = TxCredit;

    fn add(self, other: TxCredit) -> TxCredit {
        #[allow(unused_mut)]
        let mut out = TxCredit::with_callbacks(
            self.regions.saturating_add(other.regions),
            self.bytes.saturating_add(other.bytes),
            self.callbacks.saturating_add(other.callbacks),
        );
        #[cfg(debug_assertions)]
        for i in 0..CreditUser::COUNT {
            out.balance[i] = self.balance[i].saturating_add(other.balance[i]);
        }
        out
    }
}

impl AddAssign for TxCredit {
    fn add_assign(&mut self, other: TxCredit) {
        *self = *self + other;
    }
}

impl Sub for TxCredit {
    type Output = TxCredit;

    /// Panics when `other` exceeds `self` in any component.
    fn sub(self, other: TxCredit) -> TxCredit {
        match self.checked_sub(&other) {
            Some(out) => out,
            None => panic!("credit underflow: {} - {}", self, other),
        }
    }
}

impl Mul<u64> for TxCredit {
    type Output = TxCredit;

    fn mul(self, k: u64) -> TxCredit {
        TxCredit::mul(&self, k)
    }
}

impl Sum for TxCredit {
    fn sum<I: Iterator<Item = TxCredit>>(iter: I) -> TxCredit {
        iter.fold(TxCredit::ZERO, |acc, c| acc + c)
    }
}

impl fmt::Display for TxCredit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.regions, self.bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    // ==================== Arithmetic Tests ====================

    #[test]
    fn test_add_includes_callbacks() {
        let a = TxCredit::with_callbacks(1, 10, 1);
        let b = TxCredit::with_callbacks(2, 20, 3);
        assert_eq!(a + b, TxCredit::with_callbacks(3, 30, 4));
    }

    #[test]
    fn test_checked_sub_rejects_underflow() {
        let a = TxCredit::new(1, 10);
        let b = TxCredit::new(2, 5);
        assert!(a.checked_sub(&b).is_none());
        assert_eq!(b.checked_sub(&TxCredit::new(1, 5)), Some(TxCredit::new(1, 0)));
    }

    #[test]
    fn test_saturated_add_is_not_reversible() {
        let a = TxCredit::new(u64::MAX - 1, 10);
        let b = TxCredit::new(2, 5);
        let sum = a + b;
        assert_eq!(sum, TxCredit::new(u64::MAX, 15));
        assert_eq!(sum.checked_sub(&b), Some(TxCredit::new(u64::MAX - 2, 10)));
        assert_ne!(sum - b, a);

        // Reaching u64::MAX without overflow keeps the sum exact
        let c = TxCredit::new(u64::MAX - 2, 10);
        assert_eq!((c + b) - b, c);
    }

    #[test]
    #[should_panic(expected = "credit underflow")]
    fn test_sub_panics_on_underflow() {
        let _ = TxCredit::new(1, 1) - TxCredit::new(1, 2);
    }

    #[test]
    fn test_mul_and_mac() {
        let c = TxCredit::new(2, 100);
        assert_eq!(c * 3, TxCredit::new(6, 300));

        let mut acc = TxCredit::new(1, 1);
        acc.mac(&c, 2);
        assert_eq!(acc, TxCredit::new(5, 201));
    }

    #[test]
    fn test_mul_bp() {
        let c = TxCredit::new(200, 10_000);
        assert_eq!(c.mul_bp(5_000), TxCredit::new(100, 5_000));
        assert_eq!(c.mul_bp(10_000), c);
        assert_eq!(c.mul_bp(0), TxCredit::ZERO);
        // u128 intermediate keeps large values exact
        assert_eq!(TxCredit::INVALID.mul_bp(10_000), TxCredit::INVALID);
    }

    #[test]
    fn test_max_and_add_max() {
        let a = TxCredit::new(5, 10);
        let b = TxCredit::new(3, 40);
        assert_eq!(a.max(&b), TxCredit::new(5, 40));

        let mut acc = TxCredit::new(1, 1);
        acc.add_max(&a, &b);
        assert_eq!(acc, TxCredit::new(6, 41));
    }

    #[test]
    fn test_le_is_partial() {
        let a = TxCredit::new(5, 10);
        let b = TxCredit::new(3, 40);
        assert!(!a.le(&b));
        assert!(!b.le(&a));
        assert!(a.le(&a));
        assert!(a.le(&TxCredit::INVALID));
    }

    #[test]
    fn test_invalid_stays_invalid() {
        let c = TxCredit::INVALID + TxCredit::new(1, 1);
        assert!(c.is_invalid());
        assert!(!c.le(&TxCredit::new(1_000, 1_000_000)));
    }

    // ==================== Constructor Tests ====================

    #[test]
    fn test_of_type_and_bytes() {
        assert_eq!(TxCredit::of_type::<u64>(), TxCredit::new(1, 8));
        assert_eq!(TxCredit::of_type::<[u8; 24]>(), TxCredit::new(1, 24));
        assert_eq!(TxCredit::of_bytes(7), TxCredit::new(1, 7));
    }

    #[test]
    fn test_sum() {
        let total: TxCredit = (1..=4).map(|i| TxCredit::new(1, i)).sum();
        assert_eq!(total, TxCredit::new(4, 10));
    }

    #[test]
    fn test_display() {
        assert_eq!(TxCredit::new(3, 4096).to_string(), "(3,4096)");
    }

    #[test]
    fn test_serde_defaults_callbacks() {
        let c: TxCredit = serde_json::from_str(r#"{"regions":2,"bytes":64}"#).unwrap();
        assert_eq!(c, TxCredit::new(2, 64));
    }

    #[cfg(debug_assertions)]
    #[test]
    fn test_balance_tracks_users() {
        let insert = TxCredit::for_user(CreditUser::BtreeInsert, 3, 300);
        let split = TxCredit::for_user(CreditUser::EmapSplit, 1, 50);
        let total = insert + split + insert;
        assert_eq!(total.balance(CreditUser::BtreeInsert), 6);
        assert_eq!(total.balance(CreditUser::EmapSplit), 1);
        assert_eq!(total.balance(CreditUser::BtreeDelete), 0);

        // balance does not affect equality
        assert_eq!(insert, TxCredit::new(3, 300));
    }

    // ==================== Property Tests ====================

    // Components stay below u32::MAX so no sum reaches saturation
    fn credit() -> impl Strategy<Value = TxCredit> {
        (0..u32::MAX as u64, 0..u32::MAX as u64, 0..1024u64)
            .prop_map(|(r, b, c)| TxCredit::with_callbacks(r, b, c))
    }

    proptest! {
        #[test]
        fn prop_sub_undoes_add(a in credit(), b in credit()) {
            prop_assert_eq!((a + b) - b, a);
        }

        #[test]
        fn prop_add_commutes(a in credit(), b in credit()) {
            prop_assert_eq!(a + b, b + a);
        }

        #[test]
        fn prop_operands_le_sum(a in credit(), b in credit()) {
            prop_assert!(a.le(&(a + b)));
            prop_assert!(b.le(&(a + b)));
        }

        #[test]
        fn prop_max_bounds_both(a in credit(), b in credit()) {
            let m = a.max(&b);
            prop_assert!(a.le(&m));
            prop_assert!(b.le(&m));
        }

        #[test]
        fn prop_mul_is_repeated_add(a in credit(), k in 0u64..8) {
            let repeated = (0..k).fold(TxCredit::ZERO, |acc, _| acc + a);
            prop_assert_eq!(a * k, repeated);
        }
    }
}
