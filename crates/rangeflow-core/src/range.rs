//! Interval abstract domain over fixed-width machine integers.
//!
//! A [`Range`] is a closed interval `[lower, upper]` at a bit-width of 1 to
//! 64, stored in a canonical signed representation and readable under both
//! the signed and the unsigned interpretation. The lattice has three
//! variants: `Empty` (bottom, identity for union), `Regular` (a proper
//! interval) and `Full` (top, every value of the width). Any result that is
//! not representable as one contiguous interval inside the signed window
//! collapses to `Full`; this keeps the domain small at the cost of the
//! complement ("anti") ranges some analyses carry.
//!
//! The transfer functions are wraparound-aware: bounds that leave the signed
//! window are wrapped back when the interval stays contiguous (two's
//! complement), and collapse to `Full` otherwise.

use serde::{Deserialize, Serialize};

use crate::ir::Predicate;

/// Bound arithmetic happens in `i128`, which comfortably holds sums, shifts
/// and products of 64-bit quantities.
pub type Bound = i128;

/// Widest supported variable.
pub const MAX_BITWIDTH: u8 = 64;

fn min_signed(bw: u8) -> Bound {
    -(1i128 << (bw - 1))
}

fn max_signed(bw: u8) -> Bound {
    (1i128 << (bw - 1)) - 1
}

fn max_unsigned(bw: u8) -> Bound {
    (1i128 << bw) - 1
}

/// Reduce `v` into `[min_signed(bw), max_signed(bw)]` modulo `2^bw`.
fn wrap_signed(v: Bound, bw: u8) -> Bound {
    let m = 1i128 << bw;
    let r = v.rem_euclid(m);
    if r > max_signed(bw) {
        r - m
    } else {
        r
    }
}

/// Reduce `v` into `[0, 2^bw - 1]`.
fn wrap_unsigned(v: Bound, bw: u8) -> Bound {
    v.rem_euclid(1i128 << bw)
}

/// Consecutive one bits of `v` starting at bit `bw - 1`.
fn leading_ones(v: Bound, bw: u8) -> u32 {
    ((wrap_unsigned(v, bw) as u128) << (128 - u32::from(bw))).leading_ones()
}

/// Consecutive zero bits of `v` starting at bit `bw - 1`.
fn leading_zeros(v: Bound, bw: u8) -> u32 {
    let shifted = (wrap_unsigned(v, bw) as u128) << (128 - u32::from(bw));
    shifted.leading_zeros().min(u32::from(bw))
}

/// Bits needed to address every bit position of a `bw`-wide value.
fn shift_amount_bits(bw: u8) -> u8 {
    let bits = (u32::from(bw)).next_power_of_two().trailing_zeros() as u8;
    bits.max(1)
}

/// Lattice variant of a [`Range`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RangeKind {
    /// No possible value.
    Empty,
    /// A proper interval `lower <= upper` inside the signed window.
    Regular,
    /// Every value of the bit-width.
    Full,
}

/// An interval of possible values at a fixed bit-width.
///
/// Construction normalizes: sentinel bounds clamp to the width's signed
/// window, out-of-window bounds wrap when the interval stays contiguous, and
/// everything else collapses to [`RangeKind::Full`]. Equality is therefore
/// structural on the canonical form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    kind: RangeKind,
    bw: u8,
    lo: Bound,
    hi: Bound,
}

impl Range {
    /// Unbounded-low sentinel accepted by [`Range::new`].
    pub const MIN: Bound = i128::MIN;
    /// Unbounded-high sentinel accepted by [`Range::new`].
    pub const MAX: Bound = i128::MAX;

    pub fn empty(bw: u8) -> Self {
        debug_assert!(bw >= 1 && bw <= MAX_BITWIDTH);
        Self {
            kind: RangeKind::Empty,
            bw,
            lo: 0,
            hi: 0,
        }
    }

    pub fn full(bw: u8) -> Self {
        debug_assert!(bw >= 1 && bw <= MAX_BITWIDTH);
        Self {
            kind: RangeKind::Full,
            bw,
            lo: min_signed(bw),
            hi: max_signed(bw),
        }
    }

    pub fn constant(bw: u8, value: Bound) -> Self {
        Self::new(bw, value, value)
    }

    /// Normalizing constructor. See the module docs for the wrap rules.
    pub fn new(bw: u8, lo: Bound, hi: Bound) -> Self {
        debug_assert!(bw >= 1 && bw <= MAX_BITWIDTH, "invalid bitwidth {bw}");
        let min_s = min_signed(bw);
        let max_s = max_signed(bw);
        let lo = if lo == Self::MIN { min_s } else { lo };
        let hi = if hi == Self::MAX { max_s } else { hi };

        // A circular interval (start past end) covers the whole window.
        if lo > hi {
            return Self::full(bw);
        }
        if lo >= min_s && hi <= max_s {
            if lo == min_s && hi == max_s {
                return Self::full(bw);
            }
            return Self {
                kind: RangeKind::Regular,
                bw,
                lo,
                hi,
            };
        }

        let span = hi.saturating_sub(lo);
        if span >= (1i128 << bw) {
            return Self::full(bw);
        }
        let wlo = wrap_signed(lo, bw);
        let whi = wrap_signed(hi, bw);
        if wlo <= whi {
            if wlo == min_s && whi == max_s {
                return Self::full(bw);
            }
            Self {
                kind: RangeKind::Regular,
                bw,
                lo: wlo,
                hi: whi,
            }
        } else {
            // Wrapped across the window boundary: not contiguous.
            Self::full(bw)
        }
    }

    pub fn kind(&self) -> RangeKind {
        self.kind
    }

    pub fn bitwidth(&self) -> u8 {
        self.bw
    }

    pub fn is_empty(&self) -> bool {
        self.kind == RangeKind::Empty
    }

    pub fn is_regular(&self) -> bool {
        self.kind == RangeKind::Regular
    }

    pub fn is_full_set(&self) -> bool {
        self.kind == RangeKind::Full
    }

    pub fn is_constant(&self) -> bool {
        self.kind == RangeKind::Regular && self.lo == self.hi
    }

    pub fn signed_min(&self) -> Bound {
        debug_assert!(!self.is_empty());
        self.lo
    }

    pub fn signed_max(&self) -> Bound {
        debug_assert!(!self.is_empty());
        self.hi
    }

    pub fn unsigned_min(&self) -> Bound {
        debug_assert!(!self.is_empty());
        if self.lo > 0 || self.hi < 0 {
            wrap_unsigned(self.lo, self.bw)
        } else {
            0
        }
    }

    pub fn unsigned_max(&self) -> Bound {
        debug_assert!(!self.is_empty());
        if self.hi < 0 || self.lo >= 0 {
            wrap_unsigned(self.hi, self.bw)
        } else {
            max_unsigned(self.bw)
        }
    }

    /// Number of representable values in the interval.
    pub fn span(&self) -> i128 {
        match self.kind {
            RangeKind::Empty => 0,
            RangeKind::Full => 1i128 << self.bw,
            RangeKind::Regular => self.hi - self.lo + 1,
        }
    }

    /// Membership under the signed interpretation (the argument is wrapped
    /// into the window first).
    pub fn contains_signed(&self, v: Bound) -> bool {
        let v = wrap_signed(v, self.bw);
        match self.kind {
            RangeKind::Empty => false,
            RangeKind::Full => true,
            RangeKind::Regular => self.lo <= v && v <= self.hi,
        }
    }

    /// `other ⊆ self`.
    pub fn contains_range(&self, other: &Range) -> bool {
        match (self.kind, other.kind) {
            (_, RangeKind::Empty) => true,
            (RangeKind::Full, _) => true,
            (RangeKind::Empty, _) => false,
            (RangeKind::Regular, RangeKind::Full) => false,
            (RangeKind::Regular, RangeKind::Regular) => {
                self.lo <= other.lo && other.hi <= self.hi
            }
        }
    }

    // ---- lattice operations -------------------------------------------------

    /// Least upper bound (`sup`): the tightest interval containing both.
    pub fn union_with(&self, other: &Range) -> Range {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Range::new(self.bw, self.lo.min(other.lo), self.hi.max(other.hi))
    }

    /// Greatest lower bound (`inf`): the intersection, `Empty` when disjoint.
    pub fn intersect_with(&self, other: &Range) -> Range {
        if self.is_empty() || other.is_empty() {
            return Range::empty(self.bw);
        }
        let lo = self.lo.max(other.lo);
        let hi = self.hi.min(other.hi);
        if hi < lo {
            Range::empty(self.bw)
        } else {
            Range::new(self.bw, lo, hi)
        }
    }

    // ---- arithmetic ---------------------------------------------------------

    pub fn add(&self, other: &Range) -> Range {
        let bw = self.bw;
        if self.is_empty() || other.is_empty() {
            return Range::empty(bw);
        }
        if self.is_full_set() || other.is_full_set() {
            return Range::full(bw);
        }
        if other.is_constant() {
            let c = other.lo;
            return Range::new(bw, self.lo + c, self.hi + c);
        }
        if self.is_constant() {
            let c = self.lo;
            return Range::new(bw, other.lo + c, other.hi + c);
        }
        let res = Range::new(bw, self.lo + other.lo, self.hi + other.hi);
        // A sum no wider than an operand means the bounds wrapped past each
        // other.
        if res.span() <= self.span() || res.span() <= other.span() {
            return Range::full(bw);
        }
        res
    }

    pub fn sub(&self, other: &Range) -> Range {
        let bw = self.bw;
        if self.is_empty() || other.is_empty() {
            return Range::empty(bw);
        }
        if self.is_full_set() || other.is_full_set() {
            return Range::full(bw);
        }
        if other.is_constant() {
            let c = other.lo;
            return Range::new(bw, self.lo - c, self.hi - c);
        }
        let res = Range::new(bw, self.lo - other.hi, self.hi - other.lo);
        if res.span() < self.span() || res.span() < other.span() {
            return Range::full(bw);
        }
        res
    }

    pub fn mul(&self, other: &Range) -> Range {
        let bw = self.bw;
        if self.is_empty() || other.is_empty() {
            return Range::empty(bw);
        }
        if self.is_full_set() || other.is_full_set() {
            return Range::full(bw);
        }

        // Multiplication is signedness-independent but the interval we get
        // is not: compute one candidate treating the operands as unsigned
        // and one as signed, keep the tighter.
        let unsigned = {
            let lo = (self.unsigned_min() as u128).checked_mul(other.unsigned_min() as u128);
            let hi = (self.unsigned_max() as u128).checked_mul(other.unsigned_max() as u128);
            match (lo, hi) {
                (Some(lo), Some(hi)) if hi <= i128::MAX as u128 => {
                    Range::new(bw, lo as i128, hi as i128)
                }
                _ => Range::full(bw),
            }
        };

        let signed = {
            let corners = [
                self.lo.checked_mul(other.lo),
                self.lo.checked_mul(other.hi),
                self.hi.checked_mul(other.lo),
                self.hi.checked_mul(other.hi),
            ];
            if corners.iter().any(Option::is_none) {
                Range::full(bw)
            } else {
                let lo = corners.iter().map(|c| c.unwrap_or(0)).min().unwrap_or(0);
                let hi = corners.iter().map(|c| c.unwrap_or(0)).max().unwrap_or(0);
                Range::new(bw, lo, hi)
            }
        };

        if unsigned.span() < signed.span() {
            unsigned
        } else {
            signed
        }
    }

    pub fn sdiv(&self, other: &Range) -> Range {
        let bw = self.bw;
        if self.is_empty() || other.is_empty() {
            return Range::empty(bw);
        }
        if self.is_full_set() {
            return Range::full(bw);
        }

        let (a, b) = (self.lo, self.hi);
        let (mut c1, mut d1) = (other.lo, other.hi);
        if c1 == 0 && d1 == 0 {
            return Range::full(bw);
        }
        // Split the divisor interval around zero so no candidate divides by
        // it; a divisor strictly one side of zero needs no split.
        let zero_in = c1 < 0 && d1 > 0;
        let c2 = if zero_in {
            d1 = -1;
            1
        } else {
            if c1 == 0 {
                c1 = 1;
            }
            c1
        };
        let mut d2 = other.hi;
        if d2 == 0 {
            d1 = -1;
            d2 = -1;
        }

        let all = [
            a / c1,
            a / d1,
            b / c1,
            b / d1,
            a / c2,
            a / d2,
            b / c2,
            b / d2,
        ];
        let candidates = if zero_in { &all[..] } else { &all[..4] };
        let lo = candidates.iter().copied().min().unwrap_or(0);
        let hi = candidates.iter().copied().max().unwrap_or(0);
        Range::new(bw, lo, hi)
    }

    pub fn udiv(&self, other: &Range) -> Range {
        let bw = self.bw;
        if self.is_empty() || other.is_empty() {
            return Range::empty(bw);
        }
        if self.is_full_set() {
            return Range::full(bw);
        }
        let a = self.unsigned_min();
        let b = self.unsigned_max();
        let mut c = other.unsigned_min();
        let d = other.unsigned_max();
        if c == 0 && d == 0 {
            return Range::full(bw);
        }
        if c == 0 {
            c = 1;
        }
        Range::new(bw, a / d, b / c)
    }

    pub fn srem(&self, other: &Range) -> Range {
        let bw = self.bw;
        if self.is_empty() || other.is_empty() {
            return Range::empty(bw);
        }
        if self.is_full_set() {
            return Range::full(bw);
        }

        let (a, b) = (self.lo, self.hi);
        let (c, d) = (other.lo, other.hi);
        if c <= 0 && d >= 0 {
            // Zero is a possible divisor; the domain has no trap to raise.
            return Range::full(bw);
        }

        let dmin = c.abs().min(d.abs());
        let dmax = c.abs().max(d.abs());
        let abs_min = a.abs().min(b.abs());
        let abs_max = a.abs().max(b.abs());

        if (abs_min < dmin && dmin < abs_max) || (abs_min < dmax && dmax < abs_max) {
            let lo = if a >= 0 {
                0
            } else if a.abs() < dmax {
                a
            } else {
                -(dmax - 1)
            };
            let hi = if b <= 0 {
                0
            } else if b.abs() < dmax {
                b
            } else {
                dmax - 1
            };
            return Range::new(bw, lo, hi);
        }
        if abs_max < dmin {
            return *self;
        }
        let lo = if a < 0 { -(dmax - 1) } else { 0 };
        let hi = if b > 0 { dmax - 1 } else { 0 };
        Range::new(bw, lo, hi)
    }

    pub fn urem(&self, other: &Range) -> Range {
        let bw = self.bw;
        if self.is_empty() || other.is_empty() {
            return Range::empty(bw);
        }
        if other.is_constant() {
            if other.lo == 0 {
                return Range::empty(bw);
            }
            if other.unsigned_min() == 1 {
                return Range::constant(bw, 0);
            }
        }

        let a = self.unsigned_min();
        let b = self.unsigned_max();
        let mut c = other.unsigned_min();
        let d = other.unsigned_max();
        if c == 0 && d == 0 {
            return Range::full(bw);
        }
        if c == 0 {
            c = 1;
        }

        let candidates = [
            if a < c { a } else { 0 },
            if a < d { a } else { 0 },
            if b < c { b } else { 0 },
            if b < d { b } else { 0 },
            if a < c { a } else { c - 1 },
            if a < d { a } else { d - 1 },
            if b < c { b } else { c - 1 },
            if b < d { b } else { d - 1 },
        ];
        let lo = candidates.iter().copied().min().unwrap_or(0);
        let hi = candidates.iter().copied().max().unwrap_or(0);
        Range::new(bw, lo, hi)
    }

    // ---- shifts -------------------------------------------------------------

    pub fn shl(&self, other: &Range) -> Range {
        let bw = self.bw;
        if self.is_empty() || other.is_empty() {
            return Range::empty(bw);
        }
        if self.is_full_set() || other.is_full_set() {
            return Range::full(bw);
        }

        let amount_bits = shift_amount_bits(bw);
        if self.is_constant() && other.is_constant() {
            let amount = wrap_unsigned(other.lo, amount_bits);
            let shifted = wrap_signed(self.lo << amount, bw);
            return Range::constant(bw, shifted);
        }

        let (a, b) = (self.lo, self.hi);
        let amounts = other.zext_or_trunc(amount_bits);
        let c = amounts.unsigned_min();
        let d = amounts.unsigned_max();
        let width = Bound::from(bw);

        if c >= width {
            return Range::constant(bw, 0);
        }
        if d >= width {
            return Range::full(bw);
        }
        let d_u32 = d as u32;
        if a < 0 && b < 0 {
            if d_u32 > leading_ones(a, bw) {
                return Range::full(bw);
            }
            return Range::new(bw, a << d, b << c);
        }
        if a < 0 {
            if d_u32 > leading_ones(a, bw).min(leading_zeros(b, bw)) {
                return Range::full(bw);
            }
            return Range::new(bw, a << d, b << d);
        }
        if d_u32 > leading_zeros(b, bw) {
            return Range::full(bw);
        }
        Range::new(bw, a << c, b << d)
    }

    /// Right shift; `arithmetic` selects sign- vs zero-fill.
    pub fn shr(&self, other: &Range, arithmetic: bool) -> Range {
        let bw = self.bw;
        if self.is_empty() || other.is_empty() {
            return Range::empty(bw);
        }

        let amounts = other.zext_or_trunc(shift_amount_bits(bw));
        let c = amounts.unsigned_min();
        let d = amounts.unsigned_max().min(127);

        if arithmetic {
            let a = self.signed_min();
            let b = self.signed_max();
            let lo = if a >= 0 { a >> d } else { a >> c };
            let hi = if b >= 0 { b >> c } else { b >> d };
            Range::new(bw, lo, hi)
        } else {
            let a = self.unsigned_min();
            let b = self.unsigned_max();
            Range::new(bw, a >> d, b >> c)
        }
    }

    // ---- bitwise ------------------------------------------------------------

    pub fn bit_and(&self, other: &Range) -> Range {
        let bw = self.bw;
        if self.is_empty() || other.is_empty() {
            return Range::empty(bw);
        }
        // All-ones is the identity.
        if self.is_constant() && self.lo == -1 {
            return *other;
        }
        if other.is_constant() && other.lo == -1 {
            return *self;
        }
        let (lo, hi) = bitwise::and(bw, self.lo, self.hi, other.lo, other.hi);
        Range::new(bw, lo, hi)
    }

    pub fn bit_or(&self, other: &Range) -> Range {
        let bw = self.bw;
        if self.is_empty() || other.is_empty() {
            return Range::empty(bw);
        }
        if self.is_constant() && self.lo == 0 {
            return *other;
        }
        if other.is_constant() && other.lo == 0 {
            return *self;
        }
        let (lo, hi) = bitwise::or(bw, self.lo, self.hi, other.lo, other.hi);
        Range::new(bw, lo, hi)
    }

    pub fn bit_xor(&self, other: &Range) -> Range {
        let bw = self.bw;
        if self.is_empty() || other.is_empty() {
            return Range::empty(bw);
        }
        let (a, b) = (self.lo, self.hi);
        let (c, d) = (other.lo, other.hi);
        if a >= 0 && c >= 0 {
            let (lo, hi) = bitwise::xor(bw, a, b, c, d);
            return Range::new(bw, lo, hi);
        }
        // x ^ -1 == -1 - x, which `sub` handles precisely.
        if a == -1 && b == -1 && c >= 0 {
            return self.sub(other);
        }
        if c == -1 && d == -1 && a >= 0 {
            return other.sub(self);
        }
        Range::full(bw)
    }

    pub fn bit_not(&self) -> Range {
        if self.is_empty() {
            return *self;
        }
        Range::new(self.bw, !self.hi, !self.lo)
    }

    pub fn negate(&self) -> Range {
        if self.is_empty() {
            return *self;
        }
        Range::new(self.bw, -self.hi, -self.lo)
    }

    pub fn abs(&self) -> Range {
        if self.is_empty() || self.is_full_set() {
            return *self;
        }
        let min_s = min_signed(self.bw);
        let (a, b) = (self.lo, self.hi);
        if b < 0 {
            if a == min_s {
                return Range::full(self.bw);
            }
            return Range::new(self.bw, -b, -a);
        }
        if a < 0 {
            if a == min_s {
                return Range::full(self.bw);
            }
            return Range::new(self.bw, 0, b.max(-a));
        }
        *self
    }

    // ---- width casts --------------------------------------------------------

    pub fn truncate(&self, bw: u8) -> Range {
        if self.is_empty() {
            return Range::empty(bw);
        }
        if bw == self.bw {
            return *self;
        }
        let a = self.signed_min();
        let b = self.signed_max();
        if self.is_full_set() || b - a > max_unsigned(bw) {
            return Range::full(bw);
        }
        let lo = wrap_signed(a, bw);
        let hi = wrap_signed(b, bw);
        if a < 0 && b >= 0 && (hi < 0 || lo > 0) {
            // The wrapped interval straddles the new window boundary.
            return Range::full(bw);
        }
        if lo > hi {
            return Range::full(bw);
        }
        Range::new(bw, lo, hi)
    }

    pub fn sext_or_trunc(&self, bw: u8) -> Range {
        if bw <= self.bw {
            return self.truncate(bw);
        }
        if self.is_empty() {
            return Range::empty(bw);
        }
        Range::new(bw, self.signed_min(), self.signed_max())
    }

    pub fn zext_or_trunc(&self, bw: u8) -> Range {
        if bw <= self.bw {
            return self.truncate(bw);
        }
        if self.is_empty() {
            return Range::empty(bw);
        }
        if self.lo < 0 && self.hi >= 0 {
            return Range::new(bw, 0, max_unsigned(self.bw));
        }
        Range::new(bw, self.unsigned_min(), self.unsigned_max())
    }

    // ---- comparisons --------------------------------------------------------

    /// Transfer function of a comparison producing a value at width `rbw`:
    /// `[1,1]` when the predicate must hold, `[0,0]` when it cannot, `[0,1]`
    /// otherwise.
    pub fn cmp(&self, pred: Predicate, other: &Range, rbw: u8) -> Range {
        if self.is_empty() || other.is_empty() {
            return Range::empty(rbw);
        }
        let always = Range::constant(rbw, 1);
        let never = Range::constant(rbw, 0);
        let maybe = Range::new(rbw, 0, 1);

        match pred {
            Predicate::Eq => {
                if self.intersect_with(other).is_empty() {
                    never
                } else if self.is_constant() && other.is_constant() && self.lo == other.lo {
                    always
                } else {
                    maybe
                }
            }
            Predicate::Ne => {
                if self.intersect_with(other).is_empty() {
                    always
                } else if self.is_constant() && other.is_constant() && self.lo == other.lo {
                    never
                } else {
                    maybe
                }
            }
            Predicate::Slt => Self::order(self.signed_max() < other.signed_min(),
                                          self.signed_min() >= other.signed_max(),
                                          always, never, maybe),
            Predicate::Sle => Self::order(self.signed_max() <= other.signed_min(),
                                          self.signed_min() > other.signed_max(),
                                          always, never, maybe),
            Predicate::Sgt => Self::order(self.signed_min() > other.signed_max(),
                                          self.signed_max() <= other.signed_min(),
                                          always, never, maybe),
            Predicate::Sge => Self::order(self.signed_min() >= other.signed_max(),
                                          self.signed_max() < other.signed_min(),
                                          always, never, maybe),
            Predicate::Ult => Self::order(self.unsigned_max() < other.unsigned_min(),
                                          self.unsigned_min() >= other.unsigned_max(),
                                          always, never, maybe),
            Predicate::Ule => Self::order(self.unsigned_max() <= other.unsigned_min(),
                                          self.unsigned_min() > other.unsigned_max(),
                                          always, never, maybe),
            Predicate::Ugt => Self::order(self.unsigned_min() > other.unsigned_max(),
                                          self.unsigned_max() <= other.unsigned_min(),
                                          always, never, maybe),
            Predicate::Uge => Self::order(self.unsigned_min() >= other.unsigned_max(),
                                          self.unsigned_max() < other.unsigned_min(),
                                          always, never, maybe),
        }
    }

    fn order(is_always: bool, is_never: bool, always: Range, never: Range, maybe: Range) -> Range {
        if is_always {
            always
        } else if is_never {
            never
        } else {
            maybe
        }
    }

    /// The set of values `x` for which `x pred other` can be satisfied, at
    /// `other`'s width. Used to materialize sigma intersections from branch
    /// predicates.
    pub fn satisfying_cmp_region(pred: Predicate, other: &Range) -> Range {
        let bw = other.bw;
        if other.is_empty() {
            return *other;
        }
        match pred {
            Predicate::Sge => Range::new(bw, other.signed_max(), Range::MAX),
            Predicate::Sgt => Range::new(bw, other.signed_max() + 1, Range::MAX),
            Predicate::Sle => Range::new(bw, Range::MIN, other.signed_min()),
            Predicate::Slt => Range::new(bw, Range::MIN, other.signed_min() - 1),
            Predicate::Uge => Range::new(bw, other.unsigned_max(), max_unsigned(bw)),
            Predicate::Ugt => Range::new(bw, other.unsigned_max() + 1, max_unsigned(bw)),
            Predicate::Ule => Range::new(bw, 0, other.unsigned_min()),
            Predicate::Ult => {
                if other.unsigned_min() == 0 {
                    // x < 0 is unsatisfiable unsigned.
                    Range::empty(bw)
                } else {
                    Range::new(bw, 0, other.unsigned_min() - 1)
                }
            }
            Predicate::Eq => *other,
            // The complement of an interval is not an interval; give up.
            Predicate::Ne => Range::full(bw),
        }
    }
}

impl std::fmt::Display for Range {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            RangeKind::Empty => write!(f, "empty<{}>", self.bw),
            RangeKind::Full => write!(f, "full<{}>", self.bw),
            RangeKind::Regular => write!(f, "[{}, {}]<{}>", self.lo, self.hi, self.bw),
        }
    }
}

/// Tight bitwise bound computation following the Hacker's Delight
/// algorithms, dispatched on the sign configuration of the operand bounds.
mod bitwise {
    use super::Bound;

    fn min_or(bw: u8, mut a: Bound, b: Bound, mut c: Bound, d: Bound) -> Bound {
        let mut m: Bound = 1 << (bw - 1);
        let mut nm: Bound = -(1 << (bw - 1));
        for _ in 0..bw {
            if !a & c & m != 0 {
                let temp = (a | m) & nm;
                if temp <= b {
                    a = temp;
                    break;
                }
            } else if a & !c & m != 0 {
                let temp = (c | m) & nm;
                if temp <= d {
                    c = temp;
                    break;
                }
            }
            m >>= 1;
            nm >>= 1;
        }
        a | c
    }

    fn max_or(bw: u8, a: Bound, mut b: Bound, c: Bound, mut d: Bound) -> Bound {
        let mut m: Bound = 1 << (bw - 1);
        let mut mm: Bound = m - 1;
        for _ in 0..bw {
            if b & d & m != 0 {
                let temp = (b - m) | mm;
                if temp >= a {
                    b = temp;
                    break;
                }
                let temp = (d - m) | mm;
                if temp >= c {
                    d = temp;
                    break;
                }
            }
            m >>= 1;
            mm >>= 1;
        }
        b | d
    }

    fn min_and(bw: u8, mut a: Bound, b: Bound, mut c: Bound, d: Bound) -> Bound {
        let mut m: Bound = 1 << (bw - 1);
        let mut nm: Bound = -(1 << (bw - 1));
        for _ in 0..bw {
            if !a & !c & m != 0 {
                let temp = (a | m) & nm;
                if temp <= b {
                    a = temp;
                    break;
                }
                let temp = (c | m) & nm;
                if temp <= d {
                    c = temp;
                    break;
                }
            }
            m >>= 1;
            nm >>= 1;
        }
        a & c
    }

    fn max_and(bw: u8, a: Bound, mut b: Bound, c: Bound, mut d: Bound) -> Bound {
        let mut m: Bound = 1 << (bw - 1);
        let mut mm: Bound = m - 1;
        for _ in 0..bw {
            if b & !d & m != 0 {
                let temp = (b & !m) | mm;
                if temp >= a {
                    b = temp;
                    break;
                }
            } else if !b & d & m != 0 {
                let temp = (d & !m) | mm;
                if temp >= c {
                    d = temp;
                    break;
                }
            }
            m >>= 1;
            mm >>= 1;
        }
        b & d
    }

    fn min_xor(bw: u8, mut a: Bound, b: Bound, mut c: Bound, d: Bound) -> Bound {
        let mut m: Bound = 1 << (bw - 1);
        let mut nm: Bound = -(1 << (bw - 1));
        for _ in 0..bw {
            if !a & c & m != 0 {
                let temp = (a | m) & nm;
                if temp <= b {
                    a = temp;
                }
            } else if a & !c & m != 0 {
                let temp = (c | m) & nm;
                if temp <= d {
                    c = temp;
                }
            }
            m >>= 1;
            nm >>= 1;
        }
        a ^ c
    }

    fn max_xor(bw: u8, a: Bound, mut b: Bound, c: Bound, mut d: Bound) -> Bound {
        let mut m: Bound = 1 << (bw - 1);
        let mut mm: Bound = m - 1;
        for _ in 0..bw {
            if b & d & m != 0 {
                let temp = (b - m) | mm;
                if temp >= a {
                    b = temp;
                } else {
                    let temp = (d - m) | mm;
                    if temp >= c {
                        d = temp;
                    }
                }
            }
            m >>= 1;
            mm >>= 1;
        }
        b ^ d
    }

    fn sign_class(a: Bound, b: Bound, c: Bound, d: Bound) -> u8 {
        (u8::from(a >= 0) << 3) | (u8::from(b >= 0) << 2) | (u8::from(c >= 0) << 1)
            | u8::from(d >= 0)
    }

    pub fn or(bw: u8, a: Bound, b: Bound, c: Bound, d: Bound) -> (Bound, Bound) {
        match sign_class(a, b, c, d) {
            0 | 3 | 12 | 15 => (min_or(bw, a, b, c, d), max_or(bw, a, b, c, d)),
            1 => (a, -1),
            4 => (c, -1),
            5 => (a.min(c), max_or(bw, 0, b, 0, d)),
            7 => (min_or(bw, a, -1, c, d), max_or(bw, 0, b, c, d)),
            13 => (min_or(bw, a, b, c, -1), max_or(bw, a, b, 0, d)),
            // a <= b and c <= d rule the remaining configurations out.
            _ => unreachable!("invalid sign configuration"),
        }
    }

    pub fn and(bw: u8, a: Bound, b: Bound, c: Bound, d: Bound) -> (Bound, Bound) {
        match sign_class(a, b, c, d) {
            0 | 3 | 12 | 15 => (min_and(bw, a, b, c, d), max_and(bw, a, b, c, d)),
            1 => (min_and(bw, a, b, c, -1), max_and(bw, a, b, 0, d)),
            4 => (min_and(bw, a, -1, c, d), max_and(bw, 0, b, c, d)),
            5 => (min_and(bw, a, -1, c, -1), b.max(d)),
            7 => (0, d),
            13 => (0, b),
            _ => unreachable!("invalid sign configuration"),
        }
    }

    /// Both operand intervals must be non-negative.
    pub fn xor(bw: u8, a: Bound, b: Bound, c: Bound, d: Bound) -> (Bound, Bound) {
        (min_xor(bw, a, b, c, d), max_xor(bw, a, b, c, d))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Predicate;

    fn r(bw: u8, lo: Bound, hi: Bound) -> Range {
        Range::new(bw, lo, hi)
    }

    #[test]
    fn full_range_construction() {
        let full = Range::full(8);
        assert_eq!(full.bitwidth(), 8);
        assert!(full.is_full_set());
        assert!(!full.is_regular());
        assert_eq!(full.unsigned_min(), 0);
        assert_eq!(full.unsigned_max(), 255);
        assert_eq!(full.signed_min(), -128);
        assert_eq!(full.signed_max(), 127);
    }

    #[test]
    fn regular_pos_pos() {
        let x = r(8, 10, 113);
        assert!(x.is_regular());
        assert!(!x.is_full_set());
        assert_eq!(x.unsigned_min(), 10);
        assert_eq!(x.unsigned_max(), 113);
        assert_eq!(x.signed_min(), 10);
        assert_eq!(x.signed_max(), 113);
    }

    #[test]
    fn regular_unsigned_bounds_wrap_into_signed_window() {
        let x = r(8, 129, 236);
        assert!(x.is_regular());
        assert_eq!(x.unsigned_min(), 129);
        assert_eq!(x.unsigned_max(), 236);
        assert_eq!(x.signed_min(), -127);
        assert_eq!(x.signed_max(), -20);
    }

    #[test]
    fn regular_neg_pos() {
        let x = r(8, -5, 113);
        assert_eq!(x.bitwidth(), 8);
        assert!(!x.is_full_set());
        assert_eq!(x.unsigned_min(), 0);
        assert_eq!(x.unsigned_max(), 255);
        assert_eq!(x.signed_min(), -5);
        assert_eq!(x.signed_max(), 113);
    }

    #[test]
    fn regular_neg_neg() {
        let x = r(8, -111, -36);
        assert_eq!(x.unsigned_min(), 145);
        assert_eq!(x.unsigned_max(), 220);
        assert_eq!(x.signed_min(), -111);
        assert_eq!(x.signed_max(), -36);
    }

    #[test]
    fn out_of_window_construction_collapses_to_full() {
        let x = r(8, -3, 257);
        assert!(x.is_full_set());
        assert_eq!(x.signed_min(), -128);
        assert_eq!(x.signed_max(), 127);

        // Contiguity lost after wrapping.
        assert!(r(8, -5, 132).is_full_set());
        // Window-spanning interval is canonically Full.
        assert!(r(8, -128, 127).is_full_set());
    }

    #[test]
    fn sentinel_bounds_clamp() {
        let x = r(8, Range::MIN, 13);
        assert_eq!(x.signed_min(), -128);
        assert_eq!(x.signed_max(), 13);
        let y = r(8, 32, Range::MAX);
        assert_eq!(y.signed_min(), 32);
        assert_eq!(y.signed_max(), 127);
        // Start past end covers everything.
        assert!(r(8, 128, Range::MAX).is_full_set());
    }

    #[test]
    fn add_examples() {
        assert_eq!(r(8, 5, 9).add(&r(8, 3, 6)), r(8, 8, 15));
        assert_eq!(r(8, -9, -5).add(&r(8, -6, -3)), r(8, -15, -8));
        assert_eq!(r(8, 5, 9).add(&r(8, -6, -3)), r(8, -1, 6));
        // Wrapping sum that stays contiguous.
        assert_eq!(r(8, 100, 120).add(&r(8, 100, 120)), r(8, -56, -16));
        // Overflowing sum collapses.
        assert!(r(8, -100, 100).add(&r(8, -100, 100)).is_full_set());
        assert!(Range::full(8).add(&r(8, 0, 1)).is_full_set());
        assert!(r(8, 1, 2).add(&Range::empty(8)).is_empty());
    }

    #[test]
    fn sub_examples() {
        assert_eq!(r(8, 5, 9).sub(&r(8, 3, 6)), r(8, -1, 6));
        assert_eq!(r(8, 10, 20).sub(&Range::constant(8, 5)), r(8, 5, 15));
        assert!(r(8, -100, 100).sub(&r(8, -100, 100)).is_full_set());
    }

    #[test]
    fn mul_examples() {
        assert_eq!(r(8, 5, 9).mul(&r(8, 3, 6)), r(8, 15, 54));
        assert_eq!(r(8, 5, 9).mul(&r(8, -6, -3)), r(8, -54, -15));
        assert!(r(8, 0, 100).mul(&r(8, 0, 100)).is_full_set());
        assert_eq!(r(8, 100, 120).mul(&Range::constant(8, 2)), r(8, -56, -16));
    }

    #[test]
    fn division_identities() {
        for x in [r(8, -5, 113), r(8, 3, 3), Range::full(8), r(8, -128, -1)] {
            assert_eq!(x.sdiv(&Range::constant(8, 1)), x);
        }
        // Divisor interval containing zero excludes it before dividing.
        assert_eq!(r(8, 8, 16).sdiv(&r(8, 0, 2)), r(8, 4, 16));
        assert!(r(8, 8, 16).sdiv(&Range::constant(8, 0)).is_full_set());
        assert_eq!(r(8, 8, 17).udiv(&r(8, 2, 4)), r(8, 2, 8));
    }

    #[test]
    fn remainder_bounds() {
        assert_eq!(r(8, 0, 100).srem(&Range::constant(8, 10)), r(8, 0, 9));
        assert_eq!(r(8, -100, -10).srem(&Range::constant(8, 7)), r(8, -6, 0));
        assert_eq!(r(8, 1, 5).srem(&Range::constant(8, 10)), r(8, 1, 5));
        assert!(r(8, 0, 100).srem(&r(8, -1, 1)).is_full_set());
        assert!(r(8, 0, 100).urem(&Range::constant(8, 0)).is_empty());
        assert_eq!(r(8, 0, 100).urem(&Range::constant(8, 1)), r(8, 0, 0));
        assert_eq!(r(8, 0, 100).urem(&Range::constant(8, 16)).signed_max(), 15);
    }

    #[test]
    fn shift_examples() {
        assert_eq!(r(8, 1, 3).shl(&Range::constant(8, 2)), r(8, 4, 12));
        assert_eq!(Range::constant(8, 1).shl(&Range::constant(8, 7)), r(8, -128, -128));
        assert!(r(8, 1, 100).shl(&Range::constant(8, 2)).is_full_set());
        assert_eq!(r(8, 16, 64).shr(&Range::constant(8, 2), false), r(8, 4, 16));
        assert_eq!(r(8, -64, -16).shr(&Range::constant(8, 2), true), r(8, -16, -4));
    }

    #[test]
    fn bitwise_identities() {
        let x = r(8, 10, 113);
        let all_ones = Range::constant(8, -1);
        let zero = Range::constant(8, 0);
        assert_eq!(x.bit_and(&all_ones), x);
        assert_eq!(all_ones.bit_and(&x), x);
        assert_eq!(x.bit_and(&zero), r(8, 0, 0));
        assert_eq!(x.bit_or(&zero), x);
        assert_eq!(zero.bit_or(&x), x);
        assert_eq!(x.bit_or(&all_ones), all_ones);
    }

    #[test]
    fn bitwise_bounds() {
        // 0..=7 AND 0..=3 can never exceed 3.
        assert_eq!(r(8, 0, 7).bit_and(&r(8, 0, 3)), r(8, 0, 3));
        assert_eq!(r(8, 0, 7).bit_or(&r(8, 0, 3)), r(8, 0, 7));
        assert_eq!(r(8, 0, 7).bit_xor(&r(8, 0, 3)), r(8, 0, 7));
        assert_eq!(Range::constant(8, 12).bit_xor(&Range::constant(8, 10)), r(8, 6, 6));
    }

    #[test]
    fn unary_ops() {
        assert_eq!(r(8, 1, 5).negate(), r(8, -5, -1));
        assert_eq!(r(8, 1, 5).bit_not(), r(8, -6, -2));
        assert_eq!(r(8, -7, 3).abs(), r(8, 0, 7));
        assert_eq!(r(8, -7, -3).abs(), r(8, 3, 7));
        assert!(r(8, -128, -3).abs().is_full_set());
    }

    #[test]
    fn width_casts() {
        assert_eq!(r(16, 10, 100).truncate(8), r(8, 10, 100));
        assert!(r(16, 100, 400).truncate(8).is_full_set());
        assert_eq!(r(16, 300, 310).truncate(8), r(8, 44, 54));
        assert_eq!(r(8, -5, 10).sext_or_trunc(16), r(16, -5, 10));
        assert_eq!(r(8, -5, 10).zext_or_trunc(16), r(16, 0, 255));
        assert_eq!(r(8, -10, -5).zext_or_trunc(16), r(16, 246, 251));
    }

    #[test]
    fn union_and_intersection() {
        let a = r(8, 0, 10);
        let b = r(8, 20, 30);
        assert_eq!(a.union_with(&b), r(8, 0, 30));
        assert!(a.intersect_with(&b).is_empty());
        assert_eq!(a.union_with(&Range::empty(8)), a);
        assert_eq!(Range::empty(8).union_with(&a), a);
        assert_eq!(a.intersect_with(&Range::full(8)), a);
        assert_eq!(r(8, 5, 15).intersect_with(&r(8, 10, 20)), r(8, 10, 15));
    }

    #[test]
    fn comparison_transfers() {
        let lo = r(8, 0, 3);
        let hi = r(8, 10, 20);
        assert_eq!(lo.cmp(Predicate::Slt, &hi, 1), Range::constant(1, 1));
        assert_eq!(hi.cmp(Predicate::Slt, &lo, 1), Range::constant(1, 0));
        assert_eq!(lo.cmp(Predicate::Eq, &hi, 1), Range::constant(1, 0));
        assert_eq!(
            Range::constant(8, 4).cmp(Predicate::Eq, &Range::constant(8, 4), 1),
            Range::constant(1, 1)
        );
        assert_eq!(r(8, 0, 15).cmp(Predicate::Slt, &r(8, 10, 20), 1), r(1, 0, 1));
    }

    #[test]
    fn satisfying_regions() {
        let k = Range::constant(8, 100);
        assert_eq!(
            Range::satisfying_cmp_region(Predicate::Slt, &k),
            r(8, -128, 99)
        );
        assert_eq!(
            Range::satisfying_cmp_region(Predicate::Sgt, &k),
            r(8, 101, 127)
        );
        assert_eq!(Range::satisfying_cmp_region(Predicate::Eq, &k), k);
        assert!(Range::satisfying_cmp_region(Predicate::Ne, &k).is_full_set());
        // x > MAX is unsatisfiable; the circular interval covers everything,
        // which is the sound fallback.
        assert!(
            Range::satisfying_cmp_region(Predicate::Sgt, &Range::constant(8, 127)).is_full_set()
        );
        assert!(
            Range::satisfying_cmp_region(Predicate::Ult, &Range::constant(8, 0)).is_empty()
        );
        assert_eq!(
            Range::satisfying_cmp_region(Predicate::Ule, &Range::constant(8, 10)),
            r(8, 0, 10)
        );
    }

    #[test]
    fn display_formats() {
        assert_eq!(r(8, -5, 113).to_string(), "[-5, 113]<8>");
        assert_eq!(Range::full(8).to_string(), "full<8>");
        assert_eq!(Range::empty(8).to_string(), "empty<8>");
    }

    mod laws {
        use super::*;
        use proptest::prelude::*;

        fn range8() -> impl Strategy<Value = Range> {
            (any::<i8>(), any::<i8>(), 0u8..16).prop_map(|(a, b, k)| {
                let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
                match k {
                    0 => Range::empty(8),
                    1 => Range::full(8),
                    _ => Range::new(8, i128::from(lo), i128::from(hi)),
                }
            })
        }

        proptest! {
            #[test]
            fn add_commutes(a in range8(), b in range8()) {
                prop_assert_eq!(a.add(&b), b.add(&a));
            }

            #[test]
            fn mul_commutes(a in range8(), b in range8()) {
                prop_assert_eq!(a.mul(&b), b.mul(&a));
            }

            #[test]
            fn and_commutes(a in range8(), b in range8()) {
                prop_assert_eq!(a.bit_and(&b), b.bit_and(&a));
            }

            #[test]
            fn or_commutes(a in range8(), b in range8()) {
                prop_assert_eq!(a.bit_or(&b), b.bit_or(&a));
            }

            #[test]
            fn xor_commutes(a in range8(), b in range8()) {
                prop_assert_eq!(a.bit_xor(&b), b.bit_xor(&a));
            }

            #[test]
            fn sdiv_by_one_is_identity(a in range8()) {
                prop_assert_eq!(a.sdiv(&Range::constant(8, 1)), a);
            }

            #[test]
            fn union_contains_both(a in range8(), b in range8()) {
                let u = a.union_with(&b);
                prop_assert!(u.contains_range(&a));
                prop_assert!(u.contains_range(&b));
            }

            #[test]
            fn add_is_sound_under_wraparound(
                a in range8(), b in range8(),
                x in any::<i8>(), y in any::<i8>(),
            ) {
                if a.contains_signed(i128::from(x)) && b.contains_signed(i128::from(y)) {
                    let sum = i128::from(x.wrapping_add(y));
                    prop_assert!(a.add(&b).contains_signed(sum));
                }
            }

            #[test]
            fn mul_is_sound_under_wraparound(
                a in range8(), b in range8(),
                x in any::<i8>(), y in any::<i8>(),
            ) {
                if a.contains_signed(i128::from(x)) && b.contains_signed(i128::from(y)) {
                    let prod = i128::from(x.wrapping_mul(y));
                    prop_assert!(a.mul(&b).contains_signed(prod));
                }
            }

            #[test]
            fn bitwise_is_sound(
                a in range8(), b in range8(),
                x in any::<i8>(), y in any::<i8>(),
            ) {
                if a.contains_signed(i128::from(x)) && b.contains_signed(i128::from(y)) {
                    prop_assert!(a.bit_and(&b).contains_signed(i128::from(x & y)));
                    prop_assert!(a.bit_or(&b).contains_signed(i128::from(x | y)));
                    prop_assert!(a.bit_xor(&b).contains_signed(i128::from(x ^ y)));
                }
            }
        }
    }
}
