//! 16.16 signed fixed-point arithmetic.
//!
//! [`Fixed`] wraps an `i32` whose low 16 bits are the fraction. Addition and
//! subtraction are native integer operations; multiplication and division
//! widen to `i64` so intermediate products cannot overflow. Conversions to
//! and from floating point exist only for API boundaries (host configuration,
//! debug output) -- simulation code never round-trips through floats.

use std::fmt;
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};

use serde::{Deserialize, Serialize};

/// Number of fractional bits.
pub const FRACTION_BITS: u32 = 16;

/// Raw value of 1.0 (`1 << 16`).
pub const ONE_RAW: i32 = 1 << FRACTION_BITS;

// ---------------------------------------------------------------------------
// Fixed
// ---------------------------------------------------------------------------

/// A 16.16 signed fixed-point number.
///
/// The representation is a raw `i32`: `value = raw / 65536`. All arithmetic
/// is integer arithmetic, which is what makes cross-platform determinism
/// possible.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fixed(i32);

impl Fixed {
    /// 0.0
    pub const ZERO: Fixed = Fixed(0);
    /// 1.0
    pub const ONE: Fixed = Fixed(ONE_RAW);
    /// 0.5
    pub const HALF: Fixed = Fixed(ONE_RAW / 2);
    /// -1.0
    pub const NEG_ONE: Fixed = Fixed(-ONE_RAW);
    /// pi, rounded to nearest representable value.
    pub const PI: Fixed = Fixed(205_887);
    /// pi/2, rounded to nearest representable value.
    pub const HALF_PI: Fixed = Fixed(102_944);
    /// 2*pi, rounded to nearest representable value.
    pub const TWO_PI: Fixed = Fixed(411_775);
    /// Largest representable value.
    pub const MAX: Fixed = Fixed(i32::MAX);
    /// Smallest (most negative) representable value.
    pub const MIN: Fixed = Fixed(i32::MIN);

    /// Construct from a raw 16.16 bit pattern.
    #[inline]
    pub const fn from_raw(raw: i32) -> Fixed {
        Fixed(raw)
    }

    /// The raw 16.16 bit pattern.
    #[inline]
    pub const fn raw(self) -> i32 {
        self.0
    }

    /// Construct from an integer.
    #[inline]
    pub const fn from_i32(v: i32) -> Fixed {
        Fixed(v << FRACTION_BITS)
    }

    /// Truncate toward negative infinity to an integer.
    #[inline]
    pub const fn to_i32(self) -> i32 {
        self.0 >> FRACTION_BITS
    }

    /// Convert from `f32` with round-to-nearest.
    ///
    /// Boundary-only: hosts may hand the engine float configuration values,
    /// but nothing inside a tick converts floats.
    pub fn from_f32(v: f32) -> Fixed {
        Fixed((v as f64 * 65536.0 + 0.5).floor() as i32)
    }

    /// Convert from `f64` with round-to-nearest. Boundary-only.
    pub fn from_f64(v: f64) -> Fixed {
        Fixed((v * 65536.0 + 0.5).floor() as i32)
    }

    /// Convert to `f32` for display and debug payloads.
    pub fn to_f32(self) -> f32 {
        self.0 as f32 / 65536.0
    }

    /// Convert to `f64` for display and debug payloads.
    pub fn to_f64(self) -> f64 {
        f64::from(self.0) / 65536.0
    }

    /// Absolute value (saturating at `Fixed::MAX` for `i32::MIN`).
    #[inline]
    pub const fn abs(self) -> Fixed {
        if self.0 == i32::MIN {
            Fixed::MAX
        } else if self.0 < 0 {
            Fixed(-self.0)
        } else {
            self
        }
    }

    /// The smaller of two values.
    #[inline]
    pub fn min(self, other: Fixed) -> Fixed {
        if self.0 <= other.0 {
            self
        } else {
            other
        }
    }

    /// The larger of two values.
    #[inline]
    pub fn max(self, other: Fixed) -> Fixed {
        if self.0 >= other.0 {
            self
        } else {
            other
        }
    }

    /// Clamp into `[lo, hi]`.
    pub fn clamp(self, lo: Fixed, hi: Fixed) -> Fixed {
        debug_assert!(lo <= hi, "clamp range inverted");
        self.max(lo).min(hi)
    }

    /// Fixed-point multiply: `(a * b) >> 16`, computed in 64-bit.
    #[inline]
    pub const fn mul(self, other: Fixed) -> Fixed {
        Fixed(((self.0 as i64 * other.0 as i64) >> FRACTION_BITS) as i32)
    }

    /// Fixed-point divide: `(a << 16) / b`, computed in 64-bit.
    ///
    /// # Panics
    ///
    /// Panics on division by zero. Use [`checked_div`](Self::checked_div)
    /// where the divisor is not statically known to be non-zero.
    #[inline]
    pub const fn div(self, other: Fixed) -> Fixed {
        Fixed((((self.0 as i64) << FRACTION_BITS) / other.0 as i64) as i32)
    }

    /// Fixed-point divide returning `None` on a zero divisor.
    #[inline]
    pub fn checked_div(self, other: Fixed) -> Option<Fixed> {
        if other.0 == 0 {
            None
        } else {
            Some(self.div(other))
        }
    }

    /// Square root by integer Newton iteration.
    ///
    /// Returns [`Fixed::ZERO`] for negative inputs (the simulation treats a
    /// negative radicand as a degenerate length).
    pub fn sqrt(self) -> Fixed {
        if self.0 <= 0 {
            return Fixed::ZERO;
        }
        // sqrt(raw / 2^16) * 2^16 == sqrt(raw * 2^16), so widen and take the
        // integer square root of raw << 16.
        let n = (self.0 as u64) << FRACTION_BITS;
        let mut x = n;
        let mut next = (x + 1) / 2;
        while next < x {
            x = next;
            next = (x + n / x) / 2;
        }
        Fixed(x as i32)
    }

    /// Linear interpolation: `self + (other - self) * t`.
    pub fn lerp(self, other: Fixed, t: Fixed) -> Fixed {
        self + (other - self).mul(t)
    }

    /// Euclidean remainder with a positive result in `[0, modulus)`.
    pub fn rem_euclid(self, modulus: Fixed) -> Fixed {
        debug_assert!(modulus.0 > 0, "modulus must be positive");
        let r = self.0.rem_euclid(modulus.0);
        Fixed(r)
    }
}

impl Add for Fixed {
    type Output = Fixed;
    #[inline]
    fn add(self, rhs: Fixed) -> Fixed {
        Fixed(self.0.wrapping_add(rhs.0))
    }
}

impl AddAssign for Fixed {
    #[inline]
    fn add_assign(&mut self, rhs: Fixed) {
        self.0 = self.0.wrapping_add(rhs.0);
    }
}

impl Sub for Fixed {
    type Output = Fixed;
    #[inline]
    fn sub(self, rhs: Fixed) -> Fixed {
        Fixed(self.0.wrapping_sub(rhs.0))
    }
}

impl SubAssign for Fixed {
    #[inline]
    fn sub_assign(&mut self, rhs: Fixed) {
        self.0 = self.0.wrapping_sub(rhs.0);
    }
}

impl Mul for Fixed {
    type Output = Fixed;
    #[inline]
    fn mul(self, rhs: Fixed) -> Fixed {
        Fixed::mul(self, rhs)
    }
}

impl Div for Fixed {
    type Output = Fixed;
    #[inline]
    fn div(self, rhs: Fixed) -> Fixed {
        Fixed::div(self, rhs)
    }
}

impl Neg for Fixed {
    type Output = Fixed;
    #[inline]
    fn neg(self) -> Fixed {
        Fixed(self.0.wrapping_neg())
    }
}

impl fmt::Debug for Fixed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fixed({})", self.to_f64())
    }
}

impl fmt::Display for Fixed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_f64())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_roundtrip() {
        for v in [-1000, -1, 0, 1, 42, 32767] {
            assert_eq!(Fixed::from_i32(v).to_i32(), v);
        }
    }

    #[test]
    fn add_sub() {
        let a = Fixed::from_i32(3);
        let b = Fixed::from_i32(5);
        assert_eq!((a + b).to_i32(), 8);
        assert_eq!((b - a).to_i32(), 2);
        assert_eq!((a - b).to_i32(), -2);
    }

    #[test]
    fn mul_exact() {
        let a = Fixed::from_i32(6);
        let b = Fixed::from_i32(7);
        assert_eq!((a * b).to_i32(), 42);

        // 0.5 * 0.5 = 0.25
        let q = Fixed::HALF * Fixed::HALF;
        assert_eq!(q.raw(), ONE_RAW / 4);
    }

    #[test]
    fn mul_widens_to_64_bits() {
        // 30000 * 30000 overflows a naive 32-bit intermediate but the
        // widened product truncates back into range after the shift.
        let a = Fixed::from_i32(300);
        let b = Fixed::from_i32(100);
        assert_eq!((a * b).to_i32(), 30_000);
    }

    #[test]
    fn div_exact() {
        let a = Fixed::from_i32(10);
        let b = Fixed::from_i32(4);
        assert_eq!((a / b).raw(), ONE_RAW * 10 / 4);
        assert_eq!(a.checked_div(Fixed::ZERO), None);
        assert_eq!(a.checked_div(b), Some(a / b));
    }

    #[test]
    fn sqrt_perfect_squares() {
        for v in [0, 1, 4, 9, 16, 25, 144, 10_000] {
            let r = Fixed::from_i32(v).sqrt();
            let expected = (v as f64).sqrt();
            assert!(
                (r.to_f64() - expected).abs() < 1e-3,
                "sqrt({v}): expected {expected}, got {}",
                r.to_f64()
            );
        }
    }

    #[test]
    fn sqrt_negative_is_zero() {
        assert_eq!(Fixed::from_i32(-4).sqrt(), Fixed::ZERO);
    }

    #[test]
    fn from_f32_rounds_to_nearest() {
        // floor(x * 65536 + 0.5)
        assert_eq!(Fixed::from_f32(1.0).raw(), ONE_RAW);
        assert_eq!(Fixed::from_f32(0.5).raw(), ONE_RAW / 2);
        // One ULP below a half step still rounds down.
        assert_eq!(Fixed::from_f64(1.0 / 131072.0).raw(), 1);
        assert_eq!(Fixed::from_f64(-1.5).raw(), -(ONE_RAW + ONE_RAW / 2));
    }

    #[test]
    fn ordering_and_clamp() {
        let lo = Fixed::from_i32(-5);
        let hi = Fixed::from_i32(5);
        assert_eq!(Fixed::from_i32(10).clamp(lo, hi), hi);
        assert_eq!(Fixed::from_i32(-10).clamp(lo, hi), lo);
        assert_eq!(Fixed::ZERO.clamp(lo, hi), Fixed::ZERO);
    }

    #[test]
    fn rem_euclid_wraps_negative() {
        let m = Fixed::TWO_PI;
        let angle = -Fixed::PI;
        let wrapped = angle.rem_euclid(m);
        assert!(wrapped >= Fixed::ZERO && wrapped < m);
    }

    #[test]
    fn lerp_endpoints() {
        let a = Fixed::from_i32(10);
        let b = Fixed::from_i32(20);
        assert_eq!(a.lerp(b, Fixed::ZERO), a);
        assert_eq!(a.lerp(b, Fixed::ONE), b);
        assert_eq!(a.lerp(b, Fixed::HALF).to_i32(), 15);
    }
}
