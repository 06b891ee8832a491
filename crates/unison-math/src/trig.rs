//! Table-driven trigonometry in fixed point.
//!
//! The public [`sin`], [`cos`], and [`atan2`] functions read fixed-width
//! lookup tables and linearly interpolate between adjacent entries, all in
//! 16.16 arithmetic. The tables themselves are built once per process by an
//! integer CORDIC routine, so there is no floating point anywhere between a
//! simulation input and a simulation output -- every peer computes the same
//! table and the same interpolated values.
//!
//! Angles are fixed-point radians. `atan2` returns values in `(-pi, pi]`.

use std::sync::OnceLock;

use crate::fixed::{Fixed, ONE_RAW};

/// Entries in the full-wave sine table (power of two).
const SIN_TABLE_SIZE: usize = 1024;

/// Entries in the `[0, 1]` arctangent table.
const ATAN_TABLE_SIZE: usize = 256;

// ---------------------------------------------------------------------------
// CORDIC (table construction only)
// ---------------------------------------------------------------------------

/// `atan(2^-i)` in 16.16 radians, for the CORDIC iterations.
const CORDIC_ATAN: [i32; 17] = [
    51_472, 30_386, 16_055, 8_150, 4_091, 2_047, 1_024, 512, 256, 128, 64, 32, 16, 8, 4, 2, 1,
];

/// CORDIC gain compensation `K = prod(cos(atan(2^-i)))` in 16.16.
const CORDIC_GAIN: i32 = 39_797;

/// Rotation-mode CORDIC. `angle` must be within `[-pi/2, pi/2]` (raw 16.16).
/// Returns `(cos, sin)` raw values.
fn cordic_sin_cos(angle: i32) -> (i32, i32) {
    let mut x: i64 = i64::from(CORDIC_GAIN);
    let mut y: i64 = 0;
    let mut z: i64 = i64::from(angle);
    for (i, &step) in CORDIC_ATAN.iter().enumerate() {
        let (nx, ny) = if z >= 0 {
            z -= i64::from(step);
            (x - (y >> i), y + (x >> i))
        } else {
            z += i64::from(step);
            (x + (y >> i), y - (x >> i))
        };
        x = nx;
        y = ny;
    }
    (x as i32, y as i32)
}

/// Vectoring-mode CORDIC. `ratio` is a raw 16.16 value in `[0, 1]`; returns
/// `atan(ratio)` in raw 16.16 radians.
fn cordic_atan(ratio: i32) -> i32 {
    let mut x: i64 = i64::from(ONE_RAW);
    let mut y: i64 = i64::from(ratio);
    let mut z: i64 = 0;
    for (i, &step) in CORDIC_ATAN.iter().enumerate() {
        let (nx, ny) = if y > 0 {
            z += i64::from(step);
            (x + (y >> i), y - (x >> i))
        } else {
            z -= i64::from(step);
            (x - (y >> i), y + (x >> i))
        };
        x = nx;
        y = ny;
    }
    z as i32
}

// ---------------------------------------------------------------------------
// Lookup tables
// ---------------------------------------------------------------------------

/// `sin(i * 2pi / SIN_TABLE_SIZE)` for `i in 0..=SIN_TABLE_SIZE`.
fn sin_table() -> &'static [i32] {
    static TABLE: OnceLock<Vec<i32>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let two_pi = i64::from(Fixed::TWO_PI.raw());
        let pi = Fixed::PI.raw();
        let half_pi = Fixed::HALF_PI.raw();
        (0..=SIN_TABLE_SIZE)
            .map(|i| {
                let angle = (i as i64 * two_pi / SIN_TABLE_SIZE as i64) as i32;
                // Fold into the CORDIC convergence range [-pi/2, pi/2].
                if angle <= half_pi {
                    cordic_sin_cos(angle).1
                } else if angle <= pi {
                    cordic_sin_cos(pi - angle).1
                } else if angle <= pi + half_pi {
                    -cordic_sin_cos(angle - pi).1
                } else {
                    -cordic_sin_cos(two_pi as i32 - angle).1
                }
            })
            .collect()
    })
}

/// `atan(i / ATAN_TABLE_SIZE)` for `i in 0..=ATAN_TABLE_SIZE`.
fn atan_table() -> &'static [i32] {
    static TABLE: OnceLock<Vec<i32>> = OnceLock::new();
    TABLE.get_or_init(|| {
        (0..=ATAN_TABLE_SIZE)
            .map(|i| cordic_atan((i as i64 * i64::from(ONE_RAW) / ATAN_TABLE_SIZE as i64) as i32))
            .collect()
    })
}

/// Interpolated table lookup. `scaled` is `position * table_len` as a 16.16
/// value; the integer part indexes, the fraction interpolates.
fn lerp_table(table: &[i32], scaled: i64) -> i32 {
    let idx = (scaled >> 16) as usize;
    if idx >= table.len() - 1 {
        return table[table.len() - 1];
    }
    let frac = scaled & 0xFFFF;
    let a = i64::from(table[idx]);
    let b = i64::from(table[idx + 1]);
    (a + (((b - a) * frac) >> 16)) as i32
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Sine of a fixed-point angle in radians.
pub fn sin(angle: Fixed) -> Fixed {
    let wrapped = angle.rem_euclid(Fixed::TWO_PI);
    let scaled =
        i64::from(wrapped.raw()) * SIN_TABLE_SIZE as i64 * i64::from(ONE_RAW)
            / i64::from(Fixed::TWO_PI.raw());
    Fixed::from_raw(lerp_table(sin_table(), scaled))
}

/// Cosine of a fixed-point angle in radians.
pub fn cos(angle: Fixed) -> Fixed {
    sin(angle + Fixed::HALF_PI)
}

/// Four-quadrant arctangent, returning fixed-point radians in `(-pi, pi]`.
///
/// `atan2(0, 0)` returns 0, matching the convention the movement systems
/// rely on for zero-length direction vectors.
pub fn atan2(y: Fixed, x: Fixed) -> Fixed {
    if y == Fixed::ZERO && x == Fixed::ZERO {
        return Fixed::ZERO;
    }

    let ay = i64::from(y.raw().unsigned_abs());
    let ax = i64::from(x.raw().unsigned_abs());

    // Octant reduction: look up atan of the ratio min/max, which is in [0,1].
    let base = if ay <= ax {
        let ratio = ((ay << 16) / ax) as i64;
        let scaled = ratio * ATAN_TABLE_SIZE as i64;
        lerp_table(atan_table(), scaled)
    } else {
        let ratio = ((ax << 16) / ay) as i64;
        let scaled = ratio * ATAN_TABLE_SIZE as i64;
        Fixed::HALF_PI.raw() - lerp_table(atan_table(), scaled)
    };

    let base = if x.raw() < 0 {
        Fixed::PI.raw() - base
    } else {
        base
    };
    let signed = if y.raw() < 0 { -base } else { base };
    Fixed::from_raw(signed)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// Max tolerated error for table lookups, in real units. A 1024-entry
    /// table with interpolation is good to well under this.
    const TOLERANCE: f64 = 0.002;

    fn assert_close(actual: Fixed, expected: f64, ctx: &str) {
        let got = actual.to_f64();
        assert!(
            (got - expected).abs() < TOLERANCE,
            "{ctx}: expected {expected}, got {got}"
        );
    }

    #[test]
    fn sin_key_angles() {
        assert_close(sin(Fixed::ZERO), 0.0, "sin 0");
        assert_close(sin(Fixed::HALF_PI), 1.0, "sin pi/2");
        assert_close(sin(Fixed::PI), 0.0, "sin pi");
        assert_close(sin(Fixed::PI + Fixed::HALF_PI), -1.0, "sin 3pi/2");
    }

    #[test]
    fn cos_key_angles() {
        assert_close(cos(Fixed::ZERO), 1.0, "cos 0");
        assert_close(cos(Fixed::HALF_PI), 0.0, "cos pi/2");
        assert_close(cos(Fixed::PI), -1.0, "cos pi");
    }

    #[test]
    fn sin_sweep_matches_float_reference() {
        for i in 0..360 {
            let radians = f64::from(i) * std::f64::consts::PI / 180.0;
            let angle = Fixed::from_f64(radians);
            assert_close(sin(angle), radians.sin(), &format!("sin {i}deg"));
            assert_close(cos(angle), radians.cos(), &format!("cos {i}deg"));
        }
    }

    #[test]
    fn sin_negative_angles_wrap() {
        assert_close(sin(-Fixed::HALF_PI), -1.0, "sin -pi/2");
        assert_close(sin(-Fixed::PI), 0.0, "sin -pi");
    }

    #[test]
    fn atan2_cardinal_directions() {
        let one = Fixed::ONE;
        assert_close(atan2(Fixed::ZERO, one), 0.0, "east");
        assert_close(atan2(one, Fixed::ZERO), std::f64::consts::FRAC_PI_2, "north");
        assert_close(atan2(Fixed::ZERO, -one), std::f64::consts::PI, "west");
        assert_close(atan2(-one, Fixed::ZERO), -std::f64::consts::FRAC_PI_2, "south");
    }

    #[test]
    fn atan2_sweep_matches_float_reference() {
        for i in 0..72 {
            let radians = f64::from(i) * std::f64::consts::PI / 36.0 - std::f64::consts::PI;
            let y = Fixed::from_f64(radians.sin() * 10.0);
            let x = Fixed::from_f64(radians.cos() * 10.0);
            let got = atan2(y, x).to_f64();
            let expected = (y.to_f64()).atan2(x.to_f64());
            assert!(
                (got - expected).abs() < 0.01,
                "atan2 step {i}: expected {expected}, got {got}"
            );
        }
    }

    #[test]
    fn atan2_origin_is_zero() {
        assert_eq!(atan2(Fixed::ZERO, Fixed::ZERO), Fixed::ZERO);
    }

    #[test]
    fn tables_are_deterministic_across_reads() {
        // Two reads of the same entry must agree (OnceLock builds once).
        let a = sin(Fixed::from_raw(12345));
        let b = sin(Fixed::from_raw(12345));
        assert_eq!(a, b);
    }
}
