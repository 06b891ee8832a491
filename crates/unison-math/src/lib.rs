//! Unison Math -- deterministic fixed-point arithmetic and PRNG.
//!
//! Every quantity that participates in the replicated simulation is a 16.16
//! fixed-point integer ([`Fixed`]). Peers on different platforms must compute
//! bit-identical results, so no hardware floating point appears anywhere in
//! this crate's arithmetic: multiplication widens to 64 bits, square roots
//! use integer Newton iteration, and trigonometry goes through integer-built
//! lookup tables with fixed-point interpolation.
//!
//! Randomness comes from [`DeterministicRng`], a two-word xorshift generator
//! whose `(s0, s1)` state is plain data -- it is captured into snapshots and
//! restored on rollback, so a restored peer draws the same sequence as the
//! peer it copied.
//!
//! # Quick Start
//!
//! ```
//! use unison_math::{Fixed, DeterministicRng};
//!
//! let a = Fixed::from_i32(3);
//! let b = Fixed::from_i32(4);
//! let hyp = (a * a + b * b).sqrt();
//! assert_eq!(hyp, Fixed::from_i32(5));
//!
//! let mut rng = DeterministicRng::new(1, 2);
//! let r = rng.next_fixed();
//! assert!(r >= Fixed::ZERO && r < Fixed::ONE);
//! ```

#![deny(unsafe_code)]

pub mod fixed;
pub mod rng;
pub mod trig;

pub use fixed::Fixed;
pub use rng::DeterministicRng;
pub use trig::{atan2, cos, sin};
