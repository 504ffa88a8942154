//! Scalar abstraction
//!
//! Every matrix, tile, and kernel in the engine is generic over one of four
//! element types: `f32`, `f64`, `Complex<f32>`, `Complex<f64>`. The `Scalar`
//! trait captures exactly the surface the engine needs — arithmetic,
//! conjugation, magnitude, and the associated real type used for norms and
//! tolerances.

use num_complex::Complex;
use num_traits::{Float, NumAssign};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::iter::Sum;

/// Single-precision complex scalar.
pub type C32 = Complex<f32>;
/// Double-precision complex scalar.
pub type C64 = Complex<f64>;

/// Element type of a matrix.
///
/// Implemented for `f32`, `f64`, [`C32`] and [`C64`] only; the engine is not
/// meant to be instantiated over anything else. The associated [`Real`]
/// type is the projection used for norms: `f32` for `f32`/`C32`, `f64` for
/// `f64`/`C64`.
///
/// [`Real`]: Scalar::Real
pub trait Scalar:
    Copy
    + Send
    + Sync
    + fmt::Debug
    + fmt::Display
    + PartialEq
    + NumAssign
    + std::ops::Neg<Output = Self>
    + Sum
    + Serialize
    + DeserializeOwned
    + 'static
{
    /// Real projection of this scalar type.
    type Real: Scalar<Real = Self::Real> + Float;

    /// True for the complex instantiations.
    const IS_COMPLEX: bool;

    /// Embed a real value.
    fn from_real(re: Self::Real) -> Self;

    /// Lossy conversion from `f64`, for constants and test inputs.
    fn from_f64(v: f64) -> Self;

    /// Real part.
    fn re(self) -> Self::Real;

    /// Complex conjugate. Identity for the real instantiations.
    fn conj(self) -> Self;

    /// Magnitude (absolute value / complex modulus).
    fn abs(self) -> Self::Real;

    /// Machine epsilon of the associated real type.
    fn epsilon() -> Self::Real;
}

macro_rules! impl_scalar_real {
    ($t:ty) => {
        impl Scalar for $t {
            type Real = $t;

            const IS_COMPLEX: bool = false;

            fn from_real(re: $t) -> Self {
                re
            }

            fn from_f64(v: f64) -> Self {
                v as $t
            }

            fn re(self) -> $t {
                self
            }

            fn conj(self) -> Self {
                self
            }

            fn abs(self) -> $t {
                <$t>::abs(self)
            }

            fn epsilon() -> $t {
                <$t>::EPSILON
            }
        }
    };
}

impl_scalar_real!(f32);
impl_scalar_real!(f64);

macro_rules! impl_scalar_complex {
    ($t:ty, $re:ty) => {
        impl Scalar for $t {
            type Real = $re;

            const IS_COMPLEX: bool = true;

            fn from_real(re: $re) -> Self {
                Complex::new(re, 0.0)
            }

            fn from_f64(v: f64) -> Self {
                Complex::new(v as $re, 0.0)
            }

            fn re(self) -> $re {
                self.re
            }

            fn conj(self) -> Self {
                Complex::conj(&self)
            }

            fn abs(self) -> $re {
                self.norm()
            }

            fn epsilon() -> $re {
                <$re>::EPSILON
            }
        }
    };
}

impl_scalar_complex!(C32, f32);
impl_scalar_complex!(C64, f64);

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::{One, Zero};

    #[test]
    fn test_real_conj_is_identity() {
        assert_eq!(Scalar::conj(3.5_f64), 3.5);
        assert_eq!(Scalar::conj(-2.0_f32), -2.0);
    }

    #[test]
    fn test_complex_conj_negates_imaginary() {
        let z = C64::new(1.0, -4.0);
        assert_eq!(Scalar::conj(z), C64::new(1.0, 4.0));
    }

    #[test]
    fn test_abs_is_modulus() {
        let z = C32::new(3.0, 4.0);
        assert_eq!(Scalar::abs(z), 5.0);
        assert_eq!(Scalar::abs(-7.0_f64), 7.0);
    }

    #[test]
    fn test_from_real_round_trips() {
        let z = C64::from_real(2.5);
        assert_eq!(z.re(), 2.5);
        assert_eq!(z.im, 0.0);
    }

    #[test]
    fn test_identities() {
        assert!(C64::zero().is_zero());
        assert_eq!(C32::one() * C32::one(), C32::one());
        assert_eq!(f64::from_f64(1.25), 1.25);
    }

    #[test]
    fn test_epsilon_matches_real_type() {
        assert_eq!(<C32 as Scalar>::epsilon(), f32::EPSILON);
        assert_eq!(<f64 as Scalar>::epsilon(), f64::EPSILON);
    }
}
