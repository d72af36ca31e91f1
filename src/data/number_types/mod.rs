//! # Number types
//!
//! The presolve logic is defined over an abstract scalar. The contract is "mathematically" a
//! subset of the ordered field operations; implementations need not keep it exactly, which is why
//! all comparisons in the algorithmic code go through the tolerance helper in this module. Exact
//! implementations run with all tolerances at zero.
use std::fmt::{Debug, Display};
use std::iter::Sum;
use std::ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign, Neg, Sub, SubAssign};

use num::{BigRational, One, ToPrimitive, Zero};

/// Scalar type the presolve engine computes with.
///
/// The arithmetic bounds mirror the field operations with both owned and referenced right hand
/// sides. Methods that contain algorithmic logic should additionally require references to act as
/// operands through the [`RealRef`] companion trait, written as
/// `for<'r> &'r R: RealRef<R>`.
pub trait Real:
    Zero +
    One +
    Neg<Output = Self> +
    PartialOrd +
    // First operation
    Add<Self, Output = Self> +
    for<'r> Add<&'r Self, Output = Self> +
    AddAssign<Self> +
    for<'r> AddAssign<&'r Self> +
    Sum +
    // First operation inverse
    Sub<Self, Output = Self> +
    for<'r> Sub<&'r Self, Output = Self> +
    SubAssign<Self> +
    for<'r> SubAssign<&'r Self> +
    // Second operation
    Mul<Self, Output = Self> +
    for<'r> Mul<&'r Self, Output = Self> +
    MulAssign<Self> +
    for<'r> MulAssign<&'r Self> +
    // Second operation inverse
    Div<Self, Output = Self> +
    for<'r> Div<&'r Self, Output = Self> +
    DivAssign<Self> +
    for<'r> DivAssign<&'r Self> +

    // Practicalities
    Clone +
    Debug +
    Display +
    Send +
    Sync +
    'static +
{
    /// Whether arithmetic on this type is exact.
    ///
    /// Exact types get zero tolerances in the [`Num`] helper.
    fn is_exact() -> bool;

    /// Conversion from a double precision float.
    ///
    /// Used for tolerance values and for the few grammar fields that smuggle an index through the
    /// value slot of a reduction. Returns `None` only for non finite inputs.
    fn from_f64(value: f64) -> Option<Self>;

    /// Lossy conversion to a double precision float, for reporting.
    fn to_f64(&self) -> f64;

    /// Round to the nearest integer, ties away from zero.
    fn round_to_integer(&self) -> Self;

    /// Largest integer smaller than or equal to this value.
    fn floor_to_integer(&self) -> Self;

    /// Smallest integer larger than or equal to this value.
    fn ceil_to_integer(&self) -> Self;

    /// The absolute value of a number.
    ///
    /// Compute the additive inverse if the number is smaller than the additive identity.
    fn abs(self) -> Self {
        if self < Self::zero() {
            -self
        } else {
            self
        }
    }
}

/// A reference to a variable that is in a [`Real`].
///
/// Note that the operations with `Self` as a right hand side pair operands of the same lifetime;
/// covariance of shared references makes mixed lifetimes coerce at the call site.
pub trait RealRef<Base>:
    Sized +
    Copy +
    PartialOrd +
    Neg<Output = Base> +
    // Reference with reference
    Add<Self, Output = Base> +
    Sub<Self, Output = Base> +
    Mul<Self, Output = Base> +
    Div<Self, Output = Base> +
    // Reference with owned
    Add<Base, Output = Base> +
    Sub<Base, Output = Base> +
    Mul<Base, Output = Base> +
    Div<Base, Output = Base> +
{
}

impl<Base, T> RealRef<Base> for T
where
    T:
        Sized +
        Copy +
        PartialOrd +
        Neg<Output = Base> +
        Add<T, Output = Base> +
        Sub<T, Output = Base> +
        Mul<T, Output = Base> +
        Div<T, Output = Base> +
        Add<Base, Output = Base> +
        Sub<Base, Output = Base> +
        Mul<Base, Output = Base> +
        Div<Base, Output = Base> +
{
}

impl Real for f64 {
    fn is_exact() -> bool {
        false
    }

    fn from_f64(value: f64) -> Option<Self> {
        value.is_finite().then_some(value)
    }

    fn to_f64(&self) -> f64 {
        *self
    }

    fn round_to_integer(&self) -> Self {
        (*self).round()
    }

    fn floor_to_integer(&self) -> Self {
        (*self).floor()
    }

    fn ceil_to_integer(&self) -> Self {
        (*self).ceil()
    }
}

impl Real for BigRational {
    fn is_exact() -> bool {
        true
    }

    fn from_f64(value: f64) -> Option<Self> {
        BigRational::from_float(value)
    }

    fn to_f64(&self) -> f64 {
        ToPrimitive::to_f64(self).unwrap_or(f64::NAN)
    }

    fn round_to_integer(&self) -> Self {
        self.round()
    }

    fn floor_to_integer(&self) -> Self {
        self.floor()
    }

    fn ceil_to_integer(&self) -> Self {
        self.ceil()
    }
}

/// Tolerance aware comparisons.
///
/// All equalities, orderings and integrality decisions made by the presolve core go through an
/// instance of this helper. Two tolerances are distinguished: `epsilon` for "equal as numbers"
/// and the larger `feasibility` for "equal as far as the constraints care". Values beyond
/// `huge` are treated as suspect and excluded from some reductions.
#[derive(Debug, Clone, PartialEq)]
pub struct Num<R> {
    epsilon: R,
    feasibility: R,
    huge: R,
}

impl<R: Real> Default for Num<R> {
    fn default() -> Self {
        Self::new(1e-9, 1e-6, 1e8)
    }
}

impl<R: Real> Num<R> {
    /// Create a new instance from double precision tolerance values.
    ///
    /// Exact scalar types ignore the arguments and compare exactly.
    pub fn new(epsilon: f64, feasibility: f64, huge: f64) -> Self {
        if R::is_exact() {
            Self {
                epsilon: R::zero(),
                feasibility: R::zero(),
                huge: R::from_f64(huge).unwrap_or_else(R::zero),
            }
        } else {
            debug_assert!(epsilon >= 0_f64 && feasibility >= epsilon);

            Self {
                epsilon: R::from_f64(epsilon).unwrap_or_else(R::zero),
                feasibility: R::from_f64(feasibility).unwrap_or_else(R::zero),
                huge: R::from_f64(huge).unwrap_or_else(R::zero),
            }
        }
    }

    /// The feasibility tolerance.
    pub fn feasibility_tolerance(&self) -> &R {
        &self.feasibility
    }
}

impl<R> Num<R>
where
    R: Real,
    for<'r> &'r R: RealRef<R>,
{
    /// Whether a value is zero up to the equality tolerance.
    pub fn is_zero(&self, value: &R) -> bool {
        value.clone().abs() <= self.epsilon
    }

    /// Whether two values are equal up to the equality tolerance.
    pub fn is_eq(&self, left: &R, right: &R) -> bool {
        self.is_zero(&(left - right))
    }

    /// Whether `left <= right` up to the equality tolerance.
    pub fn is_le(&self, left: &R, right: &R) -> bool {
        left <= &(right + &self.epsilon)
    }

    /// Whether `left < right` beyond the equality tolerance.
    pub fn is_lt(&self, left: &R, right: &R) -> bool {
        !self.is_le(right, left)
    }

    /// Whether a value is zero up to the feasibility tolerance.
    pub fn is_feas_zero(&self, value: &R) -> bool {
        value.clone().abs() <= self.feasibility
    }

    /// Whether `left <= right` up to the feasibility tolerance.
    pub fn is_feas_le(&self, left: &R, right: &R) -> bool {
        left <= &(right + &self.feasibility)
    }

    /// Whether two values are equal up to the feasibility tolerance.
    pub fn is_feas_eq(&self, left: &R, right: &R) -> bool {
        self.is_feas_zero(&(left - right))
    }

    /// Whether a value is integral up to the feasibility tolerance.
    pub fn is_integral(&self, value: &R) -> bool {
        self.is_feas_zero(&(value - &value.round_to_integer()))
    }

    /// The nearest integer to a value.
    pub fn round(&self, value: &R) -> R {
        value.round_to_integer()
    }

    /// Round down, treating values within the feasibility tolerance of the next integer as that
    /// integer.
    ///
    /// This is the rounding used when tightening an upper bound of an integer column.
    pub fn floor(&self, value: &R) -> R {
        (value + &self.feasibility).floor_to_integer()
    }

    /// Round up, treating values within the feasibility tolerance of the previous integer as that
    /// integer.
    ///
    /// This is the rounding used when tightening a lower bound of an integer column.
    pub fn ceil(&self, value: &R) -> R {
        (value - &self.feasibility).ceil_to_integer()
    }

    /// Whether the magnitude of a value is beyond the reliable range.
    pub fn is_huge(&self, value: &R) -> bool {
        !R::is_exact() && value.clone().abs() >= self.huge
    }
}

#[cfg(test)]
mod test {
    use num::BigRational;

    use crate::data::number_types::{Num, Real};

    #[test]
    fn tolerances_float() {
        let num = Num::<f64>::default();

        assert!(num.is_zero(&0_f64));
        assert!(num.is_zero(&1e-10));
        assert!(!num.is_zero(&1e-3));
        assert!(num.is_eq(&(0.1 + 0.2), &0.3));
        assert!(num.is_le(&1_f64, &1_f64));
        assert!(num.is_lt(&1_f64, &2_f64));
        assert!(!num.is_lt(&1_f64, &(1_f64 + 1e-12)));

        assert!(num.is_integral(&3.0000001));
        assert!(!num.is_integral(&3.1));
        assert_eq!(num.round(&2.9999999), 3_f64);
        assert_eq!(num.floor(&2.9999999), 3_f64);
        assert_eq!(num.floor(&(1_f64 / 3_f64)), 0_f64);
        assert_eq!(num.ceil(&0.0000001), 0_f64);
    }

    #[test]
    fn tolerances_rational_are_exact() {
        let num = Num::<BigRational>::default();
        let third = BigRational::new(1.into(), 3.into());

        assert!(num.is_zero(&BigRational::from_f64(0_f64).unwrap()));
        assert!(!num.is_zero(&BigRational::new(1.into(), 1_000_000_000_000_i64.into())));
        assert!(!num.is_integral(&third));
        assert_eq!(num.floor(&third), BigRational::from_f64(0_f64).unwrap());
        assert_eq!(num.ceil(&third), BigRational::from_f64(1_f64).unwrap());
    }

    #[test]
    fn absolute_value() {
        assert_eq!((-2_f64).abs(), 2_f64);
        assert_eq!(2_f64.abs(), 2_f64);
        assert_eq!(BigRational::from_f64(-1.5).unwrap().abs(), BigRational::from_f64(1.5).unwrap());
    }
}
