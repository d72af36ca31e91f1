//! # Data structures
//!
//! Representation of the problem being presolved and the primitives it is built from.
pub mod linear_algebra;
pub mod number_types;
pub mod problem;
