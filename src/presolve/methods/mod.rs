//! # Bundled presolve methods
//!
//! A small method set that exercises the full reduction grammar. Each method follows the same
//! discipline: read the frozen problem, emit transactions into the private log, never mutate
//! anything directly.
pub mod dominated_columns;
pub mod dual_fix;
pub mod singleton_rows;

pub use dominated_columns::DominatedColumns;
pub use dual_fix::DualFix;
pub use singleton_rows::SingletonRows;
