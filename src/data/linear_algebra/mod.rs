//! # Linear algebra primitives
//!
//! Sparse primitives used to represent the constraint matrix. Only the operations the presolve
//! core needs are implemented, by hand, because they need to be fast and to maintain both matrix
//! orientations at once.
pub mod matrix;

/// Inner value for the sparse data structures: a minor dimension index with a value.
pub type SparseTuple<F> = (usize, F);
/// Shorthand for the common storage type of a single sparse row or column.
pub type SparseTupleVec<F> = Vec<SparseTuple<F>>;
