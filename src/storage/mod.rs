//! Storage primitives: bit sets, row-grouped sparse matrices and the
//! polytopes of the multi-objective engine.

mod bitset;
mod matrix;
mod polytope;
mod simplex;

pub use bitset::BitSet;
pub(crate) use matrix::renumbering;
pub use matrix::{SparseMatrix, SparseMatrixBuilder};
pub use polytope::{point_from, Halfspace, Point, Polytope};
pub(crate) use polytope::dot;
