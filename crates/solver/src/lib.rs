pub mod linear;
pub mod solver;

pub use linear::*;
pub use solver::*;
