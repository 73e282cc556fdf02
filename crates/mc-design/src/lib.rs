//! # mc-design
//!
//! Factorial design tables for simulation studies: expansion of condition
//! axes into jobs, collision-free seed encoding, and dependent (fitting)
//! tables crossed with hyperparameter axes.

mod seed;
mod table;

pub use seed::{AxisCoding, SeedEncoder};
pub use table::{
    cartesian_product, verify_unique_files, verify_unique_seeds, DesignTableBuilder, TableOptions,
};
