pub mod design;
pub mod errors;
pub mod job;

pub use design::*;
pub use errors::*;
pub use job::*;
