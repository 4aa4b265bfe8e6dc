//! Type definitions

pub mod plan;
pub mod site;
pub mod tour;

pub use plan::*;
pub use site::*;
pub use tour::*;
