pub mod consolidate;
pub mod extract;
pub mod transform;

pub use consolidate::*;
pub use extract::*;
pub use transform::*;
