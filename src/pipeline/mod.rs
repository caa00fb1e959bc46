pub mod notify;
pub mod runner;
pub mod state;
pub mod toll;

pub use notify::*;
pub use runner::*;
pub use state::*;
pub use toll::*;
