pub mod filter;
pub mod orchestrator;
pub mod policy;
pub mod types;

pub use filter::*;
pub use orchestrator::*;
pub use policy::*;
pub use types::*;
