pub mod behavior;
pub mod data;
pub mod report;
pub mod reputation;
pub mod routing;
pub mod types;
pub mod utils;

// Re-export commonly used types and functions for convenience
pub use behavior::*;
pub use data::*;
pub use report::*;
pub use reputation::*;
pub use routing::*;
pub use types::*;
pub use utils::*;
