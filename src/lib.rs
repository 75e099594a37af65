pub mod catalog;
pub mod config;
pub mod executor;
pub mod harvest;
pub mod markup;
pub mod model;
pub mod plugins;
pub mod traits;

// Re-export common types for convenience
pub use executor::*;
pub use model::*;
pub use traits::*;
