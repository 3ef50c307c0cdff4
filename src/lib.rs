//! Paginated analytics harvester.
//!
//! Pages through rate-limited analytics endpoints, flattens nested agent and
//! call records into rows, drops entities already seen in the run and hands
//! the rows to a [`Sink`].

pub mod client;
pub mod config;
pub mod executor;
pub mod harvest;
pub mod logging;
pub mod model;
pub mod sink;
pub mod traits;

// Re-export common types for convenience
pub use executor::*;
pub use model::*;
pub use traits::*;
