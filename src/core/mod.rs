pub mod config;
pub mod error;
pub mod registry;

pub use config::{BeamSearchBuilder, BeamSearchConfig};
pub use error::{BeamSearchError, Result};
pub use registry::{global_registry, BeamSearchHandle, BeamSearchRegistry};
