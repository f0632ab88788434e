pub mod config;
pub mod detectors;
pub mod error;
pub mod io;
pub mod metrics;
pub mod pipeline;
pub mod plot;
pub mod signal;
pub mod spectral;

pub use config::*;
pub use error::{ImuError, Result};
pub use pipeline::*;
pub use signal::*;
