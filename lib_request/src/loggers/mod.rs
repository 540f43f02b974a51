/// Installs the global `tracing` subscriber the dispatcher logs through.
pub mod subscriber;

pub use subscriber::{level_filter, setup_logging, LogFormat};
