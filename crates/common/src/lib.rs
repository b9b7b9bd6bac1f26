//! Shared types, config, collaborator contracts and error definitions for the grid overlay.

pub mod config;
pub mod error;
pub mod service;
pub mod types;

pub use config::OverlayConfig;
pub use error::Error;
pub use service::{DataService, RasterSource, RasterTileProvider};
pub use types::*;

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, Error>;
