//! Domain layer: configuration, error taxonomy, padding and core types.

pub mod config;
pub mod error;
pub mod padding;
pub mod types;

pub use config::{ConfigError, PublishConfig};
pub use error::{ErrorClass, PublishError, ServerError};
pub use padding::{generate_padding, Padding, PaddingError, ResponsePadder};
pub use types::*;
