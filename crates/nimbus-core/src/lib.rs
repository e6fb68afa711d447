pub mod config;
pub mod error;
pub mod types;

pub use config::NimbusConfig;
pub use error::{NimbusError, NimbusResult};
