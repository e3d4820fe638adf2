//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ServerConfig (validated, immutable)
//!     → passed explicitly to Server::new; queue sizing copied into each connection
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; there is no process-wide settings object
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::ServerConfig;
pub use schema::ListenerConfig;
pub use schema::QueueConfig;
pub use schema::ObservabilityConfig;
