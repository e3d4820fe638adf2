//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (pool sizes and queue capacities > 0)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use crate::config::schema::ServerConfig;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field, e.g. `queues.inbound_capacity`.
    pub field: &'static str,
    /// Human-readable description of the problem.
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Check a configuration for values the server cannot run with.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.trim().is_empty() {
        errors.push(ValidationError::new("listener.bind_address", "must not be empty"));
    }
    if config.listener.accept_concurrency == 0 {
        errors.push(ValidationError::new(
            "listener.accept_concurrency",
            "at least one acceptor is required",
        ));
    }
    if config.queues.inbound_capacity == 0 {
        errors.push(ValidationError::new("queues.inbound_capacity", "must be greater than 0"));
    }
    if config.queues.outbound_capacity == 0 {
        errors.push(ValidationError::new("queues.outbound_capacity", "must be greater than 0"));
    }
    if config.queues.read_buffer_size == 0 {
        errors.push(ValidationError::new("queues.read_buffer_size", "must be greater than 0"));
    }
    if config.observability.metrics_enabled && config.observability.metrics_address.trim().is_empty() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            "required when metrics are enabled",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
