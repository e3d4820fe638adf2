//! Server error type.

use thiserror::Error;

use crate::net::ListenerError;

/// Errors returned by [`Server::start`](crate::server::Server::start).
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listen address could not be resolved or bound.
    #[error(transparent)]
    Bind(#[from] ListenerError),

    /// `start` was called more than once.
    #[error("server has already been started")]
    AlreadyStarted,

    /// Every acceptor died on an accept error, so the server shut itself down.
    #[error("all acceptors failed; server stopped accepting connections")]
    AcceptorsExhausted,
}
