//! Server lifecycle state machine.
//!
//! # State Transitions
//! ```text
//! Created  → Running:  listener bound, acceptors spawned
//! Running  → Draining: shutdown requested (global signal or Server::shutdown)
//! Draining → Stopped:  acceptors gone, listener closed, every connection torn down
//! ```

/// Lifecycle state of a [`Server`](crate::server::Server).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Created,
    Running,
    Draining,
    Stopped,
}

impl ServerState {
    /// Whether `next` is a legal successor of `self`.
    ///
    /// `Created → Draining` is allowed so that shutting down a server that
    /// never started is not an error.
    pub fn can_transition_to(self, next: ServerState) -> bool {
        use ServerState::*;
        matches!(
            (self, next),
            (Created, Running) | (Created, Draining) | (Running, Draining) | (Draining, Stopped)
        )
    }
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ServerState::Created => "created",
            ServerState::Running => "running",
            ServerState::Draining => "draining",
            ServerState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_transitions_only() {
        assert!(ServerState::Created.can_transition_to(ServerState::Running));
        assert!(ServerState::Running.can_transition_to(ServerState::Draining));
        assert!(ServerState::Draining.can_transition_to(ServerState::Stopped));

        assert!(!ServerState::Stopped.can_transition_to(ServerState::Running));
        assert!(!ServerState::Draining.can_transition_to(ServerState::Running));
        assert!(!ServerState::Running.can_transition_to(ServerState::Stopped));
    }
}
