//! ---
//! hcu_section: "01-core-functionality"
//! hcu_subsection: "module"
//! hcu_type: "source"
//! hcu_scope: "code"
//! hcu_description: "Collaborator seams for channel adaptors and peripheral drivers."
//! hcu_version: "v0.0.0-prealpha"
//! hcu_owner: "tbd"
//! ---
use async_trait::async_trait;
use thiserror::Error;

/// Error reported by an adaptor or driver operation.
///
/// Collaborators fold their own failure types into this envelope; the
/// orchestration core only ever logs or aggregates the rendered message.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct UnitError {
    message: String,
}

impl UnitError {
    /// Wrap a failure message reported by a collaborator.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for UnitError {
    fn from(err: std::io::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// Result type shared by every adaptor and driver operation.
pub type UnitResult = std::result::Result<(), UnitError>;

/// A communication-channel adaptor (serial link, network socket, bus).
///
/// Implementations are owned exclusively by one [`Connection`] handle and are
/// only ever driven from its connect/disconnect transitions.
///
/// [`Connection`]: crate::connection::Connection
#[async_trait]
pub trait Adaptor: Send + Sync {
    /// Short adaptor kind identifier used in serialized output (e.g. `serial`).
    fn kind(&self) -> &str;

    /// Remote host this adaptor talks to, when it has one.
    fn host(&self) -> Option<&str> {
        None
    }

    /// Remote port this adaptor talks to, when it has one.
    fn port(&self) -> Option<u16> {
        None
    }

    /// Bring the channel up.
    async fn connect(&mut self) -> UnitResult;

    /// Tear the channel down.
    async fn disconnect(&mut self) -> UnitResult;
}

/// A peripheral driver (LED, servo, sensor) attached through one connection.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Short driver kind identifier used in serialized output (e.g. `led`).
    fn kind(&self) -> &str;

    /// Bring the peripheral up.
    async fn start(&mut self) -> UnitResult;

    /// Shut the peripheral down.
    async fn halt(&mut self) -> UnitResult;
}
