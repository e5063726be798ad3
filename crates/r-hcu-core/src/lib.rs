//! ---
//! hcu_section: "01-core-functionality"
//! hcu_subsection: "module"
//! hcu_type: "source"
//! hcu_scope: "code"
//! hcu_description: "Primary orchestration and lifecycle management."
//! hcu_version: "v0.0.0-prealpha"
//! hcu_owner: "tbd"
//! ---
//! Lifecycle orchestration core for the R-HCU runtime.
//!
//! A [`Robot`] composes named [`Connection`] handles (communication-channel
//! adaptors) and named [`Device`] handles (peripheral drivers bound to one
//! connection each) and drives them through a two-phase startup barrier and a
//! best-effort shutdown, exposing a synchronous command and event surface.
#![warn(missing_docs)]

pub mod adaptor;
pub mod commands;
pub mod connection;
pub mod device;
pub mod events;
pub mod naming;
pub mod robot;

pub use adaptor::{Adaptor, Driver, UnitError, UnitResult};
pub use commands::{command, Command, CommandTable, Commands};
pub use connection::{Connection, ConnectionSpec};
pub use device::{Device, DeviceSpec};
pub use events::{Event, EventBus, ERROR, READY};
pub use naming::NameRegistry;
pub use robot::{Robot, RobotConfig, StartPhase, UnitOutcome, WorkFn};

pub use r_hcu_common::{StartMode, WorkTrigger};

/// Shared result type for orchestration operations.
pub type Result<T> = std::result::Result<T, RobotError>;

/// Errors surfaced by robot construction, registration, and startup.
#[derive(Debug, thiserror::Error)]
pub enum RobotError {
    /// Construction input failed validation before any registration ran.
    #[error("invalid configuration: {0}")]
    Configuration(String),
    /// An explicit command table factory failed.
    #[error("command table definition failed: {0}")]
    CommandDefinition(String),
    /// A device names a connection that does not exist on the robot.
    #[error("device '{device}' references unknown connection '{connection}'")]
    ConnectionReference {
        /// Requested device name.
        device: String,
        /// Connection name that failed to resolve.
        connection: String,
    },
    /// A device was declared without a connection name and none is registered.
    #[error("device '{0}' has no connection to bind to; register a connection first")]
    NoConnections(String),
    /// A startup phase reported at least one unit failure.
    #[error("startup failed during the {phase} phase on '{unit}': {message}")]
    Startup {
        /// Phase that produced the first error.
        phase: StartPhase,
        /// Name of the first failing unit, in registration order.
        unit: String,
        /// Error message reported by that unit.
        message: String,
        /// Per-unit outcomes for every unit invoked before the failure was
        /// aggregated, devices included when phase one succeeded.
        outcomes: Vec<UnitOutcome>,
    },
}
