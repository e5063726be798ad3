//! ---
//! hcu_section: "01-core-functionality"
//! hcu_subsection: "module"
//! hcu_type: "source"
//! hcu_scope: "code"
//! hcu_description: "Shared primitives and utilities for the control runtime."
//! hcu_version: "v0.0.0-prealpha"
//! hcu_owner: "tbd"
//! ---
//! Core shared primitives for the R-HCU orchestrator workspace.
//! This crate exposes configuration loading and the tracing bootstrap
//! consumed across the workspace.

pub mod config;
pub mod logging;

pub use config::{
    AppConfig, ConnectionDecl, DeviceDecl, LoggingConfig, RobotDecl, StartMode, WorkTrigger,
};
pub use logging::{init_tracing, LogFormat};
