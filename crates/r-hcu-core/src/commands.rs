//! ---
//! hcu_section: "02-messaging-ipc-data-model"
//! hcu_subsection: "module"
//! hcu_type: "source"
//! hcu_scope: "code"
//! hcu_description: "Externally invokable command table bound to a robot."
//! hcu_version: "v0.0.0-prealpha"
//! hcu_owner: "tbd"
//! ---
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;

use crate::robot::Robot;
use crate::{Result, RobotError};

/// A named operation invoked with the robot as explicit receiver.
pub type Command = Arc<dyn Fn(&Robot, Value) -> Value + Send + Sync>;

/// Insertion-ordered mapping from command name to callable.
pub type CommandTable = IndexMap<String, Command>;

/// Factory invoked exactly once during construction, with the robot as
/// receiver, to produce the command table.
pub type CommandFactory = Box<dyn FnOnce(&Robot) -> Result<CommandTable> + Send>;

/// Wrap a closure into a [`Command`].
pub fn command<F>(f: F) -> Command
where
    F: Fn(&Robot, Value) -> Value + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Explicit `commands` configuration value: a table used as-is, or a factory
/// producing one.
pub enum Commands {
    /// Ready-made command table.
    Table(CommandTable),
    /// Factory producing the table once the robot exists.
    Factory(CommandFactory),
}

impl Commands {
    pub(crate) fn into_table(self, robot: &Robot) -> Result<CommandTable> {
        match self {
            Commands::Table(table) => Ok(table),
            Commands::Factory(factory) => {
                factory(robot).map_err(|err| RobotError::CommandDefinition(err.to_string()))
            }
        }
    }
}

impl fmt::Debug for Commands {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Commands::Table(table) => f
                .debug_tuple("Table")
                .field(&table.keys().collect::<Vec<_>>())
                .finish(),
            Commands::Factory(_) => f.write_str("Factory(..)"),
        }
    }
}
