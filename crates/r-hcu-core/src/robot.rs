//! ---
//! hcu_section: "01-core-functionality"
//! hcu_subsection: "module"
//! hcu_type: "source"
//! hcu_scope: "code"
//! hcu_description: "Composite controller lifecycle: construction, start, halt."
//! hcu_version: "v0.0.0-prealpha"
//! hcu_owner: "tbd"
//! ---
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use r_hcu_common::{StartMode, WorkTrigger};
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::adaptor::UnitResult;
use crate::commands::{Command, CommandTable, Commands};
use crate::connection::{Connection, ConnectionSpec};
use crate::device::{Device, DeviceSpec};
use crate::events::{Event, EventBus, ERROR, READY};
use crate::naming::{next_default_name, unique_name, NameRegistry};
use crate::{Result, RobotError};

/// Work routine invoked once per successful start, with the robot as receiver.
pub type WorkFn = Arc<dyn Fn(&Robot) + Send + Sync>;

/// Startup phase identifiers used in error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPhase {
    /// Phase one: every connection's `connect`.
    Connections,
    /// Phase two: every device's `start`.
    Devices,
}

impl fmt::Display for StartPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartPhase::Connections => f.write_str("connection"),
            StartPhase::Devices => f.write_str("device"),
        }
    }
}

/// Outcome of one unit inside a phase barrier.
#[derive(Debug, Clone)]
pub struct UnitOutcome {
    /// Registered name of the connection or device.
    pub unit: String,
    /// Rendered error when the unit failed; `None` on success.
    pub error: Option<String>,
}

/// Typed construction input for a [`Robot`].
///
/// Extensions are declared explicitly: scalar extensions become
/// introspectable properties, callable extensions stay invokable and double
/// as commands unless an explicit `commands` value is supplied.
#[derive(Default)]
pub struct RobotConfig {
    /// Robot name; a process-wide counter names anonymous robots.
    pub name: Option<String>,
    /// Connections to register, in order, with optional embedded devices.
    pub connections: Vec<ConnectionSpec>,
    /// Devices to register after every connection, in order.
    pub devices: Vec<DeviceSpec>,
    /// Work routine; a no-op logging routine is used when absent.
    pub work: Option<WorkFn>,
    /// Explicit command table or factory.
    pub commands: Option<Commands>,
    /// Event names declared for serialization.
    pub events: Vec<String>,
    /// Scalar extensions exposed as properties.
    pub properties: IndexMap<String, Value>,
    /// Callable extensions bound to the robot.
    pub callables: IndexMap<String, Command>,
    /// Whether `start()` is scheduled right after construction.
    pub start_mode: StartMode,
    /// When the work routine fires relative to the startup barrier.
    pub work_trigger: WorkTrigger,
    /// Name registry override; the process-wide registry is the default.
    pub registry: Option<Arc<NameRegistry>>,
}

impl RobotConfig {
    /// Empty configuration with every default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the robot name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Append a connection declaration.
    pub fn connection(mut self, spec: ConnectionSpec) -> Self {
        self.connections.push(spec);
        self
    }

    /// Append a device declaration.
    pub fn device(mut self, spec: DeviceSpec) -> Self {
        self.devices.push(spec);
        self
    }

    /// Set the work routine.
    pub fn work<F>(mut self, work: F) -> Self
    where
        F: Fn(&Robot) + Send + Sync + 'static,
    {
        self.work = Some(Arc::new(work));
        self
    }

    /// Accepted alias for [`RobotConfig::work`].
    pub fn play<F>(self, work: F) -> Self
    where
        F: Fn(&Robot) + Send + Sync + 'static,
    {
        self.work(work)
    }

    /// Supply an explicit command table or factory.
    pub fn commands(mut self, commands: Commands) -> Self {
        self.commands = Some(commands);
        self
    }

    /// Declare an event name for serialization.
    pub fn event(mut self, name: impl Into<String>) -> Self {
        self.events.push(name.into());
        self
    }

    /// Attach a scalar extension exposed as a property.
    pub fn property(mut self, name: impl Into<String>, value: Value) -> Self {
        self.properties.insert(name.into(), value);
        self
    }

    /// Attach a callable extension bound to the robot.
    pub fn callable<F>(mut self, name: impl Into<String>, callable: F) -> Self
    where
        F: Fn(&Robot, Value) -> Value + Send + Sync + 'static,
    {
        self.callables.insert(name.into(), Arc::new(callable));
        self
    }

    /// Set the start mode.
    pub fn start_mode(mut self, mode: StartMode) -> Self {
        self.start_mode = mode;
        self
    }

    /// Set the work trigger.
    pub fn work_trigger(mut self, trigger: WorkTrigger) -> Self {
        self.work_trigger = trigger;
        self
    }

    /// Inject a dedicated name registry.
    pub fn registry(mut self, registry: Arc<NameRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Validate structural invariants. Runs before any registration side
    /// effect during construction.
    pub fn validate(&self) -> Result<()> {
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err(RobotError::Configuration(
                    "robot name must not be empty".to_owned(),
                ));
            }
        }
        for spec in &self.connections {
            if spec.name.trim().is_empty() {
                return Err(RobotError::Configuration(
                    "connection names must not be empty".to_owned(),
                ));
            }
            for device in &spec.devices {
                if device.name.trim().is_empty() {
                    return Err(RobotError::Configuration(format!(
                        "connection '{}' embeds an unnamed device",
                        spec.name
                    )));
                }
            }
        }
        for device in &self.devices {
            if device.name.trim().is_empty() {
                return Err(RobotError::Configuration(
                    "device names must not be empty".to_owned(),
                ));
            }
        }
        if self.events.iter().any(|event| event.trim().is_empty()) {
            return Err(RobotError::Configuration(
                "declared event names must not be empty".to_owned(),
            ));
        }
        for key in self.properties.keys() {
            if self.callables.contains_key(key) {
                return Err(RobotError::Configuration(format!(
                    "extension '{}' declared as both property and callable",
                    key
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for RobotConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RobotConfig")
            .field("name", &self.name)
            .field("connections", &self.connections.len())
            .field("devices", &self.devices.len())
            .field("events", &self.events)
            .field("start_mode", &self.start_mode)
            .field("work_trigger", &self.work_trigger)
            .finish()
    }
}

/// Composite hardware-control unit owning connections and devices.
pub struct Robot {
    name: String,
    running: AtomicBool,
    connections: IndexMap<String, Arc<Connection>>,
    devices: IndexMap<String, Arc<Device>>,
    commands: CommandTable,
    callables: IndexMap<String, Command>,
    properties: IndexMap<String, Value>,
    events: EventBus,
    work: WorkFn,
    work_trigger: WorkTrigger,
    registry: Arc<NameRegistry>,
}

impl Robot {
    /// Construct a robot from validated configuration.
    ///
    /// Validation runs first and fails fast; only then is the name claimed
    /// and the connection/device registration performed. Registration
    /// failures release the claimed name again.
    pub fn new(config: RobotConfig) -> Result<Self> {
        config.validate()?;
        let RobotConfig {
            name,
            connections,
            devices,
            work,
            commands,
            events,
            properties,
            callables,
            start_mode: _,
            work_trigger,
            registry,
        } = config;

        let registry = registry.unwrap_or_else(NameRegistry::global);
        let requested = name.unwrap_or_else(next_default_name);
        let assigned = registry.claim(&requested);
        if assigned != requested {
            info!(
                "[{}] - robot name '{}' is taken; renamed to '{}'",
                assigned, requested, assigned
            );
        }

        let mut robot = Robot {
            name: assigned,
            running: AtomicBool::new(false),
            connections: IndexMap::new(),
            devices: IndexMap::new(),
            commands: IndexMap::new(),
            callables,
            properties,
            events: EventBus::new(events),
            work: work.unwrap_or_else(default_work),
            work_trigger,
            registry,
        };

        match populate(&mut robot, connections, devices, commands) {
            Ok(()) => Ok(robot),
            Err(err) => {
                robot.registry.release(&robot.name);
                Err(err)
            }
        }
    }

    /// Construct a shared robot and, in auto start mode, schedule `start()`
    /// on a fresh task so callers can attach listeners first.
    ///
    /// Must be called within a tokio runtime when the start mode is auto.
    pub fn spawn(config: RobotConfig) -> Result<Arc<Self>> {
        let auto = config.start_mode.is_auto();
        let robot = Arc::new(Self::new(config)?);
        if auto {
            let deferred = robot.clone();
            tokio::spawn(async move {
                if let Err(err) = deferred.start().await {
                    error!("[{}] - deferred start failed: {}", deferred.name(), err);
                }
            });
        }
        Ok(robot)
    }

    /// Register a connection, resolving name collisions with the smallest
    /// unused numeric suffix, then its embedded devices.
    pub fn connection(&mut self, spec: ConnectionSpec) -> Result<Arc<Connection>> {
        let ConnectionSpec {
            name,
            adaptor,
            devices,
        } = spec;
        let assigned = unique_name(&name, |candidate| self.connections.contains_key(candidate));
        if assigned != name {
            info!(
                "[{}] - connection name '{}' is in use; renamed to '{}'",
                self.name, name, assigned
            );
        }
        let connection = Arc::new(Connection::from_spec(assigned.clone(), adaptor));
        self.connections.insert(assigned.clone(), connection.clone());
        debug!(robot = %self.name, connection = %assigned, "registered connection");
        for mut device in devices {
            device.connection = Some(assigned.clone());
            self.device(device)?;
        }
        Ok(connection)
    }

    /// Register a device, binding it to its connection.
    ///
    /// Without a connection name the device binds to the earliest registered
    /// connection. A named-but-absent connection yields
    /// [`RobotError::ConnectionReference`].
    pub fn device(&mut self, spec: DeviceSpec) -> Result<Arc<Device>> {
        let DeviceSpec {
            name,
            driver,
            connection,
            pin,
        } = spec;
        let connection = match connection {
            Some(wanted) => {
                self.connections
                    .get(&wanted)
                    .cloned()
                    .ok_or_else(|| RobotError::ConnectionReference {
                        device: name.clone(),
                        connection: wanted,
                    })?
            }
            None => self
                .connections
                .values()
                .next()
                .cloned()
                .ok_or_else(|| RobotError::NoConnections(name.clone()))?,
        };
        let assigned = unique_name(&name, |candidate| self.devices.contains_key(candidate));
        if assigned != name {
            info!(
                "[{}] - device name '{}' is in use; renamed to '{}'",
                self.name, name, assigned
            );
        }
        let device = Arc::new(Device::from_spec(assigned.clone(), driver, connection, pin));
        self.devices.insert(assigned.clone(), device.clone());
        debug!(robot = %self.name, device = %assigned, "registered device");
        Ok(device)
    }

    /// Run the two-phase startup barrier: every connection's `connect`
    /// concurrently, then every device's `start` concurrently.
    ///
    /// A no-op when already running. All units of a phase run to completion;
    /// the first failure in registration order becomes the phase result. On
    /// failure whatever partially started is torn down, the local `error`
    /// callable and the `error` event listeners are notified, and the
    /// aggregated [`RobotError::Startup`] carries the per-unit outcomes.
    pub async fn start(&self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            debug!(robot = %self.name, "start requested while already running");
            return Ok(());
        }
        info!("[{}] - starting", self.name);

        if self.work_trigger == WorkTrigger::Immediate {
            self.dispatch_ready();
        }

        let units = self
            .connections
            .values()
            .map(|handle| {
                let connection = handle.clone();
                let task: JoinHandle<UnitResult> =
                    tokio::spawn(async move { connection.connect().await });
                (handle.name().to_owned(), task)
            })
            .collect();
        let mut outcomes = join_units(units).await;
        if let Some((unit, message)) = first_failure(&outcomes) {
            return self
                .fail_start(StartPhase::Connections, unit, message, outcomes)
                .await;
        }

        let units = self
            .devices
            .values()
            .map(|handle| {
                let device = handle.clone();
                let task: JoinHandle<UnitResult> =
                    tokio::spawn(async move { device.start().await });
                (handle.name().to_owned(), task)
            })
            .collect();
        let device_outcomes = join_units(units).await;
        let failure = first_failure(&device_outcomes);
        outcomes.extend(device_outcomes);
        if let Some((unit, message)) = failure {
            return self
                .fail_start(StartPhase::Devices, unit, message, outcomes)
                .await;
        }

        if self.work_trigger == WorkTrigger::BarrierGated {
            self.dispatch_ready();
        }
        self.running.store(true, Ordering::SeqCst);
        info!("[{}] - working", self.name);
        Ok(())
    }

    /// Best-effort teardown: every device's `halt` concurrently, then every
    /// connection's `disconnect` concurrently.
    ///
    /// A no-op when not running. `running` flips false as soon as halt
    /// begins; per-unit failures are logged and swallowed so one faulty unit
    /// never blocks the others.
    pub async fn halt(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            debug!(robot = %self.name, "halt requested while not running");
            return Ok(());
        }
        info!("[{}] - halting", self.name);
        self.run_halt_phases().await;
        info!("[{}] - halted", self.name);
        Ok(())
    }

    async fn run_halt_phases(&self) {
        let units = self
            .devices
            .values()
            .map(|handle| {
                let device = handle.clone();
                let task: JoinHandle<UnitResult> =
                    tokio::spawn(async move { device.halt().await });
                (handle.name().to_owned(), task)
            })
            .collect();
        for outcome in join_units(units).await {
            if let Some(message) = outcome.error {
                warn!(
                    "[{}] - device '{}' failed to halt: {}",
                    self.name, outcome.unit, message
                );
            }
        }

        let units = self
            .connections
            .values()
            .map(|handle| {
                let connection = handle.clone();
                let task: JoinHandle<UnitResult> =
                    tokio::spawn(async move { connection.disconnect().await });
                (handle.name().to_owned(), task)
            })
            .collect();
        for outcome in join_units(units).await {
            if let Some(message) = outcome.error {
                warn!(
                    "[{}] - connection '{}' failed to disconnect: {}",
                    self.name, outcome.unit, message
                );
            }
        }
    }

    async fn fail_start(
        &self,
        phase: StartPhase,
        unit: String,
        message: String,
        outcomes: Vec<UnitOutcome>,
    ) -> Result<()> {
        error!(
            "[{}] - {} phase failed on '{}': {}",
            self.name, phase, unit, message
        );
        self.run_halt_phases().await;
        if let Some(handler) = self.callables.get(ERROR) {
            handler(
                self,
                json!({
                    "phase": phase.to_string(),
                    "unit": unit,
                    "message": message,
                }),
            );
        }
        if self.events.listener_count(ERROR) > 0 {
            self.events.emit(
                ERROR,
                json!({
                    "robot": self.name,
                    "phase": phase.to_string(),
                    "unit": unit,
                    "message": message,
                }),
            );
        }
        Err(RobotError::Startup {
            phase,
            unit,
            message,
            outcomes,
        })
    }

    fn dispatch_ready(&self) {
        self.events.emit(READY, self.to_json());
        (self.work)(self);
    }

    /// Robot name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a successful `start()` has completed and `halt()` has not
    /// since begun.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Registered connections, in registration order.
    pub fn connections(&self) -> impl Iterator<Item = &Arc<Connection>> {
        self.connections.values()
    }

    /// Registered devices, in registration order.
    pub fn devices(&self) -> impl Iterator<Item = &Arc<Device>> {
        self.devices.values()
    }

    /// Look up a connection by registered name.
    pub fn connection_named(&self, name: &str) -> Option<&Arc<Connection>> {
        self.connections.get(name)
    }

    /// Look up a device by registered name.
    pub fn device_named(&self, name: &str) -> Option<&Arc<Device>> {
        self.devices.get(name)
    }

    /// Command names, in table order.
    pub fn command_names(&self) -> Vec<&str> {
        self.commands.keys().map(String::as_str).collect()
    }

    /// Add (or replace) a command after construction.
    pub fn add_command(&mut self, name: impl Into<String>, command: Command) {
        self.commands.insert(name.into(), command);
    }

    /// Invoke a command with this robot as receiver. `None` when the command
    /// does not exist.
    pub fn invoke(&self, name: &str, args: Value) -> Option<Value> {
        let command = self.commands.get(name)?.clone();
        Some(command(self, args))
    }

    /// Scalar extension value, when one was configured under this name.
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    /// Callable extension, when one was configured under this name.
    pub fn callable(&self, name: &str) -> Option<&Command> {
        self.callables.get(name)
    }

    /// Register a listener for the named event.
    pub fn on(&self, event: impl Into<String>, listener: impl Fn(&Event) + Send + Sync + 'static) {
        self.events.on(event, listener);
    }

    /// Dispatch a custom event; returns the number of listeners invoked.
    pub fn emit(&self, event: &str, payload: Value) -> usize {
        self.events.emit(event, payload)
    }

    /// Event names declared at construction.
    pub fn declared_events(&self) -> &[String] {
        self.events.declared()
    }

    /// Serialized controller shape:
    /// `{ name, connections, devices, commands, events }`.
    pub fn to_json(&self) -> Value {
        json!({
            "name": self.name,
            "connections": self
                .connections
                .values()
                .map(|connection| connection.to_json())
                .collect::<Vec<_>>(),
            "devices": self
                .devices
                .values()
                .map(|device| device.to_json())
                .collect::<Vec<_>>(),
            "commands": self.commands.keys().collect::<Vec<_>>(),
            "events": self.events.declared(),
        })
    }
}

impl fmt::Display for Robot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[Robot name='{}']", self.name)
    }
}

impl fmt::Debug for Robot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Robot")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .field("connections", &self.connections.keys().collect::<Vec<_>>())
            .field("devices", &self.devices.keys().collect::<Vec<_>>())
            .field("commands", &self.commands.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn populate(
    robot: &mut Robot,
    connections: Vec<ConnectionSpec>,
    devices: Vec<DeviceSpec>,
    commands: Option<Commands>,
) -> Result<()> {
    for spec in connections {
        robot.connection(spec)?;
    }
    for spec in devices {
        robot.device(spec)?;
    }
    let table = match commands {
        Some(commands) => commands.into_table(robot)?,
        None => robot.callables.clone(),
    };
    robot.commands = table;
    Ok(())
}

async fn join_units(units: Vec<(String, JoinHandle<UnitResult>)>) -> Vec<UnitOutcome> {
    let mut outcomes = Vec::with_capacity(units.len());
    for (unit, task) in units {
        let error = match task.await {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err.to_string()),
            // A panicking unit is isolated by its task boundary and folded
            // into the phase result like any other unit failure.
            Err(join_err) => Some(format!("unit task aborted: {}", join_err)),
        };
        outcomes.push(UnitOutcome { unit, error });
    }
    outcomes
}

fn first_failure(outcomes: &[UnitOutcome]) -> Option<(String, String)> {
    outcomes.iter().find_map(|outcome| {
        outcome
            .error
            .as_ref()
            .map(|message| (outcome.unit.clone(), message.clone()))
    })
}

fn default_work() -> WorkFn {
    Arc::new(|robot: &Robot| {
        info!("[{}] - no work routine supplied; standing by", robot.name());
    })
}
