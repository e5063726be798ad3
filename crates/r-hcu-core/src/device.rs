//! ---
//! hcu_section: "01-core-functionality"
//! hcu_subsection: "module"
//! hcu_type: "source"
//! hcu_scope: "code"
//! hcu_description: "Managed handle around one peripheral driver."
//! hcu_version: "v0.0.0-prealpha"
//! hcu_owner: "tbd"
//! ---
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::adaptor::{Driver, UnitResult};
use crate::connection::Connection;

/// Declarative description of one device, consumed at registration.
pub struct DeviceSpec {
    /// Requested name; renamed with a numeric suffix on collision.
    pub name: String,
    /// Driver instance the resulting handle will own.
    pub driver: Box<dyn Driver>,
    /// Connection to bind to; `None` binds to the earliest registered one.
    pub connection: Option<String>,
    /// Pin the peripheral sits on, when it has one.
    pub pin: Option<u32>,
}

impl DeviceSpec {
    /// Describe a device wrapping the supplied driver.
    pub fn new(name: impl Into<String>, driver: Box<dyn Driver>) -> Self {
        Self {
            name: name.into(),
            driver,
            connection: None,
            pin: None,
        }
    }

    /// Bind the device to a named connection.
    pub fn with_connection(mut self, connection: impl Into<String>) -> Self {
        self.connection = Some(connection.into());
        self
    }

    /// Attach a pin address.
    pub fn with_pin(mut self, pin: u32) -> Self {
        self.pin = Some(pin);
        self
    }
}

impl fmt::Debug for DeviceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSpec")
            .field("name", &self.name)
            .field("driver", &self.driver.kind())
            .field("connection", &self.connection)
            .field("pin", &self.pin)
            .finish()
    }
}

/// Managed handle around one peripheral driver.
///
/// The connection reference is shared, never exclusive: several devices may
/// ride the same channel. The `started` flag follows the same optimistic
/// invocation-time marking as [`Connection::connected`].
///
/// [`Connection::connected`]: crate::connection::Connection::connected
pub struct Device {
    name: String,
    kind: String,
    pin: Option<u32>,
    connection: Arc<Connection>,
    started: AtomicBool,
    driver: Mutex<Box<dyn Driver>>,
}

impl Device {
    pub(crate) fn from_spec(
        name: String,
        driver: Box<dyn Driver>,
        connection: Arc<Connection>,
        pin: Option<u32>,
    ) -> Self {
        let kind = driver.kind().to_owned();
        Self {
            name,
            kind,
            pin,
            connection,
            started: AtomicBool::new(false),
            driver: Mutex::new(driver),
        }
    }

    /// Registered name, unique within the owning robot.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Driver kind identifier.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Pin the peripheral sits on, when it has one.
    pub fn pin(&self) -> Option<u32> {
        self.pin
    }

    /// The connection this device rides on.
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Whether `start` has been invoked and `halt` has not since been.
    pub fn started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Phase-two unit: skip when already started, otherwise mark started at
    /// invocation time and drive the driver.
    pub(crate) async fn start(&self) -> UnitResult {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.driver.lock().await.start().await
    }

    /// Teardown unit: skip when not started, otherwise clear the flag at
    /// invocation time and drive the driver.
    pub(crate) async fn halt(&self) -> UnitResult {
        if !self.started.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.driver.lock().await.halt().await
    }

    /// Serialized form contributed to the robot's `to_json()` output.
    pub fn to_json(&self) -> Value {
        json!({
            "name": self.name,
            "driver": self.kind,
            "connection": self.connection.name(),
            "pin": self.pin,
            "started": self.started(),
        })
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name)
            .field("driver", &self.kind)
            .field("connection", &self.connection.name())
            .field("pin", &self.pin)
            .field("started", &self.started())
            .finish()
    }
}
