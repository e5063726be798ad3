//! ---
//! hcu_section: "01-core-functionality"
//! hcu_subsection: "module"
//! hcu_type: "source"
//! hcu_scope: "code"
//! hcu_description: "Managed handle around one communication-channel adaptor."
//! hcu_version: "v0.0.0-prealpha"
//! hcu_owner: "tbd"
//! ---
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::adaptor::{Adaptor, UnitResult};
use crate::device::DeviceSpec;

/// Declarative description of one connection, consumed at registration.
pub struct ConnectionSpec {
    /// Requested name; renamed with a numeric suffix on collision.
    pub name: String,
    /// Adaptor instance the resulting handle will own.
    pub adaptor: Box<dyn Adaptor>,
    /// Devices declared inline with their owning connection.
    pub devices: Vec<DeviceSpec>,
}

impl ConnectionSpec {
    /// Describe a connection wrapping the supplied adaptor.
    pub fn new(name: impl Into<String>, adaptor: Box<dyn Adaptor>) -> Self {
        Self {
            name: name.into(),
            adaptor,
            devices: Vec::new(),
        }
    }

    /// Attach an embedded device declaration bound to this connection.
    pub fn with_device(mut self, device: DeviceSpec) -> Self {
        self.devices.push(device);
        self
    }
}

impl fmt::Debug for ConnectionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSpec")
            .field("name", &self.name)
            .field("adaptor", &self.adaptor.kind())
            .field("devices", &self.devices.len())
            .finish()
    }
}

/// Managed handle around one communication-channel adaptor.
///
/// Identity fields are captured from the adaptor at registration so that
/// serialization never needs to coordinate with an in-flight operation; the
/// `connected` flag is set optimistically when `connect` is invoked, not when
/// the adaptor confirms completion.
pub struct Connection {
    name: String,
    kind: String,
    host: Option<String>,
    port: Option<u16>,
    connected: AtomicBool,
    adaptor: Mutex<Box<dyn Adaptor>>,
}

impl Connection {
    pub(crate) fn from_spec(name: String, adaptor: Box<dyn Adaptor>) -> Self {
        let kind = adaptor.kind().to_owned();
        let host = adaptor.host().map(str::to_owned);
        let port = adaptor.port();
        Self {
            name,
            kind,
            host,
            port,
            connected: AtomicBool::new(false),
            adaptor: Mutex::new(adaptor),
        }
    }

    /// Registered name, unique within the owning robot.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adaptor kind identifier.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Remote host, when the adaptor reports one.
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// Remote port, when the adaptor reports one.
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Whether `connect` has been invoked and `disconnect` has not since been.
    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Phase-one unit: skip when already connected, otherwise mark connected
    /// at invocation time and drive the adaptor.
    pub(crate) async fn connect(&self) -> UnitResult {
        if self.connected.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.adaptor.lock().await.connect().await
    }

    /// Teardown unit: skip when not connected, otherwise clear the flag at
    /// invocation time and drive the adaptor.
    pub(crate) async fn disconnect(&self) -> UnitResult {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.adaptor.lock().await.disconnect().await
    }

    /// Serialized form contributed to the robot's `to_json()` output.
    pub fn to_json(&self) -> Value {
        json!({
            "name": self.name,
            "adaptor": self.kind,
            "host": self.host,
            "port": self.port,
            "connected": self.connected(),
        })
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.name)
            .field("adaptor", &self.kind)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("connected", &self.connected())
            .finish()
    }
}
