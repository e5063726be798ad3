//! ---
//! hcu_section: "11-simulation"
//! hcu_subsection: "module"
//! hcu_type: "source"
//! hcu_scope: "code"
//! hcu_description: "Simulated adaptors and drivers for bring-up and tests."
//! hcu_version: "v0.0.0-prealpha"
//! hcu_owner: "tbd"
//! ---
//! Simulated channel adaptors and peripheral drivers for the R-HCU runtime.
//!
//! The loopback adaptor and virtual-pin driver satisfy the collaborator
//! contracts without hardware: programmable latency, injectable faults, and
//! call counters for assertions. The [`catalog`] module resolves the kind
//! strings used by file configuration into boxed instances.
#![warn(missing_docs)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use r_hcu_core::{Adaptor, Driver, UnitError, UnitResult};
use tokio::time::sleep;
use tracing::debug;

/// Call counters exposed by a [`LoopbackAdaptor`].
#[derive(Debug, Default)]
pub struct LinkStats {
    /// Completed `connect` invocations.
    pub connects: AtomicUsize,
    /// Completed `disconnect` invocations.
    pub disconnects: AtomicUsize,
}

/// Adaptor that loops a virtual channel back onto itself.
#[derive(Debug)]
pub struct LoopbackAdaptor {
    host: Option<String>,
    port: Option<u16>,
    latency: Duration,
    fail_connect: bool,
    fail_disconnect: bool,
    stats: Arc<LinkStats>,
}

impl Default for LoopbackAdaptor {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackAdaptor {
    /// Loopback with no endpoint, no latency, and no faults.
    pub fn new() -> Self {
        Self {
            host: None,
            port: None,
            latency: Duration::ZERO,
            fail_connect: false,
            fail_disconnect: false,
            stats: Arc::new(LinkStats::default()),
        }
    }

    /// Attach a simulated endpoint for logging and serialization.
    pub fn with_endpoint(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = Some(host.into());
        self.port = Some(port);
        self
    }

    /// Delay connect/disconnect completion by the supplied latency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make every `connect` report a link failure.
    pub fn failing_connect(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    /// Make every `disconnect` report a link failure.
    pub fn failing_disconnect(mut self) -> Self {
        self.fail_disconnect = true;
        self
    }

    /// Counter handle that stays valid after the adaptor is boxed.
    pub fn stats(&self) -> Arc<LinkStats> {
        self.stats.clone()
    }
}

#[async_trait]
impl Adaptor for LoopbackAdaptor {
    fn kind(&self) -> &str {
        "loopback"
    }

    fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    fn port(&self) -> Option<u16> {
        self.port
    }

    async fn connect(&mut self) -> UnitResult {
        if !self.latency.is_zero() {
            sleep(self.latency).await;
        }
        self.stats.connects.fetch_add(1, Ordering::SeqCst);
        debug!(host = ?self.host, port = ?self.port, "loopback connect");
        if self.fail_connect {
            return Err(UnitError::new("loopback link refused"));
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> UnitResult {
        if !self.latency.is_zero() {
            sleep(self.latency).await;
        }
        self.stats.disconnects.fetch_add(1, Ordering::SeqCst);
        debug!(host = ?self.host, port = ?self.port, "loopback disconnect");
        if self.fail_disconnect {
            return Err(UnitError::new("loopback link stuck"));
        }
        Ok(())
    }
}

/// Call counters exposed by a [`VirtualPinDriver`].
#[derive(Debug, Default)]
pub struct PinStats {
    /// Completed `start` invocations.
    pub starts: AtomicUsize,
    /// Completed `halt` invocations.
    pub halts: AtomicUsize,
}

/// Driver toggling a virtual pin instead of real hardware.
#[derive(Debug)]
pub struct VirtualPinDriver {
    pin: Option<u32>,
    latency: Duration,
    fail_start: bool,
    fail_halt: bool,
    stats: Arc<PinStats>,
}

impl Default for VirtualPinDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualPinDriver {
    /// Virtual pin with no latency and no faults.
    pub fn new() -> Self {
        Self {
            pin: None,
            latency: Duration::ZERO,
            fail_start: false,
            fail_halt: false,
            stats: Arc::new(PinStats::default()),
        }
    }

    /// Attach the pin address the driver pretends to toggle.
    pub fn with_pin(mut self, pin: u32) -> Self {
        self.pin = Some(pin);
        self
    }

    /// Delay start/halt completion by the supplied latency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make every `start` report a jammed peripheral.
    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// Make every `halt` report a stuck peripheral.
    pub fn failing_halt(mut self) -> Self {
        self.fail_halt = true;
        self
    }

    /// Counter handle that stays valid after the driver is boxed.
    pub fn stats(&self) -> Arc<PinStats> {
        self.stats.clone()
    }
}

#[async_trait]
impl Driver for VirtualPinDriver {
    fn kind(&self) -> &str {
        "virtual-pin"
    }

    async fn start(&mut self) -> UnitResult {
        if !self.latency.is_zero() {
            sleep(self.latency).await;
        }
        self.stats.starts.fetch_add(1, Ordering::SeqCst);
        debug!(pin = ?self.pin, "virtual pin start");
        if self.fail_start {
            return Err(UnitError::new("virtual pin jammed"));
        }
        Ok(())
    }

    async fn halt(&mut self) -> UnitResult {
        if !self.latency.is_zero() {
            sleep(self.latency).await;
        }
        self.stats.halts.fetch_add(1, Ordering::SeqCst);
        debug!(pin = ?self.pin, "virtual pin halt");
        if self.fail_halt {
            return Err(UnitError::new("virtual pin stuck"));
        }
        Ok(())
    }
}

/// Resolution of file-configuration kind strings into simulated instances.
pub mod catalog {
    use r_hcu_common::{ConnectionDecl, DeviceDecl, RobotDecl};
    use r_hcu_core::{
        Adaptor, ConnectionSpec, DeviceSpec, Driver, RobotConfig, Result, RobotError,
    };

    use super::*;

    /// Build an adaptor instance for the declared kind.
    pub fn adaptor_for(decl: &ConnectionDecl) -> Result<Box<dyn Adaptor>> {
        match decl.adaptor.as_str() {
            "loopback" => {
                let mut adaptor = LoopbackAdaptor::new();
                if let (Some(host), Some(port)) = (decl.host.clone(), decl.port) {
                    adaptor = adaptor.with_endpoint(host, port);
                }
                if let Some(latency_ms) = decl.latency_ms {
                    adaptor = adaptor.with_latency(Duration::from_millis(latency_ms));
                }
                Ok(Box::new(adaptor))
            }
            other => Err(RobotError::Configuration(format!(
                "unknown adaptor kind '{}' for connection '{}'",
                other, decl.name
            ))),
        }
    }

    /// Build a driver instance for the declared kind.
    pub fn driver_for(decl: &DeviceDecl) -> Result<Box<dyn Driver>> {
        match decl.driver.as_str() {
            "virtual-pin" => {
                let mut driver = VirtualPinDriver::new();
                if let Some(pin) = decl.pin {
                    driver = driver.with_pin(pin);
                }
                Ok(Box::new(driver))
            }
            other => Err(RobotError::Configuration(format!(
                "unknown driver kind '{}' for device '{}'",
                other, decl.name
            ))),
        }
    }

    /// Materialize a declarative robot into runtime construction input.
    pub fn materialize(decl: &RobotDecl) -> Result<RobotConfig> {
        let mut config = RobotConfig::new();
        config.name = decl.name.clone();
        config.start_mode = decl.start;
        config.work_trigger = decl.work_trigger;
        config.events = decl.events.clone();
        for connection in &decl.connections {
            let mut spec = ConnectionSpec::new(connection.name.clone(), adaptor_for(connection)?);
            for device in &connection.devices {
                spec = spec.with_device(device_spec(device)?);
            }
            config.connections.push(spec);
        }
        for device in &decl.devices {
            config.devices.push(device_spec(device)?);
        }
        Ok(config)
    }

    fn device_spec(decl: &DeviceDecl) -> Result<DeviceSpec> {
        let mut spec = DeviceSpec::new(decl.name.clone(), driver_for(decl)?);
        spec.connection = decl.connection.clone();
        spec.pin = decl.pin;
        Ok(spec)
    }
}

#[cfg(test)]
mod tests {
    use r_hcu_common::RobotDecl;
    use r_hcu_core::{NameRegistry, Robot};

    use super::*;

    #[tokio::test]
    async fn loopback_counts_and_injects_faults() {
        let healthy = LoopbackAdaptor::new().with_endpoint("127.0.0.1", 9000);
        let stats = healthy.stats();
        let mut boxed: Box<dyn Adaptor> = Box::new(healthy);
        boxed.connect().await.expect("connect succeeds");
        boxed.disconnect().await.expect("disconnect succeeds");
        assert_eq!(stats.connects.load(Ordering::SeqCst), 1);
        assert_eq!(stats.disconnects.load(Ordering::SeqCst), 1);

        let mut flaky: Box<dyn Adaptor> = Box::new(LoopbackAdaptor::new().failing_connect());
        assert!(flaky.connect().await.is_err());
    }

    #[tokio::test]
    async fn virtual_pin_counts_and_injects_faults() {
        let healthy = VirtualPinDriver::new().with_pin(13);
        let stats = healthy.stats();
        let mut boxed: Box<dyn Driver> = Box::new(healthy);
        boxed.start().await.expect("start succeeds");
        boxed.halt().await.expect("halt succeeds");
        assert_eq!(stats.starts.load(Ordering::SeqCst), 1);
        assert_eq!(stats.halts.load(Ordering::SeqCst), 1);

        let mut stuck: Box<dyn Driver> = Box::new(VirtualPinDriver::new().failing_halt());
        stuck.start().await.expect("start succeeds");
        assert!(stuck.halt().await.is_err());
    }

    #[tokio::test]
    async fn materialized_robots_run_the_full_lifecycle() {
        let raw = r#"
            name = "Ultron"

            [[connections]]
            name = "loopback"
            adaptor = "loopback"
            host = "127.0.0.1"
            port = 9000

            [[connections.devices]]
            name = "led"
            driver = "virtual-pin"
            pin = 13

            [[devices]]
            name = "button"
            driver = "virtual-pin"
            pin = 2
        "#;
        let decl: RobotDecl = toml::from_str(raw).expect("declaration parses");
        let mut config = catalog::materialize(&decl).expect("materializes");
        config.registry = Some(std::sync::Arc::new(NameRegistry::new()));
        let robot = Robot::new(config).expect("robot builds");

        robot.start().await.expect("start succeeds");
        assert!(robot.is_running());
        assert!(robot.device_named("led").expect("led exists").started());
        robot.halt().await.expect("halt succeeds");
        assert!(!robot.is_running());
    }

    #[test]
    fn unknown_kinds_are_rejected() {
        let decl = RobotDecl {
            connections: vec![r_hcu_common::ConnectionDecl {
                name: "serial".to_owned(),
                adaptor: "quantum".to_owned(),
                host: None,
                port: None,
                latency_ms: None,
                devices: Vec::new(),
            }],
            ..RobotDecl::default()
        };
        assert!(catalog::materialize(&decl).is_err());
    }
}
