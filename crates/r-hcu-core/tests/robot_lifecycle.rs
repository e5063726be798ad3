//! ---
//! hcu_section: "01-core-functionality"
//! hcu_subsection: "module"
//! hcu_type: "source"
//! hcu_scope: "code"
//! hcu_description: "Composite controller lifecycle: construction, start, halt."
//! hcu_version: "v0.0.0-prealpha"
//! hcu_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use r_hcu_core::{
    Adaptor, ConnectionSpec, DeviceSpec, Driver, NameRegistry, Robot, RobotConfig, RobotError,
    StartMode, StartPhase, UnitError, UnitResult, WorkTrigger, ERROR,
};
use serde_json::json;
use tokio::time::sleep;

/// Shared call counters inspected by the assertions.
#[derive(Default)]
struct Recorder {
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    starts: AtomicUsize,
    halts: AtomicUsize,
}

struct RecordingAdaptor {
    recorder: Arc<Recorder>,
    trace: Option<Trace>,
    delay: Duration,
    fail_connect: bool,
}

impl RecordingAdaptor {
    fn new(recorder: Arc<Recorder>) -> Self {
        Self {
            recorder,
            trace: None,
            delay: Duration::ZERO,
            fail_connect: false,
        }
    }

    fn tracing(mut self, trace: Trace) -> Self {
        self.trace = Some(trace);
        self
    }

    fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn failing(mut self) -> Self {
        self.fail_connect = true;
        self
    }
}

#[async_trait]
impl Adaptor for RecordingAdaptor {
    fn kind(&self) -> &str {
        "recording"
    }

    fn host(&self) -> Option<&str> {
        Some("127.0.0.1")
    }

    fn port(&self) -> Option<u16> {
        Some(4321)
    }

    async fn connect(&mut self) -> UnitResult {
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }
        self.recorder.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(trace) = &self.trace {
            trace.lock().unwrap().push("connect");
        }
        if self.fail_connect {
            return Err(UnitError::new("link refused"));
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> UnitResult {
        self.recorder.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct RecordingDriver {
    recorder: Arc<Recorder>,
    fail_start: bool,
    fail_halt: bool,
    panic_on_halt: bool,
}

impl RecordingDriver {
    fn new(recorder: Arc<Recorder>) -> Self {
        Self {
            recorder,
            fail_start: false,
            fail_halt: false,
            panic_on_halt: false,
        }
    }

    fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    fn failing_halt(mut self) -> Self {
        self.fail_halt = true;
        self
    }

    fn panicking_halt(mut self) -> Self {
        self.panic_on_halt = true;
        self
    }
}

#[async_trait]
impl Driver for RecordingDriver {
    fn kind(&self) -> &str {
        "recording"
    }

    async fn start(&mut self) -> UnitResult {
        self.recorder.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start {
            return Err(UnitError::new("servo jammed"));
        }
        Ok(())
    }

    async fn halt(&mut self) -> UnitResult {
        if self.panic_on_halt {
            panic!("driver exploded");
        }
        self.recorder.halts.fetch_add(1, Ordering::SeqCst);
        if self.fail_halt {
            return Err(UnitError::new("stuck actuator"));
        }
        Ok(())
    }
}

type Trace = Arc<Mutex<Vec<&'static str>>>;

fn isolated(config: RobotConfig) -> RobotConfig {
    config.registry(Arc::new(NameRegistry::new()))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn start_runs_ready_then_work_and_marks_running() {
    let recorder = Arc::new(Recorder::default());
    let trace: Trace = Arc::new(Mutex::new(Vec::new()));
    let work_trace = trace.clone();
    let config = isolated(
        RobotConfig::new()
            .name("Ultron")
            .connection(ConnectionSpec::new(
                "serial",
                Box::new(RecordingAdaptor::new(recorder.clone()).delayed(Duration::from_millis(10))),
            ))
            .device(DeviceSpec::new(
                "led",
                Box::new(RecordingDriver::new(recorder.clone())),
            ))
            .work(move |_robot| {
                work_trace.lock().unwrap().push("work");
            }),
    );
    let robot = Robot::new(config).expect("robot builds");

    let ready_trace = trace.clone();
    robot.on("ready", move |event| {
        assert_eq!(event.payload["name"], json!("Ultron"));
        ready_trace.lock().unwrap().push("ready");
    });

    robot.start().await.expect("start succeeds");

    assert!(robot.is_running());
    assert_eq!(recorder.connects.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.starts.load(Ordering::SeqCst), 1);
    assert_eq!(*trace.lock().unwrap(), vec!["ready", "work"]);
    let connection = robot.connection_named("serial").expect("connection exists");
    assert!(connection.connected());
    assert!(robot.device_named("led").expect("device exists").started());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn start_is_idempotent_while_running() {
    let recorder = Arc::new(Recorder::default());
    let config = isolated(
        RobotConfig::new()
            .connection(ConnectionSpec::new(
                "serial",
                Box::new(RecordingAdaptor::new(recorder.clone())),
            ))
            .device(DeviceSpec::new(
                "led",
                Box::new(RecordingDriver::new(recorder.clone())),
            )),
    );
    let robot = Robot::new(config).expect("robot builds");

    robot.start().await.expect("first start succeeds");
    robot.start().await.expect("second start is a no-op");

    assert_eq!(recorder.connects.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.starts.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn halt_is_a_noop_when_not_running() {
    let recorder = Arc::new(Recorder::default());
    let config = isolated(
        RobotConfig::new()
            .connection(ConnectionSpec::new(
                "serial",
                Box::new(RecordingAdaptor::new(recorder.clone())),
            ))
            .device(DeviceSpec::new(
                "led",
                Box::new(RecordingDriver::new(recorder.clone())),
            )),
    );
    let robot = Robot::new(config).expect("robot builds");

    robot.halt().await.expect("halt returns immediately");

    assert_eq!(recorder.halts.load(Ordering::SeqCst), 0);
    assert_eq!(recorder.disconnects.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn halt_reverses_devices_then_connections() {
    let recorder = Arc::new(Recorder::default());
    let config = isolated(
        RobotConfig::new()
            .connection(ConnectionSpec::new(
                "serial",
                Box::new(RecordingAdaptor::new(recorder.clone())),
            ))
            .device(DeviceSpec::new(
                "led",
                Box::new(RecordingDriver::new(recorder.clone())),
            )),
    );
    let robot = Robot::new(config).expect("robot builds");

    robot.start().await.expect("start succeeds");
    robot.halt().await.expect("halt succeeds");

    assert!(!robot.is_running());
    assert_eq!(recorder.halts.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.disconnects.load(Ordering::SeqCst), 1);
    let connection = robot.connection_named("serial").expect("connection exists");
    assert!(!connection.connected());
    assert!(!robot.device_named("led").expect("device exists").started());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failing_device_halt_does_not_block_peers() {
    let recorder = Arc::new(Recorder::default());
    let config = isolated(
        RobotConfig::new()
            .connection(ConnectionSpec::new(
                "serial",
                Box::new(RecordingAdaptor::new(recorder.clone())),
            ))
            .device(DeviceSpec::new(
                "first",
                Box::new(RecordingDriver::new(recorder.clone()).failing_halt()),
            ))
            .device(DeviceSpec::new(
                "second",
                Box::new(RecordingDriver::new(recorder.clone())),
            )),
    );
    let robot = Robot::new(config).expect("robot builds");

    robot.start().await.expect("start succeeds");
    robot.halt().await.expect("halt swallows unit failures");

    assert!(!robot.is_running());
    assert_eq!(recorder.halts.load(Ordering::SeqCst), 2);
    assert_eq!(recorder.disconnects.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn panicking_device_halt_does_not_block_peers() {
    let recorder = Arc::new(Recorder::default());
    let config = isolated(
        RobotConfig::new()
            .connection(ConnectionSpec::new(
                "serial",
                Box::new(RecordingAdaptor::new(recorder.clone())),
            ))
            .device(DeviceSpec::new(
                "first",
                Box::new(RecordingDriver::new(recorder.clone()).panicking_halt()),
            ))
            .device(DeviceSpec::new(
                "second",
                Box::new(RecordingDriver::new(recorder.clone())),
            )),
    );
    let robot = Robot::new(config).expect("robot builds");

    robot.start().await.expect("start succeeds");
    robot.halt().await.expect("halt survives a panicking unit");

    assert!(!robot.is_running());
    // Only the surviving driver bumps the counter; the panicking one is
    // isolated by its task boundary.
    assert_eq!(recorder.halts.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.disconnects.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_connection_phase_tears_down_and_notifies() {
    let recorder = Arc::new(Recorder::default());
    let trace: Trace = Arc::new(Mutex::new(Vec::new()));
    let handler_trace = trace.clone();
    let config = isolated(
        RobotConfig::new()
            .name("Ultron")
            .connection(ConnectionSpec::new(
                "steady",
                Box::new(RecordingAdaptor::new(recorder.clone())),
            ))
            .connection(ConnectionSpec::new(
                "flaky",
                Box::new(RecordingAdaptor::new(recorder.clone()).failing()),
            ))
            .device(DeviceSpec::new(
                "led",
                Box::new(RecordingDriver::new(recorder.clone())),
            ))
            .callable("error", move |_robot, _args| {
                handler_trace.lock().unwrap().push("handler");
                json!(null)
            }),
    );
    let robot = Robot::new(config).expect("robot builds");

    let listener_trace = trace.clone();
    robot.on(ERROR, move |event| {
        assert_eq!(event.payload["robot"], json!("Ultron"));
        listener_trace.lock().unwrap().push("event");
    });

    let err = robot.start().await.expect_err("start fails");
    match err {
        RobotError::Startup {
            phase,
            unit,
            outcomes,
            ..
        } => {
            assert_eq!(phase, StartPhase::Connections);
            assert_eq!(unit, "flaky");
            assert_eq!(outcomes.len(), 2);
            assert!(outcomes[0].error.is_none());
            assert!(outcomes[1].error.is_some());
        }
        other => panic!("unexpected error: {other}"),
    }

    // Both units ran to completion; no device was ever started; whatever
    // partially connected was torn down again.
    assert_eq!(recorder.connects.load(Ordering::SeqCst), 2);
    assert_eq!(recorder.starts.load(Ordering::SeqCst), 0);
    assert!(recorder.disconnects.load(Ordering::SeqCst) >= 1);
    assert!(!robot.is_running());
    assert_eq!(*trace.lock().unwrap(), vec!["handler", "event"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_device_phase_reports_partial_outcomes() {
    let recorder = Arc::new(Recorder::default());
    let config = isolated(
        RobotConfig::new()
            .connection(ConnectionSpec::new(
                "serial",
                Box::new(RecordingAdaptor::new(recorder.clone())),
            ))
            .device(DeviceSpec::new(
                "jammed",
                Box::new(RecordingDriver::new(recorder.clone()).failing_start()),
            )),
    );
    let robot = Robot::new(config).expect("robot builds");

    let err = robot.start().await.expect_err("start fails");
    match err {
        RobotError::Startup {
            phase,
            unit,
            outcomes,
            ..
        } => {
            assert_eq!(phase, StartPhase::Devices);
            assert_eq!(unit, "jammed");
            assert_eq!(outcomes.len(), 2);
            assert_eq!(outcomes[0].unit, "serial");
            assert!(outcomes[0].error.is_none());
            assert!(outcomes[1].error.is_some());
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!robot.is_running());
    let connection = robot.connection_named("serial").expect("connection exists");
    assert!(!connection.connected());
}

#[tokio::test]
async fn auto_start_runs_after_listeners_attach() {
    let recorder = Arc::new(Recorder::default());
    let ready_hits = Arc::new(AtomicUsize::new(0));
    let config = isolated(
        RobotConfig::new()
            .name("Vision")
            .start_mode(StartMode::Auto)
            .connection(ConnectionSpec::new(
                "serial",
                Box::new(RecordingAdaptor::new(recorder.clone())),
            )),
    );
    let robot = Robot::spawn(config).expect("robot builds");

    // On a current-thread runtime the deferred start cannot run before the
    // first await point, so this listener is attached in time.
    let hits = ready_hits.clone();
    robot.on("ready", move |_event| {
        hits.fetch_add(1, Ordering::SeqCst);
    });

    sleep(Duration::from_millis(50)).await;

    assert!(robot.is_running());
    assert_eq!(recorder.connects.load(Ordering::SeqCst), 1);
    assert_eq!(ready_hits.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn immediate_work_trigger_fires_before_units_complete() {
    let recorder = Arc::new(Recorder::default());
    let trace: Trace = Arc::new(Mutex::new(Vec::new()));
    let work_trace = trace.clone();
    let config = isolated(
        RobotConfig::new()
            .work_trigger(WorkTrigger::Immediate)
            .connection(ConnectionSpec::new(
                "serial",
                Box::new(
                    RecordingAdaptor::new(recorder.clone())
                        .tracing(trace.clone())
                        .delayed(Duration::from_millis(10)),
                ),
            ))
            .work(move |_robot| {
                work_trace.lock().unwrap().push("work");
            }),
    );
    let robot = Robot::new(config).expect("robot builds");

    robot.start().await.expect("start succeeds");

    assert!(robot.is_running());
    assert_eq!(*trace.lock().unwrap(), vec!["work", "connect"]);
}
