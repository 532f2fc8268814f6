//! Applications
//!
//! User logic runs as a plain function on its own thread, talking to the
//! rest of the simulator only through an [`ApplicationHandle`]. The
//! [`ApplicationManager`] of a device launches those threads, tracks their
//! reported states and tears them down cooperatively.

use anyhow::Result as AnyResult;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use netsim_actors::{
    join_or_detach, liveness, spawn_named, CancelToken, Correlator, Liveness, StateHandler,
};
use netsim_config::SimulationConfig;
use netsim_types::{
    exit_code, ActorKind, ActorState, BackendCall, BackendReply, DeviceIdentity, EndReason,
    HeartbeatReport, Message, Packet, PortKind, PortRef, PortSnapshot, QubitHandle, RequestBody,
    Respond, RespondPayload, Result, ResultSink, Signal, SignalKind,
};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Longest single blocking receive, so cancellation is noticed
const RECV_SLICE: Duration = Duration::from_millis(25);

/// User application entry point
pub type AppFunction = Arc<dyn Fn(&mut ApplicationHandle) -> AnyResult<()> + Send + Sync>;

/// Everything needed to launch one application
#[derive(Clone)]
pub struct ApplicationSpec {
    pub label: String,
    pub function: AppFunction,
    pub args: Value,
    pub start_delay: Duration,
    /// Past this runtime a still-running thread is judged unresponsive
    pub deadline: Option<Duration>,
    /// System applications do not block end detection
    pub is_static: bool,
}

impl fmt::Debug for ApplicationSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplicationSpec")
            .field("label", &self.label)
            .field("args", &self.args)
            .field("start_delay", &self.start_delay)
            .field("deadline", &self.deadline)
            .field("is_static", &self.is_static)
            .finish()
    }
}

impl ApplicationSpec {
    pub fn new<F>(label: impl Into<String>, function: F) -> Self
    where
        F: Fn(&mut ApplicationHandle) -> AnyResult<()> + Send + Sync + 'static,
    {
        Self {
            label: label.into(),
            function: Arc::new(function),
            args: Value::Null,
            start_delay: Duration::ZERO,
            deadline: None,
            is_static: false,
        }
    }

    pub fn with_args(mut self, args: Value) -> Self {
        self.args = args;
        self
    }

    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn static_app(mut self) -> Self {
        self.is_static = true;
        self
    }
}

/// Queues an application talks through
#[derive(Debug, Clone)]
pub struct AppWiring {
    pub device: DeviceIdentity,
    pub socket: Sender<Message>,
    pub device_queue: Sender<Message>,
    pub kernel: Sender<Message>,
    pub sink: ResultSink,
}

/// The application's view of the simulator
pub struct ApplicationHandle {
    label: String,
    args: Value,
    wiring: AppWiring,
    inbox: Receiver<Packet>,
    buffer: VecDeque<Packet>,
    correlator: Correlator,
    cancel: CancelToken,
    timeout: Duration,
    max_hops: u32,
}

impl ApplicationHandle {
    pub fn new(
        label: impl Into<String>,
        args: Value,
        wiring: AppWiring,
        inbox: Receiver<Packet>,
        cancel: CancelToken,
        config: &SimulationConfig,
    ) -> Self {
        Self {
            label: label.into(),
            args,
            wiring,
            inbox,
            buffer: VecDeque::new(),
            correlator: Correlator::new(
                config.timing.request_timeout(),
                config.timing.response_grace(),
            ),
            cancel,
            timeout: config.timing.request_timeout(),
            max_hops: config.routing.max_hops,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn device(&self) -> &DeviceIdentity {
        &self.wiring.device
    }

    pub fn args(&self) -> &Value {
        &self.args
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancellable sleep; false once the device asked the app to stop
    pub fn sleep(&self, duration: Duration) -> bool {
        self.cancel.sleep(duration)
    }

    fn ask(&mut self, target: ActorKind, body: RequestBody) -> Option<Respond> {
        let queue = match target {
            ActorKind::Kernel => self.wiring.kernel.clone(),
            ActorKind::Device => self.wiring.device_queue.clone(),
            _ => self.wiring.socket.clone(),
        };
        let request = self.correlator.issue(ActorKind::Application, target, body);
        let id = request.correlation_id()?;
        if let Err(e) = request.process(&queue) {
            debug!(app = %self.label, error = %e, "Request not delivered");
            return None;
        }
        let respond = self.correlator.wait_for(id, self.timeout, Some(&self.cancel));
        if respond.is_none() && !self.cancel.is_cancelled() {
            debug!(app = %self.label, target = ?target, "Request timed out");
        }
        respond
    }

    fn send(&mut self, packet: Packet) -> i32 {
        self.ask(ActorKind::Socket, RequestBody::Send { packet })
            .map_or(exit_code::TIMEOUT, |respond| respond.exit_code)
    }

    /// Send a classic payload to `app` on device `to`. Returns the exit code.
    pub fn send_classic(&mut self, to: &str, app: &str, payload: Value) -> i32 {
        let packet = Packet::classic(self.wiring.device.label.clone(), payload, self.max_hops)
            .to(to)
            .from_app(self.label.clone())
            .for_app(app);
        self.send(packet)
    }

    /// Classic payload to every direct neighbour
    pub fn broadcast(&mut self, payload: Value) -> i32 {
        let packet = Packet::classic(self.wiring.device.label.clone(), payload, self.max_hops)
            .from_app(self.label.clone());
        self.send(packet)
    }

    pub fn send_qubits(&mut self, to: &str, app: &str, qubits: Vec<QubitHandle>) -> i32 {
        let packet = Packet::quantum(self.wiring.device.label.clone(), qubits, self.max_hops)
            .to(to)
            .from_app(self.label.clone())
            .for_app(app);
        self.send(packet)
    }

    /// Next classic packet, optionally only from device `from`. Packets that
    /// do not match stay buffered for later receives.
    pub fn recv_classic(&mut self, from: Option<&str>, timeout: Duration) -> Option<Packet> {
        self.recv_matching(PortKind::Classic, from, timeout)
    }

    pub fn recv_qubits(&mut self, from: Option<&str>, timeout: Duration) -> Option<Packet> {
        self.recv_matching(PortKind::Quantum, from, timeout)
    }

    fn recv_matching(
        &mut self,
        kind: PortKind,
        from: Option<&str>,
        timeout: Duration,
    ) -> Option<Packet> {
        let matches =
            |packet: &Packet| packet.kind == kind && from.map_or(true, |f| packet.sender == f);
        if let Some(position) = self.buffer.iter().position(|packet| matches(packet)) {
            return self.buffer.remove(position);
        }

        let deadline = Instant::now() + timeout;
        loop {
            if self.cancel.is_cancelled() {
                return None;
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            match self.inbox.recv_timeout((deadline - now).min(RECV_SLICE)) {
                Ok(packet) if matches(&packet) => return Some(packet),
                Ok(packet) => self.buffer.push_back(packet),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    fn backend(&mut self, call: BackendCall) -> Option<BackendReply> {
        match self.ask(ActorKind::Kernel, RequestBody::Backend(call)) {
            Some(Respond {
                payload: RespondPayload::Backend(reply),
                ..
            }) => Some(reply),
            Some(respond) => {
                warn!(
                    app = %self.label,
                    code = respond.exit_code,
                    payload = ?respond.payload,
                    "Backend call failed"
                );
                None
            }
            None => None,
        }
    }

    pub fn allocate_qubits(&mut self, count: usize) -> Option<Vec<QubitHandle>> {
        match self.backend(BackendCall::Allocate {
            count,
            options: Value::Null,
        })? {
            BackendReply::Handles(handles) => Some(handles),
            _ => None,
        }
    }

    pub fn measure(&mut self, handles: &[QubitHandle]) -> Option<Vec<u8>> {
        match self.backend(BackendCall::Measure {
            handles: handles.to_vec(),
            options: Value::Null,
        })? {
            BackendReply::Measurements(bits) => Some(bits),
            _ => None,
        }
    }

    pub fn apply_gate(&mut self, gate: &str, args: &[f64], handles: &[QubitHandle]) -> bool {
        self.backend(BackendCall::ApplyGate {
            gate: gate.to_string(),
            args: args.to_vec(),
            handles: handles.to_vec(),
            options: Value::Null,
        })
        .is_some()
    }

    pub fn apply_channel_error(
        &mut self,
        handles: &[QubitHandle],
        probability: f64,
    ) -> Option<Vec<QubitHandle>> {
        match self.backend(BackendCall::ApplyChannelError {
            handles: handles.to_vec(),
            probability,
        })? {
            BackendReply::Handles(handles) => Some(handles),
            _ => None,
        }
    }

    pub fn reset(&mut self, handles: &[QubitHandle]) -> bool {
        self.backend(BackendCall::Reset {
            handles: handles.to_vec(),
        })
        .is_some()
    }

    /// Run one heartbeat cycle on the device's socket
    pub fn refresh_heartbeat(&mut self, report: bool) -> Option<HeartbeatReport> {
        match self.ask(ActorKind::Socket, RequestBody::RefreshHeartbeat { report })? {
            Respond {
                payload: RespondPayload::Heartbeat(report),
                ..
            } => Some(report),
            respond if respond.is_success() => Some(HeartbeatReport::default()),
            _ => None,
        }
    }

    pub fn port_status(&mut self) -> Option<Vec<PortSnapshot>> {
        match self.ask(ActorKind::Socket, RequestBody::PortStatus)?.payload {
            RespondPayload::Ports(ports) => Some(ports),
            _ => None,
        }
    }

    pub fn set_port_active(&mut self, port: PortRef, active: bool) -> i32 {
        self.ask(ActorKind::Socket, RequestBody::SetPortActive { port, active })
            .map_or(exit_code::TIMEOUT, |respond| respond.exit_code)
    }

    pub fn unconnect_port(&mut self, port: PortRef, soft: bool) -> i32 {
        self.ask(ActorKind::Socket, RequestBody::UnconnectPort { port, soft })
            .map_or(exit_code::TIMEOUT, |respond| respond.exit_code)
    }

    pub fn reconnect_port(&mut self, port: PortRef) -> i32 {
        self.ask(ActorKind::Socket, RequestBody::ReconnectPort { port })
            .map_or(exit_code::TIMEOUT, |respond| respond.exit_code)
    }

    /// Ask the host device to end now
    pub fn end_device(&self) {
        let signal = SignalKind::EndDevice {
            reason: EndReason::Requested,
        };
        if let Err(e) = Signal::send(ActorKind::Application, signal, &self.wiring.device_queue) {
            debug!(app = %self.label, error = %e, "Device already gone");
        }
    }

    /// Record a result under this application's name
    pub fn dump(&self, payload: Value) {
        self.wiring
            .sink
            .dump(self.wiring.device.label.clone(), self.label.clone(), payload);
    }
}

struct RunningApp {
    label: String,
    is_static: bool,
    cancel: CancelToken,
    /// System applications are stopped by signal rather than token
    terminate: Option<Sender<Message>>,
    liveness: Liveness,
    deadline: Option<Instant>,
    handle: Option<JoinHandle<()>>,
}

/// Per-device application registry
pub struct ApplicationManager {
    device: String,
    apps: Vec<RunningApp>,
    states: BTreeMap<String, ActorState>,
    join_timeout: Duration,
}

impl ApplicationManager {
    pub fn new(device: impl Into<String>, join_timeout: Duration) -> Self {
        Self {
            device: device.into(),
            apps: Vec::new(),
            states: BTreeMap::new(),
            join_timeout,
        }
    }

    /// Packet queue for a new application, registered with the socket by
    /// the caller
    pub fn inbox() -> (Sender<Packet>, Receiver<Packet>) {
        unbounded()
    }

    /// Launch a user application thread. State changes are reported to
    /// `report`, normally the device's inbound queue.
    pub fn launch(
        &mut self,
        spec: ApplicationSpec,
        mut handle: ApplicationHandle,
        report: Sender<Message>,
    ) -> Result<()> {
        if self.states.contains_key(&spec.label) {
            return Err(netsim_types::SimError::duplicate("application", spec.label));
        }
        let cancel = handle.cancel.clone();
        let (guard, alive) = liveness(format!("{}/{}", self.device, spec.label));
        let function = spec.function.clone();
        let start_delay = spec.start_delay;
        let deadline = spec
            .deadline
            .map(|deadline| Instant::now() + start_delay + deadline);

        let thread = spawn_named(format!("{}-{}", self.device, spec.label), move || {
            let _guard = guard;
            let mut state = StateHandler::new(ActorKind::Application, handle.label.clone())
                .with_report_target(report);
            if !handle.sleep(start_delay) {
                state.change_state(ActorState::Terminated);
                return;
            }
            state.change_state(ActorState::Running);
            match function(&mut handle) {
                Ok(()) if !handle.is_cancelled() => {
                    state.change_state(ActorState::Finished);
                }
                Ok(()) => {
                    state.change_state(ActorState::Terminated);
                }
                Err(e) => {
                    warn!(app = %handle.label, error = %e, "Application failed");
                    state.change_state(ActorState::Terminated);
                }
            }
        })?;

        info!(
            device = %self.device,
            app = %spec.label,
            is_static = spec.is_static,
            "Application launched"
        );
        self.states.insert(spec.label.clone(), ActorState::NotStarted);
        self.apps.push(RunningApp {
            label: spec.label,
            is_static: spec.is_static,
            cancel,
            terminate: None,
            liveness: alive,
            deadline,
            handle: Some(thread),
        });
        Ok(())
    }

    /// Track a static system actor such as the routing layer. It is stopped
    /// with a `Terminate` signal on `terminate`.
    pub fn adopt_system(
        &mut self,
        label: impl Into<String>,
        terminate: Sender<Message>,
        liveness: Liveness,
        handle: JoinHandle<()>,
    ) {
        let label = label.into();
        self.states.insert(label.clone(), ActorState::Running);
        self.apps.push(RunningApp {
            label,
            is_static: true,
            cancel: CancelToken::new(),
            terminate: Some(terminate),
            liveness,
            deadline: None,
            handle: Some(handle),
        });
    }

    pub fn record_state(&mut self, label: &str, state: ActorState) {
        match self.states.get_mut(label) {
            Some(current) => *current = state,
            None => {
                debug!(device = %self.device, app = label, "State report for unknown application")
            }
        }
    }

    pub fn state_of(&self, label: &str) -> Option<ActorState> {
        self.states.get(label).copied()
    }

    pub fn states(&self) -> Vec<(String, ActorState)> {
        self.states
            .iter()
            .map(|(label, state)| (label.clone(), *state))
            .collect()
    }

    /// Whether any non-static application was launched
    pub fn has_workload(&self) -> bool {
        self.apps.iter().any(|app| !app.is_static)
    }

    /// Exit check for the device watcher over the non-static applications
    pub fn exit_check(&self) -> ExitCheck {
        ExitCheck {
            device: self.device.clone(),
            entries: self
                .apps
                .iter()
                .filter(|app| !app.is_static)
                .map(|app| ExitEntry {
                    label: app.label.clone(),
                    liveness: app.liveness.clone(),
                    cancel: app.cancel.clone(),
                    deadline: app.deadline,
                    overdue: false,
                })
                .collect(),
        }
    }

    /// Ask every application to stop
    pub fn cancel_all(&self) {
        for app in &self.apps {
            app.cancel.cancel();
            if let Some(terminate) = &app.terminate {
                if Signal::send(ActorKind::Device, SignalKind::Terminate, terminate).is_err() {
                    debug!(device = %self.device, app = %app.label, "System actor already gone");
                }
            }
        }
    }

    /// Join every thread, detaching those that outlive the join timeout.
    /// Returns the number detached.
    pub fn join_all(&mut self) -> usize {
        let mut detached = 0;
        for app in &mut self.apps {
            let Some(handle) = app.handle.take() else {
                continue;
            };
            if !join_or_detach(handle, &app.liveness, self.join_timeout) {
                detached += 1;
                if let Some(state) = self.states.get_mut(&app.label) {
                    if !ActorKind::Application.is_terminal(*state) {
                        *state = ActorState::Terminated;
                    }
                }
            }
        }
        detached
    }
}

struct ExitEntry {
    label: String,
    liveness: Liveness,
    cancel: CancelToken,
    deadline: Option<Instant>,
    overdue: bool,
}

/// Watcher check: true once every non-static application has exited or
/// outlived its deadline
pub struct ExitCheck {
    device: String,
    entries: Vec<ExitEntry>,
}

impl ExitCheck {
    pub fn all_exited(&mut self) -> bool {
        let now = Instant::now();
        let mut quiet = true;
        for entry in &mut self.entries {
            if !entry.liveness.is_alive() || entry.overdue {
                continue;
            }
            match entry.deadline {
                Some(deadline) if now >= deadline => {
                    warn!(
                        device = %self.device,
                        app = %entry.label,
                        "Application past its deadline, probably unresponsive"
                    );
                    entry.overdue = true;
                    entry.cancel.cancel();
                }
                _ => quiet = false,
            }
        }
        quiet
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netsim_types::exit_code;
    use serde_json::json;

    fn wiring() -> (AppWiring, Receiver<Message>, Receiver<Message>, Receiver<Message>) {
        let (socket, socket_rx) = unbounded();
        let (device_queue, device_rx) = unbounded();
        let (kernel, kernel_rx) = unbounded();
        let (sink, _records) = ResultSink::new();
        (
            AppWiring {
                device: DeviceIdentity::new("a"),
                socket,
                device_queue,
                kernel,
                sink,
            },
            socket_rx,
            device_rx,
            kernel_rx,
        )
    }

    fn config() -> SimulationConfig {
        let mut config = SimulationConfig::default();
        config.timing.request_timeout_ms = 300;
        config
    }

    #[test]
    fn test_send_classic_returns_socket_exit_code() {
        let (wiring, socket_rx, _device_rx, _kernel_rx) = wiring();
        let (_tx, inbox) = unbounded();
        let mut handle = ApplicationHandle::new(
            "ping",
            Value::Null,
            wiring,
            inbox,
            CancelToken::new(),
            &config(),
        );

        let socket = std::thread::spawn(move || {
            let Message::Request(request) = socket_rx.recv().unwrap() else {
                panic!("expected request");
            };
            let RequestBody::Send { packet } = &request.body else {
                panic!("expected send");
            };
            assert_eq!(packet.receiver.as_deref(), Some("b"));
            assert_eq!(packet.sender_app.as_deref(), Some("ping"));
            assert_eq!(packet.receiver_app.as_deref(), Some("pong"));
            request
                .respond(ActorKind::Socket, exit_code::NO_ROUTE, RespondPayload::Empty)
                .unwrap();
        });

        assert_eq!(handle.send_classic("b", "pong", json!("hi")), exit_code::NO_ROUTE);
        socket.join().unwrap();
    }

    #[test]
    fn test_unanswered_request_times_out() {
        let (wiring, _socket_rx, _device_rx, _kernel_rx) = wiring();
        let (_tx, inbox) = unbounded();
        let mut handle = ApplicationHandle::new(
            "ping",
            Value::Null,
            wiring,
            inbox,
            CancelToken::new(),
            &config(),
        );
        assert_eq!(handle.broadcast(json!(1)), exit_code::TIMEOUT);
    }

    #[test]
    fn test_recv_filters_by_sender_and_buffers_the_rest() {
        let (wiring, _socket_rx, _device_rx, _kernel_rx) = wiring();
        let (tx, inbox) = unbounded();
        let mut handle = ApplicationHandle::new(
            "sink",
            Value::Null,
            wiring,
            inbox,
            CancelToken::new(),
            &config(),
        );

        tx.send(Packet::classic("b", json!(1), 4).to("a")).unwrap();
        tx.send(Packet::classic("c", json!(2), 4).to("a")).unwrap();

        let from_c = handle
            .recv_classic(Some("c"), Duration::from_millis(100))
            .unwrap();
        assert_eq!(from_c.classic_payload(), Some(&json!(2)));
        let from_b = handle.recv_classic(None, Duration::from_millis(100)).unwrap();
        assert_eq!(from_b.sender, "b");
        assert!(handle.recv_qubits(None, Duration::from_millis(20)).is_none());
    }

    #[test]
    fn test_manager_reports_states_and_exit_check_sees_exit() {
        let (wiring, _socket_rx, device_rx, _kernel_rx) = wiring();
        let report = wiring.device_queue.clone();
        let (_tx, inbox) = unbounded();
        let cancel = CancelToken::new();
        let handle = ApplicationHandle::new("quick", Value::Null, wiring, inbox, cancel, &config());

        let mut manager = ApplicationManager::new("a", Duration::from_secs(1));
        manager
            .launch(ApplicationSpec::new("quick", |_| Ok(())), handle, report)
            .unwrap();
        assert!(manager.has_workload());

        let mut check = manager.exit_check();
        let started = Instant::now();
        while !check.all_exited() {
            assert!(started.elapsed() < Duration::from_secs(2));
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(manager.join_all(), 0);

        let states: Vec<ActorState> = device_rx
            .try_iter()
            .filter_map(|message| match message {
                Message::Signal(signal) => match signal.into_kind() {
                    SignalKind::StateReport { state, .. } => Some(state),
                    _ => None,
                },
                _ => None,
            })
            .collect();
        assert_eq!(states, vec![ActorState::Running, ActorState::Finished]);
    }

    #[test_log::test]
    fn test_exit_check_gives_up_on_overdue_application() {
        let (wiring, _socket_rx, _device_rx, _kernel_rx) = wiring();
        let report = wiring.device_queue.clone();
        let (_tx, inbox) = unbounded();
        let handle = ApplicationHandle::new(
            "stuck",
            Value::Null,
            wiring,
            inbox,
            CancelToken::new(),
            &config(),
        );

        let mut manager = ApplicationManager::new("a", Duration::from_millis(50));
        let spec = ApplicationSpec::new("stuck", |_| {
            // Ignores cancellation on purpose
            std::thread::sleep(Duration::from_millis(400));
            Ok(())
        })
        .with_deadline(Duration::from_millis(30));
        manager.launch(spec, handle, report).unwrap();

        let mut check = manager.exit_check();
        assert!(!check.all_exited());
        std::thread::sleep(Duration::from_millis(60));
        assert!(check.all_exited());

        assert_eq!(manager.join_all(), 1);
        assert_eq!(manager.state_of("stuck"), Some(ActorState::Terminated));
    }

    #[test]
    fn test_duplicate_application_rejected() {
        let mut manager = ApplicationManager::new("a", Duration::from_millis(50));
        for expect_ok in [true, false] {
            let (wiring, _socket_rx, _device_rx, _kernel_rx) = wiring();
            let report = wiring.device_queue.clone();
            let (_tx, inbox) = unbounded();
            let handle = ApplicationHandle::new(
                "x",
                Value::Null,
                wiring,
                inbox,
                CancelToken::new(),
                &config(),
            );
            let result = manager.launch(ApplicationSpec::new("x", |_| Ok(())), handle, report);
            assert_eq!(result.is_ok(), expect_ok);
        }
        manager.cancel_all();
        manager.join_all();
    }
}
