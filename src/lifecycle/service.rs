//! The managed service and its lifecycle controller.
//!
//! # Responsibilities
//! - Hold the route table, timeouts and hooks until start
//! - Bind, launch the accept loop and fire `on_start`
//! - Wait for the first trigger (OS signal or [`StopHandle::stop`])
//! - Run the single drain sequence and report the terminal state
//!
//! # Design Decisions
//! - `start` consumes the service, so nothing can be mutated once started
//! - Binding happens before the accept loop is spawned: a bind fault is
//!   reported without `on_start` ever firing
//! - Triggers go through a once-only gate; later ones are no-ops
//! - State changes are compare-and-set, never a lock held across awaits

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::Instrument;

use crate::config::ServiceConfig;
use crate::http::server::build_app;
use crate::lifecycle::drain::drain;
use crate::lifecycle::error::LifecycleError;
use crate::lifecycle::hooks::Hooks;
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::signals::{Signal, SignalSource};
use crate::lifecycle::state::{State, StateCell};
use crate::net::connection::{ConnectionPolicy, ConnectionTracker};
use crate::net::listener::{Listener, ListenerError};
use crate::random;
use crate::resilience::Timeouts;
use crate::routing::{Request, RouteTable};

/// Default request body limit.
pub const DEFAULT_MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// What ended the trigger wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Signal(Signal),
    Stop,
    Fault,
}

/// State shared between the controller, its stop handles and the serve task.
#[derive(Debug)]
struct Shared {
    id: String,
    state: StateCell,
    trigger: OnceLock<Trigger>,
    notify: Notify,
    local_addr: OnceLock<SocketAddr>,
    /// Set once `start` has returned.
    finished: AtomicBool,
}

impl Shared {
    fn new() -> Self {
        let id = random::hex(12).unwrap_or_else(|_| format!("{:x}", std::process::id()));
        Self {
            id,
            state: StateCell::new(),
            trigger: OnceLock::new(),
            notify: Notify::new(),
            local_addr: OnceLock::new(),
            finished: AtomicBool::new(false),
        }
    }

    /// Record `trigger` if it is the first. Returns whether it was.
    fn request(&self, trigger: Trigger) -> bool {
        let first = self.trigger.set(trigger).is_ok();
        if first {
            self.notify.notify_one();
        } else {
            tracing::debug!(trigger = ?trigger, "Shutdown already requested");
        }
        first
    }
}

/// An HTTP service with a managed lifecycle.
///
/// ```no_run
/// use servekit::{RouteTable, Service, State};
///
/// # async fn run() {
/// let routes = RouteTable::new().route("/", |_req| async { "Ok" });
/// let mut service = Service::new(":8000", routes);
/// service.on_start(|| tracing::info!("listening"));
/// let state = service.start().await;
/// assert!(state.is_terminal());
/// # }
/// ```
#[derive(Debug)]
pub struct Service {
    address: String,
    routes: RouteTable,
    timeouts: Timeouts,
    max_body_bytes: usize,
    stop_on_serve_fault: bool,
    hooks: Hooks,
    signals: Option<SignalSource>,
    shared: Arc<Shared>,
    #[cfg(test)]
    accept_fault: Option<tokio::sync::oneshot::Receiver<std::io::Error>>,
}

impl Service {
    pub fn new(address: impl Into<String>, routes: RouteTable) -> Self {
        Self {
            address: address.into(),
            routes,
            timeouts: Timeouts::default(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            stop_on_serve_fault: false,
            hooks: Hooks::new(),
            signals: None,
            shared: Arc::new(Shared::new()),
            #[cfg(test)]
            accept_fault: None,
        }
    }

    /// Build a service from the listener, timeout and lifecycle sections.
    pub fn from_config(config: &ServiceConfig, routes: RouteTable) -> Self {
        let mut service = Self::new(config.listener.address.clone(), routes);
        service
            .set_timeouts(config.timeouts.to_timeouts())
            .set_max_body_bytes(config.listener.max_body_bytes)
            .stop_on_serve_fault(config.lifecycle.stop_on_serve_fault);
        service
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Add a route to the table.
    pub fn route<F, Fut, R>(&mut self, pattern: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = R> + Send + 'static,
        R: axum::response::IntoResponse + 'static,
    {
        self.routes.add(pattern, handler);
        self
    }

    pub fn set_idle_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.timeouts.idle = Some(timeout);
        self
    }

    pub fn set_read_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.timeouts.read = Some(timeout);
        self
    }

    pub fn set_write_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.timeouts.write = Some(timeout);
        self
    }

    /// Grace period for in-flight requests once shutdown begins.
    pub fn set_drain_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.timeouts.drain = Some(timeout);
        self
    }

    pub fn set_timeouts(&mut self, timeouts: Timeouts) -> &mut Self {
        self.timeouts = timeouts;
        self
    }

    /// Overrides as set so far; defaults are applied at start.
    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    pub fn set_max_body_bytes(&mut self, limit: usize) -> &mut Self {
        self.max_body_bytes = limit;
        self
    }

    pub fn on_start(&mut self, f: impl Fn() + Send + Sync + 'static) -> &mut Self {
        self.hooks.set_on_start(f);
        self
    }

    pub fn on_exit(&mut self, f: impl Fn() + Send + Sync + 'static) -> &mut Self {
        self.hooks.set_on_exit(f);
        self
    }

    pub fn on_fail(&mut self, f: impl Fn(&LifecycleError) + Send + Sync + 'static) -> &mut Self {
        self.hooks.set_on_fail(f);
        self
    }

    pub fn on_interrupt(&mut self, f: impl Fn(Signal) + Send + Sync + 'static) -> &mut Self {
        self.hooks.set_on_interrupt(f);
        self
    }

    /// Replace the OS signal source, for embedding and tests.
    pub fn with_signals(&mut self, source: SignalSource) -> &mut Self {
        self.signals = Some(source);
        self
    }

    /// Make an accept-loop fault end the trigger wait. Off by default.
    pub fn stop_on_serve_fault(&mut self, enabled: bool) -> &mut Self {
        self.stop_on_serve_fault = enabled;
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn state(&self) -> State {
        self.shared.state.get()
    }

    /// Run the service to completion and return its terminal state.
    ///
    /// Returns once the drain has finished, or right away on a bind fault.
    /// Faults are reported through `on_fail` only.
    pub async fn start(self) -> State {
        let shared = Arc::clone(&self.shared);
        let span = tracing::info_span!("service", id = %shared.id, address = %self.address);
        let state = self.run().instrument(span).await;
        shared.finished.store(true, Ordering::Release);
        state
    }

    async fn run(self) -> State {
        let Service {
            address,
            routes,
            timeouts,
            max_body_bytes,
            stop_on_serve_fault,
            hooks,
            signals,
            shared,
            #[cfg(test)]
            accept_fault,
        } = self;

        if !shared.state.transition(State::Starting) {
            return shared.state.get();
        }
        let timeouts = timeouts.resolve();
        let hooks = Arc::new(hooks);
        let mut signals = signals.unwrap_or_else(SignalSource::os);

        tracing::info!(
            routes = ?routes.patterns().collect::<Vec<_>>(),
            idle = ?timeouts.idle,
            read = ?timeouts.read,
            write = ?timeouts.write,
            drain = ?timeouts.drain,
            "Starting service"
        );

        let app = build_app(routes, timeouts.write);
        let policy = ConnectionPolicy::new(
            timeouts.idle,
            timeouts.read,
            timeouts.write,
            max_body_bytes,
        );

        let listener = match Listener::bind(&address, policy).await {
            Ok(listener) => listener,
            Err(e) => {
                shared.state.transition(State::Failed);
                hooks.fail(&LifecycleError::Bind(e));
                return State::Failed;
            }
        };
        let _ = shared.local_addr.set(listener.local_addr());

        let shutdown = Shutdown::new();
        let tracker = ConnectionTracker::new();
        let serve = {
            let signal = shutdown.subscribe();
            let tracker = tracker.clone();
            let shared = Arc::clone(&shared);
            let hooks = Arc::clone(&hooks);
            tokio::spawn(
                async move {
                    let served = listener.serve(app, signal, tracker);
                    #[cfg(test)]
                    let served = inject_accept_fault(served, accept_fault);
                    let Err(e) = served.await else {
                        return Ok(());
                    };
                    let live = [State::Starting, State::Running];
                    if !shared.state.transition_from(&live, State::Failed) {
                        return Err(e);
                    }
                    hooks.fail(&LifecycleError::Serve(e));
                    if stop_on_serve_fault {
                        shared.request(Trigger::Fault);
                    }
                    Ok(())
                }
                .in_current_span(),
            )
        };

        hooks.start();
        if !shared.state.transition_from(&[State::Starting], State::Running) {
            // The accept loop failed before we got here.
            return wait_after_fault(&shared, &mut signals, serve).await;
        }
        tracing::info!(address = ?shared.local_addr.get(), "Service running");

        let trigger = wait_for_trigger(&shared, &mut signals).await;
        if !shared.state.transition_from(&[State::Running], State::Interrupted) {
            tracing::warn!(
                trigger = ?trigger,
                state = %shared.state.get(),
                "Trigger after fault, not draining"
            );
            serve.abort();
            return shared.state.get();
        }
        tracing::info!(trigger = ?trigger, "Shutdown triggered");

        if let Trigger::Signal(signal) = trigger {
            hooks.interrupt(signal);
        }
        hooks.exit();

        shared.state.transition(State::Draining);
        shutdown.trigger();
        match drain(serve, timeouts.drain, &tracker).await {
            Ok(()) => {
                shared.state.transition(State::Stopped);
                tracing::info!("Service stopped");
            }
            Err(e) => {
                shared.state.transition(State::Failed);
                hooks.fail(&e);
            }
        }
        shared.state.get()
    }
}

/// Block until the first trigger. A signal that loses the race to another
/// trigger is dropped.
async fn wait_for_trigger(shared: &Shared, signals: &mut SignalSource) -> Trigger {
    loop {
        if let Some(trigger) = shared.trigger.get() {
            return *trigger;
        }
        tokio::select! {
            _ = shared.notify.notified() => {}
            Some(signal) = signals.recv() => {
                tracing::info!(signal = %signal, "Signal received");
                shared.request(Trigger::Signal(signal));
            }
        }
    }
}

/// The service failed while starting. Honor the trigger wait unless the
/// fault itself counts as a trigger, then return without running hooks.
async fn wait_after_fault(
    shared: &Shared,
    signals: &mut SignalSource,
    serve: tokio::task::JoinHandle<Result<(), ListenerError>>,
) -> State {
    let trigger = wait_for_trigger(shared, signals).await;
    tracing::debug!(trigger = ?trigger, "Trigger after start fault");
    serve.abort();
    shared.state.get()
}

/// End the accept loop with `fault` as soon as it is delivered.
#[cfg(test)]
async fn inject_accept_fault(
    served: impl std::future::Future<Output = Result<(), ListenerError>>,
    fault: Option<tokio::sync::oneshot::Receiver<std::io::Error>>,
) -> Result<(), ListenerError> {
    let Some(fault) = fault else {
        return served.await;
    };
    tokio::select! {
        result = served => result,
        Ok(e) = fault => Err(ListenerError::Accept(e)),
    }
}

/// Cloneable handle for stopping and observing a [`Service`].
#[derive(Debug, Clone)]
pub struct StopHandle {
    shared: Arc<Shared>,
}

impl StopHandle {
    /// Request shutdown. Returns true only for the call that triggered it.
    ///
    /// A stop requested before start takes effect as soon as the service is
    /// running. After a serve fault it still ends the trigger wait. Once
    /// `start` has returned this is a no-op.
    pub fn stop(&self) -> bool {
        if self.shared.finished.load(Ordering::Acquire) {
            return false;
        }
        self.shared.request(Trigger::Stop)
    }

    pub fn state(&self) -> State {
        self.shared.state.get()
    }

    /// Resolve with the first state satisfying `condition`.
    pub async fn wait_until(&self, condition: impl Fn(State) -> bool) -> State {
        let mut rx = self.shared.state.subscribe();
        let state = match rx.wait_for(|state| condition(*state)).await {
            Ok(state) => *state,
            Err(_) => self.shared.state.get(),
        };
        state
    }

    /// Resolve once the service is Stopped or Failed.
    pub async fn wait_terminal(&self) -> State {
        self.wait_until(State::is_terminal).await
    }

    /// The bound address, once the listener is bound.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared.local_addr.get().copied()
    }

    /// Identifier recorded on the service span.
    pub fn id(&self) -> &str {
        &self.shared.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::sync::oneshot;

    type Events = Arc<Mutex<Vec<String>>>;

    /// A running service whose accept loop fails on demand.
    struct Faulty {
        handle: StopHandle,
        signals: crate::lifecycle::SignalSender,
        fault: Option<oneshot::Sender<std::io::Error>>,
        events: Events,
        task: tokio::task::JoinHandle<State>,
    }

    async fn spawn_faulty(stop_on_fault: bool) -> Faulty {
        let (signals, source) = SignalSource::channel();
        let (fault, accept_fault) = oneshot::channel();
        let events: Events = Arc::default();

        let mut service = Service::new("127.0.0.1:0", RouteTable::new());
        service.with_signals(source).stop_on_serve_fault(stop_on_fault);
        service.accept_fault = Some(accept_fault);
        let e = Arc::clone(&events);
        service.on_start(move || e.lock().unwrap().push("start".into()));
        let e = Arc::clone(&events);
        service.on_exit(move || e.lock().unwrap().push("exit".into()));
        let e = Arc::clone(&events);
        service.on_interrupt(move |sig| e.lock().unwrap().push(format!("interrupt {sig}")));
        let e = Arc::clone(&events);
        service.on_fail(move |err| e.lock().unwrap().push(format!("fail {}", err.kind())));

        let handle = service.stop_handle();
        let task = tokio::spawn(service.start());
        let state = tokio::time::timeout(
            Duration::from_secs(5),
            handle.wait_until(|s| s != State::Idle && s != State::Starting),
        )
        .await
        .expect("service never left Starting");
        assert_eq!(state, State::Running);

        Faulty {
            handle,
            signals,
            fault: Some(fault),
            events,
            task,
        }
    }

    fn fail_accept(mut faulty: Faulty) -> Faulty {
        let err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "accept denied");
        faulty.fault.take().unwrap().send(err).unwrap();
        faulty
    }

    fn events(events: &Events) -> Vec<String> {
        events.lock().unwrap().clone()
    }

    #[test]
    fn setters_record_overrides() {
        let mut service = Service::new("127.0.0.1:0", RouteTable::new());
        service
            .set_idle_timeout(Duration::from_secs(1))
            .set_drain_timeout(Duration::from_secs(2))
            .route("/", |_req| async { "Ok" });

        let timeouts = service.timeouts();
        assert_eq!(timeouts.idle, Some(Duration::from_secs(1)));
        assert_eq!(timeouts.drain, Some(Duration::from_secs(2)));
        assert_eq!(timeouts.read, None);
        assert_eq!(service.state(), State::Idle);
    }

    #[test]
    fn from_config_copies_sections() {
        let mut config = ServiceConfig::default();
        config.listener.address = "127.0.0.1:0".into();
        config.timeouts.drain_secs = 3;
        config.lifecycle.stop_on_serve_fault = true;

        let service = Service::from_config(&config, RouteTable::new());
        assert_eq!(service.address(), "127.0.0.1:0");
        assert_eq!(service.timeouts().drain, Some(Duration::from_secs(3)));
        assert!(service.stop_on_serve_fault);
    }

    #[test]
    fn only_first_trigger_wins() {
        let shared = Shared::new();
        assert!(shared.request(Trigger::Stop));
        assert!(!shared.request(Trigger::Signal(Signal::Terminate)));
        assert_eq!(shared.trigger.get(), Some(&Trigger::Stop));
    }

    #[tokio::test]
    async fn stop_before_start_runs_a_full_cycle() {
        let (_tx, signals) = SignalSource::channel();
        let mut service = Service::new("127.0.0.1:0", RouteTable::new());
        service.with_signals(signals);
        let handle = service.stop_handle();

        assert!(handle.stop());
        assert!(!handle.stop());

        let state = tokio::time::timeout(Duration::from_secs(5), service.start())
            .await
            .expect("service did not stop");
        assert_eq!(state, State::Stopped);
        assert!(!handle.stop());
        assert!(handle.local_addr().is_some());
    }

    #[tokio::test]
    async fn serve_fault_keeps_waiting_for_a_stop() {
        let Faulty {
            handle,
            events: recorded,
            mut task,
            ..
        } = fail_accept(spawn_faulty(false).await);

        let state = tokio::time::timeout(Duration::from_secs(2), handle.wait_terminal())
            .await
            .expect("fault never recorded");
        assert_eq!(state, State::Failed);
        assert_eq!(events(&recorded), ["start", "fail serve"]);

        let early = tokio::time::timeout(Duration::from_millis(200), &mut task).await;
        assert!(early.is_err(), "start returned without a trigger");

        assert!(handle.stop());
        let state = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("stop did not end the trigger wait")
            .unwrap();
        assert_eq!(state, State::Failed);
        assert_eq!(events(&recorded), ["start", "fail serve"]);
        assert!(!handle.stop());
    }

    #[tokio::test]
    async fn signal_after_serve_fault_runs_no_hooks() {
        let Faulty {
            handle,
            signals,
            events: recorded,
            task,
            ..
        } = fail_accept(spawn_faulty(false).await);

        tokio::time::timeout(Duration::from_secs(2), handle.wait_terminal())
            .await
            .expect("fault never recorded");
        assert!(signals.send(Signal::Terminate));

        let state = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("signal did not end the trigger wait")
            .unwrap();
        assert_eq!(state, State::Failed);
        assert_eq!(events(&recorded), ["start", "fail serve"]);
    }

    #[tokio::test]
    async fn serve_fault_ends_the_wait_when_configured() {
        let Faulty {
            handle,
            events: recorded,
            task,
            ..
        } = fail_accept(spawn_faulty(true).await);

        let state = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("fault did not end the trigger wait")
            .unwrap();
        assert_eq!(state, State::Failed);
        assert_eq!(events(&recorded), ["start", "fail serve"]);
        assert!(!handle.stop());
    }
}
