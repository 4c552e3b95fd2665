//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use servekit::lifecycle::{Signal, SignalSender, SignalSource};
use servekit::{RouteTable, Service, State, StopHandle};

/// A hook invocation, in the order observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Start,
    Exit,
    Interrupt(Signal),
    Fail(&'static str),
}

/// Records every hook invocation of a service.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<Event>>>,
}

impl Recorder {
    pub fn attach(&self, service: &mut Service) {
        let r = self.clone();
        service.on_start(move || r.push(Event::Start));
        let r = self.clone();
        service.on_exit(move || r.push(Event::Exit));
        let r = self.clone();
        service.on_interrupt(move |sig| r.push(Event::Interrupt(sig)));
        let r = self.clone();
        service.on_fail(move |err| r.push(Event::Fail(err.kind())));
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

/// A service on an ephemeral port with injected signals and recorded hooks.
pub struct Harness {
    pub service: Service,
    pub handle: StopHandle,
    pub signals: SignalSender,
    pub recorder: Recorder,
}

impl Harness {
    pub fn new(routes: RouteTable) -> Self {
        Self::at("127.0.0.1:0", routes)
    }

    pub fn at(address: &str, routes: RouteTable) -> Self {
        let (signals, source) = SignalSource::channel();
        let mut service = Service::new(address, routes);
        service.with_signals(source);
        let recorder = Recorder::default();
        recorder.attach(&mut service);
        let handle = service.stop_handle();
        Self {
            service,
            handle,
            signals,
            recorder,
        }
    }

    /// Start the service on a task and wait until it is running.
    pub async fn spawn(self) -> Running {
        let Harness {
            service,
            handle,
            signals,
            recorder,
        } = self;
        let task = tokio::spawn(service.start());
        let state = tokio::time::timeout(
            Duration::from_secs(5),
            handle.wait_until(|s| s != State::Idle && s != State::Starting),
        )
        .await
        .expect("service never left Starting");
        assert_eq!(state, State::Running);
        let addr = handle.local_addr().expect("no bound address");
        Running {
            addr,
            handle,
            signals,
            recorder,
            task,
        }
    }
}

/// A running service.
pub struct Running {
    pub addr: SocketAddr,
    pub handle: StopHandle,
    pub signals: SignalSender,
    pub recorder: Recorder,
    pub task: tokio::task::JoinHandle<State>,
}

impl Running {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Wait for `start` to return.
    pub async fn finish(self, within: Duration) -> (State, Vec<Event>) {
        let state = tokio::time::timeout(within, self.task)
            .await
            .expect("service did not finish in time")
            .expect("service task panicked");
        (state, self.recorder.events())
    }
}

/// An HTTP client that does not pool connections between tests.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}

/// Reserve a free port on localhost.
pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}
