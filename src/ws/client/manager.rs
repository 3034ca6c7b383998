use std::{
    collections::VecDeque,
    fmt::Debug,
    sync::{Arc, Weak},
    time::Duration,
};

use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, ReentrantMutex};
use snafu::prelude::*;
use tokio::{
    runtime::Handle,
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

use super::{
    machine::{Effect, Generation, Input, Machine, TimerId},
    observer::{ObserverId, Observers},
    state::{ConnectionState, RetrySession, StateEvent},
};
use crate::{
    config::{Config, ReconnectPolicy},
    error,
    ws::transport::{Opening, Socket, Transport, TungsteniteTransport},
    Result,
};

struct SocketHandle {
    generation: Generation,
    outbound: mpsc::UnboundedSender<String>,
    // dropping it tells the socket task to close and stop reporting
    _close: oneshot::Sender<()>,
}

struct TimerHandle {
    timer: TimerId,
    task: JoinHandle<()>,
}

struct Shared {
    endpoint: String,
    transport: Box<dyn Transport>,
    runtime: Handle,
    dispatch_lock: ReentrantMutex<()>,
    machine: Mutex<Machine>,
    socket: Mutex<Option<SocketHandle>>,
    timer: Mutex<Option<TimerHandle>>,
    state_observers: Observers<StateEvent>,
    message_observers: Observers<str>,
}

impl Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoint", &self.endpoint)
            .field("machine", &*self.machine.lock())
            .finish_non_exhaustive()
    }
}

/// Keeps one websocket connection to a fixed endpoint alive.
///
/// Failures are never returned to the caller. They show up as
/// [`ConnectionState::Error`] and [`ConnectionState::Retrying`] events, and the
/// manager keeps retrying with exponential backoff until [`disconnect`] is
/// called.
///
/// All inputs, from callers, sockets and the reconnect timer, are handled one
/// at a time. Observer callbacks run inside that handling and may call back
/// into the manager, but should return quickly.
///
/// The manager must be created inside a tokio runtime. Its sockets and timers
/// run on that runtime, so it can be driven from any thread afterwards.
///
/// [`disconnect`]: ConnectionManager::disconnect
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

#[derive(Debug, Clone)]
pub(crate) struct WeakConnectionManager {
    shared: Weak<Shared>,
}

impl WeakConnectionManager {
    pub fn upgrade(&self) -> Option<ConnectionManager> {
        self.shared
            .upgrade()
            .map(|shared| ConnectionManager { shared })
    }
}

impl ConnectionManager {
    /// Create a manager for `endpoint` using the tungstenite transport
    pub fn new<S: Into<String>>(endpoint: S, policy: ReconnectPolicy) -> Result<Self> {
        Self::with_transport(endpoint, policy, TungsteniteTransport)
    }

    /// Create a manager from loaded config
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config.endpoint.clone(), config.policy)
    }

    /// Create a manager from `GESTURE_*` env vars
    pub fn from_env() -> Result<Self> {
        let config = Config::from_env().context(error::LoadConfigFailed)?;
        Self::from_config(&config)
    }

    /// Create a manager using a custom transport
    pub fn with_transport<S, T>(endpoint: S, policy: ReconnectPolicy, transport: T) -> Result<Self>
    where
        S: Into<String>,
        T: Transport,
    {
        policy.validate().context(error::InvalidPolicy)?;
        let runtime = Handle::try_current().context(error::NoRuntime)?;

        let endpoint = endpoint.into();

        log::info!("Create connection manager for {}", endpoint);

        Ok(Self {
            shared: Arc::new(Shared {
                endpoint,
                transport: Box::new(transport),
                runtime,
                dispatch_lock: ReentrantMutex::new(()),
                machine: Mutex::new(Machine::new(policy)),
                socket: Mutex::new(None),
                timer: Mutex::new(None),
                state_observers: Observers::default(),
                message_observers: Observers::default(),
            }),
        })
    }

    /// the configured endpoint
    pub fn endpoint(&self) -> &str {
        &self.shared.endpoint
    }

    /// Start a fresh session and attempt to connect immediately.
    ///
    /// When a socket is already open or opening it is torn down and replaced.
    pub fn connect(&self) {
        log::info!("Connect to {}", self.shared.endpoint);
        self.shared.dispatch(Input::Connect);
    }

    /// Stop the session: cancel pending retry, close socket, go `disconnected`.
    ///
    /// No connection attempt starts after this returns. Calling it when already
    /// disconnected does nothing.
    pub fn disconnect(&self) {
        log::info!("Disconnect from {}", self.shared.endpoint);
        self.shared.dispatch(Input::Disconnect);
    }

    /// Send a text frame unmodified.
    ///
    /// Returns false, and logs, if the link is not connected. Nothing is queued.
    pub fn send_message<S: Into<String>>(&self, payload: S) -> bool {
        let payload = payload.into();

        let _guard = self.shared.dispatch_lock.lock();

        let live = {
            let machine = self.shared.machine.lock();
            machine
                .current_generation()
                .filter(|_| machine.state() == ConnectionState::Connected)
        };

        let sent = match *self.shared.socket.lock() {
            Some(ref handle) if Some(handle.generation) == live => {
                handle.outbound.send(payload).map_err(|err| err.0)
            }
            _ => Err(payload),
        };

        if let Err(payload) = sent {
            log::warn!("Link is not connected, drop outbound message: {}", payload);
            return false;
        }
        true
    }

    /// current connection state
    pub fn connection_state(&self) -> ConnectionState {
        self.shared.machine.lock().state()
    }

    /// the last state event pushed to observers, idle disconnected before any
    pub fn state_event(&self) -> StateEvent {
        self.shared.machine.lock().last_event()
    }

    /// retry bookkeeping of the current session
    pub fn retry_session(&self) -> RetrySession {
        self.shared.machine.lock().session()
    }

    /// Register a callback for every state transition
    pub fn on_state_change<F>(&self, callback: F) -> ObserverId
    where
        F: Fn(&StateEvent) + Send + Sync + 'static,
    {
        self.shared.state_observers.add(callback)
    }

    /// Remove a state callback, returns false if it was not registered
    pub fn remove_state_observer(&self, id: ObserverId) -> bool {
        self.shared.state_observers.remove(id)
    }

    /// Register a callback for every received text frame, passed verbatim
    pub fn on_message<F>(&self, callback: F) -> ObserverId
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.shared.message_observers.add(callback)
    }

    /// Remove a message callback, returns false if it was not registered
    pub fn remove_message_observer(&self, id: ObserverId) -> bool {
        self.shared.message_observers.remove(id)
    }

    pub(crate) fn downgrade(&self) -> WeakConnectionManager {
        WeakConnectionManager {
            shared: Arc::downgrade(&self.shared),
        }
    }
}

fn take_if<T>(slot: &Mutex<Option<T>>, matches: impl FnOnce(&T) -> bool) -> Option<T> {
    let mut slot = slot.lock();
    if slot.as_ref().map_or(false, matches) {
        slot.take()
    } else {
        None
    }
}

impl Shared {
    fn dispatch(self: &Arc<Self>, input: Input) {
        let _guard = self.dispatch_lock.lock();

        let mut queue = VecDeque::from([input]);
        while let Some(input) = queue.pop_front() {
            let effects = self.machine.lock().step(input);
            queue.extend(effects.into_iter().filter_map(|effect| self.perform(effect)));
        }
    }

    /// run one effect, some effects report back a follow-up input
    fn perform(self: &Arc<Self>, effect: Effect) -> Option<Input> {
        match effect {
            Effect::Emit(event) => self.state_observers.notify(&event),
            Effect::Deliver(payload) => self.message_observers.notify(payload.as_str()),
            Effect::Teardown { generation } => {
                take_if(&self.socket, |h| h.generation == generation);
            }
            Effect::CancelTimer { timer } => {
                if let Some(handle) = take_if(&self.timer, |h| h.timer == timer) {
                    handle.task.abort();
                }
            }
            Effect::Open { generation } => return self.open(generation),
            Effect::ArmTimer { timer, delay } => self.arm_timer(timer, delay),
        }
        None
    }

    fn open(self: &Arc<Self>, generation: Generation) -> Option<Input> {
        // an observer may have moved the machine on while effects were running
        if self.machine.lock().current_generation() != Some(generation) {
            return None;
        }

        let opening = match self.transport.open(&self.endpoint) {
            Ok(opening) => opening,
            Err(err) => {
                log::warn!("Create socket to {} failed: {}", self.endpoint, err);
                return Some(Input::Errored { generation });
            }
        };

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (close, close_rx) = oneshot::channel();

        self.runtime.spawn(socket_task(
            Arc::downgrade(self),
            generation,
            opening,
            outbound_rx,
            close_rx,
        ));

        *self.socket.lock() = Some(SocketHandle {
            generation,
            outbound,
            _close: close,
        });

        None
    }

    fn arm_timer(self: &Arc<Self>, timer: TimerId, delay: Duration) {
        if self.machine.lock().pending_timer() != Some(timer) {
            return;
        }

        let shared = Arc::downgrade(self);
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            report(&shared, Input::TimerFired { timer });
        });

        *self.timer.lock() = Some(TimerHandle { timer, task });
    }
}

fn report(shared: &Weak<Shared>, input: Input) {
    if let Some(shared) = shared.upgrade() {
        shared.dispatch(input);
    }
}

async fn socket_task(
    shared: Weak<Shared>,
    generation: Generation,
    opening: Opening,
    mut outbound: mpsc::UnboundedReceiver<String>,
    mut close: oneshot::Receiver<()>,
) {
    let result = tokio::select! {
        biased;

        _ = &mut close => return,
        result = opening => result,
    };

    let Socket {
        mut sink,
        mut stream,
    } = match result {
        Ok(socket) => socket,
        Err(err) => {
            log::warn!("Open socket failed: {}", err);
            report(&shared, Input::Errored { generation });
            return;
        }
    };

    report(&shared, Input::Opened { generation });

    let terminal = loop {
        tokio::select! {
            biased;

            _ = &mut close => {
                if let Err(err) = sink.close().await {
                    log::debug!("Close socket failed: {}", err);
                }
                return;
            }

            Some(payload) = outbound.recv() => {
                if let Err(err) = sink.send(payload).await {
                    log::warn!("Find socket broken when send message: {}", err);
                    break Input::Errored { generation };
                }
            }

            frame = stream.next() => match frame {
                Some(Ok(payload)) => report(&shared, Input::Received { generation, payload }),
                Some(Err(err)) => {
                    log::warn!("Find socket broken when receive message: {}", err);
                    break Input::Errored { generation };
                }
                None => {
                    log::info!("Socket closed by peer");
                    break Input::Closed { generation };
                }
            }
        }
    };

    report(&shared, terminal);
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use parking_lot::Mutex;
    use tokio::{
        sync::mpsc,
        time::{self, Instant},
    };

    use super::*;
    use crate::ws::client::mock::{MockTransport, Outcome};
    use super::ConnectionState::{Connected, Connecting, Disconnected, Error, Retrying};

    type Events = mpsc::UnboundedReceiver<(Instant, StateEvent)>;

    fn ms(v: f64) -> Duration {
        Duration::from_secs_f64(v / 1000.0)
    }

    fn manager(endpoint: &str, transport: &MockTransport) -> (ConnectionManager, Events) {
        let manager =
            ConnectionManager::with_transport(endpoint, ReconnectPolicy::default(), transport.clone())
                .unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        manager.on_state_change(move |event| {
            let _ = tx.send((Instant::now(), *event));
        });

        (manager, rx)
    }

    async fn next_event(events: &mut Events) -> (Instant, StateEvent) {
        time::timeout(Duration::from_secs(3600), events.recv())
            .await
            .expect("no state event in time")
            .expect("observer dropped")
    }

    async fn wait_for(events: &mut Events, state: ConnectionState) -> Vec<StateEvent> {
        let mut seen = Vec::new();
        loop {
            let (_, event) = next_event(events).await;
            seen.push(event);
            if event.state == state {
                return seen;
            }
        }
    }

    fn states(events: &[StateEvent]) -> Vec<ConnectionState> {
        events.iter().map(|e| e.state).collect()
    }

    #[test]
    fn test_invalid_policy_rejected() {
        let policy = ReconnectPolicy {
            backoff_multiplier: 0.0,
            ..Default::default()
        };
        let err = ConnectionManager::new("ws://127.0.0.1:5001", policy).unwrap_err();
        assert!(matches!(err, crate::Error::InvalidPolicy { .. }));
    }

    #[test]
    fn test_create_outside_runtime_rejected() {
        let err = ConnectionManager::new("ws://127.0.0.1:5001", ReconnectPolicy::default())
            .unwrap_err();
        assert!(matches!(err, crate::Error::NoRuntime { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drive_from_thread_without_runtime() {
        let transport = MockTransport::new(&[], Outcome::Accept);
        let (manager, mut events) = manager("ws://x:1", &transport);

        let m = manager.clone();
        std::thread::spawn(move || m.connect()).join().unwrap();

        let seen = wait_for(&mut events, Connected).await;
        assert_eq!(states(&seen), vec![Connecting, Connected]);

        let m = manager.clone();
        let sent = std::thread::spawn(move || m.send_message("hi")).join().unwrap();
        assert!(sent);
        time::sleep(Duration::from_millis(10)).await;
        assert_eq!(transport.peer(0).written(), vec!["hi"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_is_synchronously_connecting() {
        let transport = MockTransport::new(&[], Outcome::Hold);
        let (manager, _events) = manager("ws://x:1", &transport);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        manager.on_state_change(move |event| s.lock().push(event.state));

        assert_eq!(manager.connection_state(), Disconnected);
        manager.connect();

        assert_eq!(manager.connection_state(), Connecting);
        assert_eq!(*seen.lock(), vec![Connecting]);
        assert_eq!(transport.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_endpoint_backs_off() {
        let transport = MockTransport::new(&[], Outcome::Refuse);
        let (manager, mut events) = manager("ws://x:1", &transport);

        manager.connect();

        let mut seen = Vec::new();
        for _ in 0..12 {
            seen.push(next_event(&mut events).await);
        }

        let seen_states: Vec<_> = seen.iter().map(|(_, e)| e.state).collect();
        assert_eq!(
            seen_states,
            [Connecting, Error, Retrying].repeat(4),
            "unexpected state sequence"
        );

        let expected = [3000.0, 4500.0, 6750.0];
        for (i, want) in expected.iter().enumerate() {
            let (retry_at, retry) = seen[i * 3 + 2];
            let (connect_at, _) = seen[i * 3 + 3];
            assert_eq!(retry.attempts, i as u32 + 1);
            assert_eq!(retry.next_retry_in, ms(*want));
            assert_eq!(connect_at - retry_at, ms(*want));
        }

        manager.disconnect();
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_third_attempt() {
        let transport =
            MockTransport::new(&[Outcome::Refuse, Outcome::Refuse], Outcome::Accept);
        let (manager, mut events) = manager("ws://x:1", &transport);

        manager.connect();
        let seen = wait_for(&mut events, Connected).await;

        assert_eq!(
            states(&seen),
            vec![Connecting, Error, Retrying, Connecting, Error, Retrying, Connecting, Connected]
        );
        assert_eq!(seen.last().unwrap().attempts, 2);
        assert_eq!(manager.retry_session().attempts, 0);
        assert_eq!(manager.retry_session().current_interval, ms(3000.0));
        assert_eq!(transport.attempts(), 3);

        // peer drops, the next retry starts from scratch
        transport.peer(0).close();
        let seen = wait_for(&mut events, Retrying).await;
        assert_eq!(states(&seen), vec![Retrying]);
        assert_eq!(seen[0].attempts, 1);
        assert_eq!(seen[0].next_retry_in, ms(3000.0));

        manager.disconnect();
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_retry_after_disconnect() {
        let transport = MockTransport::new(&[], Outcome::Refuse);
        let (manager, mut events) = manager("ws://x:1", &transport);

        manager.connect();
        wait_for(&mut events, Retrying).await;

        manager.disconnect();
        assert_eq!(manager.connection_state(), Disconnected);
        assert_eq!(next_event(&mut events).await.1.state, Disconnected);

        time::sleep(Duration::from_secs(120)).await;
        assert!(events.try_recv().is_err());
        assert_eq!(transport.attempts(), 1);

        // idempotent
        manager.disconnect();
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_before_open_discards_late_open() {
        let transport = MockTransport::new(&[], Outcome::Hold);
        let (manager, mut events) = manager("ws://x:1", &transport);

        manager.connect();
        manager.disconnect();
        transport.release(0, true);

        time::sleep(Duration::from_secs(60)).await;

        let mut seen = Vec::new();
        while let Ok((_, event)) = events.try_recv() {
            seen.push(event.state);
        }
        assert_eq!(seen, vec![Connecting, Disconnected]);
        assert_eq!(manager.connection_state(), Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_only_when_connected() {
        let transport = MockTransport::new(&[], Outcome::Hold);
        let (manager, mut events) = manager("ws://x:1", &transport);

        assert!(!manager.send_message("early"));

        manager.connect();
        assert!(!manager.send_message("while connecting"));

        transport.release(0, true);
        wait_for(&mut events, Connected).await;

        assert!(manager.send_message(r#"{"type":"subscribe"}"#));
        time::sleep(Duration::from_millis(10)).await;
        assert_eq!(transport.peer(0).written(), vec![r#"{"type":"subscribe"}"#]);

        manager.disconnect();
        assert!(!manager.send_message("late"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_messages_forwarded_verbatim() {
        let transport = MockTransport::new(&[], Outcome::Accept);
        let (manager, mut events) = manager("ws://x:1", &transport);

        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.on_message(move |payload| {
            let _ = tx.send(payload.to_string());
        });

        manager.connect();
        wait_for(&mut events, Connected).await;

        let frame = r#"{"type":"gesture","name":"swipe_up","hand":"Left","timestamp":1}"#;
        transport.peer(0).push(frame);
        transport.peer(0).push("not even json");

        assert_eq!(rx.recv().await.unwrap(), frame);
        assert_eq!(rx.recv().await.unwrap(), "not even json");
        assert_eq!(manager.connection_state(), Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_after_open_schedules_one_retry() {
        let transport = MockTransport::new(&[Outcome::Accept], Outcome::Hold);
        let (manager, mut events) = manager("ws://x:1", &transport);

        manager.connect();
        wait_for(&mut events, Connected).await;

        transport.peer(0).fail();
        let seen = wait_for(&mut events, Retrying).await;
        assert_eq!(states(&seen), vec![Error, Retrying]);

        let (_, event) = next_event(&mut events).await;
        assert_eq!(event.state, Connecting);
        assert_eq!(transport.attempts(), 2);

        // the held second attempt is the only one in flight
        time::sleep(Duration::from_secs(120)).await;
        assert!(events.try_recv().is_err());
        assert_eq!(transport.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_endpoint_retries() {
        let transport = MockTransport::new(&[], Outcome::Accept);
        let (manager, mut events) = manager("http://x:1", &transport);

        manager.connect();
        let seen = wait_for(&mut events, Retrying).await;
        assert_eq!(states(&seen), vec![Connecting, Error, Retrying]);

        let seen = wait_for(&mut events, Retrying).await;
        assert_eq!(states(&seen), vec![Connecting, Error, Retrying]);
        assert_eq!(seen[2].attempts, 2);
        assert_eq!(seen[2].next_retry_in, ms(4500.0));
        assert_eq!(transport.attempts(), 0);

        manager.disconnect();
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_while_connected_replaces_socket() {
        let transport = MockTransport::new(&[], Outcome::Accept);
        let (manager, mut events) = manager("ws://x:1", &transport);

        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.on_message(move |payload| {
            let _ = tx.send(payload.to_string());
        });

        manager.connect();
        wait_for(&mut events, Connected).await;

        manager.connect();
        let seen = wait_for(&mut events, Connected).await;
        assert_eq!(states(&seen), vec![Connecting, Connected]);
        assert_eq!(transport.attempts(), 2);

        // first socket is detached
        transport.peer(0).push("stale");
        transport.peer(0).close();
        transport.peer(1).push("fresh");

        assert_eq!(rx.recv().await.unwrap(), "fresh");
        time::sleep(Duration::from_secs(60)).await;
        assert!(rx.try_recv().is_err());
        assert!(events.try_recv().is_err());
        assert_eq!(manager.connection_state(), Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_observer_can_disconnect_reentrantly() {
        let transport = MockTransport::new(&[], Outcome::Refuse);
        let (manager, mut events) = manager("ws://x:1", &transport);

        let weak = manager.downgrade();
        manager.on_state_change(move |event| {
            if event.state == Retrying {
                if let Some(manager) = weak.upgrade() {
                    manager.disconnect();
                }
            }
        });

        manager.connect();
        wait_for(&mut events, Disconnected).await;

        time::sleep(Duration::from_secs(120)).await;
        assert!(events.try_recv().is_err());
        assert_eq!(transport.attempts(), 1);
    }
}
