//! Resilient event stream service.
//!
//! One transport, one connection state, one keep-alive timer. All of them live
//! in [`StreamCore`] behind an async mutex; a single driver task feeds it
//! transport signals and timer ticks, so reconnects never overlap.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex as SyncMutex;
use tokio::sync::{Mutex, Notify, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use super::dispatch::{CallbackResult, EventDispatcher, SharedCallbacks};
use super::events::{ConnectedEvent, ScheduleEvent, SettingsEvent, StatusEvent};
use super::frames::{InboundFrame, parse_frame};
use super::state::{ConnectionState, KeepAliveState};
use super::transport::{StreamTransport, TaggedSignal, TransportSignal, TransportSignals};
use crate::config::StreamConfig;
use crate::credentials::CredentialSource;
use crate::error::{MowerError, Result};

/// Mutable state of the stream. Only ever touched with the core lock held.
pub(crate) struct StreamCore<T, C> {
    config: StreamConfig,
    transport: T,
    credentials: C,
    state: ConnectionState,
    keep_alive: KeepAliveState,
    /// Bumped on every open and on stop; signals from older generations are dropped.
    generation: u64,
    signal_tx: mpsc::UnboundedSender<TaggedSignal>,
    stopping: Arc<AtomicBool>,
    dispatcher: EventDispatcher,
    connection_id: Option<String>,
}

impl<T: StreamTransport, C: CredentialSource> StreamCore<T, C> {
    pub(crate) fn new(
        config: StreamConfig,
        transport: T,
        credentials: C,
        callbacks: SharedCallbacks,
        stopping: Arc<AtomicBool>,
        signal_tx: mpsc::UnboundedSender<TaggedSignal>,
    ) -> Self {
        Self {
            config,
            transport,
            credentials,
            state: ConnectionState::Idle,
            keep_alive: KeepAliveState::default(),
            generation: 0,
            signal_tx,
            stopping,
            dispatcher: EventDispatcher::new(callbacks),
            connection_id: None,
        }
    }

    fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    fn transition(&mut self, next: ConnectionState) -> bool {
        if self.state == next && next != ConnectionState::Connecting {
            return true;
        }
        if !self.state.can_transition_to(next) {
            warn!(from = %self.state, to = %next, "Rejected connection state transition");
            return false;
        }
        debug!(from = %self.state, to = %next, "Connection state changed");
        self.state = next;
        true
    }

    /// Open the first connection and arm the keep-alive timer.
    ///
    /// Configuration and authentication errors abort the start. Transport
    /// failures are left to the keep-alive loop.
    async fn start(&mut self) -> Result<()> {
        if let Err(e) = self.config.validate() {
            error!(error = %e, "Event stream could not start");
            return Err(e);
        }
        match self.connect().await {
            Ok(()) => {}
            Err(e) if e.is_config_error() || e.is_auth_error() => {
                error!(error = %e, "Event stream could not start");
                return Err(e);
            }
            Err(e) => warn!(error = %e, "Initial connection failed, keep-alive will retry"),
        }
        self.schedule_next_tick();
        Ok(())
    }

    /// Replace the current connection with a fresh one.
    async fn connect(&mut self) -> Result<()> {
        self.close_transport().await;

        let credential = match self.credentials.get_current_credential().await {
            Ok(credential) => credential,
            Err(e) => {
                self.flag_if_rejected(&e);
                return Err(e);
            }
        };

        self.generation += 1;
        let signals = TransportSignals::new(self.generation, self.signal_tx.clone());
        self.transition(ConnectionState::Connecting);
        self.connection_id = None;
        self.keep_alive.reset_for_new_connection(Instant::now());

        if let Err(e) = self.transport.open(&credential, signals).await {
            self.transition(ConnectionState::Disconnected);
            self.flag_if_rejected(&e);
            return Err(e);
        }
        Ok(())
    }

    fn flag_if_rejected(&self, error: &MowerError) {
        if error.is_auth_error() {
            debug!(error = %error, "Credential rejected, next attempt logs in again");
            self.credentials.flag_as_invalid();
        }
    }

    /// Close the transport if it is open. Closing an idle transport is skipped.
    async fn close_transport(&mut self) {
        if self.state != ConnectionState::Connected && !self.transport.is_connected() {
            return;
        }
        if let Err(e) = self.transport.close().await {
            warn!(error = %e, "Failed to close event stream transport");
        }
        if self.state == ConnectionState::Connected {
            self.transition(ConnectionState::Disconnected);
        }
    }

    async fn reconnect(&mut self) {
        if self.keep_alive.reconnecting {
            debug!("Reconnect already in progress");
            return;
        }

        self.keep_alive.reconnecting = true;
        let result = self.connect().await;
        self.keep_alive.reconnecting = false;

        match result {
            Ok(()) => info!("Event stream reconnected"),
            Err(e) => warn!(error = %e, "Reconnect failed, retrying on next keep-alive tick"),
        }
        self.schedule_next_tick();
    }

    fn schedule_next_tick(&mut self) {
        self.keep_alive
            .schedule_next_tick(Instant::now(), self.config.keep_alive_interval());
    }

    /// One keep-alive round: reconnect a stale connection or ping a live one.
    ///
    /// A wakeup for a tick that was cancelled or moved since it was read is ignored.
    async fn keep_alive_tick(&mut self) {
        if !self.keep_alive.tick_due(Instant::now()) {
            trace!(next_tick = ?self.keep_alive.next_tick, "No keep-alive tick due");
            return;
        }
        self.keep_alive.cancel_tick();

        if self.is_stopping() {
            debug!("Keep-alive tick during shutdown ignored");
            return;
        }
        if self.keep_alive.reconnecting {
            debug!("Keep-alive tick skipped, reconnect in progress");
            return;
        }

        let reason = self.keep_alive.reconnect_reason(
            self.transport.is_connected(),
            Instant::now(),
            self.config.reconnect_threshold(),
        );

        match reason {
            Some(reason) => {
                info!(?reason, "Event stream is stale, reconnecting");
                self.reconnect().await;
            }
            None => {
                if let Err(e) = self.transport.ping().await {
                    warn!(error = %e, "Keep-alive ping failed");
                }
                self.schedule_next_tick();
            }
        }
    }

    async fn handle_signal(&mut self, generation: u64, signal: TransportSignal) {
        if generation != self.generation {
            trace!(generation, current = self.generation, ?signal, "Dropping signal from replaced connection");
            return;
        }

        match signal {
            TransportSignal::Open => self.on_open(None),
            TransportSignal::Message(text) => self.on_message(&text),
            TransportSignal::Error(message) => {
                warn!(error = %message, "Event stream transport error");
                self.dispatcher.error(&MowerError::Transport(message));
            }
            TransportSignal::Closed => self.on_close().await,
        }
    }

    fn on_open(&mut self, connection_id: Option<String>) {
        if connection_id.is_some() {
            self.connection_id = connection_id;
        }

        if self.state == ConnectionState::Connecting {
            self.transition(ConnectionState::Connected);
            info!(connection_id = ?self.connection_id, "Event stream connected");
            self.dispatcher.connected(&ConnectedEvent {
                connection_id: self.connection_id.clone(),
            });
        } else {
            debug!(connection_id = ?self.connection_id, state = %self.state, "Handshake on established connection");
        }
    }

    fn on_message(&mut self, text: &str) {
        let frame = match parse_frame(text) {
            Ok(frame) => frame,
            Err(e) => {
                error!(error = %e, "Dropping malformed event stream frame");
                return;
            }
        };

        let now = Instant::now();
        self.keep_alive.last_event_at = Some(now);
        trace!(kind = frame.kind(), "Event stream frame");

        match frame {
            InboundFrame::Connected(event) => self.on_open(event.connection_id),
            frame => self.dispatcher.dispatch(frame, now),
        }
    }

    async fn on_close(&mut self) {
        if self.is_stopping() {
            debug!("Event stream closed during shutdown");
            return;
        }

        match self.state {
            ConnectionState::Connected => {
                self.transition(ConnectionState::Disconnected);
                info!("Event stream disconnected");
                self.dispatcher.disconnected();
                if !self.keep_alive.reconnecting {
                    self.reconnect().await;
                }
            }
            ConnectionState::Connecting => {
                debug!("Connection attempt closed before opening");
                self.transition(ConnectionState::Disconnected);
            }
            state => debug!(%state, "Close signal ignored"),
        }
    }

    async fn stop(&mut self) {
        self.keep_alive.cancel_tick();
        self.close_transport().await;
        self.generation += 1;
        self.keep_alive = KeepAliveState::default();
        self.connection_id = None;
        self.transition(ConnectionState::Idle);
    }
}

struct Shared<T, C> {
    core: Mutex<StreamCore<T, C>>,
    callbacks: SharedCallbacks,
    stopping: Arc<AtomicBool>,
    /// Cancelled by `stop()` to interrupt whatever the driver is doing, then replaced.
    run: SyncMutex<CancellationToken>,
    /// Wakes the driver when the keep-alive deadline changed from outside.
    rearm: Notify,
    shutdown: CancellationToken,
    signal_rx: SyncMutex<Option<mpsc::UnboundedReceiver<TaggedSignal>>>,
    driver: SyncMutex<Option<JoinHandle<()>>>,
}

/// Keeps one authenticated event stream alive and dispatches its events.
///
/// ```no_run
/// # async fn demo() -> mowerlink::Result<()> {
/// use std::sync::Arc;
/// use mowerlink::{AuthSettings, CredentialManager, EventStreamService, HttpAuthenticator,
///     HttpAuthenticatorConfig, StreamConfig, WebSocketTransport};
///
/// let settings = AuthSettings::client_credentials("app-key", "secret");
/// let authenticator = HttpAuthenticator::new(HttpAuthenticatorConfig::default(), "app-key")?;
/// let credentials = Arc::new(CredentialManager::new(settings, authenticator));
///
/// let config = StreamConfig::default();
/// let transport = WebSocketTransport::new(&config.url);
/// let service = EventStreamService::new(config, transport, credentials);
/// service.on_status(|event| {
///     println!("{} reported status", event.device_id);
///     Ok(())
/// });
/// service.start().await?;
/// # Ok(())
/// # }
/// ```
pub struct EventStreamService<T, C> {
    shared: Arc<Shared<T, C>>,
}

impl<T, C> EventStreamService<T, C>
where
    T: StreamTransport,
    C: CredentialSource + 'static,
{
    pub fn new(config: StreamConfig, transport: T, credentials: C) -> Self {
        let callbacks = SharedCallbacks::default();
        let stopping = Arc::new(AtomicBool::new(false));
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();

        let core = StreamCore::new(
            config,
            transport,
            credentials,
            Arc::clone(&callbacks),
            Arc::clone(&stopping),
            signal_tx,
        );

        Self {
            shared: Arc::new(Shared {
                core: Mutex::new(core),
                callbacks,
                stopping,
                run: SyncMutex::new(CancellationToken::new()),
                rearm: Notify::new(),
                shutdown: CancellationToken::new(),
                signal_rx: SyncMutex::new(Some(signal_rx)),
                driver: SyncMutex::new(None),
            }),
        }
    }

    /// Open the stream and start the keep-alive timer.
    ///
    /// Calling it again replaces the current connection. Configuration and
    /// authentication errors from the first attempt are returned; an
    /// authentication error also flags the credential as invalid.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<()> {
        self.ensure_driver();

        let result = self.shared.core.lock().await.start().await;
        self.shared.rearm.notify_one();
        result
    }

    /// Close the stream and cancel the timer and any in-flight reconnect.
    ///
    /// No disconnected callback fires and no reconnect is attempted while
    /// stopping.
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        self.shared.stopping.store(true, Ordering::SeqCst);
        self.shared.run.lock().cancel();

        let mut core = self.shared.core.lock().await;
        core.stop().await;
        // Fresh token before anything can open a new connection.
        *self.shared.run.lock() = CancellationToken::new();
        self.shared.stopping.store(false, Ordering::SeqCst);
        drop(core);

        self.shared.rearm.notify_one();
        info!("Event stream stopped");
    }

    pub async fn state(&self) -> ConnectionState {
        self.shared.core.lock().await.state
    }

    /// Connection id announced by the server handshake, if any.
    pub async fn connection_id(&self) -> Option<String> {
        self.shared.core.lock().await.connection_id.clone()
    }

    pub fn on_connected<F>(&self, callback: F)
    where
        F: Fn(&ConnectedEvent) -> CallbackResult + Send + Sync + 'static,
    {
        self.shared.callbacks.write().connected = Some(Arc::new(callback));
    }

    pub fn on_disconnected<F>(&self, callback: F)
    where
        F: Fn() -> CallbackResult + Send + Sync + 'static,
    {
        self.shared.callbacks.write().disconnected = Some(Arc::new(move |_: &()| callback()));
    }

    /// Transport errors. They never stop the stream.
    pub fn on_error<F>(&self, callback: F)
    where
        F: Fn(&MowerError) -> CallbackResult + Send + Sync + 'static,
    {
        self.shared.callbacks.write().error = Some(Arc::new(callback));
    }

    pub fn on_status<F>(&self, callback: F)
    where
        F: Fn(&StatusEvent) -> CallbackResult + Send + Sync + 'static,
    {
        self.shared.callbacks.write().status = Some(Arc::new(callback));
    }

    pub fn on_settings<F>(&self, callback: F)
    where
        F: Fn(&SettingsEvent) -> CallbackResult + Send + Sync + 'static,
    {
        self.shared.callbacks.write().settings = Some(Arc::new(callback));
    }

    /// Schedules derived once both settings and status of a device are known.
    pub fn on_schedule<F>(&self, callback: F)
    where
        F: Fn(&ScheduleEvent) -> CallbackResult + Send + Sync + 'static,
    {
        self.shared.callbacks.write().schedule = Some(Arc::new(callback));
    }

    fn ensure_driver(&self) {
        let mut driver = self.shared.driver.lock();
        if driver.is_some() {
            return;
        }
        let Some(signals) = self.shared.signal_rx.lock().take() else {
            return;
        };
        *driver = Some(tokio::spawn(drive(Arc::clone(&self.shared), signals)));
    }
}

impl<T, C> Drop for EventStreamService<T, C> {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
        if let Some(driver) = self.shared.driver.lock().take() {
            driver.abort();
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn unless_stopped(run: &CancellationToken, work: impl Future<Output = ()>) {
    tokio::select! {
        _ = run.cancelled() => trace!("Interrupted by stop"),
        _ = work => {}
    }
}

async fn drive<T, C>(shared: Arc<Shared<T, C>>, mut signals: mpsc::UnboundedReceiver<TaggedSignal>)
where
    T: StreamTransport,
    C: CredentialSource + 'static,
{
    let core = &shared.core;

    loop {
        let deadline = core.lock().await.keep_alive.next_tick;

        tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            signal = signals.recv() => {
                let Some((generation, signal)) = signal else {
                    break;
                };
                let run = shared.run.lock().clone();
                unless_stopped(&run, async move {
                    core.lock().await.handle_signal(generation, signal).await;
                })
                .await;
            }
            _ = sleep_until(deadline) => {
                let run = shared.run.lock().clone();
                unless_stopped(&run, async move {
                    core.lock().await.keep_alive_tick().await;
                })
                .await;
            }
            _ = shared.rearm.notified() => {}
        }
    }
    debug!("Event stream driver exited");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use tracing_subscriber::layer::SubscriberExt;

    use super::*;
    use crate::config::AuthSettings;
    use crate::credentials::CredentialManager;
    use crate::test_support::{FakeAuthenticator, FakeTransport, LevelCounter, TransportHandle};

    type Manager = Arc<CredentialManager<Arc<FakeAuthenticator>>>;

    const STATUS: &str = r#"{"id":"m1","type":"status-event","attributes":{"planner":{"nextStartTimestamp":0,"restrictedReason":"NONE"}}}"#;
    const SETTINGS: &str = r#"{"id":"m1","type":"settings-event","attributes":{"calendar":{"tasks":[{"start":600,"duration":120,"monday":true}]}}}"#;

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    fn count(counter: &Arc<AtomicUsize>) -> usize {
        counter.load(Ordering::SeqCst)
    }

    struct Harness {
        core: StreamCore<FakeTransport, Manager>,
        signals: mpsc::UnboundedReceiver<TaggedSignal>,
        remote: TransportHandle,
        auth: Arc<FakeAuthenticator>,
        manager: Manager,
        callbacks: SharedCallbacks,
        stopping: Arc<AtomicBool>,
    }

    impl Harness {
        fn new(expires_in: Option<u64>) -> Self {
            Self::with_settings(expires_in, AuthSettings::password("key", "user", "pass"))
        }

        fn with_settings(expires_in: Option<u64>, settings: AuthSettings) -> Self {
            let auth = Arc::new(FakeAuthenticator::with_expiry(expires_in));
            let manager = Arc::new(CredentialManager::new(settings, Arc::clone(&auth)));
            let (transport, remote) = FakeTransport::new();
            let callbacks = SharedCallbacks::default();
            let stopping = Arc::new(AtomicBool::new(false));
            let (tx, signals) = mpsc::unbounded_channel();

            let core = StreamCore::new(
                StreamConfig::default(),
                transport,
                Arc::clone(&manager),
                Arc::clone(&callbacks),
                Arc::clone(&stopping),
                tx,
            );

            Self {
                core,
                signals,
                remote,
                auth,
                manager,
                callbacks,
                stopping,
            }
        }

        /// Process every queued signal, including the ones a reconnect produces.
        async fn pump(&mut self) {
            while let Ok((generation, signal)) = self.signals.try_recv() {
                self.core.handle_signal(generation, signal).await;
            }
        }

        async fn started(expires_in: Option<u64>) -> Self {
            let mut harness = Self::new(expires_in);
            harness.core.start().await.unwrap();
            harness.pump().await;
            assert_eq!(harness.core.state, ConnectionState::Connected);
            harness
        }

        fn count_disconnects(&self) -> Arc<AtomicUsize> {
            let hits = counter();
            let inner = Arc::clone(&hits);
            self.callbacks.write().disconnected = Some(Arc::new(move |_: &()| -> CallbackResult {
                inner.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }));
            hits
        }
    }

    #[tokio::test(start_paused = true)]
    async fn start_connects_and_arms_timer() {
        let mut harness = Harness::new(Some(7200));
        let connected = counter();
        let inner = Arc::clone(&connected);
        harness.callbacks.write().connected = Some(Arc::new(move |_: &ConnectedEvent| -> CallbackResult {
            inner.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        let now = Instant::now();
        harness.core.start().await.unwrap();
        assert_eq!(harness.core.state, ConnectionState::Connecting);

        harness.pump().await;
        assert_eq!(harness.core.state, ConnectionState::Connected);
        assert_eq!(count(&connected), 1);
        assert_eq!(harness.remote.opens(), 1);
        assert_eq!(
            harness.core.keep_alive.next_tick,
            Some(now + Duration::from_secs(60))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stale_connection_is_replaced() {
        let mut harness = Harness::started(Some(7200)).await;
        let disconnects = harness.count_disconnects();

        tokio::time::advance(Duration::from_secs(3601)).await;
        harness.core.keep_alive_tick().await;

        assert_eq!(harness.remote.closes(), 1);
        assert_eq!(harness.remote.opens(), 2);
        assert_eq!(harness.core.keep_alive.last_event_at, None);
        assert_eq!(harness.core.keep_alive.started_at, Some(Instant::now()));
        assert!(harness.core.keep_alive.next_tick.is_some());

        // The close signal of the replaced socket must not trigger anything.
        harness.pump().await;
        assert_eq!(harness.core.state, ConnectionState::Connected);
        assert_eq!(count(&disconnects), 0);
        assert_eq!(harness.remote.opens(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn live_connection_is_pinged() {
        let mut harness = Harness::started(Some(7200)).await;

        harness.remote.message(STATUS);
        harness.pump().await;

        tokio::time::advance(Duration::from_secs(60)).await;
        harness.core.keep_alive_tick().await;

        assert_eq!(harness.remote.pings(), 1);
        assert_eq!(harness.remote.opens(), 1);
        assert_eq!(
            harness.core.keep_alive.next_tick,
            Some(Instant::now() + Duration::from_secs(60))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn recent_event_keeps_old_connection_alive() {
        let mut harness = Harness::started(Some(7200)).await;

        tokio::time::advance(Duration::from_secs(3000)).await;
        harness.remote.message(STATUS);
        harness.pump().await;

        // 100s short of the threshold since the last event, and well past it
        // since the connection opened.
        tokio::time::advance(Duration::from_secs(3500)).await;
        harness.core.keep_alive_tick().await;
        assert_eq!(harness.remote.opens(), 1);
        assert_eq!(harness.remote.closes(), 0);
        assert_eq!(harness.remote.pings(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn server_close_reconnects_immediately() {
        let mut harness = Harness::started(Some(7200)).await;
        let disconnects = harness.count_disconnects();

        harness.remote.drop_connection();
        harness.pump().await;

        assert_eq!(count(&disconnects), 1);
        assert_eq!(harness.remote.opens(), 2);
        assert_eq!(harness.core.state, ConnectionState::Connected);
        assert!(!harness.core.keep_alive.reconnecting);
    }

    #[tokio::test(start_paused = true)]
    async fn close_while_stopping_is_suppressed() {
        let mut harness = Harness::started(Some(7200)).await;
        let disconnects = harness.count_disconnects();

        harness.stopping.store(true, Ordering::SeqCst);
        harness.remote.drop_connection();
        harness.pump().await;

        assert_eq!(count(&disconnects), 0);
        assert_eq!(harness.remote.opens(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn close_during_reconnect_does_not_reconnect_again() {
        let mut harness = Harness::started(Some(7200)).await;
        let disconnects = harness.count_disconnects();

        harness.core.keep_alive.reconnecting = true;
        harness.remote.drop_connection();
        harness.pump().await;

        assert_eq!(count(&disconnects), 1);
        assert_eq!(harness.remote.opens(), 1);
        assert_eq!(harness.core.state, ConnectionState::Disconnected);

        // The timer path respects the same guard and does not rearm.
        tokio::time::advance(Duration::from_secs(60)).await;
        harness.core.keep_alive_tick().await;
        assert_eq!(harness.remote.opens(), 1);
        assert_eq!(harness.core.keep_alive.next_tick, None);
    }

    #[tokio::test(start_paused = true)]
    async fn close_before_open_resets_silently() {
        let mut harness = Harness::new(Some(7200));
        let disconnects = harness.count_disconnects();

        harness.core.start().await.unwrap();
        // Drop the open signal, then report the socket gone.
        harness.signals.try_recv().unwrap();
        harness.remote.drop_connection();
        harness.pump().await;

        assert_eq!(harness.core.state, ConnectionState::Disconnected);
        assert_eq!(count(&disconnects), 0);
        assert_eq!(harness.remote.opens(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_frame_logs_one_error_and_changes_nothing() {
        let mut harness = Harness::started(Some(7200)).await;
        harness.remote.message(STATUS);
        harness.pump().await;
        let last_event_at = harness.core.keep_alive.last_event_at;

        let counter = LevelCounter::default();
        let _guard = tracing::subscriber::set_default(
            tracing_subscriber::registry().with(counter.clone()),
        );

        tokio::time::advance(Duration::from_secs(5)).await;
        harness.remote.message("{not json");
        harness.pump().await;

        assert_eq!(counter.errors(), 1);
        assert_eq!(harness.core.state, ConnectionState::Connected);
        assert_eq!(harness.core.keep_alive.last_event_at, last_event_at);
    }

    #[tokio::test(start_paused = true)]
    async fn settings_then_status_emits_one_schedule() {
        let mut harness = Harness::started(Some(7200)).await;
        let schedules = counter();
        let inner = Arc::clone(&schedules);
        harness.callbacks.write().schedule = Some(Arc::new(move |event: &ScheduleEvent| -> CallbackResult {
            assert_eq!(event.device_id, "m1");
            assert!(event.has_active_tasks());
            inner.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        harness.remote.message(SETTINGS);
        harness.pump().await;
        assert_eq!(count(&schedules), 0);

        harness.remote.message(STATUS);
        harness.pump().await;
        assert_eq!(count(&schedules), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_frame_records_connection_id() {
        let mut harness = Harness::started(Some(7200)).await;

        harness
            .remote
            .message(r#"{"connectionId":"abc=","connected":true,"type":"connected"}"#);
        harness.pump().await;

        assert_eq!(harness.core.connection_id.as_deref(), Some("abc="));
        assert!(harness.core.keep_alive.last_event_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn transport_errors_are_reported_but_not_fatal() {
        let mut harness = Harness::started(Some(7200)).await;
        let errors = counter();
        let inner = Arc::clone(&errors);
        harness.callbacks.write().error = Some(Arc::new(move |error: &MowerError| -> CallbackResult {
            assert!(matches!(error, MowerError::Transport(_)));
            inner.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        harness.remote.transport_error("connection reset");
        harness.pump().await;

        assert_eq!(count(&errors), 1);
        assert_eq!(harness.core.state, ConnectionState::Connected);
        assert_eq!(harness.remote.opens(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn silence_reconnect_picks_up_refreshed_token() {
        let mut harness = Harness::new(Some(7200));
        harness.auth.push_token("t1");
        harness.auth.push_token("t2");

        harness.core.start().await.unwrap();
        harness.pump().await;

        tokio::time::advance(Duration::from_secs(3601)).await;
        harness.core.keep_alive_tick().await;
        harness.pump().await;

        assert_eq!(harness.remote.tokens(), vec!["t1", "t2"]);
        assert_eq!(harness.auth.refresh_calls.load(Ordering::SeqCst), 1);
        assert_eq!(harness.auth.authenticate_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_reconnect_flags_credential_and_recovers() {
        let mut harness = Harness::started(Some(7200)).await;

        harness.remote.fail_open(Some(|| MowerError::NotAuthorized));
        harness.remote.drop_connection();
        harness.pump().await;

        assert!(harness.manager.is_flagged_invalid());
        assert_eq!(harness.core.state, ConnectionState::Disconnected);
        assert!(!harness.core.keep_alive.reconnecting);
        assert!(harness.core.keep_alive.next_tick.is_some());

        harness.remote.fail_open(None);
        tokio::time::advance(Duration::from_secs(60)).await;
        harness.core.keep_alive_tick().await;
        harness.pump().await;

        assert_eq!(harness.core.state, ConnectionState::Connected);
        assert_eq!(harness.auth.authenticate_calls.load(Ordering::SeqCst), 2);
        assert!(!harness.manager.is_flagged_invalid());
    }

    #[tokio::test(start_paused = true)]
    async fn start_propagates_configuration_errors() {
        let mut harness =
            Harness::with_settings(Some(7200), AuthSettings::client_credentials("key", ""));

        let err = harness.core.start().await.unwrap_err();
        assert!(err.is_config_error());
        assert_eq!(harness.remote.opens(), 0);
        assert_eq!(harness.core.keep_alive.next_tick, None);
        assert_eq!(harness.core.state, ConnectionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn start_rejects_zero_keep_alive_interval() {
        let mut harness = Harness::new(Some(7200));
        harness.core.config.keep_alive_interval_secs = 0;

        let err = harness.core.start().await.unwrap_err();
        assert!(err.is_config_error());
        assert_eq!(harness.remote.opens(), 0);
        assert_eq!(harness.auth.total_calls(), 0);
        assert_eq!(harness.core.keep_alive.next_tick, None);
    }

    #[tokio::test(start_paused = true)]
    async fn start_propagates_rejected_login_and_flags_credential() {
        let mut harness = Harness::new(Some(7200));
        harness.auth.fail_with(|| MowerError::BadCredentials);

        let err = harness.core.start().await.unwrap_err();
        assert!(matches!(err, MowerError::BadCredentials));
        assert!(harness.manager.is_flagged_invalid());
    }

    #[tokio::test(start_paused = true)]
    async fn start_tolerates_transport_failure() {
        let mut harness = Harness::new(Some(7200));
        harness.remote.fail_open(Some(|| MowerError::transport("refused")));

        harness.core.start().await.unwrap();
        assert_eq!(harness.core.state, ConnectionState::Disconnected);
        assert!(harness.core.keep_alive.next_tick.is_some());

        // Nothing is open, so stopping must not close anything.
        harness.core.stop().await;
        assert_eq!(harness.remote.closes(), 0);
        assert_eq!(harness.core.state, ConnectionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_closes_connected_transport_and_ignores_late_signals() {
        let mut harness = Harness::started(Some(7200)).await;
        let disconnects = harness.count_disconnects();

        harness.stopping.store(true, Ordering::SeqCst);
        harness.core.stop().await;
        harness.stopping.store(false, Ordering::SeqCst);
        harness.pump().await;

        assert_eq!(harness.remote.closes(), 1);
        assert_eq!(harness.core.state, ConnectionState::Idle);
        assert_eq!(harness.core.keep_alive.next_tick, None);
        assert_eq!(count(&disconnects), 0);
        assert_eq!(harness.remote.opens(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn tick_after_stop_does_nothing() {
        let mut harness = Harness::started(Some(7200)).await;
        harness.remote.message(STATUS);
        harness.pump().await;

        tokio::time::advance(Duration::from_secs(60)).await;
        harness.core.stop().await;
        harness.core.keep_alive_tick().await;
        harness.pump().await;

        assert_eq!(harness.core.state, ConnectionState::Idle);
        assert_eq!(harness.remote.opens(), 1);
        assert_eq!(harness.remote.pings(), 0);
        assert_eq!(harness.core.keep_alive.next_tick, None);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_login_failure_warns_once_per_tick() {
        let mut harness = Harness::started(Some(7200)).await;
        harness.auth.fail_with(|| MowerError::BadCredentials);
        harness.remote.fail_open(Some(|| MowerError::NotAuthorized));
        harness.remote.drop_connection();
        harness.pump().await;
        assert!(harness.manager.is_flagged_invalid());

        let counter = LevelCounter::default();
        let _guard = tracing::subscriber::set_default(
            tracing_subscriber::registry().with(counter.clone()),
        );

        for tick in 1..=3 {
            tokio::time::advance(Duration::from_secs(60)).await;
            harness.core.keep_alive_tick().await;
            assert_eq!(counter.warnings(), tick);
            assert_eq!(counter.errors(), 0);
            assert!(harness.core.keep_alive.next_tick.is_some());
        }
        assert_eq!(harness.core.state, ConnectionState::Disconnected);

        harness.auth.succeed();
        harness.remote.fail_open(None);
        tokio::time::advance(Duration::from_secs(60)).await;
        harness.core.keep_alive_tick().await;
        harness.pump().await;

        assert_eq!(harness.core.state, ConnectionState::Connected);
        assert_eq!(counter.warnings(), 3);
        assert!(!harness.manager.is_flagged_invalid());
    }

    fn service() -> (EventStreamService<FakeTransport, Manager>, TransportHandle) {
        let auth = Arc::new(FakeAuthenticator::with_expiry(Some(7200)));
        let manager = Arc::new(CredentialManager::new(
            AuthSettings::password("key", "user", "pass"),
            auth,
        ));
        let (transport, remote) = FakeTransport::new();
        (
            EventStreamService::new(StreamConfig::default(), transport, manager),
            remote,
        )
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_start_reuses_single_driver() {
        let (service, remote) = service();
        let connected = counter();
        let inner = Arc::clone(&connected);
        service.on_connected(move |_| {
            inner.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        service.start().await.unwrap();
        settle().await;
        assert_eq!(service.state().await, ConnectionState::Connected);
        assert_eq!(count(&connected), 1);

        service.start().await.unwrap();
        settle().await;
        assert_eq!(service.state().await, ConnectionState::Connected);
        assert_eq!(remote.opens(), 2);
        assert_eq!(remote.closes(), 1);
        assert_eq!(count(&connected), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn driver_runs_keep_alive_ticks() {
        let (service, remote) = service();
        service.start().await.unwrap();
        settle().await;

        remote.message(STATUS);
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(remote.pings(), 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(remote.pings(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_service_stays_quiet() {
        let (service, remote) = service();
        let disconnects = counter();
        let inner = Arc::clone(&disconnects);
        service.on_disconnected(move || {
            inner.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        service.start().await.unwrap();
        settle().await;
        service.stop().await;

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(service.state().await, ConnectionState::Idle);
        assert_eq!(remote.pings(), 0);
        assert_eq!(remote.opens(), 1);
        assert_eq!(count(&disconnects), 0);

        service.start().await.unwrap();
        settle().await;
        assert_eq!(service.state().await, ConnectionState::Connected);
    }

    async fn assert_stopped_cleanly(service: &EventStreamService<FakeTransport, Manager>) {
        let core = service.shared.core.lock().await;
        assert_eq!(core.state, ConnectionState::Idle);
        assert_eq!(core.keep_alive.next_tick, None);
        assert!(!core.keep_alive.reconnecting);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_at_tick_deadline_stays_stopped() {
        // Stop and the timer wake up at the same instant; repeat to cover both
        // orders the driver may pick.
        for _ in 0..32 {
            let (service, remote) = service();
            let started = Instant::now();
            service.start().await.unwrap();
            settle().await;
            remote.message(STATUS);

            tokio::time::sleep_until(started + Duration::from_secs(60)).await;
            service.stop().await;
            let opens = remote.opens();

            tokio::time::sleep(Duration::from_secs(600)).await;
            assert_stopped_cleanly(&service).await;
            assert_eq!(remote.opens(), opens);
            assert_eq!(remote.opens(), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stop_interrupts_reconnect_in_flight() {
        let (service, remote) = service();
        let disconnects = counter();
        let inner = Arc::clone(&disconnects);
        service.on_disconnected(move || {
            inner.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        service.start().await.unwrap();
        settle().await;

        remote.delay_open(Some(Duration::from_secs(30)));
        remote.drop_connection();
        settle().await;
        // The driver is now parked inside the reconnect's open.
        assert_eq!(remote.opens(), 2);
        assert_eq!(count(&disconnects), 1);

        service.stop().await;
        let opens = remote.opens();

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_stopped_cleanly(&service).await;
        assert_eq!(remote.opens(), opens);
        assert_eq!(remote.pings(), 0);
        assert_eq!(count(&disconnects), 1);

        remote.delay_open(None);
        service.start().await.unwrap();
        settle().await;
        assert_eq!(service.state().await, ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn callback_failures_do_not_disturb_the_stream() {
        let (service, remote) = service();
        service.on_status(|_| Err("consumer bug".into()));

        service.start().await.unwrap();
        settle().await;
        remote.message(STATUS);
        settle().await;

        assert_eq!(service.state().await, ConnectionState::Connected);
    }
}
