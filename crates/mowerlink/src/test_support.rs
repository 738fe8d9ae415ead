//! Fakes shared by unit tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

use crate::config::AuthSettings;
use crate::credentials::{Authenticator, Credential, IssuedToken};
use crate::error::{MowerError, Result};
use crate::stream::{StreamTransport, TransportSignals};

/// Authenticator that counts calls and serves scripted tokens.
pub(crate) struct FakeAuthenticator {
    pub authenticate_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub logout_calls: AtomicUsize,
    expires_in: Option<u64>,
    tokens: Mutex<VecDeque<String>>,
    failure: Mutex<Option<fn() -> MowerError>>,
    logout_fails: AtomicBool,
}

impl FakeAuthenticator {
    pub fn with_expiry(expires_in: Option<u64>) -> Self {
        Self {
            authenticate_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
            expires_in,
            tokens: Mutex::new(VecDeque::new()),
            failure: Mutex::new(None),
            logout_fails: AtomicBool::new(false),
        }
    }

    /// Queue the access token returned by the next authenticate/refresh call.
    pub fn push_token(&self, token: &str) {
        self.tokens.lock().push_back(token.to_string());
    }

    /// Make authenticate and refresh fail until [`succeed`](Self::succeed) is called.
    pub fn fail_with(&self, failure: fn() -> MowerError) {
        *self.failure.lock() = Some(failure);
    }

    pub fn succeed(&self) {
        *self.failure.lock() = None;
    }

    pub fn fail_logout(&self) {
        self.logout_fails.store(true, Ordering::SeqCst);
    }

    pub fn total_calls(&self) -> usize {
        self.authenticate_calls.load(Ordering::SeqCst)
            + self.refresh_calls.load(Ordering::SeqCst)
            + self.logout_calls.load(Ordering::SeqCst)
    }

    fn issue(&self) -> Result<IssuedToken> {
        if let Some(failure) = *self.failure.lock() {
            return Err(failure());
        }
        let calls = self.authenticate_calls.load(Ordering::SeqCst)
            + self.refresh_calls.load(Ordering::SeqCst);
        let token = self
            .tokens
            .lock()
            .pop_front()
            .unwrap_or_else(|| format!("token-{calls}"));
        Ok(IssuedToken::new(token, self.expires_in))
    }
}

#[async_trait]
impl Authenticator for FakeAuthenticator {
    async fn authenticate(&self, _settings: &AuthSettings) -> Result<IssuedToken> {
        self.authenticate_calls.fetch_add(1, Ordering::SeqCst);
        self.issue()
    }

    async fn refresh(
        &self,
        _settings: &AuthSettings,
        _credential: &Credential,
    ) -> Result<IssuedToken> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.issue()
    }

    async fn logout(&self, _credential: &Credential) -> Result<()> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        if self.logout_fails.load(Ordering::SeqCst) {
            return Err(MowerError::unexpected("logout.failed", "server unavailable"));
        }
        Ok(())
    }
}

/// Tracing layer counting events per level.
#[derive(Clone, Default)]
pub(crate) struct LevelCounter {
    errors: Arc<AtomicUsize>,
    warnings: Arc<AtomicUsize>,
}

impl LevelCounter {
    pub fn errors(&self) -> usize {
        self.errors.load(Ordering::SeqCst)
    }

    pub fn warnings(&self) -> usize {
        self.warnings.load(Ordering::SeqCst)
    }
}

impl<S: Subscriber> Layer<S> for LevelCounter {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        match *event.metadata().level() {
            Level::ERROR => {
                self.errors.fetch_add(1, Ordering::SeqCst);
            }
            Level::WARN => {
                self.warnings.fetch_add(1, Ordering::SeqCst);
            }
            _ => {}
        }
    }
}

#[derive(Default)]
struct FakeState {
    opens: usize,
    closes: usize,
    pings: usize,
    connected: bool,
    open_failure: Option<fn() -> MowerError>,
    open_delay: Option<Duration>,
    tokens: Vec<String>,
    signals: Option<TransportSignals>,
}

/// Handle used by tests to drive and inspect a [`FakeTransport`].
#[derive(Clone, Default)]
pub(crate) struct TransportHandle(Arc<Mutex<FakeState>>);

impl TransportHandle {
    pub fn opens(&self) -> usize {
        self.0.lock().opens
    }

    pub fn closes(&self) -> usize {
        self.0.lock().closes
    }

    pub fn pings(&self) -> usize {
        self.0.lock().pings
    }

    /// Access tokens presented on each open, in order.
    pub fn tokens(&self) -> Vec<String> {
        self.0.lock().tokens.clone()
    }

    /// Make subsequent opens fail with the given error.
    pub fn fail_open(&self, failure: Option<fn() -> MowerError>) {
        self.0.lock().open_failure = failure;
    }

    /// Make subsequent opens take this long before the socket is up.
    pub fn delay_open(&self, delay: Option<Duration>) {
        self.0.lock().open_delay = delay;
    }

    /// Deliver a text frame on the current connection.
    pub fn message(&self, text: &str) {
        if let Some(signals) = self.0.lock().signals.as_ref() {
            signals.message(text);
        }
    }

    pub fn transport_error(&self, message: &str) {
        if let Some(signals) = self.0.lock().signals.as_ref() {
            signals.error(message);
        }
    }

    /// Simulate the server dropping the socket.
    pub fn drop_connection(&self) {
        let mut state = self.0.lock();
        state.connected = false;
        if let Some(signals) = state.signals.as_ref() {
            signals.closed();
        }
    }
}

/// In-memory transport. Closing emits a close signal like a real socket does.
pub(crate) struct FakeTransport {
    remote: TransportHandle,
}

impl FakeTransport {
    pub fn new() -> (Self, TransportHandle) {
        let remote = TransportHandle::default();
        (
            Self {
                remote: remote.clone(),
            },
            remote,
        )
    }
}

#[async_trait]
impl StreamTransport for FakeTransport {
    async fn open(&mut self, credential: &Credential, signals: TransportSignals) -> Result<()> {
        let delay = {
            let mut state = self.remote.0.lock();
            state.opens += 1;
            state.tokens.push(credential.access_token.clone());
            state.open_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.remote.0.lock();
        if let Some(failure) = state.open_failure {
            return Err(failure());
        }
        state.connected = true;
        signals.opened();
        state.signals = Some(signals);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let mut state = self.remote.0.lock();
        state.closes += 1;
        state.connected = false;
        if let Some(signals) = state.signals.as_ref() {
            signals.closed();
        }
        Ok(())
    }

    async fn ping(&mut self) -> Result<()> {
        let mut state = self.remote.0.lock();
        state.pings += 1;
        if state.connected {
            Ok(())
        } else {
            Err(MowerError::transport("socket is not open"))
        }
    }

    fn is_connected(&self) -> bool {
        self.remote.0.lock().connected
    }
}
