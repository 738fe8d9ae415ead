//! Transport abstraction for the event stream.
//!
//! A transport owns one bidirectional socket at a time. It reports what happens
//! on the socket through [`TransportSignals`] instead of calling back into the
//! service, so the service can process signals on its own task and discard the
//! ones emitted by a connection it has already replaced.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::credentials::Credential;
use crate::error::Result;

/// Something that happened on the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportSignal {
    /// The socket finished its handshake.
    Open,
    /// A text frame arrived.
    Message(String),
    /// The socket reported an error. Informational only.
    Error(String),
    /// The socket is gone.
    Closed,
}

/// Signal tagged with the connection generation it was emitted for.
pub(crate) type TaggedSignal = (u64, TransportSignal);

/// Sending half handed to [`StreamTransport::open`].
///
/// Every signal is tagged with the generation of the connection attempt that
/// created this handle.
#[derive(Debug, Clone)]
pub struct TransportSignals {
    generation: u64,
    tx: mpsc::UnboundedSender<TaggedSignal>,
}

impl TransportSignals {
    pub(crate) fn new(generation: u64, tx: mpsc::UnboundedSender<TaggedSignal>) -> Self {
        Self { generation, tx }
    }

    /// Generation of the connection attempt this handle belongs to.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Forward a signal. Returns `false` once the service is gone.
    pub fn emit(&self, signal: TransportSignal) -> bool {
        self.tx.send((self.generation, signal)).is_ok()
    }

    pub fn opened(&self) -> bool {
        self.emit(TransportSignal::Open)
    }

    pub fn message(&self, text: impl Into<String>) -> bool {
        self.emit(TransportSignal::Message(text.into()))
    }

    pub fn error(&self, message: impl Into<String>) -> bool {
        self.emit(TransportSignal::Error(message.into()))
    }

    pub fn closed(&self) -> bool {
        self.emit(TransportSignal::Closed)
    }
}

/// Bidirectional socket used by the stream service.
#[async_trait]
pub trait StreamTransport: Send + Sync + 'static {
    /// Open a new socket authenticated with `credential`.
    ///
    /// Implementations emit [`TransportSignal::Open`] once the socket is usable
    /// and [`TransportSignal::Closed`] when it goes away.
    async fn open(&mut self, credential: &Credential, signals: TransportSignals) -> Result<()>;

    /// Close the current socket.
    async fn close(&mut self) -> Result<()>;

    /// Send a keep-alive ping.
    async fn ping(&mut self) -> Result<()>;

    /// Whether a socket is currently open.
    fn is_connected(&self) -> bool;
}
