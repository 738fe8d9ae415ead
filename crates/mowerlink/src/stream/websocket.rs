//! Websocket transport for the vendor event stream.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode, header};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, trace, warn};

use super::transport::{StreamTransport, TransportSignals};
use crate::credentials::Credential;
use crate::error::{MowerError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// [`StreamTransport`] over a websocket authenticated with a bearer header.
pub struct WebSocketTransport {
    url: String,
    writer: Option<SplitSink<WsStream, Message>>,
    reader: Option<JoinHandle<()>>,
    connected: Arc<AtomicBool>,
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            writer: None,
            reader: None,
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn teardown(&mut self) {
        self.connected.store(false, Ordering::SeqCst);
        self.writer = None;
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

/// Map a failed handshake, treating 401/403 as a rejected credential.
fn classify_connect_error(err: tokio_tungstenite::tungstenite::Error) -> MowerError {
    use tokio_tungstenite::tungstenite::Error;

    match &err {
        Error::Http(response)
            if matches!(
                response.status(),
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
            ) =>
        {
            MowerError::NotAuthorized
        }
        _ => MowerError::from(err),
    }
}

#[async_trait]
impl StreamTransport for WebSocketTransport {
    async fn open(&mut self, credential: &Credential, signals: TransportSignals) -> Result<()> {
        self.teardown();
        crate::tls::install_rustls_provider();

        let mut request = self.url.as_str().into_client_request()?;
        let bearer = HeaderValue::from_str(&credential.bearer())
            .map_err(|e| MowerError::transport(format!("invalid authorization header: {e}")))?;
        request.headers_mut().insert(header::AUTHORIZATION, bearer);

        debug!(url = %self.url, generation = signals.generation(), "Opening event stream socket");
        let (stream, _) = connect_async(request)
            .await
            .map_err(classify_connect_error)?;
        info!(url = %self.url, "Event stream socket open");

        let (writer, mut reader) = stream.split();
        self.writer = Some(writer);
        self.connected.store(true, Ordering::SeqCst);

        let connected = Arc::clone(&self.connected);
        let task_signals = signals.clone();
        self.reader = Some(tokio::spawn(async move {
            while let Some(message) = reader.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        task_signals.message(text.as_str());
                    }
                    Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => {
                            task_signals.message(text);
                        }
                        Err(e) => {
                            task_signals.error(format!("non UTF-8 binary frame: {e}"));
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        debug!(?frame, "Server closed event stream");
                        break;
                    }
                    Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => trace!("Control frame"),
                    Ok(Message::Frame(_)) => {}
                    Err(e) => {
                        task_signals.error(e.to_string());
                        break;
                    }
                }
            }
            connected.store(false, Ordering::SeqCst);
            task_signals.closed();
        }));

        signals.opened();
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let result = match self.writer.as_mut() {
            Some(writer) => writer.close().await.map_err(MowerError::from),
            None => Ok(()),
        };
        self.teardown();
        result
    }

    async fn ping(&mut self) -> Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(MowerError::transport("socket is not open"));
        };
        writer.send(Message::Ping(Default::default())).await?;
        trace!("Sent keep-alive ping");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}
