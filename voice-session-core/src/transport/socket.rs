use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::models::audio_models::CaptureChunk;
use crate::models::config::SessionConfig;
use crate::models::error::SessionError;
use crate::models::state::ConnectionStatus;
use crate::traits::transport::{SendOutcome, Transport};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Raw WebSocket transport: one binary frame per chunk, no framing.
///
/// Sends while not connected are dropped, never queued.
pub struct SocketTransport {
    url: String,
    connect_timeout: Duration,
    status: Arc<watch::Sender<ConnectionStatus>>,
    sink: tokio::sync::Mutex<Option<WsSink>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    acks: Arc<AtomicU64>,
}

impl SocketTransport {
    pub fn new(url: impl Into<String>, connect_timeout: Duration) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            url: url.into(),
            connect_timeout,
            status: Arc::new(status),
            sink: tokio::sync::Mutex::new(None),
            reader: Mutex::new(None),
            acks: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.stream_url(), config.connect_timeout())
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Text acknowledgements received from the server so far.
    pub fn acks_received(&self) -> u64 {
        self.acks.load(Ordering::SeqCst)
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.status.send_replace(status);
    }

    fn fail(&self, error: SessionError) -> SessionError {
        log::error!("socket {}: {}", self.url, error);
        self.set_status(ConnectionStatus::Error);
        error
    }
}

#[async_trait]
impl Transport for SocketTransport {
    fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    async fn connect(&self) -> Result<(), SessionError> {
        let mut sink = self.sink.lock().await;
        if sink.is_some() && self.status().is_connected() {
            return Ok(());
        }

        self.set_status(ConnectionStatus::Connecting);
        log::info!("connecting to {}", self.url);
        let stream = match tokio::time::timeout(self.connect_timeout, tokio_tungstenite::connect_async(self.url.as_str())).await {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(e)) => return Err(self.fail(e.into())),
            Err(_) => return Err(self.fail(SessionError::Timeout)),
        };

        let (write, mut read) = stream.split();
        *sink = Some(write);

        let status = Arc::clone(&self.status);
        let acks = Arc::clone(&self.acks);
        let reader = tokio::spawn(async move {
            while let Some(message) = read.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        acks.fetch_add(1, Ordering::SeqCst);
                        log::debug!("server: {}", text);
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        log::warn!("socket read failed: {}", e);
                        status.send_replace(ConnectionStatus::Error);
                        return;
                    }
                }
            }
            log::info!("socket closed by server");
            status.send_replace(ConnectionStatus::Disconnected);
        });
        if let Some(previous) = self.reader.lock().replace(reader) {
            previous.abort();
        }

        self.set_status(ConnectionStatus::Connected);
        log::info!("connected to {}", self.url);
        Ok(())
    }

    async fn send(&self, chunk: &CaptureChunk) -> Result<SendOutcome, SessionError> {
        if !self.status().is_connected() {
            return Ok(SendOutcome::Dropped);
        }
        let mut guard = self.sink.lock().await;
        let Some(sink) = guard.as_mut() else {
            return Ok(SendOutcome::Dropped);
        };
        if let Err(e) = sink.send(Message::Binary(chunk.bytes.to_vec())).await {
            guard.take();
            return Err(self.fail(e.into()));
        }
        Ok(SendOutcome::Delivered)
    }

    async fn close(&self) {
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        let sink = self.sink.lock().await.take();
        if let Some(mut sink) = sink {
            if let Err(e) = sink.close().await {
                log::debug!("socket close: {}", e);
            }
            log::info!("socket {} closed", self.url);
        }
        if self.status() != ConnectionStatus::Disconnected {
            self.set_status(ConnectionStatus::Disconnected);
        }
    }
}

impl Drop for SocketTransport {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.get_mut().take() {
            reader.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_before_connect_is_dropped() {
        let transport = SocketTransport::new("ws://127.0.0.1:9/ws", Duration::from_secs(1));
        let chunk = CaptureChunk::new(0, vec![1, 2, 3]);
        assert_eq!(transport.send(&chunk).await.unwrap(), SendOutcome::Dropped);
    }

    #[tokio::test]
    async fn refused_connect_reports_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = SocketTransport::new(format!("ws://{}/ws", addr), Duration::from_secs(2));
        let mut status = transport.watch_status();
        assert!(matches!(transport.connect().await, Err(SessionError::TransportError(_))));
        assert_eq!(*status.borrow_and_update(), ConnectionStatus::Error);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let transport = SocketTransport::new("ws://127.0.0.1:9/ws", Duration::from_secs(1));
        transport.close().await;
        transport.close().await;
        assert_eq!(transport.status(), ConnectionStatus::Disconnected);
    }
}
