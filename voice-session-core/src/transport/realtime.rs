use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::models::config::{AgentDescriptor, SessionConfig};
use crate::models::error::SessionError;
use crate::traits::realtime::{AgentEvent, RealtimeConnector, RealtimeLink};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Realtime agent over WebSocket.
///
/// Wire protocol:
/// - handshake carries `Authorization: Bearer <credential>` and `?model=`
/// - first client frame is a text `session.update` with the descriptor
/// - client audio goes out as binary frames
/// - binary frames from the server are reply audio
/// - text `{"type":"reply.end"}` ends a reply, `{"type":"error","message":..}` fails the link
#[derive(Debug, Clone)]
pub struct WsRealtimeConnector {
    url: String,
    handshake_timeout: Duration,
}

impl WsRealtimeConnector {
    pub fn new(url: impl Into<String>, handshake_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            handshake_timeout,
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.agent_url.clone(), config.connect_timeout())
    }
}

#[async_trait]
impl RealtimeConnector for WsRealtimeConnector {
    async fn connect(
        &self,
        descriptor: &AgentDescriptor,
        credential: &str,
        events: mpsc::UnboundedSender<AgentEvent>,
    ) -> Result<Box<dyn RealtimeLink>, SessionError> {
        let mut url = Url::parse(&self.url)
            .map_err(|e| SessionError::ConfigurationFailed(format!("invalid agent url {}: {}", self.url, e)))?;
        url.query_pairs_mut().append_pair("model", &descriptor.model);

        let mut request = url.as_str().into_client_request()?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", credential))
            .map_err(|_| SessionError::CredentialFetchError("credential is not a valid header value".into()))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (stream, _) = tokio::time::timeout(self.handshake_timeout, tokio_tungstenite::connect_async(request))
            .await
            .map_err(|_| SessionError::Timeout)??;
        let (mut sink, read) = stream.split();

        let update = json!({
            "type": "session.update",
            "session": {
                "name": descriptor.name,
                "instructions": descriptor.instructions,
                "model": descriptor.model,
            }
        });
        sink.send(Message::Text(update.to_string())).await?;
        log::info!("realtime link open to {}", self.url);

        let reader = tokio::spawn(read_events(read, events));
        Ok(Box::new(WsLink {
            sink: tokio::sync::Mutex::new(Some(sink)),
            reader,
        }))
    }
}

async fn read_events(
    mut read: futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>,
    events: mpsc::UnboundedSender<AgentEvent>,
) {
    while let Some(message) = read.next().await {
        let event = match message {
            Ok(Message::Binary(audio)) => AgentEvent::AudioReply(audio),
            Ok(Message::Text(text)) => match parse_control(&text) {
                Some(event) => event,
                None => continue,
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                let _ = events.send(AgentEvent::Failed(e.to_string()));
                return;
            }
        };
        if events.send(event).is_err() {
            return;
        }
    }
    let _ = events.send(AgentEvent::Closed);
}

fn parse_control(text: &str) -> Option<AgentEvent> {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            log::debug!("ignoring non-JSON agent message: {}", e);
            return None;
        }
    };
    match value.get("type").and_then(Value::as_str) {
        Some("reply.end") => Some(AgentEvent::ReplyEnd),
        Some("error") => {
            let message = value.get("message").and_then(Value::as_str).unwrap_or("agent error");
            Some(AgentEvent::Failed(message.to_owned()))
        }
        other => {
            log::trace!("agent message {:?}", other);
            None
        }
    }
}

struct WsLink {
    sink: tokio::sync::Mutex<Option<WsSink>>,
    reader: JoinHandle<()>,
}

#[async_trait]
impl RealtimeLink for WsLink {
    async fn send_audio(&self, bytes: &[u8]) -> Result<(), SessionError> {
        let mut guard = self.sink.lock().await;
        let sink = guard
            .as_mut()
            .ok_or_else(|| SessionError::TransportError("realtime link closed".into()))?;
        sink.send(Message::Binary(bytes.to_vec())).await?;
        Ok(())
    }

    async fn close(&self) {
        self.reader.abort();
        if let Some(mut sink) = self.sink.lock().await.take() {
            let _ = sink.close().await;
        }
    }
}

impl Drop for WsLink {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

    #[test]
    fn control_messages() {
        assert_eq!(parse_control(r#"{"type":"reply.end"}"#), Some(AgentEvent::ReplyEnd));
        assert_eq!(
            parse_control(r#"{"type":"error","message":"quota"}"#),
            Some(AgentEvent::Failed("quota".into()))
        );
        assert_eq!(parse_control(r#"{"type":"session.created"}"#), None);
        assert_eq!(parse_control("not json"), None);
    }

    #[tokio::test]
    async fn link_carries_audio_both_ways() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/v1/agent/realtime", listener.local_addr().unwrap());

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut auth = String::new();
            let mut query = String::new();
            let mut ws = tokio_tungstenite::accept_hdr_async(tcp, |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                auth = req.headers()[AUTHORIZATION].to_str().unwrap().to_string();
                query = req.uri().query().unwrap_or_default().to_string();
                Ok(resp)
            })
            .await
            .unwrap();

            let update = ws.next().await.unwrap().unwrap();
            let audio = ws.next().await.unwrap().unwrap();
            ws.send(Message::Binary(vec![7, 7])).await.unwrap();
            ws.send(Message::Text(r#"{"type":"reply.end"}"#.into())).await.unwrap();
            ws.close(None).await.unwrap();
            (auth, query, update, audio)
        });

        let descriptor = SessionConfig::default().agent_descriptor();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let connector = WsRealtimeConnector::new(url, Duration::from_secs(5));
        let link = connector.connect(&descriptor, "ek_1", tx).await.unwrap();
        link.send_audio(&[1, 2, 3]).await.unwrap();

        assert_eq!(rx.recv().await, Some(AgentEvent::AudioReply(vec![7, 7])));
        assert_eq!(rx.recv().await, Some(AgentEvent::ReplyEnd));
        assert_eq!(rx.recv().await, Some(AgentEvent::Closed));

        let (auth, query, update, audio) = server.await.unwrap();
        assert_eq!(auth, "Bearer ek_1");
        assert!(query.starts_with("model="));
        assert!(update.to_text().unwrap().contains("session.update"));
        assert_eq!(audio, Message::Binary(vec![1, 2, 3]));
        link.close().await;
    }
}
