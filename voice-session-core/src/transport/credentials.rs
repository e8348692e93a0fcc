use std::time::Duration;

use serde_json::Value;

use crate::models::config::SessionConfig;
use crate::models::error::SessionError;

/// Fetches short-lived agent credentials from the backend.
///
/// `GET <backend>/v1/agent/client_key?model=<name>`; the body is either a
/// bare JSON string or an object carrying the key.
#[derive(Debug, Clone)]
pub struct CredentialClient {
    http: reqwest::Client,
    url: String,
}

impl CredentialClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, SessionError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SessionError::CredentialFetchError(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { http, url: url.into() })
    }

    pub fn from_config(config: &SessionConfig) -> Result<Self, SessionError> {
        Self::new(config.credential_url(), config.connect_timeout())
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn fetch(&self, model: &str) -> Result<String, SessionError> {
        let response = self
            .http
            .get(&self.url)
            .query(&[("model", model)])
            .send()
            .await
            .map_err(|e| SessionError::CredentialFetchError(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SessionError::CredentialFetchError(format!("backend returned {}", status)));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| SessionError::CredentialFetchError(format!("invalid response body: {}", e)))?;
        log::debug!("credential fetched for model '{}'", model);
        extract_key(&body).ok_or_else(|| SessionError::CredentialFetchError("response carries no credential".into()))
    }
}

fn extract_key(body: &Value) -> Option<String> {
    let key = match body {
        Value::String(key) => Some(key.as_str()),
        Value::Object(fields) => ["client_key", "key", "value"]
            .iter()
            .find_map(|name| fields.get(*name).and_then(Value::as_str))
            .or_else(|| body.pointer("/client_secret/value").and_then(Value::as_str)),
        _ => None,
    };
    key.filter(|k| !k.is_empty()).map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response and hand back the request line.
    async fn serve_once(status: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/v1/agent/client_key", listener.local_addr().unwrap());
        let task = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = socket.read(&mut buf).await.unwrap();
            let request = String::from_utf8_lossy(&buf[..n]).to_string();
            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            request.lines().next().unwrap_or_default().to_string()
        });
        (url, task)
    }

    #[test]
    fn key_shapes() {
        assert_eq!(extract_key(&json!("abc")), Some("abc".into()));
        assert_eq!(extract_key(&json!({"client_key": "k1"})), Some("k1".into()));
        assert_eq!(extract_key(&json!({"value": "k2"})), Some("k2".into()));
        assert_eq!(extract_key(&json!({"client_secret": {"value": "k3"}})), Some("k3".into()));
        assert_eq!(extract_key(&json!({"other": 1})), None);
        assert_eq!(extract_key(&json!("")), None);
    }

    #[tokio::test]
    async fn fetch_sends_model_query() {
        let (url, server) = serve_once("200 OK", r#"{"client_key":"ek_123"}"#).await;
        let client = CredentialClient::new(url, Duration::from_secs(5)).unwrap();

        assert_eq!(client.fetch("gpt-realtime").await.unwrap(), "ek_123");
        let request_line = server.await.unwrap();
        assert!(request_line.starts_with("GET /v1/agent/client_key?model=gpt-realtime "));
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let (url, _server) = serve_once("500 Internal Server Error", r#"{"detail":"boom"}"#).await;
        let client = CredentialClient::new(url, Duration::from_secs(5)).unwrap();

        let err = client.fetch("m").await.unwrap_err();
        assert!(matches!(err, SessionError::CredentialFetchError(_)));
    }

    #[tokio::test]
    async fn unreachable_backend_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/v1/agent/client_key", listener.local_addr().unwrap());
        drop(listener);

        let client = CredentialClient::new(url, Duration::from_secs(1)).unwrap();
        assert!(matches!(client.fetch("m").await, Err(SessionError::CredentialFetchError(_))));
    }
}
