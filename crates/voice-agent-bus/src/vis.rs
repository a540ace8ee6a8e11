//! VISS v2 (W3C Vehicle Information Service) client over WebSocket.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, trace};

use crate::client::{BusError, ServerInfo, SignalBusClient};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const VISS_PROTOCOL: &str = "VISS v2";

/// Signal bus client speaking VISS v2 JSON over a WebSocket.
pub struct VisClient {
    url: String,
    token: Option<String>,
    ws: Option<WsStream>,
    next_request: u64,
}

impl VisClient {
    pub fn new(url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            url: url.into(),
            token,
            ws: None,
            next_request: 1,
        }
    }

    /// Send one request and wait for the response with the same `requestId`.
    /// Unrelated frames (subscription notifications) are skipped.
    async fn request(&mut self, mut body: Value) -> Result<Value, BusError> {
        let request_id = self.next_request.to_string();
        self.next_request += 1;
        body["requestId"] = Value::String(request_id.clone());

        let Some(ws) = self.ws.as_mut() else {
            return Err(BusError::Connection("not connected".into()));
        };

        trace!(%body, "viss request");
        if let Err(e) = ws.send(Message::Text(body.to_string().into())).await {
            self.ws = None;
            return Err(BusError::Connection(e.to_string()));
        }

        loop {
            let msg = match ws.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => {
                    self.ws = None;
                    return Err(BusError::Connection(e.to_string()));
                }
                None => {
                    self.ws = None;
                    return Err(BusError::Connection("connection closed".into()));
                }
            };
            match msg {
                Message::Text(text) => {
                    let resp: Value = serde_json::from_str(text.as_str())
                        .map_err(|e| BusError::Rejected(format!("malformed response: {e}")))?;
                    if resp.get("requestId").and_then(Value::as_str) == Some(request_id.as_str()) {
                        trace!(%resp, "viss response");
                        return Ok(resp);
                    }
                }
                Message::Close(_) => {
                    self.ws = None;
                    return Err(BusError::Connection("connection closed by server".into()));
                }
                _ => {}
            }
        }
    }
}

/// Error number of a VISS error response, if any.
fn error_number(resp: &Value) -> Option<u64> {
    let err = resp.get("error")?;
    match err.get("number") {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.parse().ok(),
        _ => Some(0),
    }
}

fn error_text(resp: &Value) -> String {
    resp.get("error")
        .and_then(|e| e.get("message").or_else(|| e.get("reason")))
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_string()
}

#[async_trait]
impl SignalBusClient for VisClient {
    async fn connect(&mut self) -> Result<(), BusError> {
        let (ws, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| BusError::Connection(e.to_string()))?;
        self.ws = Some(ws);
        debug!(url = %self.url, "viss websocket open");

        if let Some(token) = self.token.clone() {
            let resp = self
                .request(json!({ "action": "authorize", "tokens": token }))
                .await?;
            if error_number(&resp).is_some() {
                self.ws = None;
                return Err(BusError::Connection(format!(
                    "authorization failed: {}",
                    error_text(&resp)
                )));
            }
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), BusError> {
        if let Some(mut ws) = self.ws.take() {
            ws.close(None)
                .await
                .map_err(|e| BusError::Connection(e.to_string()))?;
        }
        Ok(())
    }

    async fn read(&mut self, path: &str) -> Result<Option<String>, BusError> {
        let resp = self.request(json!({ "action": "get", "path": path })).await?;
        match error_number(&resp) {
            Some(404) => return Ok(None),
            Some(_) => return Err(BusError::Rejected(error_text(&resp))),
            None => {}
        }
        let value = &resp["data"]["dp"]["value"];
        Ok(match value {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        })
    }

    async fn write(&mut self, path: &str, value: &str) -> Result<(), BusError> {
        let resp = self
            .request(json!({ "action": "set", "path": path, "value": value }))
            .await?;
        match error_number(&resp) {
            Some(_) => Err(BusError::Rejected(error_text(&resp))),
            None => Ok(()),
        }
    }

    /// VISS v2 has no server identity request; report the dialed URL.
    async fn server_info(&mut self) -> Result<ServerInfo, BusError> {
        if self.ws.is_none() {
            return Err(BusError::Connection("not connected".into()));
        }
        Ok(ServerInfo {
            endpoint: self.url.clone(),
            protocol: VISS_PROTOCOL.into(),
        })
    }
}
