//! New-heads push subscription over WebSocket.
//!
//! The subscription endpoint is derived from the HTTP RPC endpoint by a
//! deterministic scheme rewrite (`http(s)://…/rpc` → `ws(s)://…/ws`), so a
//! deployment configures exactly one URL. [`NewHeadsSubscription`] wraps a
//! single socket session; reconnect policy belongs to the caller, which
//! knows its cadence (the head tracker sleeps 5 s between attempts).

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, trace};

use crate::client::parse_quantity;
use crate::error::{Result, RpcError};

// ═══════════════════════════════════════════════════════════════════════════════
// ENDPOINT DERIVATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Derive the WebSocket subscription URL from an HTTP RPC URL.
///
/// `http(s)://host/rpc` becomes `ws(s)://host/ws`. URLs that do not end in
/// `/rpc` get `/ws` appended after the scheme swap, keeping the transform
/// one-to-one. `ws`/`wss` inputs pass through with the same path handling.
///
/// # Errors
///
/// Returns [`RpcError::InvalidConfig`] for URLs without a scheme or with a
/// non-HTTP(S) scheme.
pub fn derive_ws_url(rpc_url: &str) -> Result<String> {
    let (scheme, rest) = rpc_url
        .split_once("://")
        .ok_or_else(|| RpcError::InvalidConfig(format!("RPC URL missing scheme: {rpc_url}")))?;

    let ws_scheme = match scheme {
        "http" => "ws",
        "https" => "wss",
        "ws" | "wss" => scheme,
        other => {
            return Err(RpcError::InvalidConfig(format!(
                "unsupported RPC URL scheme: {other}"
            )));
        }
    };

    let rest = rest.strip_suffix('/').unwrap_or(rest);
    let path = rest
        .strip_suffix("/rpc")
        .map_or_else(|| format!("{rest}/ws"), |base| format!("{base}/ws"));

    Ok(format!("{ws_scheme}://{path}"))
}

// ═══════════════════════════════════════════════════════════════════════════════
// NEW-HEADS SUBSCRIPTION
// ═══════════════════════════════════════════════════════════════════════════════

/// Wire shape of messages arriving on a new-heads subscription.
#[derive(Debug, Deserialize)]
struct SubscriptionMessage {
    #[serde(default)]
    params: Option<SubscriptionParams>,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<crate::error::RpcErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionParams {
    result: NewHead,
}

#[derive(Debug, Deserialize)]
struct NewHead {
    number: String,
}

/// An open new-heads subscription session.
///
/// One session maps to one socket. Any error is terminal for the session;
/// callers drop it and connect a fresh one.
pub struct NewHeadsSubscription {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl std::fmt::Debug for NewHeadsSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewHeadsSubscription").finish_non_exhaustive()
    }
}

impl NewHeadsSubscription {
    /// Connect and subscribe to the new-heads topic.
    ///
    /// Sends the standard `eth_subscribe`/`newHeads` request and waits for
    /// the confirmation before returning.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Subscription`] if the socket cannot be opened or
    /// the server rejects the subscription.
    pub async fn connect(ws_url: &str) -> Result<Self> {
        let (mut stream, _) = connect_async(ws_url)
            .await
            .map_err(|e| RpcError::Subscription(format!("connect {ws_url}: {e}")))?;

        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_subscribe",
            "params": ["newHeads"],
        });
        stream
            .send(Message::Text(request.to_string().into()))
            .await
            .map_err(|e| RpcError::Subscription(format!("subscribe request: {e}")))?;

        // The confirmation carries a `result` (the subscription id); anything
        // with an `error` field is a rejection.
        loop {
            match stream.next().await {
                None => {
                    return Err(RpcError::Subscription(
                        "socket closed before subscription confirmation".into(),
                    ));
                }
                Some(Err(e)) => {
                    return Err(RpcError::Subscription(format!("confirmation read: {e}")));
                }
                Some(Ok(Message::Text(text))) => {
                    let message: SubscriptionMessage = serde_json::from_str(&text)
                        .map_err(|e| RpcError::Subscription(format!("confirmation parse: {e}")))?;
                    if let Some(error) = message.error {
                        return Err(RpcError::Subscription(error.to_string()));
                    }
                    if message.result.is_some() {
                        debug!(ws_url, "new-heads subscription confirmed");
                        return Ok(Self { stream });
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    stream
                        .send(Message::Pong(payload))
                        .await
                        .map_err(|e| RpcError::Subscription(format!("pong: {e}")))?;
                }
                Some(Ok(_)) => {}
            }
        }
    }

    /// Wait for the next head and return its block number.
    ///
    /// Messages that are not head notifications are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Subscription`] on socket errors or close, and
    /// [`RpcError::InvalidResponse`] for heads with malformed numbers.
    pub async fn next_head(&mut self) -> Result<u64> {
        loop {
            match self.stream.next().await {
                None => return Err(RpcError::Subscription("head stream ended".into())),
                Some(Err(e)) => return Err(RpcError::Subscription(format!("head read: {e}"))),
                Some(Ok(Message::Text(text))) => {
                    if let Some(number) = parse_new_head(&text)? {
                        trace!(number, "received head");
                        return Ok(number);
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    self.stream
                        .send(Message::Pong(payload))
                        .await
                        .map_err(|e| RpcError::Subscription(format!("pong: {e}")))?;
                }
                Some(Ok(Message::Close(_))) => {
                    return Err(RpcError::Subscription("server closed subscription".into()));
                }
                Some(Ok(_)) => {}
            }
        }
    }

    /// Close the subscription socket.
    pub async fn close(mut self) {
        let _ = self.stream.close(None).await;
    }
}

/// Extract the block number from a head notification, or `None` for other
/// subscription traffic.
fn parse_new_head(text: &str) -> Result<Option<u64>> {
    let message: SubscriptionMessage = serde_json::from_str(text)
        .map_err(|e| RpcError::Subscription(format!("notification parse: {e}")))?;

    match message.params {
        Some(params) => parse_quantity(&params.result.number).map(Some),
        None => Ok(None),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
