//! Live log subscription over WebSocket (`eth_subscribe("logs")`).
//!
//! Each subscription owns one connection. A background task pumps
//! notifications into a channel; the returned stream reads from it. When the
//! stream is dropped the task sends `eth_unsubscribe` and closes the socket.
//! There is no transparent reconnect: a lost connection ends the stream and
//! the controller catches up through backfill.

use std::time::Duration;

use alloy_primitives::Address;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use transferindex_core::error::IndexerError;
use transferindex_core::source::LogSubscription;
use transferindex_core::types::{address_to_string, ChainLog};

use crate::fetcher::RawLog;
use crate::rpc::{JsonRpcRequest, JsonRpcResponse};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type LogSender = mpsc::UnboundedSender<Result<ChainLog, IndexerError>>;

const SUBSCRIBE_ID: u64 = 1;
const UNSUBSCRIBE_ID: u64 = 2;

/// Open a connection and subscribe to logs emitted by `contract`.
///
/// Logs below `from_block` are dropped before reaching the stream.
pub async fn subscribe_logs(
    ws_url: &str,
    from_block: u64,
    contract: Address,
    handshake_timeout: Duration,
) -> Result<LogSubscription, IndexerError> {
    let handshake = async {
        let (ws, _) = tokio_tungstenite::connect_async(ws_url)
            .await
            .map_err(|e| IndexerError::Rpc(format!("WS connect to {ws_url}: {e}")))?;
        let (mut sink, mut stream) = ws.split();

        let req = JsonRpcRequest::new(
            SUBSCRIBE_ID,
            "eth_subscribe",
            vec![json!("logs"), json!({ "address": address_to_string(&contract) })],
        );
        send_json(&mut sink, &req).await?;
        let sub_id = await_subscription_id(&mut sink, &mut stream).await?;
        Ok::<_, IndexerError>((sink, stream, sub_id))
    };

    let (sink, stream, sub_id) = tokio::time::timeout(handshake_timeout, handshake)
        .await
        .map_err(|_| IndexerError::Rpc(format!("WS subscribe to {ws_url} timed out")))??;

    tracing::info!(subscription = %sub_id, from_block, "log subscription active");

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(pump(sink, stream, sub_id, from_block, tx));

    Ok(Box::pin(futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    })))
}

async fn send_json(
    sink: &mut SplitSink<WsStream, Message>,
    req: &JsonRpcRequest,
) -> Result<(), IndexerError> {
    let text = serde_json::to_string(req).map_err(|e| IndexerError::Other(e.to_string()))?;
    sink.send(Message::Text(text.into()))
        .await
        .map_err(|e| IndexerError::Rpc(format!("WS send: {e}")))
}

/// Wait for the `eth_subscribe` response and return the subscription id.
async fn await_subscription_id(
    sink: &mut SplitSink<WsStream, Message>,
    stream: &mut SplitStream<WsStream>,
) -> Result<String, IndexerError> {
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                let Ok(resp) = serde_json::from_str::<JsonRpcResponse>(&text) else {
                    continue;
                };
                if resp.id != Some(SUBSCRIBE_ID) {
                    continue;
                }
                let result = resp
                    .into_result()
                    .map_err(|e| IndexerError::Rpc(format!("eth_subscribe: {e}")))?;
                return result
                    .as_str()
                    .map(str::to_string)
                    .ok_or_else(|| IndexerError::Rpc(format!("eth_subscribe returned {result}")));
            }
            Some(Ok(Message::Ping(payload))) => {
                sink.send(Message::Pong(payload))
                    .await
                    .map_err(|e| IndexerError::Rpc(format!("WS send: {e}")))?;
            }
            Some(Ok(Message::Close(_))) | None => {
                return Err(IndexerError::Rpc("WS closed before subscription was confirmed".into()))
            }
            Some(Err(e)) => return Err(IndexerError::Rpc(format!("WS receive: {e}"))),
            Some(Ok(_)) => {}
        }
    }
}

/// Forward notifications until the socket dies or the receiver goes away.
async fn pump(
    mut sink: SplitSink<WsStream, Message>,
    mut stream: SplitStream<WsStream>,
    sub_id: String,
    from_block: u64,
    tx: LogSender,
) {
    let reason = loop {
        tokio::select! {
            _ = tx.closed() => {
                let req = JsonRpcRequest::new(UNSUBSCRIBE_ID, "eth_unsubscribe", vec![json!(sub_id)]);
                let _ = send_json(&mut sink, &req).await;
                let _ = sink.close().await;
                tracing::debug!(subscription = %sub_id, "log subscription released");
                return;
            }
            msg = stream.next() => match msg {
                None => break "connection closed".to_string(),
                Some(Err(e)) => break format!("WS receive: {e}"),
                Some(Ok(Message::Close(frame))) => break format!("closed by server: {frame:?}"),
                Some(Ok(Message::Ping(payload))) => {
                    if let Err(e) = sink.send(Message::Pong(payload)).await {
                        break format!("WS send: {e}");
                    }
                }
                Some(Ok(Message::Text(text))) => match parse_notification(&text, &sub_id) {
                    Some(Ok(log)) if log.block_number < from_block => {
                        tracing::trace!(block = log.block_number, "dropping log below subscription start");
                    }
                    Some(Ok(log)) => {
                        if tx.send(Ok(log)).is_err() {
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "unparseable log notification");
                    }
                    None => {}
                },
                Some(Ok(_)) => {}
            }
        }
    };

    tracing::warn!(subscription = %sub_id, %reason, "log subscription terminated");
    let _ = tx.send(Err(IndexerError::SubscriptionTerminated(reason)));
}

/// Extract a log from an `eth_subscription` notification for `sub_id`.
/// Returns `None` for any other message.
fn parse_notification(text: &str, sub_id: &str) -> Option<Result<ChainLog, IndexerError>> {
    let val: Value = serde_json::from_str(text).ok()?;
    if val.get("method").and_then(Value::as_str) != Some("eth_subscription") {
        return None;
    }
    let params = val.get("params")?;
    if params.get("subscription").and_then(Value::as_str) != Some(sub_id) {
        return None;
    }
    let raw = serde_json::from_value::<RawLog>(params.get("result")?.clone())
        .map_err(|e| IndexerError::Rpc(format!("bad log payload: {e}")));
    Some(raw.and_then(ChainLog::try_from))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notification(sub: &str, block: &str) -> String {
        json!({
            "jsonrpc": "2.0",
            "method": "eth_subscription",
            "params": {
                "subscription": sub,
                "result": {
                    "address": "0xdac17f958d2ee523a2206206994597c13d831ec7",
                    "topics": [],
                    "data": "0x",
                    "blockNumber": block,
                    "blockHash": "0x1111111111111111111111111111111111111111111111111111111111111111",
                    "transactionHash": "0x2222222222222222222222222222222222222222222222222222222222222222",
                    "logIndex": "0x0",
                    "removed": false
                }
            }
        })
        .to_string()
    }

    #[test]
    fn parses_matching_notification() {
        let log = parse_notification(&notification("0xabc", "0x64"), "0xabc")
            .unwrap()
            .unwrap();
        assert_eq!(log.block_number, 100);
    }

    #[test]
    fn ignores_other_subscriptions_and_responses() {
        assert!(parse_notification(&notification("0xdef", "0x64"), "0xabc").is_none());
        assert!(parse_notification(r#"{"jsonrpc":"2.0","id":2,"result":true}"#, "0xabc").is_none());
        assert!(parse_notification("not json", "0xabc").is_none());
    }

    #[test]
    fn malformed_payload_is_an_error() {
        let text = json!({
            "jsonrpc": "2.0",
            "method": "eth_subscription",
            "params": { "subscription": "0xabc", "result": { "address": 5 } }
        })
        .to_string();
        assert!(matches!(parse_notification(&text, "0xabc"), Some(Err(_))));
    }

    #[tokio::test]
    async fn handshake_answers_ping_and_releases_on_drop() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let subscribe = ws.next().await.unwrap().unwrap();
            assert!(subscribe.to_text().unwrap().contains("eth_subscribe"));

            ws.send(Message::Ping(vec![7])).await.unwrap();
            assert!(matches!(ws.next().await, Some(Ok(Message::Pong(_)))));

            let confirm = json!({ "jsonrpc": "2.0", "id": 1, "result": "0xabc" }).to_string();
            ws.send(Message::Text(confirm)).await.unwrap();
            ws.send(Message::Text(notification("0xabc", "0x63"))).await.unwrap();
            ws.send(Message::Text(notification("0xabc", "0x64"))).await.unwrap();

            loop {
                match ws.next().await {
                    Some(Ok(Message::Text(text))) if text.contains("eth_unsubscribe") => return true,
                    Some(Ok(_)) => {}
                    _ => return false,
                }
            }
        });

        let mut logs = subscribe_logs(
            &format!("ws://{addr}"),
            100,
            Address::ZERO,
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        let first = logs.next().await.unwrap().unwrap();
        assert_eq!(first.block_number, 100);

        drop(logs);
        let released = tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
        assert!(released);
    }
}
