//! Levy push: subscribe to the ticket hub and turn its frames into `PushMessage`s.
//!
//! The hub streams one JSON frame per line (optionally `data:`-prefixed, or
//! terminated by the 0x1e record separator). Two frame shapes are accepted:
//! `{"event": "TicketAdded", "data": {...}}` and the invocation form
//! `{"type": 1, "target": "TicketAdded", "arguments": [{...}]}`.

#![forbid(unsafe_code)]

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use futures::StreamExt;
use levy_core::push::{TICKET_ADDED, TICKET_REMOVED, TICKET_UPDATED};
use levy_core::{LinkEvent, LinkState, PushEvent, PushMessage, Ticket};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const RECORD_SEPARATOR: u8 = 0x1e;

/// Hub endpoint and credentials.
#[derive(Debug, Clone)]
pub struct PushTarget {
    pub url: String,
    pub api_key: Option<String>,
    pub connect_timeout: Duration,
}

impl PushTarget {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into(), api_key: None, connect_timeout: Duration::from_secs(30) }
    }
}

#[derive(Deserialize)]
struct EventFrame {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Deserialize)]
struct InvocationFrame {
    #[serde(rename = "type", default)]
    kind: i64,
    target: String,
    #[serde(default)]
    arguments: Vec<serde_json::Value>,
}

fn event_from(name: &str, payload: serde_json::Value) -> Result<Option<PushEvent>> {
    let ev = match name {
        TICKET_ADDED => PushEvent::Added(serde_json::from_value::<Ticket>(payload).context("decoding added ticket")?),
        TICKET_UPDATED => {
            PushEvent::Updated(serde_json::from_value::<Ticket>(payload).context("decoding updated ticket")?)
        }
        TICKET_REMOVED => {
            let key = match payload {
                serde_json::Value::String(s) => s,
                serde_json::Value::Object(mut m) => match m.remove("transactionNo") {
                    Some(serde_json::Value::String(s)) => s,
                    _ => return Err(anyhow!("removed frame without transactionNo")),
                },
                other => return Err(anyhow!("removed frame with unexpected payload: {}", other)),
            };
            PushEvent::Removed(key)
        }
        other => {
            debug!(event = %other, "push: ignoring unknown event");
            return Ok(None);
        }
    };
    Ok(Some(ev))
}

/// Decode one frame. Blank lines, comments, pings and unknown events yield `Ok(None)`.
pub fn decode_frame(line: &str) -> Result<Option<PushEvent>> {
    let line = line.trim_matches(|c: char| c.is_whitespace() || c == '\u{1e}');
    let line = line.strip_prefix("data:").map(str::trim_start).unwrap_or(line);
    if line.is_empty() || line.starts_with(':') || line == "{}" {
        return Ok(None);
    }
    let v: serde_json::Value = serde_json::from_str(line).context("parsing push frame")?;
    if v.get("target").is_some() {
        let f: InvocationFrame = serde_json::from_value(v).context("parsing invocation frame")?;
        if f.kind != 1 {
            return Ok(None);
        }
        let payload = f.arguments.into_iter().next().unwrap_or(serde_json::Value::Null);
        return event_from(&f.target, payload);
    }
    if v.get("event").is_some() {
        let f: EventFrame = serde_json::from_value(v).context("parsing event frame")?;
        return event_from(&f.event, f.data);
    }
    // keep-alive or handshake acknowledgements
    Ok(None)
}

/// Split complete frames off the front of `buf`, leaving any partial tail in place.
pub fn drain_frames(buf: &mut Vec<u8>) -> Vec<String> {
    let mut out = Vec::new();
    while let Some(pos) = buf.iter().position(|&b| b == b'\n' || b == RECORD_SEPARATOR) {
        let frame: Vec<u8> = buf.drain(..=pos).collect();
        let s = String::from_utf8_lossy(&frame[..frame.len() - 1]).trim().to_string();
        if !s.is_empty() {
            out.push(s);
        }
    }
    out
}

/// An accepted hub response whose body has not been read yet.
#[derive(Debug)]
pub struct PushConnection {
    url: String,
    resp: reqwest::Response,
}

/// Open the hub stream. Returns once response headers arrive, so an unreachable
/// or refusing hub fails here instead of inside the reader.
pub async fn connect_push(target: &PushTarget) -> Result<PushConnection> {
    // no overall timeout: the body is long-lived
    let client = reqwest::Client::builder().connect_timeout(target.connect_timeout).build()?;
    let mut req = client.get(&target.url).header("Accept", "text/event-stream, application/x-ndjson");
    if let Some(key) = target.api_key.as_deref() {
        req = req.header("X-API-Key", key);
    }
    let resp = req.send().await.with_context(|| format!("connecting push hub {}", target.url))?;
    if !resp.status().is_success() {
        let code = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        return Err(anyhow!("push hub returned {}: {}", code, body));
    }
    info!(url = %target.url, "push: connected");
    metrics::counter!("push_connects_total", 1u64);
    Ok(PushConnection { url: target.url.clone(), resp })
}

async fn send_link(tx: &mpsc::Sender<PushMessage>, ev: LinkEvent) -> bool {
    tx.send(PushMessage::Link(ev)).await.is_ok()
}

/// Read an open connection until the server closes it, `cancel` fires, or the
/// receiver is dropped. Emits `Connected`, the decoded ticket events, then `Closed`.
pub async fn run_push_stream(
    conn: PushConnection,
    tx: mpsc::Sender<PushMessage>,
    cancel: CancellationToken,
) -> Result<()> {
    if !send_link(&tx, LinkEvent::StateChanged { from: LinkState::Connecting, to: LinkState::Connected }).await {
        return Ok(());
    }

    let PushConnection { url, resp } = conn;
    let mut stream = resp.bytes_stream();
    let mut buf: Vec<u8> = Vec::new();
    let outcome: Result<()> = loop {
        let chunk: Option<reqwest::Result<Bytes>> = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            c = stream.next() => c,
        };
        let chunk = match chunk {
            None => break Ok(()),
            Some(Err(e)) => break Err(anyhow::Error::new(e).context("reading push stream")),
            Some(Ok(c)) => c,
        };
        buf.extend_from_slice(&chunk);
        for frame in drain_frames(&mut buf) {
            match decode_frame(&frame) {
                Ok(Some(ev)) => {
                    metrics::counter!("push_events_total", 1u64);
                    if tx.send(PushMessage::Ticket(ev)).await.is_err() {
                        return Ok(());
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    metrics::counter!("push_decode_errors_total", 1u64);
                    warn!(error = %e, frame = %frame, "push: dropping undecodable frame");
                }
            }
        }
    };
    match &outcome {
        Ok(()) => info!(url = %url, "push: stream closed by server"),
        Err(e) => warn!(url = %url, error = %e, "push: stream failed"),
    }
    let _ = send_link(&tx, LinkEvent::StateChanged { from: LinkState::Connected, to: LinkState::Disconnected }).await;
    let _ = send_link(&tx, LinkEvent::Closed).await;
    outcome
}

/// Connect and read in one call. Emits `Connecting` first; a failed connect
/// returns the error without `Closed`.
pub async fn start_push_stream(
    target: PushTarget,
    tx: mpsc::Sender<PushMessage>,
    cancel: CancellationToken,
) -> Result<()> {
    let _ = send_link(&tx, LinkEvent::StateChanged { from: LinkState::Disconnected, to: LinkState::Connecting }).await;
    let conn = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Ok(()),
        r = connect_push(&target) => r?,
    };
    run_push_stream(conn, tx, cancel).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_event_frame() {
        let ev = decode_frame(r#"data: {"event":"TicketAdded","data":{"transactionNo":"T1","playingTime":5}}"#)
            .unwrap()
            .unwrap();
        match ev {
            PushEvent::Added(t) => {
                assert_eq!(t.transaction_no, "T1");
                assert_eq!(t.playing_time, 5);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn decodes_invocation_frame() {
        let ev = decode_frame("{\"type\":1,\"target\":\"TicketRemoved\",\"arguments\":[\"T9\"]}\u{1e}").unwrap();
        assert_eq!(ev, Some(PushEvent::Removed("T9".into())));
        // pings are not events
        assert_eq!(decode_frame(r#"{"type":6}"#).unwrap(), None);
    }

    #[test]
    fn unknown_and_blank_frames_are_skipped() {
        assert_eq!(decode_frame("").unwrap(), None);
        assert_eq!(decode_frame(": keep-alive").unwrap(), None);
        assert_eq!(decode_frame(r#"{"event":"Other","data":1}"#).unwrap(), None);
        assert!(decode_frame("{not json").is_err());
        assert!(decode_frame(r#"{"event":"TicketRemoved","data":42}"#).is_err());
    }

    #[test]
    fn drains_complete_frames_only() {
        let mut buf = b"{\"a\":1}\n\n{\"b\":2}\x1e{\"c\"".to_vec();
        let frames = drain_frames(&mut buf);
        assert_eq!(frames, vec!["{\"a\":1}".to_string(), "{\"b\":2}".to_string()]);
        assert_eq!(buf, b"{\"c\"".to_vec());
    }

    #[tokio::test]
    async fn cancelled_before_connect_returns_quietly() {
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        cancel.cancel();
        // unroutable address; cancellation wins the select
        start_push_stream(PushTarget::new("http://127.0.0.1:9/hub"), tx, cancel).await.unwrap();
        let first = rx.recv().await.unwrap();
        assert!(matches!(first, PushMessage::Link(LinkEvent::StateChanged { to: LinkState::Connecting, .. })));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn refused_connect_is_an_error() {
        let mut target = PushTarget::new("http://127.0.0.1:9/hub");
        target.connect_timeout = Duration::from_secs(2);
        let err = connect_push(&target).await.unwrap_err();
        assert!(format!("{err:#}").contains("127.0.0.1:9"));
    }
}
