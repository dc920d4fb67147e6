//! Socket.IO client over a raw websocket.
//!
//! Only the subset the chat backend uses is spoken: Engine.IO v4 text
//! packets (open, ping/pong, close, message) carrying Socket.IO v5 packets
//! on the default namespace (connect, disconnect, event, connect error).
//! Binary attachments and acknowledgements are rejected or ignored.

use crate::api::events::{InboundEvent, OutboundEvent};
use crate::error::{ClientError, Result};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

/// Outbound side of the socket, as seen by the session controller.
pub trait EventSink {
    fn emit(&self, event: &OutboundEvent) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenHandshake {
    pub sid: String,
    #[serde(default)]
    pub ping_interval: u64,
    #[serde(default)]
    pub ping_timeout: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnginePacket {
    Open(OpenHandshake),
    Close,
    Ping(String),
    Pong(String),
    Message(String),
    Upgrade,
    Noop,
}

impl EnginePacket {
    pub fn decode(frame: &str) -> Result<Self> {
        let mut chars = frame.chars();
        let kind = chars.next().ok_or_else(|| ClientError::Protocol("empty frame".into()))?;
        let body = chars.as_str();
        Ok(match kind {
            '0' => Self::Open(serde_json::from_str(body)?),
            '1' => Self::Close,
            '2' => Self::Ping(body.to_string()),
            '3' => Self::Pong(body.to_string()),
            '4' => Self::Message(body.to_string()),
            '5' => Self::Upgrade,
            '6' => Self::Noop,
            other => return Err(ClientError::Protocol(format!("unknown engine packet type {other:?}"))),
        })
    }

    pub fn encode(&self) -> String {
        match self {
            Self::Open(_) => "0".to_string(),
            Self::Close => "1".to_string(),
            Self::Ping(data) => format!("2{data}"),
            Self::Pong(data) => format!("3{data}"),
            Self::Message(data) => format!("4{data}"),
            Self::Upgrade => "5".to_string(),
            Self::Noop => "6".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect(Option<Value>),
    Disconnect,
    Event { name: String, data: Value },
    Ack,
    ConnectError(Value),
}

impl SocketPacket {
    /// Decode the payload of an engine `Message` packet.
    pub fn decode(payload: &str) -> Result<Self> {
        let mut chars = payload.chars();
        let kind = chars.next().ok_or_else(|| ClientError::Protocol("empty socket packet".into()))?;
        let mut rest = chars.as_str();

        if matches!(kind, '5' | '6') {
            return Err(ClientError::Protocol("binary packets are not supported".into()));
        }
        // Only the default namespace is joined.
        if rest.starts_with('/') {
            let comma = rest.find(',').unwrap_or(rest.len());
            let namespace = &rest[..comma];
            if namespace != "/" {
                return Err(ClientError::Protocol(format!("unexpected namespace {namespace}")));
            }
            rest = rest.get(comma + 1..).unwrap_or("");
        }
        let ack_len = rest.chars().take_while(|c| c.is_ascii_digit()).count();
        let json = &rest[ack_len..];
        let data = if json.is_empty() { None } else { Some(serde_json::from_str::<Value>(json)?) };

        match kind {
            '0' => Ok(Self::Connect(data)),
            '1' => Ok(Self::Disconnect),
            '2' => {
                let Some(Value::Array(mut items)) = data else {
                    return Err(ClientError::Protocol("event payload is not an array".into()));
                };
                if items.is_empty() {
                    return Err(ClientError::Protocol("event without a name".into()));
                }
                let name = match items.remove(0) {
                    Value::String(name) => name,
                    other => return Err(ClientError::Protocol(format!("event name is not a string: {other}"))),
                };
                let data = if items.is_empty() { Value::Null } else { items.remove(0) };
                Ok(Self::Event { name, data })
            }
            '3' => Ok(Self::Ack),
            '4' => Ok(Self::ConnectError(data.unwrap_or(Value::Null))),
            other => Err(ClientError::Protocol(format!("unknown socket packet type {other:?}"))),
        }
    }

    /// Encode as a full engine frame, ready for the websocket.
    pub fn encode(&self) -> String {
        let body = match self {
            Self::Connect(None) => "0".to_string(),
            Self::Connect(Some(auth)) => format!("0{auth}"),
            Self::Disconnect => "1".to_string(),
            Self::Event { name, data } => format!("2{}", Value::Array(vec![Value::String(name.clone()), data.clone()])),
            Self::Ack => "3[]".to_string(),
            Self::ConnectError(data) => format!("4{data}"),
        };
        EnginePacket::Message(body).encode()
    }
}

impl From<&OutboundEvent> for SocketPacket {
    fn from(event: &OutboundEvent) -> Self {
        Self::Event { name: event.name().to_string(), data: event.payload() }
    }
}

/// What the transport reports to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    Connected { sid: String },
    Inbound(InboundEvent),
    Closed(String),
}

/// Turn the configured HTTP server address into the websocket endpoint.
pub fn socket_url(base: &Url) -> Result<Url> {
    let mut url = base.clone();
    let scheme = match base.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => return Err(ClientError::Config(format!("unsupported scheme {other}"))),
    };
    url.set_scheme(scheme)
        .map_err(|_| ClientError::Config(format!("cannot use {scheme} for {base}")))?;
    url.set_path("/socket.io/");
    url.set_query(Some("EIO=4&transport=websocket"));
    Ok(url)
}

/// Write half handle; cheap to clone.
#[derive(Clone)]
pub struct SocketHandle {
    frames: mpsc::UnboundedSender<String>,
    closed: Arc<AtomicBool>,
}

impl SocketHandle {
    pub fn new(frames: mpsc::UnboundedSender<String>) -> Self {
        Self { frames, closed: Arc::new(AtomicBool::new(false)) }
    }

    /// Set once either loop has given up on the websocket.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.frames.is_closed()
    }

    fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn close(&self) {
        let _ = self.frames.send(SocketPacket::Disconnect.encode());
    }
}

impl EventSink for SocketHandle {
    fn emit(&self, event: &OutboundEvent) -> Result<()> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }
        log::debug!("emit {}", event.name());
        self.frames
            .send(SocketPacket::from(event).encode())
            .map_err(|_| ClientError::Closed)
    }
}

/// Holds back inbound events until the namespace connect has been seen, so
/// the session never hears about a socket it cannot emit on yet.
#[derive(Debug, Default)]
struct Handshake {
    connected: bool,
    early: Vec<SocketEvent>,
}

impl Handshake {
    fn admit(&mut self, event: SocketEvent) -> Vec<SocketEvent> {
        match event {
            SocketEvent::Connected { .. } if !self.connected => {
                self.connected = true;
                let mut out = vec![event];
                out.append(&mut self.early);
                out
            }
            SocketEvent::Inbound(_) if !self.connected => {
                self.early.push(event);
                Vec::new()
            }
            other => vec![other],
        }
    }
}

/// How long the server gets to accept the default namespace.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Open the websocket, spawn the read/write loops and wait until the server
/// has accepted the default namespace. Must be called from inside a tokio
/// runtime.
pub async fn connect(base: &Url) -> Result<(SocketHandle, mpsc::UnboundedReceiver<SocketEvent>)> {
    let url = socket_url(base)?;
    let (ws_stream, _) = connect_async(url.as_str()).await?;
    log::info!("websocket connected to {url}");
    let (mut ws_write, mut ws_read) = ws_stream.split();

    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<String>();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<SocketEvent>();
    let handle = SocketHandle::new(frame_tx);

    let write_closed = Arc::clone(&handle.closed);
    tokio::spawn(async move {
        while let Some(frame) = frame_rx.recv().await {
            if let Err(e) = ws_write.send(Message::Text(frame)).await {
                log::warn!("websocket write failed: {e}");
                write_closed.store(true, Ordering::Release);
                break;
            }
        }
        let _ = ws_write.close().await;
    });

    let reader = handle.clone();
    tokio::spawn(async move {
        let mut handshake = Handshake::default();
        let mut reason = "connection closed by server".to_string();
        while let Some(msg) = ws_read.next().await {
            let text = match msg {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(frame)) => {
                    if let Some(frame) = frame {
                        reason = frame.reason.to_string();
                    }
                    break;
                }
                Ok(_) => continue,
                Err(e) => {
                    reason = e.to_string();
                    break;
                }
            };
            match handle_frame(&text) {
                Ok(FrameOutcome::Reply(frame)) => {
                    let _ = reader.frames.send(frame);
                }
                Ok(FrameOutcome::Event(SocketEvent::Closed(why))) => {
                    reason = why;
                    break;
                }
                Ok(FrameOutcome::Event(event)) => {
                    for event in handshake.admit(event) {
                        if event_tx.send(event).is_err() {
                            reader.mark_closed();
                            return;
                        }
                    }
                }
                Ok(FrameOutcome::Nothing) => {}
                Err(e) => log::warn!("dropping frame {text:?}: {e}"),
            }
        }
        // Flag first: once the session sees `Closed`, emits must already fail.
        reader.mark_closed();
        let _ = event_tx.send(SocketEvent::Closed(reason));
    });

    let first = tokio::time::timeout(HANDSHAKE_TIMEOUT, event_rx.recv())
        .await
        .map_err(|_| ClientError::Protocol("no namespace connect from server".into()))?;
    match first {
        Some(SocketEvent::Connected { sid }) => log::debug!("socket.io namespace joined as {sid}"),
        Some(SocketEvent::Closed(reason)) => return Err(ClientError::Protocol(reason)),
        Some(SocketEvent::Inbound(event)) => {
            return Err(ClientError::Protocol(format!("event before namespace connect: {event:?}")));
        }
        None => return Err(ClientError::Closed),
    }

    Ok((handle, event_rx))
}

#[derive(Debug, PartialEq)]
enum FrameOutcome {
    Reply(String),
    Event(SocketEvent),
    Nothing,
}

fn handle_frame(text: &str) -> Result<FrameOutcome> {
    match EnginePacket::decode(text)? {
        EnginePacket::Open(handshake) => {
            log::debug!("engine open sid={} ping_interval={}ms", handshake.sid, handshake.ping_interval);
            Ok(FrameOutcome::Reply(SocketPacket::Connect(None).encode()))
        }
        EnginePacket::Ping(data) => Ok(FrameOutcome::Reply(EnginePacket::Pong(data).encode())),
        EnginePacket::Close => Ok(FrameOutcome::Event(SocketEvent::Closed("server closed the session".into()))),
        EnginePacket::Message(payload) => match SocketPacket::decode(&payload)? {
            SocketPacket::Connect(data) => {
                let sid = data
                    .as_ref()
                    .and_then(|d| d.get("sid"))
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                Ok(FrameOutcome::Event(SocketEvent::Connected { sid }))
            }
            SocketPacket::Event { name, data } => match InboundEvent::from_event(&name, data)? {
                Some(event) => Ok(FrameOutcome::Event(SocketEvent::Inbound(event))),
                None => {
                    log::debug!("ignoring socket event {name}");
                    Ok(FrameOutcome::Nothing)
                }
            },
            SocketPacket::Disconnect => Ok(FrameOutcome::Event(SocketEvent::Closed("server disconnected the client".into()))),
            SocketPacket::ConnectError(data) => {
                let message = data.get("message").and_then(|v| v.as_str()).unwrap_or("connection refused");
                Ok(FrameOutcome::Event(SocketEvent::Closed(message.to_string())))
            }
            SocketPacket::Ack => Ok(FrameOutcome::Nothing),
        },
        EnginePacket::Pong(_) | EnginePacket::Upgrade | EnginePacket::Noop => Ok(FrameOutcome::Nothing),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::events::SystemNotice;
    use crate::api::models::Pin;
    use serde_json::json;

    #[test]
    fn outbound_event_is_framed_as_engine_message() {
        let ev = OutboundEvent::StartPrivateChat { target_pin: Pin::parse("ZZ99").unwrap() };
        assert_eq!(SocketPacket::from(&ev).encode(), r#"42["start_private_chat",{"target_pin":"ZZ99"}]"#);
    }

    #[test]
    fn open_is_answered_with_namespace_connect() {
        let open = r#"0{"sid":"abc","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;
        assert_eq!(handle_frame(open).unwrap(), FrameOutcome::Reply("40".into()));
    }

    #[test]
    fn ping_is_answered_with_pong() {
        assert_eq!(handle_frame("2").unwrap(), FrameOutcome::Reply("3".into()));
        assert_eq!(handle_frame("2probe").unwrap(), FrameOutcome::Reply("3probe".into()));
    }

    #[test]
    fn system_message_frame_becomes_inbound_event() {
        let outcome = handle_frame(r#"42["system_message",{"text":"x","time":"09:00"}]"#).unwrap();
        assert_eq!(
            outcome,
            FrameOutcome::Event(SocketEvent::Inbound(InboundEvent::SystemMessage(SystemNotice {
                text: "x".into(),
                time: Some("09:00".into()),
            })))
        );
    }

    #[test]
    fn namespace_and_ack_id_are_skipped() {
        let packet = SocketPacket::decode(r#"2/,12["system_message",{"text":"y"}]"#).unwrap();
        assert_eq!(packet, SocketPacket::Event { name: "system_message".into(), data: json!({"text": "y"}) });
        assert!(SocketPacket::decode(r#"2/admin,["x"]"#).is_err());
    }

    #[test]
    fn connect_ack_reports_sid() {
        assert_eq!(
            handle_frame(r#"40{"sid":"s1"}"#).unwrap(),
            FrameOutcome::Event(SocketEvent::Connected { sid: "s1".into() })
        );
    }

    #[test]
    fn connect_error_and_unknown_events() {
        assert_eq!(
            handle_frame(r#"44{"message":"nope"}"#).unwrap(),
            FrameOutcome::Event(SocketEvent::Closed("nope".into()))
        );
        assert_eq!(handle_frame(r#"42["typing",{}]"#).unwrap(), FrameOutcome::Nothing);
        assert!(handle_frame("451-[\"x\",{\"_placeholder\":true}]").is_err());
        assert!(handle_frame("9").is_err());
    }

    #[test]
    fn socket_url_follows_scheme() {
        let http = socket_url(&Url::parse("http://localhost:5050/").unwrap()).unwrap();
        assert_eq!(http.as_str(), "ws://localhost:5050/socket.io/?EIO=4&transport=websocket");
        let https = socket_url(&Url::parse("https://chat.example.org/app").unwrap()).unwrap();
        assert_eq!(https.as_str(), "wss://chat.example.org/socket.io/?EIO=4&transport=websocket");
    }

    #[test]
    fn emit_after_close_fails() {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = SocketHandle::new(tx);
        drop(rx);
        let ev = OutboundEvent::JoinWithPin { pin: Pin::parse("AB12").unwrap() };
        assert!(matches!(handle.emit(&ev), Err(ClientError::Closed)));
    }

    #[test]
    fn emit_fails_once_marked_closed_even_with_writer_alive() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = SocketHandle::new(tx);
        let ev = OutboundEvent::JoinWithPin { pin: Pin::parse("AB12").unwrap() };
        handle.emit(&ev).unwrap();

        handle.clone().mark_closed();
        assert!(handle.is_closed());
        assert!(matches!(handle.emit(&ev), Err(ClientError::Closed)));
        assert_eq!(rx.try_recv().unwrap(), r#"42["join_with_pin",{"pin":"AB12"}]"#);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn inbound_before_namespace_connect_is_held_back() {
        let notice = |text: &str| {
            SocketEvent::Inbound(InboundEvent::SystemMessage(SystemNotice { text: text.into(), time: None }))
        };
        let mut handshake = Handshake::default();
        assert!(handshake.admit(notice("early")).is_empty());
        assert_eq!(
            handshake.admit(SocketEvent::Connected { sid: "s1".into() }),
            vec![SocketEvent::Connected { sid: "s1".into() }, notice("early")]
        );
        assert_eq!(handshake.admit(notice("late")), vec![notice("late")]);
    }
}
