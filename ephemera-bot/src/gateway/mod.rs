//! # Gateway client
//!
//! Drives one push connection: answers Hello with identify, keeps the
//! heartbeat going, tracks the dispatch sequence number, and forwards the
//! events the bot cares about. The connection is never resumed; any close is
//! reported to the caller as an error.

pub mod session;

use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde::Serialize;
use serde_json::Value;
use shared::models::{
    ConnectionProperties, GatewayPayload, Hello, Message, OutboundFrame, ReadyEvent, opcode,
};
use tokio::{
    net::TcpStream,
    sync::{mpsc, watch},
    time::{Instant, Interval, MissedTickBehavior, interval_at},
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{Error as WsError, Message as WsMessage},
};
use tracing::{debug, info, trace, warn};
use url::Url;

pub use session::{GatewaySession, GatewayState};

use crate::error::{BotError, BotResult};

/// Production socket type.
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CLIENT_NAME: &str = "ephemera";

/// Decoded events forwarded to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    Ready { session_id: Option<String> },
    MessageCreate(Message),
}

enum Flow {
    Continue,
    Stop,
}

pub struct GatewayClient {
    properties: ConnectionProperties,
    session: GatewaySession,
    events: mpsc::Sender<GatewayEvent>,
}

impl GatewayClient {
    #[must_use]
    pub fn new(token: impl Into<String>, events: mpsc::Sender<GatewayEvent>) -> Self {
        Self {
            properties: ConnectionProperties::for_client(CLIENT_NAME),
            session: GatewaySession::new(token),
            events,
        }
    }

    /// Opens the websocket.
    ///
    /// # Errors
    /// Returns [`BotError::Gateway`] if the handshake fails.
    pub async fn connect(url: &Url) -> BotResult<WsStream> {
        let (socket, _response) = connect_async(url.as_str()).await?;
        info!(url = %url, "gateway socket opened");
        Ok(socket)
    }

    /// Follows the connection state; take it before [`Self::run`] consumes the client.
    #[must_use]
    pub fn state(&self) -> watch::Receiver<GatewayState> {
        self.session.subscribe()
    }

    /// Runs the connection until it ends.
    ///
    /// Returns `Ok(())` only when the event receiver has been dropped.
    ///
    /// # Errors
    /// A close frame, a transport error, a malformed frame, or a server
    /// request to reconnect all end the connection with an error.
    pub async fn run<S>(mut self, mut socket: S) -> BotResult<()>
    where
        S: Stream<Item = Result<WsMessage, WsError>> + Sink<WsMessage, Error = WsError> + Unpin,
    {
        let mut heartbeat: Option<Interval> = None;

        let result = loop {
            tokio::select! {
                frame = socket.next() => {
                    match self.on_frame(frame, &mut socket, &mut heartbeat).await {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::Stop) => break Ok(()),
                        Err(err) => break Err(err),
                    }
                }
                () = next_heartbeat(&mut heartbeat) => {
                    if let Err(err) = self.send_heartbeat(&mut socket).await {
                        break Err(err);
                    }
                }
            }
        };

        self.session.transition(GatewayState::Closed);
        result
    }

    async fn on_frame<S>(
        &mut self,
        frame: Option<Result<WsMessage, WsError>>,
        socket: &mut S,
        heartbeat: &mut Option<Interval>,
    ) -> BotResult<Flow>
    where
        S: Sink<WsMessage, Error = WsError> + Unpin,
    {
        let frame = match frame {
            Some(Ok(frame)) => frame,
            Some(Err(err)) => return Err(err.into()),
            None => return Err(BotError::closed("stream ended")),
        };

        match frame {
            WsMessage::Text(text) => {
                let payload: GatewayPayload = serde_json::from_str(&text)?;
                self.on_payload(payload, socket, heartbeat).await
            }
            WsMessage::Ping(data) => {
                socket.send(WsMessage::Pong(data)).await?;
                Ok(Flow::Continue)
            }
            WsMessage::Close(frame) => Err(BotError::closed(match frame {
                Some(frame) => format!("{} {}", u16::from(frame.code), frame.reason.as_str()),
                None => "closed without a close frame".to_string(),
            })),
            WsMessage::Binary(_) => {
                warn!("ignoring binary gateway frame");
                Ok(Flow::Continue)
            }
            WsMessage::Pong(_) | WsMessage::Frame(_) => Ok(Flow::Continue),
        }
    }

    async fn on_payload<S>(
        &mut self,
        payload: GatewayPayload,
        socket: &mut S,
        heartbeat: &mut Option<Interval>,
    ) -> BotResult<Flow>
    where
        S: Sink<WsMessage, Error = WsError> + Unpin,
    {
        match payload.op {
            opcode::HELLO => {
                let hello: Hello = serde_json::from_value(payload.d)?;
                if hello.heartbeat_interval == 0 {
                    return Err(BotError::malformed("hello with a zero heartbeat interval"));
                }
                let period = Duration::from_millis(hello.heartbeat_interval);
                self.session.set_heartbeat_interval(period);

                let mut ticker = interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                *heartbeat = Some(ticker);

                self.session.transition(GatewayState::Identifying);
                let identify = OutboundFrame::identify(
                    self.session.identify_token(),
                    self.properties.clone(),
                );
                send_json(socket, &identify).await?;
                info!(heartbeat_ms = hello.heartbeat_interval, "identify sent");
            }
            opcode::DISPATCH => {
                self.session.observe_sequence(payload.s);
                return self.on_dispatch(payload.t.as_deref(), payload.d).await;
            }
            opcode::HEARTBEAT => self.send_heartbeat(socket).await?,
            opcode::HEARTBEAT_ACK => trace!("heartbeat acknowledged"),
            op @ (opcode::RECONNECT | opcode::INVALID_SESSION) => {
                return Err(BotError::SessionInvalidated { op });
            }
            op => debug!(op, "ignoring gateway opcode"),
        }

        Ok(Flow::Continue)
    }

    async fn on_dispatch(&mut self, event: Option<&str>, data: Value) -> BotResult<Flow> {
        let event = match event {
            Some("READY") => {
                let ready: ReadyEvent = serde_json::from_value(data)?;
                self.session.transition(GatewayState::Connected);
                info!(session_id = ?ready.session_id, "gateway ready");
                GatewayEvent::Ready {
                    session_id: ready.session_id,
                }
            }
            Some("MESSAGE_CREATE") => GatewayEvent::MessageCreate(serde_json::from_value(data)?),
            Some(other) => {
                trace!(event = other, "ignoring dispatch");
                return Ok(Flow::Continue);
            }
            None => return Err(BotError::malformed("dispatch frame without an event name")),
        };

        if self.events.send(event).await.is_err() {
            debug!("gateway event receiver dropped");
            return Ok(Flow::Stop);
        }
        Ok(Flow::Continue)
    }

    async fn send_heartbeat<S>(&self, socket: &mut S) -> BotResult<()>
    where
        S: Sink<WsMessage, Error = WsError> + Unpin,
    {
        let seq = self.session.seq();
        send_json(socket, &OutboundFrame::heartbeat(seq)).await?;
        trace!(seq = ?seq, "heartbeat sent");
        Ok(())
    }
}

async fn send_json<S, T>(socket: &mut S, frame: &T) -> BotResult<()>
where
    S: Sink<WsMessage, Error = WsError> + Unpin,
    T: Serialize,
{
    let text = serde_json::to_string(frame)?;
    socket.send(WsMessage::Text(text.into())).await?;
    Ok(())
}

/// Resolves on the next heartbeat tick; never resolves before Hello.
async fn next_heartbeat(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
