//! Gateway wire frames.
//!
//! Every frame on the socket is a JSON object `{op, d, s, t}`. Inbound frames
//! are decoded into [`GatewayPayload`] with `d` left as raw JSON so the
//! client can pick the concrete payload type from `op` and `t`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Gateway opcodes used by the bot.
pub mod opcode {
    pub const DISPATCH: u8 = 0;
    pub const HEARTBEAT: u8 = 1;
    pub const IDENTIFY: u8 = 2;
    pub const RECONNECT: u8 = 7;
    pub const INVALID_SESSION: u8 = 9;
    pub const HELLO: u8 = 10;
    pub const HEARTBEAT_ACK: u8 = 11;
}

/// Intent bit selecting guild message events.
pub const INTENT_GUILD_MESSAGES: u64 = 1 << 9;

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GatewayPayload {
    /// Opcode.
    pub op: u8,
    /// Opcode specific payload.
    #[serde(default)]
    pub d: Value,
    /// Sequence number, present on dispatch frames.
    #[serde(default)]
    pub s: Option<u64>,
    /// Event name, present on dispatch frames.
    #[serde(default)]
    pub t: Option<String>,
}

/// Payload of opcode 10.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Hello {
    /// Heartbeat period in milliseconds.
    pub heartbeat_interval: u64,
}

/// The parts of the `READY` dispatch the bot logs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ReadyEvent {
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Client metadata sent with identify.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionProperties {
    pub os: String,
    pub browser: String,
    pub device: String,
}

impl ConnectionProperties {
    /// Properties naming this crate as both browser and device.
    #[must_use]
    pub fn for_client(name: &str) -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            browser: name.to_string(),
            device: name.to_string(),
        }
    }
}

/// Payload of opcode 2.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identify {
    pub token: String,
    pub intents: u64,
    pub properties: ConnectionProperties,
}

/// An outbound frame `{op, d}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundFrame<T> {
    pub op: u8,
    pub d: T,
}

impl OutboundFrame<Option<u64>> {
    /// Heartbeat carrying the last seen sequence number, or null.
    #[must_use]
    pub fn heartbeat(seq: Option<u64>) -> Self {
        Self {
            op: opcode::HEARTBEAT,
            d: seq,
        }
    }
}

impl OutboundFrame<Identify> {
    /// Identify frame requesting message events only.
    #[must_use]
    pub fn identify(token: impl Into<String>, properties: ConnectionProperties) -> Self {
        Self {
            op: opcode::IDENTIFY,
            d: Identify {
                token: token.into(),
                intents: INTENT_GUILD_MESSAGES,
                properties,
            },
        }
    }
}
