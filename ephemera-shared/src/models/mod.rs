pub mod gateway;
pub mod message;

pub use gateway::{
    ConnectionProperties, GatewayPayload, Hello, Identify, OutboundFrame, ReadyEvent,
    INTENT_GUILD_MESSAGES, opcode,
};
pub use message::{ChannelId, Message, MessageId};
