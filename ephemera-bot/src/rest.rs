//! Typed REST facade over the rate-limited client.

use async_trait::async_trait;
use http::StatusCode;
use shared::models::{ChannelId, Message, MessageId};

use crate::{
    error::{BotError, BotResult},
    http::{ApiRequest, HttpTransport, RateLimitedClient},
};

/// Result of a delete call that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The message existed and is now gone.
    Deleted,
    /// The message was already gone; counts as success.
    AlreadyGone,
}

/// The two channel-history operations the expiry engine needs.
#[async_trait]
pub trait ChannelMessages: Send + Sync {
    /// One page of history, newest first, strictly older than `before` when
    /// a cursor is given.
    ///
    /// # Errors
    /// Any non-success response is an error.
    async fn list_messages(
        &self,
        channel_id: &ChannelId,
        before: Option<&MessageId>,
    ) -> BotResult<Vec<Message>>;

    /// Delete one message. A 404 is reported as [`DeleteOutcome::AlreadyGone`].
    ///
    /// # Errors
    /// Any other non-success response is an error.
    async fn delete_message(
        &self,
        channel_id: &ChannelId,
        message_id: &MessageId,
    ) -> BotResult<DeleteOutcome>;
}

/// [`ChannelMessages`] over the chat platform's REST API.
#[derive(Debug)]
pub struct DiscordRest<T> {
    client: RateLimitedClient<T>,
    page_size: u8,
}

impl<T: HttpTransport> DiscordRest<T> {
    pub fn new(client: RateLimitedClient<T>, page_size: u8) -> Self {
        Self { client, page_size }
    }
}

#[async_trait]
impl<T: HttpTransport> ChannelMessages for DiscordRest<T> {
    async fn list_messages(
        &self,
        channel_id: &ChannelId,
        before: Option<&MessageId>,
    ) -> BotResult<Vec<Message>> {
        let mut request = ApiRequest::get(format!("channels/{channel_id}/messages"))
            .with_query("limit", self.page_size);
        if let Some(cursor) = before {
            request = request.with_query("before", cursor);
        }

        let response = self.client.send(&request).await?;
        if !response.is_success() {
            return Err(BotError::UnexpectedStatus {
                operation: "fetch messages",
                status: response.status,
            });
        }

        response.json()
    }

    async fn delete_message(
        &self,
        channel_id: &ChannelId,
        message_id: &MessageId,
    ) -> BotResult<DeleteOutcome> {
        let request = ApiRequest::delete(format!("channels/{channel_id}/messages/{message_id}"));
        let response = self.client.send(&request).await?;

        let status = response.status;
        if status.is_success() {
            Ok(DeleteOutcome::Deleted)
        } else if status == StatusCode::NOT_FOUND {
            Ok(DeleteOutcome::AlreadyGone)
        } else {
            Err(BotError::UnexpectedStatus {
                operation: "delete message",
                status,
            })
        }
    }
}
