//! Per-message deletion timers.
//!
//! A single worker task owns every armed timer in a [`DelayQueue`], so the
//! pending set needs no lock. Callers talk to it through a cloneable
//! [`DeletionScheduler`] handle.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, TimeDelta, Utc};
use futures_util::StreamExt;
use metrics::counter;
use shared::models::{ChannelId, MessageId};
use tokio::{
    sync::{mpsc, oneshot},
    time::Instant,
};
use tokio_util::time::DelayQueue;
use tracing::{debug, info, trace};

use crate::{
    error::{BotError, BotResult},
    rest::{ChannelMessages, DeleteOutcome},
};

/// Source of wall-clock time used to age messages.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A deletion waiting for its fire time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDeletion {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    pub fire_at: DateTime<Utc>,
}

/// What `schedule` did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheduled {
    /// The message had already expired and the delete call completed.
    Deleted(DeleteOutcome),
    /// A timer is armed for the message.
    Pending { fire_at: DateTime<Utc> },
}

/// Longest single stretch a timer is armed for. `DelayQueue` rejects
/// deadlines beyond roughly two years, so longer waits are re-armed in slices.
const MAX_TIMER_SLICE: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// A queued deletion plus the runtime instant it is due. `None` means the
/// deadline lies beyond what [`Instant`] can represent.
struct Armed {
    pending: PendingDeletion,
    due: Option<Instant>,
}

enum Command {
    Arm {
        pending: PendingDeletion,
        delay: Duration,
    },
    Count(oneshot::Sender<usize>),
}

/// Handle to the deletion worker.
#[derive(Clone)]
pub struct DeletionScheduler {
    api: Arc<dyn ChannelMessages>,
    clock: Arc<dyn Clock>,
    ttl: TimeDelta,
    commands: mpsc::UnboundedSender<Command>,
}

impl DeletionScheduler {
    /// Starts the worker task.
    ///
    /// Returns the handle and the receiver on which timer-fired deletions
    /// report fatal errors.
    pub fn spawn(
        api: Arc<dyn ChannelMessages>,
        ttl: Duration,
        clock: Arc<dyn Clock>,
    ) -> (Self, mpsc::UnboundedReceiver<BotError>) {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_worker(command_rx, Arc::clone(&api), fatal_tx));

        let scheduler = Self {
            api,
            clock,
            ttl: TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX),
            commands,
        };
        (scheduler, fatal_rx)
    }

    /// Deletes the message now if it is at least TTL old, otherwise arms a
    /// timer for `created_at + TTL`.
    ///
    /// # Errors
    /// Returns the delete error for expired messages, or
    /// [`BotError::SchedulerStopped`] if the worker is gone.
    pub async fn schedule(
        &self,
        channel_id: &ChannelId,
        message_id: &MessageId,
        created_at: DateTime<Utc>,
    ) -> BotResult<Scheduled> {
        let now = self.clock.now();
        let fire_at = created_at
            .checked_add_signed(self.ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        // `fire_at - now` is zero or negative exactly when age >= TTL.
        let delay = match (fire_at - now).to_std() {
            Ok(delay) if !delay.is_zero() => delay,
            _ => {
                let outcome = self.delete(channel_id, message_id).await?;
                return Ok(Scheduled::Deleted(outcome));
            }
        };

        debug!(
            channel_id = %channel_id,
            message_id = %message_id,
            fire_at = %fire_at,
            "deletion scheduled"
        );
        self.commands
            .send(Command::Arm {
                pending: PendingDeletion {
                    channel_id: channel_id.clone(),
                    message_id: message_id.clone(),
                    fire_at,
                },
                delay,
            })
            .map_err(|_| BotError::SchedulerStopped)?;

        Ok(Scheduled::Pending { fire_at })
    }

    /// Deletes one message; a missing message counts as success.
    ///
    /// # Errors
    /// Returns any error other than not-found.
    pub async fn delete(
        &self,
        channel_id: &ChannelId,
        message_id: &MessageId,
    ) -> BotResult<DeleteOutcome> {
        delete_message(self.api.as_ref(), channel_id, message_id).await
    }

    /// Number of armed timers.
    ///
    /// # Errors
    /// Returns [`BotError::SchedulerStopped`] if the worker is gone.
    pub async fn pending(&self) -> BotResult<usize> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Count(reply))
            .map_err(|_| BotError::SchedulerStopped)?;
        rx.await.map_err(|_| BotError::SchedulerStopped)
    }
}

async fn delete_message(
    api: &dyn ChannelMessages,
    channel_id: &ChannelId,
    message_id: &MessageId,
) -> BotResult<DeleteOutcome> {
    let outcome = api.delete_message(channel_id, message_id).await?;
    match outcome {
        DeleteOutcome::Deleted => {
            counter!("ephemera_messages_deleted_total").increment(1);
            info!(channel_id = %channel_id, message_id = %message_id, "message deleted");
        }
        DeleteOutcome::AlreadyGone => {
            debug!(channel_id = %channel_id, message_id = %message_id, "message already gone");
        }
    }
    Ok(outcome)
}

/// Armed timers keep firing after every handle is dropped; the worker exits
/// once both the command channel and the queue are empty.
async fn run_worker(
    mut commands: mpsc::UnboundedReceiver<Command>,
    api: Arc<dyn ChannelMessages>,
    fatal: mpsc::UnboundedSender<BotError>,
) {
    let mut queue: DelayQueue<Armed> = DelayQueue::new();
    let mut accepting = true;

    while accepting || !queue.is_empty() {
        tokio::select! {
            command = commands.recv(), if accepting => match command {
                Some(Command::Arm { pending, delay }) => {
                    let due = Instant::now().checked_add(delay);
                    queue.insert(Armed { pending, due }, delay.min(MAX_TIMER_SLICE));
                }
                Some(Command::Count(reply)) => {
                    let _ = reply.send(queue.len());
                }
                None => accepting = false,
            },
            Some(expired) = queue.next(), if !queue.is_empty() => {
                let Armed { pending, due } = expired.into_inner();
                let remaining =
                    due.map_or(MAX_TIMER_SLICE, |due| due.saturating_duration_since(Instant::now()));
                if !remaining.is_zero() {
                    trace!(message_id = %pending.message_id, "re-arming long deletion timer");
                    queue.insert(Armed { pending, due }, remaining.min(MAX_TIMER_SLICE));
                    continue;
                }
                let api = Arc::clone(&api);
                let fatal = fatal.clone();
                tokio::spawn(async move {
                    if let Err(err) =
                        delete_message(api.as_ref(), &pending.channel_id, &pending.message_id).await
                    {
                        let _ = fatal.send(err);
                    }
                });
            }
        }
    }
}
