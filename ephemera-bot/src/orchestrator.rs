//! Process wiring: gateway events in, deletions out.

use std::{collections::HashSet, sync::Arc};

use futures_util::{Sink, Stream};
use shared::{
    config::Config,
    models::{ChannelId, Message},
};
use tokio::{
    sync::mpsc,
    task::{JoinError, JoinHandle},
};
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tracing::{error, info, trace, warn};

use crate::{
    backfill::{BackfillReport, BackfillWalker},
    error::{BotError, BotResult},
    gateway::{GatewayClient, GatewayEvent},
    http::{RateLimitedClient, ReqwestTransport, RetryPolicy},
    rest::{ChannelMessages, DiscordRest},
    scheduler::{Clock, DeletionScheduler, SystemClock},
};

const EVENT_BUFFER: usize = 1024;

type BackfillTask = JoinHandle<BotResult<Vec<BackfillReport>>>;

/// Owns the watched channels and the TTL for the lifetime of the process.
pub struct Orchestrator {
    config: Config,
    api: Arc<dyn ChannelMessages>,
    clock: Arc<dyn Clock>,
}

impl Orchestrator {
    pub fn new(config: Config, api: Arc<dyn ChannelMessages>) -> Self {
        Self {
            config,
            api,
            clock: Arc::new(SystemClock),
        }
    }

    /// Builds the production REST stack from `config`.
    ///
    /// # Errors
    /// Fails if the HTTP client cannot be constructed.
    pub fn from_config(config: Config) -> BotResult<Self> {
        let transport = ReqwestTransport::new(config.api_base_url.clone(), &config.token)?;
        let client = RateLimitedClient::new(transport, RetryPolicy::from_config(&config.rate_limit));
        let api = Arc::new(DiscordRest::new(client, config.page_size));
        Ok(Self::new(config, api))
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Connects to the gateway and runs until something fatal happens.
    ///
    /// # Errors
    /// Always returns the error that stopped the bot.
    pub async fn run(self) -> BotResult<()> {
        let socket = GatewayClient::connect(&self.config.gateway_url).await?;
        self.run_with_socket(socket).await
    }

    /// Runs the bot over an already open gateway socket.
    ///
    /// # Errors
    /// Returns the first fatal error reported by the gateway, the backfill,
    /// or a timer-fired deletion.
    pub async fn run_with_socket<S>(self, socket: S) -> BotResult<()>
    where
        S: Stream<Item = Result<WsMessage, WsError>>
            + Sink<WsMessage, Error = WsError>
            + Unpin
            + Send
            + 'static,
    {
        let channels: Vec<ChannelId> = self
            .config
            .channel_ids
            .iter()
            .map(|id| ChannelId::from(id.as_str()))
            .collect();
        let watched: HashSet<ChannelId> = channels.iter().cloned().collect();

        let (scheduler, mut fatal) = DeletionScheduler::spawn(
            Arc::clone(&self.api),
            self.config.message_ttl(),
            Arc::clone(&self.clock),
        );
        let walker = BackfillWalker::new(Arc::clone(&self.api), scheduler.clone());

        let (events_tx, mut events) = mpsc::channel(EVENT_BUFFER);
        let client = GatewayClient::new(self.config.token.clone(), events_tx);
        let mut gateway = tokio::spawn(client.run(socket));
        let mut backfill: Option<BackfillTask> = None;
        let mut backfill_started = false;

        info!(
            channels = channels.len(),
            ttl_ms = self.config.message_ttl_ms,
            "ephemera started"
        );

        let result = loop {
            tokio::select! {
                joined = &mut gateway => {
                    break Err(match joined {
                        Ok(Ok(())) => BotError::closed("gateway task stopped"),
                        Ok(Err(err)) => err,
                        Err(join) => task_failed("gateway", &join),
                    });
                }
                Some(event) = events.recv() => match event {
                    GatewayEvent::Ready { .. } if backfill_started => {
                        warn!("repeated READY on one connection; backfill already started");
                    }
                    GatewayEvent::Ready { .. } => {
                        backfill_started = true;
                        let walker = walker.clone();
                        let channels = channels.clone();
                        backfill = Some(tokio::spawn(async move {
                            walker.walk_all(&channels).await
                        }));
                    }
                    GatewayEvent::MessageCreate(message) => {
                        if let Err(err) = schedule_live(&scheduler, &watched, &message).await {
                            break Err(err);
                        }
                    }
                },
                Some(err) = fatal.recv() => break Err(err),
                joined = join_backfill(&mut backfill) => {
                    backfill = None;
                    match joined {
                        Ok(Ok(reports)) => {
                            let deleted: usize = reports.iter().map(|r| r.deleted_now).sum();
                            let scheduled: usize = reports.iter().map(|r| r.scheduled).sum();
                            info!(deleted, scheduled, "backfill finished for all channels");
                        }
                        Ok(Err(err)) => break Err(err),
                        Err(join) => break Err(task_failed("backfill", &join)),
                    }
                }
            }
        };

        gateway.abort();
        if let Some(task) = backfill {
            task.abort();
        }
        if let Err(err) = &result {
            error!(error = %err, "fatal error, shutting down");
        }
        result
    }
}

async fn schedule_live(
    scheduler: &DeletionScheduler,
    watched: &HashSet<ChannelId>,
    message: &Message,
) -> BotResult<()> {
    if !watched.contains(&message.channel_id) {
        trace!(channel_id = %message.channel_id, "message in unwatched channel");
        return Ok(());
    }
    scheduler
        .schedule(&message.channel_id, &message.id, message.created_at)
        .await?;
    Ok(())
}

async fn join_backfill(
    task: &mut Option<BackfillTask>,
) -> Result<BotResult<Vec<BackfillReport>>, JoinError> {
    match task {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

fn task_failed(task: &'static str, join: &JoinError) -> BotError {
    BotError::TaskFailed {
        task,
        message: join.to_string(),
    }
}
