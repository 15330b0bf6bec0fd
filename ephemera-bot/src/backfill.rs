//! Startup catch-up over existing channel history.

use std::sync::Arc;

use metrics::counter;
use shared::models::{ChannelId, MessageId};
use tracing::{debug, info};

use crate::{
    error::{BotError, BotResult},
    rest::ChannelMessages,
    scheduler::{DeletionScheduler, Scheduled},
};

/// Totals for one channel walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillReport {
    pub pages: usize,
    pub messages: usize,
    pub deleted_now: usize,
    pub scheduled: usize,
}

/// Pages through a channel from newest to oldest, handing every message to
/// the scheduler.
#[derive(Clone)]
pub struct BackfillWalker {
    api: Arc<dyn ChannelMessages>,
    scheduler: DeletionScheduler,
}

impl BackfillWalker {
    pub fn new(api: Arc<dyn ChannelMessages>, scheduler: DeletionScheduler) -> Self {
        Self { api, scheduler }
    }

    /// Walks the whole history of `channel_id`.
    ///
    /// Every message of a page is scheduled (expired ones deleted) before the
    /// next page is requested. An empty page ends the walk.
    ///
    /// # Errors
    /// Any fetch or immediate-delete failure aborts the walk.
    pub async fn walk(&self, channel_id: &ChannelId) -> BotResult<BackfillReport> {
        let mut report = BackfillReport::default();
        let mut cursor: Option<MessageId> = None;

        loop {
            let page = self.api.list_messages(channel_id, cursor.as_ref()).await?;
            let Some(oldest) = page.last() else {
                break;
            };
            let next_cursor = oldest.id.clone();
            if cursor.as_ref() == Some(&next_cursor) {
                return Err(BotError::malformed(format!(
                    "history of channel {channel_id} did not advance past {next_cursor}"
                )));
            }

            report.pages += 1;
            counter!("ephemera_backfill_pages_total").increment(1);

            for message in &page {
                match self
                    .scheduler
                    .schedule(channel_id, &message.id, message.created_at)
                    .await?
                {
                    Scheduled::Deleted(_) => report.deleted_now += 1,
                    Scheduled::Pending { .. } => report.scheduled += 1,
                }
            }
            report.messages += page.len();

            debug!(
                channel_id = %channel_id,
                page = report.pages,
                size = page.len(),
                cursor = %next_cursor,
                "backfill page processed"
            );
            cursor = Some(next_cursor);
        }

        info!(
            channel_id = %channel_id,
            pages = report.pages,
            messages = report.messages,
            deleted_now = report.deleted_now,
            scheduled = report.scheduled,
            "backfill complete"
        );
        Ok(report)
    }

    /// Walks each channel in order, one at a time.
    ///
    /// # Errors
    /// Stops at the first failing channel.
    pub async fn walk_all(&self, channels: &[ChannelId]) -> BotResult<Vec<BackfillReport>> {
        let mut reports = Vec::with_capacity(channels.len());
        for channel_id in channels {
            reports.push(self.walk(channel_id).await?);
        }
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::tests::{FakeChannel, FixedClock, hours, now};
    use chrono::{DateTime, TimeDelta, Utc};
    use shared::models::Message;
    use std::time::Duration;

    const TTL: Duration = Duration::from_secs(3 * 60 * 60);

    fn message(channel: &str, id: u64, created_at: DateTime<Utc>) -> Message {
        Message {
            id: MessageId(id.to_string()),
            channel_id: ChannelId::from(channel),
            created_at,
        }
    }

    /// `count` messages, newest first, ids descending from `newest_id`, one
    /// minute apart, the newest aged `newest_age`.
    fn page(channel: &str, newest_id: u64, count: u64, newest_age: TimeDelta) -> Vec<Message> {
        (0..count)
            .map(|i| {
                let age = newest_age + TimeDelta::minutes(i64::try_from(i).unwrap());
                message(channel, newest_id - i, now() - age)
            })
            .collect()
    }

    fn build_walker(api: &Arc<FakeChannel>) -> (BackfillWalker, DeletionScheduler) {
        let api: Arc<dyn ChannelMessages> = api.clone();
        let (scheduler, _fatal) =
            DeletionScheduler::spawn(Arc::clone(&api), TTL, Arc::new(FixedClock(now())));
        (BackfillWalker::new(api, scheduler.clone()), scheduler)
    }

    #[tokio::test(start_paused = true)]
    async fn empty_channel_issues_single_fetch() {
        let api = Arc::new(FakeChannel::default());
        let (walker, _) = build_walker(&api);

        let report = walker.walk(&"7".into()).await.unwrap();

        assert_eq!(report, BackfillReport::default());
        assert_eq!(api.list_calls.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cursor_strictly_decreases_across_pages() {
        let api = Arc::new(FakeChannel::with_pages(vec![
            page("7", 300, 3, hours(0)),
            page("7", 290, 3, hours(1)),
            page("7", 280, 2, hours(2)),
        ]));
        let (walker, _) = build_walker(&api);

        let report = walker.walk(&"7".into()).await.unwrap();

        assert_eq!(report.pages, 3);
        assert_eq!(report.messages, 8);
        let calls = api.list_calls.lock().unwrap().clone();
        // Three pages plus the terminating empty fetch.
        assert_eq!(calls.len(), 4);
        assert_eq!(calls[0].1, None);
        let cursors: Vec<u64> = calls[1..]
            .iter()
            .map(|(_, cursor)| cursor.as_ref().unwrap().as_str().parse().unwrap())
            .collect();
        assert_eq!(cursors, vec![298, 288, 279]);
        assert!(cursors.windows(2).all(|pair| pair[0] > pair[1]));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_messages_deleted_and_young_ones_scheduled() {
        let api = Arc::new(FakeChannel::with_pages(vec![vec![
            message("7", 20, now() - hours(1)),
            message("7", 10, now() - hours(4)),
        ]]));
        let (walker, scheduler) = build_walker(&api);

        let report = walker.walk(&"7".into()).await.unwrap();

        assert_eq!(report.deleted_now, 1);
        assert_eq!(report.scheduled, 1);
        assert_eq!(api.deleted_ids(), vec!["10".to_string()]);
        assert_eq!(scheduler.pending().await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_messages_are_deleted_in_page_order() {
        let api = Arc::new(FakeChannel::with_pages(vec![
            vec![message("7", 20, now() - hours(5)), message("7", 19, now() - hours(6))],
            vec![message("7", 18, now() - hours(7))],
        ]));
        let (walker, _) = build_walker(&api);

        walker.walk(&"7".into()).await.unwrap();

        assert_eq!(
            api.deleted_ids(),
            vec!["20".to_string(), "19".to_string(), "18".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_page_is_rejected() {
        let repeated = vec![message("7", 5, now())];
        let api = Arc::new(FakeChannel::with_pages(vec![repeated.clone(), repeated]));
        let (walker, _) = build_walker(&api);

        let err = walker.walk(&"7".into()).await.unwrap_err();

        assert!(matches!(err, BotError::Malformed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn channels_are_walked_in_listed_order() {
        let api = Arc::new(FakeChannel::with_pages(vec![vec![message(
            "b",
            1,
            now() - hours(9),
        )]]));
        let (walker, _) = build_walker(&api);

        let reports = walker
            .walk_all(&["b".into(), "a".into()])
            .await
            .unwrap();

        assert_eq!(reports.len(), 2);
        let visited: Vec<String> = api
            .list_calls
            .lock()
            .unwrap()
            .iter()
            .map(|(channel, _)| channel.as_str().to_string())
            .collect();
        assert_eq!(visited, vec!["b", "b", "a"]);
    }
}
