use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::core::automation::RewardImage;
use crate::core::store::{AccountId, MessageCategory, Store, TrackedMessageRecord, now_ts};

const ALL_MESSAGES: usize = i64::MAX as usize;

/// Presentation-layer delivery. Returns the platform's message handle.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_text(&self, account_id: AccountId, text: &str) -> Result<i64>;
    async fn send_photo(
        &self,
        account_id: AccountId,
        image: &RewardImage,
        caption: Option<&str>,
    ) -> Result<i64>;
    async fn delete_message(&self, account_id: AccountId, message_id: i64) -> Result<()>;
}

/// Sends through a [`Notifier`] and keeps the bookkeeping row for every
/// message so it can be reaped or purged later.
#[derive(Clone)]
pub struct Outbox {
    notifier: Arc<dyn Notifier>,
    store: Store,
}

impl Outbox {
    pub fn new(notifier: Arc<dyn Notifier>, store: Store) -> Self {
        Self { notifier, store }
    }

    fn expiry(ttl: Option<Duration>) -> Option<i64> {
        ttl.map(|ttl| now_ts() + ttl.as_secs() as i64)
    }

    pub async fn text(
        &self,
        account_id: AccountId,
        text: &str,
        category: MessageCategory,
        ttl: Option<Duration>,
    ) -> Result<i64> {
        let message_id = self.notifier.send_text(account_id, text).await?;
        self.store
            .track_message(account_id, message_id, Some(text), category, Self::expiry(ttl))
            .await?;
        Ok(message_id)
    }

    pub async fn photo(
        &self,
        account_id: AccountId,
        image: &RewardImage,
        caption: Option<&str>,
        category: MessageCategory,
    ) -> Result<i64> {
        let message_id = self.notifier.send_photo(account_id, image, caption).await?;
        self.store
            .track_message(account_id, message_id, caption, category, None)
            .await?;
        Ok(message_id)
    }

    /// Records a message the account sent us so history cleanup removes it too.
    pub async fn track_inbound(&self, account_id: AccountId, message_id: i64) -> Result<()> {
        self.store
            .track_message(account_id, message_id, None, MessageCategory::Reaction, None)
            .await
    }

    /// Best-effort delete at the presentation layer; the row always goes.
    pub async fn discard(&self, message: &TrackedMessageRecord) -> Result<()> {
        if let Err(e) = self
            .notifier
            .delete_message(message.account_id, message.message_id)
            .await
        {
            debug!(
                "[{}] Could not delete message {}: {}",
                message.account_id, message.message_id, e
            );
        }
        self.store.delete_tracked_message(message.id).await?;
        Ok(())
    }

    async fn discard_all(&self, messages: Vec<TrackedMessageRecord>) -> Result<usize> {
        let mut removed = 0;
        for message in &messages {
            match self.discard(message).await {
                Ok(()) => removed += 1,
                Err(e) => warn!("[{}] Failed to drop tracked message: {}", message.account_id, e),
            }
        }
        Ok(removed)
    }

    /// Removes reaction-style chatter, leaving persistent messages in place.
    pub async fn cleanup_reactions(&self, account_id: AccountId) -> Result<usize> {
        let messages = self
            .store
            .messages_for_account(account_id, Some(MessageCategory::Reaction), ALL_MESSAGES)
            .await?;
        self.discard_all(messages).await
    }

    /// Removes every tracked message for the account.
    pub async fn purge_history(&self, account_id: AccountId) -> Result<usize> {
        let messages = self
            .store
            .messages_for_account(account_id, None, ALL_MESSAGES)
            .await?;
        let removed = self.discard_all(messages).await?;
        debug!("[{}] History purge removed {} messages", account_id, removed);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tests::fakes::RecordingNotifier;

    #[tokio::test]
    async fn text_is_tracked_with_expiry() {
        let store = Store::in_memory().unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let outbox = Outbox::new(notifier.clone(), store.clone());

        let id = outbox
            .text(3, "hello", MessageCategory::Reaction, Some(Duration::from_secs(30)))
            .await
            .unwrap();
        let rows = store.messages_for_account(3, None, 10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].message_id, id);
        assert!(rows[0].delete_at.unwrap() >= now_ts() + 29);
        assert_eq!(notifier.texts_for(3), vec!["hello".to_string()]);
    }

    #[tokio::test]
    async fn cleanup_reactions_keeps_persistent_messages() {
        let store = Store::in_memory().unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let outbox = Outbox::new(notifier.clone(), store.clone());

        outbox
            .text(3, "busy", MessageCategory::Reaction, None)
            .await
            .unwrap();
        outbox
            .text(3, "result", MessageCategory::Persistent, None)
            .await
            .unwrap();
        outbox.track_inbound(3, 999).await.unwrap();

        assert_eq!(outbox.cleanup_reactions(3).await.unwrap(), 2);
        let left = store.messages_for_account(3, None, 10).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].category, MessageCategory::Persistent);
        assert!(notifier.deleted().contains(&(3, 999)));
    }

    #[tokio::test]
    async fn purge_drops_rows_even_when_delete_fails() {
        let store = Store::in_memory().unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        notifier.fail_deletes(true);
        let outbox = Outbox::new(notifier.clone(), store.clone());

        outbox
            .text(4, "a", MessageCategory::Persistent, None)
            .await
            .unwrap();
        outbox
            .text(4, "b", MessageCategory::Dashboard, None)
            .await
            .unwrap();

        assert_eq!(outbox.purge_history(4).await.unwrap(), 2);
        assert!(store.messages_for_account(4, None, 10).await.unwrap().is_empty());
    }
}
