use anyhow::Result;
use tracing::{debug, warn};

use crate::core::notify::Outbox;
use crate::core::store::{Store, now_ts};

/// Deletes tracked messages whose expiry has passed.
pub struct MessageReaper {
    store: Store,
    outbox: Outbox,
}

impl MessageReaper {
    pub fn new(store: Store, outbox: Outbox) -> Self {
        Self { store, outbox }
    }

    pub async fn tick(&self) -> Result<usize> {
        let expired = self.store.expired_messages(now_ts()).await?;
        let mut removed = 0;
        for message in &expired {
            match self.outbox.discard(message).await {
                Ok(()) => removed += 1,
                Err(e) => warn!("[{}] Could not reap message {}: {}", message.account_id, message.id, e),
            }
        }
        if removed > 0 {
            debug!("Reaped {} expired messages", removed);
        }
        Ok(removed)
    }
}
