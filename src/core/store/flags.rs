use anyhow::Result;
use rusqlite::{OptionalExtension, params};

use super::{FLAG_PAUSED, FLAG_REWARD_IMG_1, FLAG_REWARD_IMG_2, Store, now_ts};

impl Store {
    pub async fn get_flag(&self, key: &str) -> Result<Option<String>> {
        let db = self.db.lock().await;
        Ok(db
            .query_row(
                "SELECT value FROM system_flags WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub async fn set_flag(&self, key: &str, value: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO system_flags (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now_ts()],
        )?;
        Ok(())
    }

    pub async fn is_paused(&self) -> Result<bool> {
        Ok(self.get_flag(FLAG_PAUSED).await?.as_deref() == Some("1"))
    }

    pub async fn set_paused(&self, paused: bool) -> Result<()> {
        self.set_flag(FLAG_PAUSED, if paused { "1" } else { "0" }).await
    }

    /// The most recent reward artwork, shared across accounts.
    pub async fn reward_images(&self) -> Result<Vec<String>> {
        let mut images = Vec::new();
        for key in [FLAG_REWARD_IMG_1, FLAG_REWARD_IMG_2] {
            if let Some(value) = self.get_flag(key).await?
                && !value.is_empty()
            {
                images.push(value);
            }
        }
        Ok(images)
    }

    /// Stores up to two references; an empty slice leaves the flags alone.
    /// A single image clears the second slot.
    pub async fn set_reward_images(&self, images: &[String]) -> Result<()> {
        if images.is_empty() {
            return Ok(());
        }
        for (i, key) in [FLAG_REWARD_IMG_1, FLAG_REWARD_IMG_2].iter().enumerate() {
            let value = images.get(i).map(String::as_str).unwrap_or_default();
            self.set_flag(key, value).await?;
        }
        Ok(())
    }
}
