use std::path::PathBuf;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VideoEntry {
    pub filename: String,
    #[serde(rename = "originalName")]
    pub original_name: String,
    pub size: u64,
    #[serde(rename = "addedAt")]
    pub added_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Channel {
    pub id: u32,
    pub name: String,
    pub enabled: bool,
    pub videos: Vec<VideoEntry>,
    #[serde(rename = "scheduledStart", default, skip_serializing_if = "Option::is_none")]
    pub scheduled_start: Option<DateTime<Utc>>,
    #[serde(rename = "startedAt", default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

impl Channel {
    fn new(id: u32, name: String) -> Self {
        Self {
            id,
            name,
            enabled: true,
            videos: Vec::new(),
            scheduled_start: None,
            started_at: None,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChannelSet {
    pub channels: Vec<Channel>,
}

/// Channel configuration persisted as a single JSON document.
///
/// Every operation re-reads the file so that edits made by other
/// processes are picked up; mutations are serialized behind a lock.
pub struct Store {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl Store {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    pub async fn load(&self) -> anyhow::Result<ChannelSet> {
        match tokio::fs::read(&self.path).await {
            Ok(raw) => Ok(serde_json::from_slice(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let set = default_channels();
                self.save(&set).await?;
                Ok(set)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, set: &ChannelSet) -> anyhow::Result<()> {
        let raw = serde_json::to_vec_pretty(set)?;
        tokio::fs::write(&self.path, raw).await?;
        Ok(())
    }

    pub async fn channels(&self) -> anyhow::Result<Vec<Channel>> {
        Ok(self.load().await?.channels)
    }

    pub async fn channel(&self, id: u32) -> anyhow::Result<Option<Channel>> {
        Ok(self.load().await?.channels.into_iter().find(|c| c.id == id))
    }

    pub async fn create(&self, name: Option<String>) -> anyhow::Result<Channel> {
        let _guard = self.write_lock.lock().await;
        let mut set = self.load().await?;
        let id = set.channels.iter().map(|c| c.id).max().unwrap_or(0) + 1;
        let channel = Channel::new(id, name.unwrap_or_else(|| format!("Channel {}", id)));
        set.channels.push(channel.clone());
        self.save(&set).await?;
        Ok(channel)
    }

    /// Applies `f` to the channel and persists the result. Returns the
    /// updated channel, or `None` when the id is unknown.
    pub async fn update<F>(&self, id: u32, f: F) -> anyhow::Result<Option<Channel>>
    where
        F: FnOnce(&mut Channel),
    {
        let _guard = self.write_lock.lock().await;
        let mut set = self.load().await?;
        let Some(channel) = set.channels.iter_mut().find(|c| c.id == id) else {
            return Ok(None);
        };
        f(channel);
        let updated = channel.clone();
        self.save(&set).await?;
        Ok(Some(updated))
    }

    pub async fn delete(&self, id: u32) -> anyhow::Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut set = self.load().await?;
        let before = set.channels.len();
        set.channels.retain(|c| c.id != id);
        let removed = set.channels.len() < before;
        if removed {
            self.save(&set).await?;
        }
        Ok(removed)
    }

    pub async fn set_started_at(&self, id: u32, at: Option<DateTime<Utc>>) -> anyhow::Result<()> {
        self.update(id, |c| c.started_at = at).await?;
        Ok(())
    }

    /// Removes a video file from every channel referencing it. Returns
    /// the channels that changed, in their updated form.
    pub async fn detach_video(&self, filename: &str) -> anyhow::Result<Vec<Channel>> {
        let _guard = self.write_lock.lock().await;
        let mut set = self.load().await?;
        let mut touched = Vec::new();
        for channel in &mut set.channels {
            let before = channel.videos.len();
            channel.videos.retain(|v| v.filename != filename);
            if channel.videos.len() < before {
                touched.push(channel.clone());
            }
        }
        if !touched.is_empty() {
            self.save(&set).await?;
        }
        Ok(touched)
    }
}

fn default_channels() -> ChannelSet {
    ChannelSet {
        channels: (1..=6)
            .map(|id| Channel::new(id, format!("Channel {}", id)))
            .collect(),
    }
}

pub fn store() -> &'static Store {
    static STORE: LazyLock<Store> = LazyLock::new(|| Store::new(config::config().channels_file()));
    &STORE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path().join("channels-config.json"));
        (dir, store)
    }

    #[tokio::test]
    async fn seeds_default_channels_on_first_load() {
        let (_dir, store) = temp_store();
        let set = store.load().await.unwrap();
        assert_eq!(set.channels.len(), 6);
        assert!(set.channels.iter().all(|c| c.enabled && c.videos.is_empty()));
    }

    #[tokio::test]
    async fn create_assigns_next_id() {
        let (_dir, store) = temp_store();
        store.load().await.unwrap();
        let channel = store.create(Some("Movies".into())).await.unwrap();
        assert_eq!(channel.id, 7);
        assert_eq!(channel.name, "Movies");
        assert!(store.channel(7).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn update_and_delete_roundtrip() {
        let (_dir, store) = temp_store();
        store.load().await.unwrap();
        let updated = store
            .update(2, |c| {
                c.videos.push(VideoEntry {
                    filename: "a.mp4".into(),
                    original_name: "a.mp4".into(),
                    size: 123,
                    added_at: Utc::now(),
                });
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.videos.len(), 1);

        assert!(store.delete(2).await.unwrap());
        assert!(store.channel(2).await.unwrap().is_none());
        assert!(!store.delete(2).await.unwrap());
    }

    #[tokio::test]
    async fn started_at_set_and_cleared() {
        let (_dir, store) = temp_store();
        store.load().await.unwrap();
        store.set_started_at(1, Some(Utc::now())).await.unwrap();
        assert!(store.channel(1).await.unwrap().unwrap().started_at.is_some());
        store.set_started_at(1, None).await.unwrap();
        assert!(store.channel(1).await.unwrap().unwrap().started_at.is_none());
    }

    #[tokio::test]
    async fn unknown_channel_update_is_none() {
        let (_dir, store) = temp_store();
        store.load().await.unwrap();
        assert!(store.update(99, |_| ()).await.unwrap().is_none());
    }
}
