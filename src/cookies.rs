//! Per-platform cache of authenticated cookies
//!
//! Each platform keeps one JSON file (`<code>_cookies.json`) holding the
//! cookie string and the time it was saved. Entries older than the
//! configured age are treated as absent.

use crate::config::Platform;
use crate::env;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs as async_fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CookieCacheConfig {
    pub enabled: bool,
    /// Defaults to `./.harvester/cookies`
    pub cache_dir: Option<PathBuf>,
    pub max_age_days: u32,
}

impl Default for CookieCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_dir: None,
            max_age_days: 7,
        }
    }
}

impl CookieCacheConfig {
    pub fn resolve_dir(&self) -> PathBuf {
        match &self.cache_dir {
            Some(dir) => dir.clone(),
            None => env::cookies_dir_path(
                &std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            ),
        }
    }
}

/// On-disk cookie entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedCookies {
    pub platform: Platform,
    pub cookies: String,
    pub saved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CookieStatus {
    pub platform: Platform,
    pub cached: bool,
    pub valid: bool,
    pub saved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct CookieCache {
    dir: PathBuf,
    max_age: Duration,
}

impl CookieCache {
    pub fn new(dir: impl Into<PathBuf>, max_age_days: u32) -> Self {
        Self {
            dir: dir.into(),
            max_age: Duration::days(max_age_days as i64),
        }
    }

    /// `None` when caching is disabled
    pub fn from_config(config: &CookieCacheConfig) -> Option<Self> {
        config
            .enabled
            .then(|| Self::new(config.resolve_dir(), config.max_age_days))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_path(&self, platform: Platform) -> PathBuf {
        env::cookie_file_path(&self.dir, platform.short_code())
    }

    pub async fn save(&self, platform: Platform, cookies: &str) -> Result<()> {
        async_fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create cookie directory {:?}", self.dir))?;

        let entry = CachedCookies {
            platform,
            cookies: cookies.to_string(),
            saved_at: Utc::now(),
        };
        let data = serde_json::to_vec_pretty(&entry).context("Failed to serialize cookies")?;

        let path = self.file_path(platform);
        let temp_path = path.with_extension("json.tmp");
        let mut file = async_fs::File::create(&temp_path)
            .await
            .context("Failed to create cookie file")?;
        file.write_all(&data)
            .await
            .context("Failed to write cookie data")?;
        file.sync_all().await.context("Failed to sync cookie file")?;
        drop(file);

        async_fs::rename(&temp_path, &path)
            .await
            .context("Failed to move cookie file into place")?;

        info!("Saved {} cookies to {:?}", platform, path);
        Ok(())
    }

    async fn read_entry(&self, platform: Platform) -> Result<Option<CachedCookies>> {
        let path = self.file_path(platform);
        if !path.exists() {
            return Ok(None);
        }
        let content = async_fs::read(&path)
            .await
            .with_context(|| format!("Failed to read cookie file {:?}", path))?;
        let entry = serde_json::from_slice(&content)
            .with_context(|| format!("Failed to parse cookie file {:?}", path))?;
        Ok(Some(entry))
    }

    fn is_fresh(&self, entry: &CachedCookies) -> bool {
        Utc::now() - entry.saved_at <= self.max_age
    }

    /// Cached cookies of `platform` if present and not expired
    pub async fn load(&self, platform: Platform) -> Result<Option<String>> {
        match self.read_entry(platform).await? {
            Some(entry) if self.is_fresh(&entry) => {
                debug!("Loaded cached cookies for {}", platform);
                Ok(Some(entry.cookies))
            }
            Some(entry) => {
                debug!(
                    "Cached cookies for {} expired (saved {})",
                    platform, entry.saved_at
                );
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Remove the cache of one platform, or of all platforms. Returns the
    /// number of files removed.
    pub async fn clear(&self, platform: Option<Platform>) -> Result<usize> {
        let targets: Vec<Platform> = match platform {
            Some(p) => vec![p],
            None => Platform::ALL.to_vec(),
        };

        let mut removed = 0;
        for target in targets {
            let path = self.file_path(target);
            if path.exists() {
                async_fs::remove_file(&path)
                    .await
                    .with_context(|| format!("Failed to remove cookie file {:?}", path))?;
                removed += 1;
            }
        }

        if removed > 0 {
            info!("Cleared {} cookie file(s)", removed);
        }
        Ok(removed)
    }

    /// Platforms with a cookie file on disk
    pub async fn list(&self) -> Result<Vec<Platform>> {
        Ok(Platform::ALL
            .into_iter()
            .filter(|p| self.file_path(*p).exists())
            .collect())
    }

    pub async fn status(&self) -> Result<Vec<CookieStatus>> {
        let mut statuses = Vec::with_capacity(Platform::ALL.len());
        for platform in Platform::ALL {
            let status = match self.read_entry(platform).await {
                Ok(Some(entry)) => CookieStatus {
                    platform,
                    cached: true,
                    valid: self.is_fresh(&entry),
                    saved_at: Some(entry.saved_at),
                },
                Ok(None) => CookieStatus {
                    platform,
                    cached: false,
                    valid: false,
                    saved_at: None,
                },
                Err(e) => {
                    warn!("Unreadable cookie cache for {}: {}", platform, e);
                    CookieStatus {
                        platform,
                        cached: true,
                        valid: false,
                        saved_at: None,
                    }
                }
            };
            statuses.push(status);
        }
        Ok(statuses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_cache() -> (TempDir, CookieCache) {
        let dir = tempfile::tempdir().expect("Failed to create temp directory");
        let cache = CookieCache::new(dir.path().join("cookies"), 7);
        (dir, cache)
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let (_dir, cache) = create_test_cache();

        cache.save(Platform::Douyin, "sid=abc; token=xyz").await.unwrap();

        let loaded = cache.load(Platform::Douyin).await.unwrap();
        assert_eq!(loaded.as_deref(), Some("sid=abc; token=xyz"));
        assert!(cache.dir().join("dy_cookies.json").exists());
        assert_eq!(cache.load(Platform::Weibo).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expired_entry_is_ignored() {
        let (_dir, cache) = create_test_cache();
        cache.save(Platform::Xhs, "a=1").await.unwrap();

        let stale = CachedCookies {
            platform: Platform::Xhs,
            cookies: "a=1".to_string(),
            saved_at: Utc::now() - Duration::days(8),
        };
        let path = cache.file_path(Platform::Xhs);
        std::fs::write(&path, serde_json::to_vec(&stale).unwrap()).unwrap();

        assert_eq!(cache.load(Platform::Xhs).await.unwrap(), None);

        let status = cache.status().await.unwrap();
        let xhs = status.iter().find(|s| s.platform == Platform::Xhs).unwrap();
        assert!(xhs.cached);
        assert!(!xhs.valid);
    }

    #[tokio::test]
    async fn test_clear_and_list() {
        let (_dir, cache) = create_test_cache();
        cache.save(Platform::Bilibili, "b=1").await.unwrap();
        cache.save(Platform::Zhihu, "z=1").await.unwrap();

        assert_eq!(
            cache.list().await.unwrap(),
            vec![Platform::Bilibili, Platform::Zhihu]
        );

        assert_eq!(cache.clear(Some(Platform::Bilibili)).await.unwrap(), 1);
        assert_eq!(cache.list().await.unwrap(), vec![Platform::Zhihu]);

        assert_eq!(cache.clear(None).await.unwrap(), 1);
        assert!(cache.list().await.unwrap().is_empty());
    }

    #[test]
    fn test_disabled_config() {
        let config = CookieCacheConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(CookieCache::from_config(&config).is_none());
    }
}
