// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 持久化缓存
//!
//! 每个条目对应缓存目录中的一个文件，文件名为 `{过期时间戳毫秒}-{摘要}`，内容为 JSON。
//! 键先经过 SHA-256 摘要，任意字符串都会确定地映射到同一个文件名。
//! 读取时扫描目录，顺带删除扫描到的过期文件；损坏或无法读取的文件按未命中处理。
//! 缓存目录不存在时，无论读取还是写入都会先创建它。

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use chrono::Utc;
use log::{debug, warn};
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};
use tokio::{fs, sync::Mutex};

use crate::exception::Exception;

pub struct DiskCache {
    directory: PathBuf,
    max_age: Duration,
    /// 同一进程内串行化目录扫描与写入
    lock: Mutex<()>,
}

impl DiskCache {
    pub fn new(directory: impl Into<PathBuf>, max_age: Duration) -> Self {
        Self {
            directory: directory.into(),
            max_age,
            lock: Mutex::new(()),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn digest(id: &str) -> String {
        hex::encode(Sha256::digest(id.as_bytes()))
    }

    pub async fn get<T: DeserializeOwned>(&self, id: &str) -> Option<T> {
        self.get_at(id, Utc::now().timestamp_millis()).await
    }

    pub async fn set<T: Serialize>(&self, id: &str, value: &T) -> Result<(), Exception> {
        self.set_at(id, value, Utc::now().timestamp_millis()).await
    }

    pub(crate) async fn get_at<T: DeserializeOwned>(&self, id: &str, now_ms: i64) -> Option<T> {
        let digest = Self::digest(id);
        let _guard = self.lock.lock().await;

        if let Err(e) = fs::create_dir_all(&self.directory).await {
            warn!("创建缓存目录{}失败: {}", self.directory.display(), e);
            return None;
        }
        let mut entries = match fs::read_dir(&self.directory).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("读取缓存目录{}失败: {}", self.directory.display(), e);
                return None;
            }
        };

        let mut found = None;
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!("扫描缓存目录失败: {}", e);
                    break;
                }
            };
            let file_name = entry.file_name().to_string_lossy().to_string();
            let (expires_at, entry_digest) = match parse_file_name(&file_name) {
                Some(parsed) => parsed,
                None => continue,
            };

            if expires_at <= now_ms {
                debug!("删除过期缓存文件：{}", file_name);
                if let Err(e) = fs::remove_file(entry.path()).await {
                    warn!("删除过期缓存文件{}失败: {}", file_name, e);
                }
                continue;
            }
            if entry_digest == digest && found.is_none() {
                found = Some(entry.path());
            }
        }

        let path = found?;
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) => {
                warn!("读取缓存文件{}失败，按未命中处理: {}", path.display(), e);
                return None;
            }
        };
        match serde_json::from_str(&content) {
            Ok(value) => {
                debug!("持久化缓存命中：{}", id);
                Some(value)
            }
            Err(e) => {
                warn!("缓存文件{}已损坏，按未命中处理: {}", path.display(), e);
                None
            }
        }
    }

    pub(crate) async fn set_at<T: Serialize>(
        &self,
        id: &str,
        value: &T,
        now_ms: i64,
    ) -> Result<(), Exception> {
        let digest = Self::digest(id);
        let content = serde_json::to_string(value).map_err(|e| Exception::Cache(e.to_string()))?;
        let _guard = self.lock.lock().await;

        fs::create_dir_all(&self.directory)
            .await
            .map_err(|e| Exception::Cache(format!("{}: {}", self.directory.display(), e)))?;

        // 同一个键只保留最新的文件
        let mut entries = fs::read_dir(&self.directory)
            .await
            .map_err(|e| Exception::Cache(e.to_string()))?;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let file_name = entry.file_name().to_string_lossy().to_string();
            if let Some((_, entry_digest)) = parse_file_name(&file_name) {
                if entry_digest == digest {
                    let _ = fs::remove_file(entry.path()).await;
                }
            }
        }

        let expires_at = now_ms + self.max_age.as_millis() as i64;
        let path = self.directory.join(format!("{}-{}", expires_at, digest));
        fs::write(&path, content)
            .await
            .map_err(|e| Exception::Cache(format!("{}: {}", path.display(), e)))?;
        debug!("写入持久化缓存：{}", path.display());
        Ok(())
    }
}

fn parse_file_name(file_name: &str) -> Option<(i64, &str)> {
    let (timestamp, digest) = file_name.split_once('-')?;
    let timestamp = timestamp.parse().ok()?;
    Some((timestamp, digest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn cache_in(dir: &Path) -> DiskCache {
        DiskCache::new(dir.join(".cache"), Duration::from_millis(60_000))
    }

    #[test]
    fn test_digest_is_deterministic() {
        assert_eq!(DiskCache::digest("/blog?page=2"), DiskCache::digest("/blog?page=2"));
        assert_ne!(DiskCache::digest("/blog?page=2"), DiskCache::digest("/blog?page=3"));
        assert_eq!(DiskCache::digest("").len(), 64);
    }

    #[test]
    fn test_parse_file_name() {
        assert_eq!(parse_file_name("1700-abcdef"), Some((1700, "abcdef")));
        assert_eq!(parse_file_name("abcdef"), None);
        assert_eq!(parse_file_name("x-abcdef"), None);
    }

    #[tokio::test]
    async fn test_missing_directory_is_created_on_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path());
        assert!(!cache.directory().exists());

        assert_eq!(cache.get::<Value>("key").await, None);
        assert!(cache.directory().is_dir());

        cache.set("key", &json!({"a": 1})).await.unwrap();
        assert!(cache.directory().exists());
        assert_eq!(cache.get::<Value>("key").await, Some(json!({"a": 1})));
    }

    #[tokio::test]
    async fn test_file_name_format() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path());
        cache.set_at("key", &json!(1), 1_000).await.unwrap();

        let names: Vec<String> = std::fs::read_dir(cache.directory())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec![format!("61000-{}", DiskCache::digest("key"))]);
    }

    #[tokio::test]
    async fn test_expired_entry_is_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path());
        cache.set_at("key", &json!("old"), 0).await.unwrap();

        assert_eq!(cache.get_at::<Value>("key", 59_999).await, Some(json!("old")));
        assert_eq!(cache.get_at::<Value>("key", 60_000).await, None);
        assert_eq!(std::fs::read_dir(cache.directory()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_overwrite_keeps_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path());
        cache.set_at("key", &json!(1), 0).await.unwrap();
        cache.set_at("key", &json!(2), 10).await.unwrap();

        assert_eq!(std::fs::read_dir(cache.directory()).unwrap().count(), 1);
        assert_eq!(cache.get_at::<Value>("key", 20).await, Some(json!(2)));
    }

    #[tokio::test]
    async fn test_corrupt_file_is_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path());
        std::fs::create_dir_all(cache.directory()).unwrap();
        let name = format!("{}-{}", i64::MAX, DiskCache::digest("key"));
        std::fs::write(cache.directory().join(name), "{not json").unwrap();

        assert_eq!(cache.get::<Value>("key").await, None);
    }
}
