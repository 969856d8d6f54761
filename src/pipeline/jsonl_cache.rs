//! JSONL cache backend - appends every exported payload to a JSONL file

use super::cache::CacheWriter;
use super::error::CacheWriteError;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheLine {
    pub key: String,
    pub ttl_secs: u64,
    pub value: String,
    pub written_at: i64,
    pub expires_at: i64,
}

pub struct JsonlCacheWriter {
    path: PathBuf,
    writer: Mutex<BufWriter<std::fs::File>>,
}

impl JsonlCacheWriter {
    pub fn new(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        log::info!("📝 Writing exported payloads to: {}", path.display());
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CacheWriter for JsonlCacheWriter {
    async fn set_with_ttl(&self, key: &str, ttl_secs: u64, value: &str) -> Result<(), CacheWriteError> {
        let now = Utc::now();
        let ttl = i64::try_from(ttl_secs).unwrap_or(i64::MAX);
        let line = CacheLine {
            key: key.to_string(),
            ttl_secs,
            value: value.to_string(),
            written_at: now.timestamp(),
            expires_at: ChronoDuration::try_seconds(ttl)
                .and_then(|ttl| now.checked_add_signed(ttl))
                .map(|t| t.timestamp())
                .unwrap_or(i64::MAX),
        };

        let json = serde_json::to_string(&line)?;
        let mut writer = self.writer.lock().await;
        writeln!(writer, "{}", json)?;
        writer.flush()?;
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "JSONL"
    }
}
