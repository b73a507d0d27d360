use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::core::error::UpdateError;
use crate::core::queue::JobId;

/// 上次下载任务 id 的键名
pub const LAST_DOWNLOAD_JOB_ID: &str = "lastDownloadJobId";

/// 进程级的持久化键值存储，每次写入立即落盘
pub struct Preferences {
    path: Option<PathBuf>,
    values: Mutex<Map<String, Value>>,
}

impl Preferences {
    /// 打开偏好设置文件，文件不存在或损坏时从空白开始
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let values = match fs::read_to_string(&path) {
            Ok(data) => serde_json::from_str::<Map<String, Value>>(&data).unwrap_or_else(|e| {
                log::warn!("偏好设置文件损坏 {:?}: {}", path, e);
                Map::new()
            }),
            Err(_) => Map::new(),
        };
        Self { path: Some(path), values: Mutex::new(values) }
    }

    pub fn in_memory() -> Self {
        Self { path: None, values: Mutex::new(Map::new()) }
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.get(key).and_then(Value::as_i64)
    }

    pub fn put_i64(&self, key: &str, value: i64) -> Result<(), UpdateError> {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.insert(key.to_string(), Value::from(value));
        self.persist(&values)
    }

    pub fn remove(&self, key: &str) -> Result<(), UpdateError> {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        if values.remove(key).is_some() {
            self.persist(&values)?;
        }
        Ok(())
    }

    pub fn last_download_job(&self) -> Option<JobId> {
        self.get_i64(LAST_DOWNLOAD_JOB_ID).and_then(JobId::from_persisted)
    }

    /// 记录新的下载任务，覆盖之前的 id
    pub fn set_last_download_job(&self, job_id: JobId) -> Result<(), UpdateError> {
        self.put_i64(LAST_DOWNLOAD_JOB_ID, job_id.as_persisted())
    }

    pub fn clear_last_download_job(&self) -> Result<(), UpdateError> {
        self.remove(LAST_DOWNLOAD_JOB_ID)
    }

    fn persist(&self, values: &Map<String, Value>) -> Result<(), UpdateError> {
        let Some(path) = &self.path else { return Ok(()) };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(values)
            .map_err(|e| UpdateError::Unknown(format!("序列化偏好设置失败: {}", e)))?;
        fs::write(path, json)?;
        Ok(())
    }
}
