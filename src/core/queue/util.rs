use std::io::Write;
use std::path::Path;
use std::time::{Duration, Instant};

use crate::core::error::UpdateError;

/// 带缓冲的文件写入器，创建时截断目标文件
pub struct BufferManager {
    buffer: Vec<u8>,
    capacity: usize,
    file_handle: std::fs::File,
    total_written: u64,
}

impl BufferManager {
    pub fn create(file_path: &Path, capacity: usize) -> Result<Self, UpdateError> {
        if let Some(parent) = file_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file_handle = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(file_path)?;

        Ok(Self {
            buffer: Vec::with_capacity(capacity),
            capacity,
            file_handle,
            total_written: 0,
        })
    }

    pub fn write(&mut self, data: &[u8]) -> Result<(), UpdateError> {
        let mut rest = data;
        while !rest.is_empty() {
            let space_left = self.capacity - self.buffer.len();
            let take = space_left.min(rest.len());
            self.buffer.extend_from_slice(&rest[..take]);
            rest = &rest[take..];

            if self.buffer.len() == self.capacity {
                self.flush()?;
            }
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), UpdateError> {
        if !self.buffer.is_empty() {
            self.file_handle.write_all(&self.buffer)?;
            self.total_written += self.buffer.len() as u64;
            self.buffer.clear();
        }
        self.file_handle.flush()?;
        Ok(())
    }

    /// 已落盘的字节数
    pub fn total_written(&self) -> u64 {
        self.total_written
    }

    /// 包含缓冲区中尚未落盘部分的字节数
    pub fn total_accepted(&self) -> u64 {
        self.total_written + self.buffer.len() as u64
    }
}

/// 令牌桶限速器，每个窗口补满一次
pub struct SpeedLimiter {
    max_speed: u64, // B/s
    window: Duration,
    tokens: u64,
    last_refill: Instant,
}

impl SpeedLimiter {
    pub fn new(max_speed: u64) -> Self {
        Self {
            max_speed,
            window: Duration::from_secs(1),
            tokens: max_speed,
            last_refill: Instant::now(),
        }
    }

    pub fn from_kb(limit_kb: u64) -> Option<Self> {
        (limit_kb > 0).then(|| Self::new(limit_kb * 1024))
    }

    fn refill(&mut self, now: Instant) {
        if now.duration_since(self.last_refill) >= self.window {
            self.tokens = self.max_speed;
            self.last_refill = now;
        }
    }

    /// 消耗 `bytes` 个令牌，返回调用方需要等待的时间
    ///
    /// 令牌不足时当前窗口内的余量清零，超出部分记到下一个窗口。
    pub fn delay_for(&mut self, bytes: u64) -> Duration {
        let now = Instant::now();
        self.refill(now);
        if self.tokens >= bytes {
            self.tokens -= bytes;
            return Duration::ZERO;
        }
        let overflow = bytes - self.tokens;
        self.tokens = 0;
        let remaining_window = self.window.saturating_sub(now.duration_since(self.last_refill));
        let extra_windows = overflow as f64 / self.max_speed as f64;
        remaining_window + self.window.mul_f64(extra_windows)
    }
}
