use actix::Recipient;
use bytes::Bytes;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::error::UpdateError;
use super::messages::TransferProgress;
use super::retry::{RetryContext, RetryStrategy};
use super::state::JobId;
use super::util::{BufferManager, SpeedLimiter};

const WRITE_BUFFER_SIZE: usize = 256 * 1024;
const PROGRESS_INTERVAL: Duration = Duration::from_millis(200);
const PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// 一次传输需要的全部参数
#[derive(Debug, Clone)]
pub struct TransferSpec {
    pub job_id: JobId,
    pub url: String,
    pub save_path: PathBuf,
    pub user_agent: String,
    pub timeout: Duration,
    pub speed_limit_kb: u64,
    pub retry: RetryStrategy,
}

/// 传输的暂停与取消开关，由队列持有一份
#[derive(Debug, Clone, Default)]
pub struct TransferControl {
    pub paused: Arc<AtomicBool>,
    pub cancelled: Arc<AtomicBool>,
}

impl TransferControl {
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// 下载过程中使用的临时文件，成功后改名为保存路径
pub fn partial_path(save_path: &Path, job_id: JobId) -> PathBuf {
    let mut name = save_path.as_os_str().to_os_string();
    name.push(format!(".{}.part", job_id.get()));
    PathBuf::from(name)
}

/// 带重试的下载，返回写入的字节数
pub async fn run_with_retry(
    spec: TransferSpec,
    control: TransferControl,
    progress: Recipient<TransferProgress>,
) -> Result<u64, UpdateError> {
    let mut retry_context = RetryContext::new(spec.retry.clone());
    loop {
        if control.is_cancelled() {
            return Err(UpdateError::Cancelled);
        }
        match perform_transfer(&spec, &control, &progress).await {
            Ok(written) => {
                log::info!("下载完成 {}: {} 字节", spec.job_id, written);
                return Ok(written);
            }
            Err(error) => {
                if control.is_cancelled() {
                    return Err(UpdateError::Cancelled);
                }
                if !retry_context.should_retry(&error) {
                    log::error!("下载失败 {}: {}", spec.job_id, error);
                    return Err(error);
                }
                let delay = retry_context.increment_retry(error.clone());
                log::warn!(
                    "下载出错 {}: {}，{:.1} 秒后第 {} 次重试",
                    spec.job_id,
                    error,
                    delay.as_secs_f64(),
                    retry_context.retry_count
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// 执行单次下载，写入临时文件，成功后改名为保存路径
async fn perform_transfer(
    spec: &TransferSpec,
    control: &TransferControl,
    progress: &Recipient<TransferProgress>,
) -> Result<u64, UpdateError> {
    let partial = partial_path(&spec.save_path, spec.job_id);
    let result = fetch_to(spec, control, progress, &partial).await;
    let result = result.and_then(|written| {
        // 改名前再检查一次取消
        if control.is_cancelled() {
            return Err(UpdateError::Cancelled);
        }
        std::fs::rename(&partial, &spec.save_path)?;
        Ok(written)
    });
    if result.is_err() {
        let _ = std::fs::remove_file(&partial);
    }
    result
}

async fn fetch_to(
    spec: &TransferSpec,
    control: &TransferControl,
    progress: &Recipient<TransferProgress>,
    partial: &Path,
) -> Result<u64, UpdateError> {
    let client = awc::Client::builder().timeout(spec.timeout).finish();
    let mut response = client
        .get(&spec.url)
        .insert_header(("User-Agent", spec.user_agent.as_str()))
        .send()
        .await
        .map_err(|e| match e {
            awc::error::SendRequestError::Timeout => UpdateError::Timeout,
            other => UpdateError::NetworkError(other.to_string()),
        })?;

    if !response.status().is_success() {
        return Err(UpdateError::ServerError(response.status().to_string()));
    }
    // 等待响应期间可能已被取代或移除，此时不能再动任何文件
    if control.is_cancelled() {
        return Err(UpdateError::Cancelled);
    }

    let total = response
        .headers()
        .get("content-length")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0);

    let mut writer = BufferManager::create(partial, WRITE_BUFFER_SIZE)?;
    let mut limiter = SpeedLimiter::from_kb(spec.speed_limit_kb);
    let mut last_report = Instant::now();

    progress.do_send(TransferProgress { job_id: spec.job_id, downloaded: 0, total });

    while let Some(chunk) = response.next().await {
        if control.is_cancelled() {
            return Err(UpdateError::Cancelled);
        }
        while control.is_paused() {
            if control.is_cancelled() {
                return Err(UpdateError::Cancelled);
            }
            tokio::time::sleep(PAUSE_POLL_INTERVAL).await;
        }

        let bytes: Bytes = chunk.map_err(|e| UpdateError::NetworkError(format!("网络流错误: {}", e)))?;
        if let Some(limiter) = limiter.as_mut() {
            let wait = limiter.delay_for(bytes.len() as u64);
            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }
        }
        writer.write(&bytes)?;

        if last_report.elapsed() >= PROGRESS_INTERVAL {
            progress.do_send(TransferProgress {
                job_id: spec.job_id,
                downloaded: writer.total_accepted(),
                total,
            });
            last_report = Instant::now();
        }
    }

    writer.flush()?;
    let written = writer.total_written();
    progress.do_send(TransferProgress { job_id: spec.job_id, downloaded: written, total });

    if total > 0 && written != total {
        return Err(UpdateError::SizeMismatch { expected: total, actual: written });
    }
    Ok(written)
}
