use thiserror::Error;
use std::io;
use std::path::PathBuf;

use crate::core::queue::JobId;

/// 失败分类，对应更新流程中的四类错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// 传输过程中的暂时性失败，下次检查时丢弃并重新下载
    TransientTransfer,
    /// 安装包元数据不可读，视为产物不可用
    MetadataUnreadable,
    /// 底层下载服务不可用，直接上报
    ServiceMissing,
    Other,
}

#[derive(Error, Debug, Clone)]
pub enum UpdateError {
    #[error("网络错误: {0}")]
    NetworkError(String),

    #[error("IO错误: {0}")]
    IoError(String),

    #[error("无效的URL: {0}")]
    InvalidUrl(String),

    #[error("下载超时")]
    Timeout,

    #[error("下载被取消")]
    Cancelled,

    #[error("文件大小不匹配: 预期 {expected} 字节, 实际 {actual} 字节")]
    SizeMismatch {
        expected: u64,
        actual: u64,
    },

    #[error("服务器错误: {0}")]
    ServerError(String),

    #[error("下载服务不可用: {0}")]
    ServiceUnavailable(String),

    #[error("下载任务不存在: {0}")]
    JobNotFound(JobId),

    #[error("无法读取安装包信息 {path:?}: {reason}")]
    Metadata {
        path: PathBuf,
        reason: String,
    },

    #[error("配置错误: {0}")]
    Config(String),

    #[error("无法启动系统操作: {0}")]
    Launch(String),

    #[error("未知错误: {0}")]
    Unknown(String),
}

impl UpdateError {
    pub fn is_retryable(&self) -> bool {
        match self {
            UpdateError::NetworkError(_) | UpdateError::Timeout => true,
            // 只有 5xx 才值得重试
            UpdateError::ServerError(msg) => {
                msg.contains("500") || msg.contains("502") || msg.contains("503") ||
                msg.contains("504")
            },
            _ => false,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            UpdateError::InvalidUrl(_) |
            UpdateError::ServiceUnavailable(_) |
            UpdateError::Config(_)
        )
    }

    pub fn failure_class(&self) -> FailureClass {
        match self {
            UpdateError::NetworkError(_) |
            UpdateError::Timeout |
            UpdateError::ServerError(_) |
            UpdateError::SizeMismatch { .. } |
            UpdateError::Cancelled => FailureClass::TransientTransfer,
            UpdateError::Metadata { .. } => FailureClass::MetadataUnreadable,
            UpdateError::ServiceUnavailable(_) => FailureClass::ServiceMissing,
            _ => FailureClass::Other,
        }
    }

    pub fn metadata(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        UpdateError::Metadata { path: path.into(), reason: reason.into() }
    }
}

impl From<io::Error> for UpdateError {
    fn from(error: io::Error) -> Self {
        UpdateError::IoError(error.to_string())
    }
}

impl From<actix::MailboxError> for UpdateError {
    fn from(error: actix::MailboxError) -> Self {
        UpdateError::ServiceUnavailable(error.to_string())
    }
}

impl From<String> for UpdateError {
    fn from(error: String) -> Self {
        UpdateError::Unknown(error)
    }
}

impl From<&str> for UpdateError {
    fn from(error: &str) -> Self {
        UpdateError::Unknown(error.to_string())
    }
}

pub type UpdateResult<T> = Result<T, UpdateError>;
