//! Core: 下载队列、任务跟踪、持久化偏好与错误处理等核心逻辑模块

pub mod error;
pub mod prefs;
pub mod queue;
pub mod tracker;

pub use error::{FailureClass, UpdateError, UpdateResult};
pub use prefs::Preferences;
pub use tracker::{ArtifactLocation, CompletionSignal, CompletionSubscription, TransferService, TransferTracker};
