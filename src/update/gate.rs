//! 安装权限申请
//!
//! 同一时间只保留一个申请。新的申请会顶替旧的，被顶替的申请得到
//! `GateOutcome::Superseded`，每个申请只会收到一个结果。

use async_trait::async_trait;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use tokio::sync::oneshot;
use uuid::Uuid;

use super::install::InstallLauncher;
use super::platform::InstallPolicy;

pub const DEFAULT_PERMISSION_MESSAGE: &str =
    "为了正常升级，请点击设置按钮，允许安装未知来源应用，本功能只限用于版本升级";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Idle,
    AwaitingUserConsent,
    Granted,
    Denied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    Granted,
    Denied,
    /// 被后来的申请顶替
    Superseded,
}

impl fmt::Display for GateOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateOutcome::Granted => write!(f, "已授权"),
            GateOutcome::Denied => write!(f, "未授权"),
            GateOutcome::Superseded => write!(f, "已被新的申请取代"),
        }
    }
}

/// 用户在弹窗中的选择
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptAnswer {
    OpenSettings,
    Cancel,
}

/// 一次权限申请的上下文
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionRequestContext {
    pub request_id: Uuid,
    pub icon: Option<String>,
    pub message: String,
}

impl PermissionRequestContext {
    pub fn new(icon: Option<String>, message: Option<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            icon,
            message: message
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_PERMISSION_MESSAGE.to_string()),
        }
    }
}

/// 向用户申请安装权限的弹窗
#[async_trait(?Send)]
pub trait ConsentPrompt {
    async fn ask(&self, request: &PermissionRequestContext) -> PromptAnswer;

    /// 打开系统设置页之后，询问用户是否已经允许
    async fn confirm_settings(&self, request: &PermissionRequestContext) -> bool;
}

struct PendingRequest {
    request_id: Uuid,
    resolve: oneshot::Sender<GateOutcome>,
}

/// 申请的 future 被丢弃时释放仍属于它的槽位
struct SlotGuard<'a> {
    gate: &'a InstallPermissionGate,
    request_id: Uuid,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.gate.abandon(self.request_id);
    }
}

pub struct InstallPermissionGate {
    policy: Rc<dyn InstallPolicy>,
    prompt: Rc<dyn ConsentPrompt>,
    launcher: Rc<dyn InstallLauncher>,
    package_id: String,
    icon: Option<String>,
    message: Option<String>,
    state: Cell<GateState>,
    slot: RefCell<Option<PendingRequest>>,
}

impl InstallPermissionGate {
    pub fn new(
        policy: Rc<dyn InstallPolicy>,
        prompt: Rc<dyn ConsentPrompt>,
        launcher: Rc<dyn InstallLauncher>,
        package_id: impl Into<String>,
    ) -> Self {
        Self {
            policy,
            prompt,
            launcher,
            package_id: package_id.into(),
            icon: None,
            message: None,
            state: Cell::new(GateState::Idle),
            slot: RefCell::new(None),
        }
    }

    pub fn with_icon(mut self, icon: Option<String>) -> Self {
        self.icon = icon;
        self
    }

    pub fn with_message(mut self, message: Option<String>) -> Self {
        self.message = message;
        self
    }

    pub fn state(&self) -> GateState {
        self.state.get()
    }

    /// 申请安装权限，返回这次申请的唯一结果
    pub async fn request_permission(&self) -> GateOutcome {
        if !self.policy.requires_consent() || self.policy.has_permission() {
            log::debug!("无需申请安装权限");
            self.state.set(GateState::Granted);
            self.state.set(GateState::Idle);
            return GateOutcome::Granted;
        }

        let context = PermissionRequestContext::new(self.icon.clone(), self.message.clone());
        let (tx, mut rx) = oneshot::channel();
        let previous = self.slot.borrow_mut().replace(PendingRequest {
            request_id: context.request_id,
            resolve: tx,
        });
        if let Some(previous) = previous {
            log::warn!("权限申请 {} 被新的申请取代", previous.request_id);
            let _ = previous.resolve.send(GateOutcome::Superseded);
        }
        self.state.set(GateState::AwaitingUserConsent);
        log::info!("等待用户授权安装 ({})", context.request_id);
        let _guard = SlotGuard { gate: self, request_id: context.request_id };

        let outcome = tokio::select! {
            outcome = &mut rx => outcome.unwrap_or(GateOutcome::Superseded),
            decided = self.run_prompt(&context) => {
                self.resolve(context.request_id, decided);
                rx.await.unwrap_or(GateOutcome::Superseded)
            }
        };
        log::info!("权限申请 {} 结果: {}", context.request_id, outcome);
        outcome
    }

    async fn run_prompt(&self, context: &PermissionRequestContext) -> GateOutcome {
        match self.prompt.ask(context).await {
            PromptAnswer::Cancel => GateOutcome::Denied,
            PromptAnswer::OpenSettings => {
                if let Err(e) = self.launcher.open_unknown_sources_settings(&self.package_id) {
                    log::error!("打开未知来源设置失败: {}", e);
                }
                let confirmed = self.prompt.confirm_settings(context).await;
                if confirmed || self.policy.has_permission() {
                    GateOutcome::Granted
                } else {
                    GateOutcome::Denied
                }
            }
        }
    }

    fn abandon(&self, request_id: Uuid) {
        let mut slot = self.slot.borrow_mut();
        if slot.as_ref().map(|pending| pending.request_id) == Some(request_id) {
            slot.take();
            self.state.set(GateState::Idle);
            log::info!("权限申请 {} 已放弃", request_id);
        }
    }

    /// 只有仍占据槽位的申请才能交付结果
    fn resolve(&self, request_id: Uuid, outcome: GateOutcome) {
        let mut slot = self.slot.borrow_mut();
        if slot.as_ref().map(|pending| pending.request_id) != Some(request_id) {
            return;
        }
        if let Some(pending) = slot.take() {
            self.state.set(match outcome {
                GateOutcome::Granted => GateState::Granted,
                _ => GateState::Denied,
            });
            let _ = pending.resolve.send(outcome);
            self.state.set(GateState::Idle);
        }
    }
}
