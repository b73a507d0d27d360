//! Update: 版本比较、安装包解析、安装权限申请与更新流程
//!
//! - `version`: 版本比较以及读取版本信息的接口
//! - `apk`: 从 APK 的二进制 manifest 中读取包名和版本号
//! - `platform`: 设备 API 级别与安装权限策略
//! - `gate`: 安装权限申请
//! - `install`: 安装 intent 与派发
//! - `orchestrator`: 串起以上各步的更新流程

pub mod version;
pub mod apk;
pub mod platform;
pub mod gate;
pub mod install;
pub mod orchestrator;

pub use apk::ApkInspector;
pub use gate::{ConsentPrompt, GateOutcome, GateState, InstallPermissionGate, PermissionRequestContext, PromptAnswer};
pub use install::{ActivityManagerLauncher, AddressingStrategy, InstallIntent, InstallLauncher, IntentFlag};
pub use orchestrator::{UpdateNotifier, UpdateOrchestrator, UpdateOutcome, UpdatePlan, UpdateServices, UpdateState};
pub use platform::{DevicePolicy, InstallPolicy};
pub use version::{is_update_newer, InstalledPackages, PackageInspector, SelfPackage, VersionInfo};
