use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::config::Config;
use crate::core::error::UpdateResult;

/// 包标识与版本号
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionInfo {
    pub package_identifier: String,
    pub version_code: i64,
}

impl VersionInfo {
    pub fn new(package_identifier: impl Into<String>, version_code: i64) -> Self {
        Self {
            package_identifier: package_identifier.into(),
            version_code,
        }
    }
}

impl fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.package_identifier, self.version_code)
    }
}

/// 判断候选包是否是当前安装应用的新版本
///
/// 只有包名相同且版本号严格更大时才返回 true，当前版本未知时视为不可用。
pub fn is_update_newer(candidate: &VersionInfo, current: Option<&VersionInfo>) -> bool {
    match current {
        Some(current) => {
            candidate.package_identifier == current.package_identifier
                && candidate.version_code > current.version_code
        }
        None => false,
    }
}

/// 读取安装包的版本信息
pub trait PackageInspector {
    fn inspect(&self, path: &Path) -> UpdateResult<VersionInfo>;
}

/// 查询已安装应用的版本信息
pub trait InstalledPackages {
    fn lookup(&self, package_id: &str) -> Option<VersionInfo>;
}

/// 当前应用自身，版本信息来自配置
#[derive(Debug, Clone)]
pub struct SelfPackage {
    info: Option<VersionInfo>,
}

impl SelfPackage {
    pub fn new(info: Option<VersionInfo>) -> Self {
        Self { info }
    }

    pub fn from_config(config: &Config) -> Self {
        if config.package_id.is_empty() {
            return Self::new(None);
        }
        Self::new(Some(VersionInfo::new(&config.package_id, config.version_code)))
    }
}

impl InstalledPackages for SelfPackage {
    fn lookup(&self, package_id: &str) -> Option<VersionInfo> {
        self.info
            .as_ref()
            .filter(|info| info.package_identifier == package_id)
            .cloned()
    }
}
