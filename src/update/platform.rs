use std::process::Command;

use crate::config::Config;

/// 从这个 API 级别开始，安装前需要用户允许未知来源
pub const CONSENT_MIN_API_LEVEL: u32 = 26;

/// 无法探测时按旧平台处理
pub const FALLBACK_API_LEVEL: u32 = 23;

/// 安装权限策略
pub trait InstallPolicy {
    /// 当前平台是否需要用户授权
    fn requires_consent(&self) -> bool;

    /// 是否已经拥有安装权限
    fn has_permission(&self) -> bool;
}

/// 设备信息与安装策略
#[derive(Debug)]
pub struct DevicePolicy {
    api_level: u32,
    unknown_sources_allowed: bool,
}

impl DevicePolicy {
    pub fn new(api_level: u32, unknown_sources_allowed: bool) -> Self {
        Self {
            api_level,
            unknown_sources_allowed,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(resolve_api_level(config.api_level), config.unknown_sources_allowed)
    }

    pub fn api_level(&self) -> u32 {
        self.api_level
    }
}

impl InstallPolicy for DevicePolicy {
    fn requires_consent(&self) -> bool {
        self.api_level >= CONSENT_MIN_API_LEVEL
    }

    fn has_permission(&self) -> bool {
        self.unknown_sources_allowed
    }
}

/// 配置为 0 时探测设备 API 级别
pub fn resolve_api_level(configured: u32) -> u32 {
    if configured != 0 {
        return configured;
    }
    match probe_api_level() {
        Some(level) => {
            log::info!("探测到设备 API 级别: {}", level);
            level
        }
        None => {
            log::warn!("无法探测设备 API 级别，按 {} 处理", FALLBACK_API_LEVEL);
            FALLBACK_API_LEVEL
        }
    }
}

fn probe_api_level() -> Option<u32> {
    let output = Command::new("getprop").arg("ro.build.version.sdk").output().ok()?;
    if !output.status.success() {
        return None;
    }
    parse_api_level(&String::from_utf8_lossy(&output.stdout))
}

fn parse_api_level(raw: &str) -> Option<u32> {
    raw.trim().parse().ok().filter(|level| *level > 0)
}
