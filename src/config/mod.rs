use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::error::UpdateError;
use crate::core::queue::RetryStrategy;
use crate::utils::validator;

/// 配置结构体
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    /// 更新包下载地址（必填）
    pub download_url: String,
    /// 下载通知中显示的标题
    pub download_title: String,
    /// 应用显示名称，同时作为下载文件名 `<名称>.apk`
    pub app_display_name: String,
    /// 文件共享 provider 的 authority，新平台上必填
    pub provider_authority: String,
    /// 权限申请弹窗的图标
    pub app_icon: Option<String>,
    /// 权限申请弹窗的说明文字
    pub request_permission_message: Option<String>,
    /// 下载目录
    pub download_dir: String,
    /// 偏好设置与下载队列状态的存放目录
    pub data_dir: String,
    /// 当前安装的应用包名
    pub package_id: String,
    /// 当前安装的应用版本号
    pub version_code: i64,
    /// 平台 API 级别，0 表示启动时探测
    pub api_level: u32,
    /// 是否已允许安装未知来源应用
    pub unknown_sources_allowed: bool,
    /// 用于派发 intent 的程序
    pub launcher: String,
    /// 下载速度限制（KB/s），0 表示不限速
    pub speed_limit_kb: u64,
    /// 网络超时时间（秒）
    pub timeout: u64,
    /// User-Agent
    pub user_agent: String,
    /// 重试次数
    pub retry_count: usize,
    /// 重试延迟（秒）
    pub retry_delay: u64,
    /// 最大重试延迟（秒）
    pub retry_max_delay: u64,
    /// 启动时自动恢复未完成的下载
    pub auto_resume_on_startup: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            download_url: String::new(),
            download_title: "应用更新".to_string(),
            app_display_name: "update".to_string(),
            provider_authority: String::new(),
            app_icon: None,
            request_permission_message: None,
            download_dir: "./downloads".to_string(),
            data_dir: "./.apkup".to_string(),
            package_id: String::new(),
            version_code: 0,
            api_level: 0,
            unknown_sources_allowed: false,
            launcher: "am".to_string(),
            speed_limit_kb: 0,
            timeout: 30,
            user_agent: "apkup/1.0".to_string(),
            retry_count: 3,
            retry_delay: 2,
            retry_max_delay: 60,
            auto_resume_on_startup: true,
        }
    }
}

impl Config {
    /// 加载配置文件，不存在时写入默认配置
    pub fn load(path: &str) -> Result<Self, UpdateError> {
        if Path::new(path).exists() {
            let content = fs::read_to_string(path)?;
            match toml::from_str(&content) {
                Ok(config) => Ok(config),
                Err(e) => {
                    log::warn!("配置文件格式错误: {}，将使用默认配置", e);
                    Ok(Config::default())
                }
            }
        } else {
            let config = Config::default();
            config.save_with_tutorial(path)?;
            Ok(config)
        }
    }

    /// 保存带教程的配置文件（唯一写入方法）
    pub fn save_with_tutorial(&self, path: &str) -> Result<(), UpdateError> {
        if let Some(parent) = Path::new(path).parent() {
            fs::create_dir_all(parent)?;
        }
        let config_content = toml::to_string_pretty(self)
            .map_err(|e| UpdateError::Config(format!("无法序列化配置: {}", e)))?;
        let full_content = format!("{}\n{}", Config::generate_tutorial_content(), config_content);
        fs::write(path, full_content)?;
        Ok(())
    }

    fn generate_tutorial_content() -> &'static str {
        r#"# apkup 配置文件
# ====================
#
# TOML 格式。命令行参数会覆盖这里的设置，优先级：命令行 > 配置文件 > 默认值
#
# 使用示例：
#   apkup -u https://example.com/app.apk              # 检查并安装更新
#   apkup --status                                      # 查看上次下载任务
#   apkup --discard                                     # 丢弃上次下载任务
#   apkup -e                                            # 编辑配置文件
#
# ==================== 更新设置 ====================
#
# download_url               更新包地址（必填）
# download_title             下载通知标题
# app_display_name           下载文件名，保存为 <名称>.apk
# provider_authority         Android 7.0 及以上共享文件用的 provider authority，
#                            必须与 AndroidManifest 中的 android:authorities 一致
# app_icon                   权限申请弹窗图标（可选）
# request_permission_message 权限申请说明（可选），例如：
#                            "为了正常升级，请点击设置按钮，允许安装未知来源应用"
#
# ==================== 平台设置 ====================
#
# package_id / version_code  当前安装的应用包名和版本号，用于判断已下载的包是否更新
# api_level                  平台 API 级别，0 表示启动时通过 getprop 探测
#                            >= 24 使用 content:// 地址，>= 26 安装前需要用户授权
# unknown_sources_allowed    是否已允许安装未知来源应用
# launcher                   派发 intent 的程序，默认 am
#
# ==================== 下载设置 ====================
#
# speed_limit_kb             下载速度限制（KB/s），0 表示不限速
# timeout                    网络超时时间（秒）
# retry_count                网络错误时的重试次数
# retry_delay                第一次重试前的等待时间（秒），之后指数退避
# retry_max_delay            重试延迟上限（秒）
# auto_resume_on_startup     启动时自动恢复未完成的下载
#
# ==================== 配置项 ====================
"#
    }

    /// 校验配置合法性
    pub fn validate(&self) -> Result<(), UpdateError> {
        if self.download_url.is_empty() {
            return Err(UpdateError::Config("下载地址不能为空".to_string()));
        }
        validator::validate_download_url(&self.download_url)?;
        if self.app_display_name.trim().is_empty() {
            return Err(UpdateError::Config("应用名称不能为空".to_string()));
        }
        if self.download_dir.is_empty() || self.data_dir.is_empty() {
            return Err(UpdateError::Config("下载目录和数据目录不能为空".to_string()));
        }
        if !self.package_id.is_empty() && !validator::is_valid_package_id(&self.package_id) {
            return Err(UpdateError::Config(format!("无效的包名: {}", self.package_id)));
        }
        if !self.provider_authority.is_empty()
            && !validator::is_valid_authority(&self.provider_authority)
        {
            return Err(UpdateError::Config(format!(
                "无效的 provider authority: {}",
                self.provider_authority
            )));
        }
        if self.timeout == 0 {
            return Err(UpdateError::Config("超时时间必须大于0".to_string()));
        }
        if self.launcher.is_empty() {
            return Err(UpdateError::Config("launcher 不能为空".to_string()));
        }
        Ok(())
    }

    /// 合并命令行参数到配置
    pub fn merge_from_args(&mut self, args: &crate::cli::Args) {
        if let Some(url) = &args.url {
            self.download_url = url.clone();
        }
        if let Some(dir) = &args.download_dir {
            self.download_dir = dir.clone();
        }
        if let Some(name) = &args.app_name {
            self.app_display_name = name.clone();
        }
        if let Some(title) = &args.title {
            self.download_title = title.clone();
        }
        if let Some(provider) = &args.provider {
            self.provider_authority = provider.clone();
        }
        if let Some(speed_limit) = args.speed_limit_kb {
            self.speed_limit_kb = speed_limit;
        }
    }

    /// 下载文件名
    pub fn target_name(&self) -> String {
        format!("{}.apk", self.app_display_name)
    }

    pub fn prefs_path(&self) -> PathBuf {
        Path::new(&self.data_dir).join("prefs.json")
    }

    pub fn queue_state_path(&self) -> PathBuf {
        Path::new(&self.data_dir).join("queue.json")
    }

    pub fn retry_strategy(&self) -> RetryStrategy {
        RetryStrategy {
            max_retries: self.retry_count,
            base_delay: Duration::from_secs(self.retry_delay),
            max_delay: Duration::from_secs(self.retry_max_delay),
            ..RetryStrategy::default()
        }
    }

    /// 获取配置摘要信息
    pub fn get_summary(&self) -> String {
        format!(
            "配置摘要:\n\
            - 下载地址: {}\n\
            - 下载目录: {}\n\
            - 文件名: {}\n\
            - 当前版本: {} ({})\n\
            - API 级别: {}\n\
            - 速度限制: {} KB/s\n\
            - 重试次数: {}",
            self.download_url,
            self.download_dir,
            self.target_name(),
            if self.package_id.is_empty() { "未配置" } else { self.package_id.as_str() },
            self.version_code,
            if self.api_level == 0 { "自动探测".to_string() } else { self.api_level.to_string() },
            if self.speed_limit_kb == 0 { "不限速".to_string() } else { self.speed_limit_kb.to_string() },
            self.retry_count,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            download_url: "https://example.com/app.apk".to_string(),
            package_id: "com.example.app".to_string(),
            provider_authority: "com.example.app.provider".to_string(),
            ..Config::default()
        }
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.speed_limit_kb, 0);
        assert_eq!(config.timeout, 30);
        assert_eq!(config.retry_count, 3);
        assert_eq!(config.launcher, "am");
        assert_eq!(config.target_name(), "update.apk");
    }

    #[test]
    fn test_config_validation() {
        assert!(valid_config().validate().is_ok());

        // 默认配置没有下载地址
        assert!(Config::default().validate().is_err());

        let mut config = valid_config();
        config.download_url = "ftp://example.com/app.apk".to_string();
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.provider_authority = "bad authority!".to_string();
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.package_id = "1com".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("apkup.conf");
        let path = path.to_str().unwrap();

        let mut config = valid_config();
        config.version_code = 42;
        config.request_permission_message = Some("请允许安装".to_string());
        config.save_with_tutorial(path).expect("保存带教程的配置失败");

        let content = fs::read_to_string(path).unwrap();
        assert!(content.contains("apkup 配置文件"));

        let loaded = Config::load(path).expect("加载配置失败");
        assert_eq!(loaded.download_url, config.download_url);
        assert_eq!(loaded.version_code, 42);
        assert_eq!(loaded.request_permission_message.as_deref(), Some("请允许安装"));
        assert_eq!(loaded.app_icon, None);
    }

    #[test]
    fn test_config_load_creates_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("apkup.conf");
        let path = path.to_str().unwrap();

        let config = Config::load(path).unwrap();
        assert!(Path::new(path).exists());
        assert_eq!(config.download_title, Config::default().download_title);
    }

    #[test]
    fn test_config_summary() {
        let summary = valid_config().get_summary();
        assert!(summary.contains("配置摘要"));
        assert!(summary.contains("update.apk"));
        assert!(summary.contains("不限速"));
        assert!(summary.contains("自动探测"));
    }
}
