//! CLI: 命令行接口和参数解析模块
//!
//! ## 支持的命令
//!
//! - 检查并安装更新：`apkup -u https://example.com/app.apk`
//! - 查看上次下载任务：`apkup --status`
//! - 丢弃上次下载任务：`apkup --discard`
//! - 编辑配置：`apkup -e`
//! - 指定配置：`apkup -c apkup.conf`
//!
//! ## 配置文件位置
//!
//! - Windows: `%APPDATA%/apkup/apkup.conf`
//! - macOS: `~/Library/Application Support/apkup/apkup.conf`
//! - Linux / Android: `~/.config/apkup/apkup.conf`

use clap::Parser;
use std::env;
use std::path::Path;

use crate::config::Config;
use crate::core::error::UpdateError;

/// 获取平台默认配置文件路径
pub fn default_config_path() -> String {
    #[cfg(target_os = "windows")]
    {
        let appdata = env::var("APPDATA").unwrap_or_else(|_| ".".to_string());
        format!("{}/apkup/apkup.conf", appdata)
    }
    #[cfg(target_os = "macos")]
    {
        let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
        format!("{}/Library/Application Support/apkup/apkup.conf", home)
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
        format!("{}/.config/apkup/apkup.conf", home)
    }
}

/// 打开配置文件编辑器
pub fn open_config_in_editor(config_path: &str) {
    #[cfg(target_os = "windows")]
    {
        std::process::Command::new("notepad").arg(config_path).status().ok();
    }
    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("open").arg("-e").arg(config_path).status().ok();
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        let editor = env::var("EDITOR").unwrap_or_else(|_| "xdg-open".to_string());
        if std::process::Command::new(&editor).arg(config_path).status().is_err() {
            let _ = std::process::Command::new("nano").arg(config_path).status();
        }
    }
}

/// apkup 命令行参数
///
/// 示例用法：
///   apkup -u https://example.com/app.apk
///   apkup --status
///   apkup -e  # 编辑配置文件
#[derive(Parser, Debug, Clone)]
#[command(
    name = "apkup",
    author = "panzhifu",
    version = env!("CARGO_PKG_VERSION"),
    about = "一个用 Rust 编写的 APK 应用内自更新工具",
    long_about = "检查已下载的更新包是否可用，必要时重新下载，申请安装权限后发起安装。\n\n示例：\n  apkup -u https://example.com/app.apk\n  apkup --status\n  apkup --discard\n  apkup -e\n"
)]
pub struct Args {
    /// 配置文件路径，默认为平台推荐路径
    #[arg(short = 'c', long, default_value_t = default_config_path(), help = "配置文件路径，默认为平台推荐路径。")]
    pub config: String,

    /// 编辑配置文件（-e 或 --edit）
    #[arg(short = 'e', long = "edit", help = "用系统默认编辑器打开配置文件并退出。")]
    pub edit_config: bool,

    #[arg(short = 'u', long, help = "更新包下载地址，覆盖配置文件中的 download_url。")]
    pub url: Option<String>,

    #[arg(short = 'd', long, help = "下载目录，覆盖配置文件中的设置。")]
    pub download_dir: Option<String>,

    #[arg(short = 'n', long = "app-name", help = "应用显示名称，下载文件保存为 <名称>.apk。")]
    pub app_name: Option<String>,

    #[arg(long, help = "下载通知标题。")]
    pub title: Option<String>,

    #[arg(long, help = "文件共享 provider 的 authority。")]
    pub provider: Option<String>,

    /// 下载速度限制（KB/s），0 表示不限速
    #[arg(long, short = 'l', help = "下载速度限制（KB/s），0 表示不限速。")]
    pub speed_limit_kb: Option<u64>,

    #[arg(long, conflicts_with = "discard", help = "显示上次下载任务的状态并退出。")]
    pub status: bool,

    #[arg(long, help = "丢弃上次下载任务及其文件并退出。")]
    pub discard: bool,
}

impl Args {
    pub fn parse_args() -> Result<(Self, Config), UpdateError> {
        let args = Args::parse();

        if args.edit_config {
            open_config_in_editor(&args.config);
            std::process::exit(0);
        }

        let config = args.load_config()?;
        Ok((args, config))
    }

    /// 加载或创建配置文件，合并命令行参数并校验
    pub fn load_config(&self) -> Result<Config, UpdateError> {
        let mut config = if Path::new(&self.config).exists() {
            Config::load(&self.config)
                .map_err(|e| UpdateError::Config(format!("无法读取配置文件: {}", e)))?
        } else {
            let config = Config::default();
            config
                .save_with_tutorial(&self.config)
                .map_err(|e| UpdateError::Config(format!("无法保存配置文件: {}", e)))?;
            config
        };

        config.merge_from_args(self);

        // 只查看或丢弃任务时不需要下载地址
        if !self.status && !self.discard {
            config.validate().map_err(|e| UpdateError::Config(format!("配置无效: {}", e)))?;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parsing() {
        let args = Args::try_parse_from(["apkup", "-u", "https://example.com/app.apk", "-l", "512"]).unwrap();
        assert_eq!(args.url.as_deref(), Some("https://example.com/app.apk"));
        assert_eq!(args.speed_limit_kb, Some(512));
        assert!(!args.status);
    }

    #[test]
    fn test_status_conflicts_with_discard() {
        assert!(Args::try_parse_from(["apkup", "--status", "--discard"]).is_err());
    }

    #[test]
    fn test_config_created_and_merged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("apkup.conf");
        let path = path.to_str().unwrap();

        let args = Args::try_parse_from([
            "apkup", "-c", path,
            "-u", "https://example.com/app.apk",
            "-n", "shop",
            "--provider", "com.example.shop.fileprovider",
        ]).unwrap();
        let config = args.load_config().unwrap();

        assert!(Path::new(path).exists());
        assert_eq!(config.download_url, "https://example.com/app.apk");
        assert_eq!(config.target_name(), "shop.apk");
        assert_eq!(config.provider_authority, "com.example.shop.fileprovider");
    }

    #[test]
    fn test_missing_url_is_rejected_unless_inspecting() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("apkup.conf");
        let path = path.to_str().unwrap();

        let args = Args::try_parse_from(["apkup", "-c", path]).unwrap();
        assert!(matches!(args.load_config(), Err(UpdateError::Config(_))));

        let args = Args::try_parse_from(["apkup", "-c", path, "--status"]).unwrap();
        assert!(args.load_config().is_ok());
    }
}
