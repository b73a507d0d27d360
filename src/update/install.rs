use std::process::{Command, Stdio};

use crate::core::error::{UpdateError, UpdateResult};
use crate::core::tracker::ArtifactLocation;

pub const ACTION_VIEW: &str = "android.intent.action.VIEW";
pub const ACTION_VIEW_DOWNLOADS: &str = "android.intent.action.VIEW_DOWNLOADS";
pub const ACTION_MANAGE_UNKNOWN_APP_SOURCES: &str = "android.settings.MANAGE_UNKNOWN_APP_SOURCES";
pub const APK_MIME_TYPE: &str = "application/vnd.android.package-archive";

/// 从这个 API 级别开始，应用私有文件只能通过 provider 共享
pub const PROVIDER_MIN_API_LEVEL: u32 = 24;

/// provider 中下载目录对应的路径名
const PROVIDER_DOWNLOAD_PATH: &str = "download";

/// intent 标志位
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentFlag {
    GrantReadUriPermission,
    GrantWriteUriPermission,
    GrantPrefixUriPermission,
    ActivityNewTask,
}

impl IntentFlag {
    pub fn bits(self) -> u32 {
        match self {
            Self::GrantReadUriPermission => 0x0000_0001,
            Self::GrantWriteUriPermission => 0x0000_0002,
            Self::GrantPrefixUriPermission => 0x0000_0080,
            Self::ActivityNewTask => 0x1000_0000,
        }
    }
}

impl AsRef<str> for IntentFlag {
    fn as_ref(&self) -> &str {
        match self {
            Self::GrantReadUriPermission => "FLAG_GRANT_READ_URI_PERMISSION",
            Self::GrantWriteUriPermission => "FLAG_GRANT_WRITE_URI_PERMISSION",
            Self::GrantPrefixUriPermission => "FLAG_GRANT_PREFIX_URI_PERMISSION",
            Self::ActivityNewTask => "FLAG_ACTIVITY_NEW_TASK",
        }
    }
}

/// 交给平台的安装请求
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct InstallIntent {
    pub action: String,
    pub data_uri: Option<String>,
    pub mime_type: Option<String>,
    pub flags: Vec<IntentFlag>,
}

impl InstallIntent {
    pub fn new(action: impl AsRef<str>) -> Self {
        Self {
            action: action.as_ref().to_string(),
            data_uri: None,
            mime_type: None,
            flags: vec![IntentFlag::ActivityNewTask],
        }
    }

    pub fn with_data(mut self, uri: impl Into<String>) -> Self {
        self.data_uri = Some(uri.into());
        self
    }

    pub fn with_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn with_flag(mut self, flag: IntentFlag) -> Self {
        if !self.flags.contains(&flag) {
            self.flags.push(flag);
        }
        self
    }

    pub fn flag_bits(&self) -> u32 {
        self.flags.iter().fold(0, |bits, flag| bits | flag.bits())
    }

    /// `am start` 的参数
    pub fn to_am_args(&self) -> Vec<String> {
        let mut args = vec!["start".to_string(), "-a".to_string(), self.action.clone()];
        if let Some(uri) = &self.data_uri {
            args.push("-d".to_string());
            args.push(uri.clone());
        }
        if let Some(mime_type) = &self.mime_type {
            args.push("-t".to_string());
            args.push(mime_type.clone());
        }
        args.push("-f".to_string());
        args.push(format!("0x{:08x}", self.flag_bits()));
        args
    }
}

/// 安装包地址的表达方式，启动时选定一次
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressingStrategy {
    /// `file://` 直接地址
    DirectFile,
    /// 通过 provider 授权访问的 `content://` 地址
    ProviderMediated { authority: String },
}

impl AddressingStrategy {
    pub fn select(api_level: u32, provider_authority: &str) -> UpdateResult<Self> {
        if api_level < PROVIDER_MIN_API_LEVEL {
            return Ok(Self::DirectFile);
        }
        if provider_authority.trim().is_empty() {
            return Err(UpdateError::Config(format!(
                "API 级别 {} 需要配置 provider_authority",
                api_level
            )));
        }
        Ok(Self::ProviderMediated { authority: provider_authority.to_string() })
    }

    pub fn resolve_uri(&self, location: &ArtifactLocation) -> UpdateResult<String> {
        match self {
            Self::DirectFile => location
                .file_uri()
                .map(|uri| uri.to_string())
                .ok_or_else(|| UpdateError::Launch(format!("无法转换为文件地址: {:?}", location.path))),
            Self::ProviderMediated { authority } => {
                let file_name = location
                    .file_name()
                    .ok_or_else(|| UpdateError::Launch(format!("无效的文件路径: {:?}", location.path)))?;
                Ok(format!("content://{}/{}/{}", authority, PROVIDER_DOWNLOAD_PATH, file_name))
            }
        }
    }

    pub fn build_intent(&self, location: &ArtifactLocation) -> UpdateResult<InstallIntent> {
        let intent = InstallIntent::new(ACTION_VIEW)
            .with_data(self.resolve_uri(location)?)
            .with_type(APK_MIME_TYPE);
        Ok(match self {
            Self::DirectFile => intent,
            Self::ProviderMediated { .. } => intent
                .with_flag(IntentFlag::GrantPrefixUriPermission)
                .with_flag(IntentFlag::GrantReadUriPermission)
                .with_flag(IntentFlag::GrantWriteUriPermission),
        })
    }
}

/// 把 intent 交给平台，不等待结果
pub trait InstallLauncher {
    fn dispatch(&self, intent: &InstallIntent) -> UpdateResult<()>;

    fn view_downloads(&self) -> UpdateResult<()> {
        self.dispatch(&InstallIntent::new(ACTION_VIEW_DOWNLOADS))
    }

    fn open_unknown_sources_settings(&self, package_id: &str) -> UpdateResult<()> {
        self.dispatch(
            &InstallIntent::new(ACTION_MANAGE_UNKNOWN_APP_SOURCES).with_data(format!("package:{}", package_id)),
        )
    }
}

/// 通过 `am start` 派发 intent
#[derive(Debug, Clone)]
pub struct ActivityManagerLauncher {
    program: String,
}

impl ActivityManagerLauncher {
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into() }
    }
}

impl InstallLauncher for ActivityManagerLauncher {
    fn dispatch(&self, intent: &InstallIntent) -> UpdateResult<()> {
        let args = intent.to_am_args();
        log::info!("派发 intent: {} {}", self.program, args.join(" "));
        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| UpdateError::Launch(format!("无法启动 {}: {}", self.program, e)))?;
        // 只回收子进程
        std::thread::spawn(move || {
            let _ = child.wait();
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn location() -> ArtifactLocation {
        ArtifactLocation::new(PathBuf::from("/data/downloads/update.apk"))
    }

    #[test]
    fn test_select_strategy() {
        assert_eq!(AddressingStrategy::select(23, "").unwrap(), AddressingStrategy::DirectFile);
        assert_eq!(
            AddressingStrategy::select(24, "com.example.app.provider").unwrap(),
            AddressingStrategy::ProviderMediated { authority: "com.example.app.provider".to_string() }
        );
        assert!(matches!(AddressingStrategy::select(30, " "), Err(UpdateError::Config(_))));
    }

    #[test]
    fn test_direct_file_intent() {
        let intent = AddressingStrategy::DirectFile.build_intent(&location()).unwrap();
        assert_eq!(intent.action, ACTION_VIEW);
        assert_eq!(intent.data_uri.as_deref(), Some("file:///data/downloads/update.apk"));
        assert_eq!(intent.mime_type.as_deref(), Some(APK_MIME_TYPE));
        assert_eq!(intent.flags, vec![IntentFlag::ActivityNewTask]);
    }

    #[test]
    fn test_provider_intent() {
        let strategy = AddressingStrategy::ProviderMediated { authority: "com.x.fileprovider".to_string() };
        let intent = strategy.build_intent(&location()).unwrap();
        assert_eq!(intent.data_uri.as_deref(), Some("content://com.x.fileprovider/download/update.apk"));
        assert_eq!(intent.flag_bits(), 0x1000_0083);
        assert!(intent.flags.contains(&IntentFlag::GrantReadUriPermission));
        assert!(intent.flags.contains(&IntentFlag::GrantWriteUriPermission));
    }

    #[test]
    fn test_am_args() {
        let intent = AddressingStrategy::DirectFile.build_intent(&location()).unwrap();
        assert_eq!(
            intent.to_am_args(),
            vec![
                "start", "-a", ACTION_VIEW,
                "-d", "file:///data/downloads/update.apk",
                "-t", APK_MIME_TYPE,
                "-f", "0x10000000",
            ]
        );
    }

    #[test]
    fn test_launcher_missing_program() {
        let launcher = ActivityManagerLauncher::new("/nonexistent/apkup-am");
        let err = launcher.view_downloads().unwrap_err();
        assert!(matches!(err, UpdateError::Launch(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_launcher_fire_and_forget() {
        let launcher = ActivityManagerLauncher::new("true");
        assert!(launcher.open_unknown_sources_settings("com.example.app").is_ok());
    }
}
