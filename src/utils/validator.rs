use regex::Regex;
use std::sync::OnceLock;
use url::Url;

use crate::core::error::UpdateError;

/// 下载地址必须是可解析的 http(s) 地址
pub fn validate_download_url(url: &str) -> Result<Url, UpdateError> {
    let parsed = Url::parse(url).map_err(|e| UpdateError::InvalidUrl(format!("{}: {}", url, e)))?;
    if !["http", "https"].contains(&parsed.scheme()) {
        return Err(UpdateError::InvalidUrl(url.to_string()));
    }
    Ok(parsed)
}

/// Java 风格包名，例如 com.example.app
pub fn is_valid_package_id(id: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z][A-Za-z0-9_]*(\.[A-Za-z][A-Za-z0-9_]*)+$").expect("包名正则")
    })
    .is_match(id)
}

/// provider authority，可以由多个以分号分隔的名字组成
pub fn is_valid_authority(authority: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9_]+(\.[A-Za-z0-9_]+)*(;[A-Za-z0-9_]+(\.[A-Za-z0-9_]+)*)*$")
            .expect("authority 正则")
    })
    .is_match(authority)
}

/// 文件名不能包含路径分隔符
pub fn validate_target_name(name: &str) -> Result<(), UpdateError> {
    if name.is_empty() || name.contains('/') || name.contains('\\') || name == "." || name == ".." {
        return Err(UpdateError::Config(format!("无效的文件名: {}", name)));
    }
    Ok(())
}
