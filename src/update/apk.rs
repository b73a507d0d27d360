//! 安装包解析
//!
//! APK 是一个 zip 包，版本信息在 `AndroidManifest.xml` 中，文件以 Android 二进制 XML
//! 格式保存。这里只解析 `manifest` 元素上的 `package` 和 `versionCode` 两个属性。

use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::core::error::{UpdateError, UpdateResult};
use super::version::{PackageInspector, VersionInfo};

const MANIFEST_ENTRY: &str = "AndroidManifest.xml";

/// manifest 大小上限，zip 头中的大小不可信
const MAX_MANIFEST_SIZE: u64 = 4 * 1024 * 1024;

const CHUNK_XML: u16 = 0x0003;
const CHUNK_STRING_POOL: u16 = 0x0001;
const CHUNK_RESOURCE_MAP: u16 = 0x0180;
const CHUNK_START_ELEMENT: u16 = 0x0102;

const UTF8_FLAG: u32 = 1 << 8;
const NO_INDEX: u32 = 0xffff_ffff;

const TYPE_STRING: u8 = 0x03;
const TYPE_INT_DEC: u8 = 0x10;
const TYPE_INT_HEX: u8 = 0x11;

/// `android:versionCode` 的资源 id，属性名被混淆时用它识别
const ATTR_VERSION_CODE: u32 = 0x0101_021b;

/// 读取 APK 文件的包名与版本号
#[derive(Debug, Clone, Default)]
pub struct ApkInspector;

impl ApkInspector {
    pub fn new() -> Self {
        Self
    }

    fn read_manifest(path: &Path) -> Result<Vec<u8>, String> {
        let file = File::open(path).map_err(|e| format!("无法打开文件: {}", e))?;
        let mut archive = zip::ZipArchive::new(file).map_err(|e| format!("不是有效的 zip 包: {}", e))?;
        let mut entry = archive
            .by_name(MANIFEST_ENTRY)
            .map_err(|e| format!("缺少 {}: {}", MANIFEST_ENTRY, e))?;
        if entry.size() > MAX_MANIFEST_SIZE {
            return Err(format!("{} 声明的大小 {} 字节超出上限", MANIFEST_ENTRY, entry.size()));
        }
        let mut data = Vec::new();
        (&mut entry)
            .take(MAX_MANIFEST_SIZE + 1)
            .read_to_end(&mut data)
            .map_err(|e| format!("读取 {} 失败: {}", MANIFEST_ENTRY, e))?;
        if data.len() as u64 > MAX_MANIFEST_SIZE {
            return Err(format!("{} 超出大小上限", MANIFEST_ENTRY));
        }
        Ok(data)
    }
}

impl PackageInspector for ApkInspector {
    fn inspect(&self, path: &Path) -> UpdateResult<VersionInfo> {
        let info = Self::read_manifest(path)
            .and_then(|data| parse_manifest(&data))
            .map_err(|reason| UpdateError::metadata(path, reason))?;
        log::debug!("解析安装包 {:?}: {}", path, info);
        Ok(info)
    }
}

fn u16_at(data: &[u8], offset: usize) -> Result<u16, String> {
    data.get(offset..offset + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or_else(|| format!("偏移 {} 越界", offset))
}

fn u32_at(data: &[u8], offset: usize) -> Result<u32, String> {
    data.get(offset..offset + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| format!("偏移 {} 越界", offset))
}

/// 解析二进制 XML，返回 manifest 元素上的版本信息
pub fn parse_manifest(data: &[u8]) -> Result<VersionInfo, String> {
    if u16_at(data, 0)? != CHUNK_XML {
        return Err("不是二进制 XML 文件".to_string());
    }
    let header_size = u16_at(data, 2)? as usize;
    let total = (u32_at(data, 4)? as usize).min(data.len());

    let mut strings = Vec::new();
    let mut resource_ids = Vec::new();
    let mut pos = header_size;
    while pos + 8 <= total {
        let chunk_type = u16_at(data, pos)?;
        let chunk_header = u16_at(data, pos + 2)? as usize;
        let chunk_size = u32_at(data, pos + 4)? as usize;
        if chunk_size < 8 || pos + chunk_size > total || chunk_header > chunk_size {
            return Err(format!("偏移 {} 处的块大小无效", pos));
        }
        let chunk = &data[pos..pos + chunk_size];

        match chunk_type {
            CHUNK_STRING_POOL => strings = parse_string_pool(chunk)?,
            CHUNK_RESOURCE_MAP => {
                resource_ids = (chunk_header..chunk_size)
                    .step_by(4)
                    .map(|offset| u32_at(chunk, offset))
                    .collect::<Result<_, _>>()?;
            }
            CHUNK_START_ELEMENT => {
                if let Some(info) = parse_manifest_element(chunk, chunk_header, &strings, &resource_ids)? {
                    return Ok(info);
                }
            }
            _ => {}
        }
        pos += chunk_size;
    }
    Err("未找到 manifest 元素".to_string())
}

fn parse_string_pool(chunk: &[u8]) -> Result<Vec<String>, String> {
    let header_size = u16_at(chunk, 2)? as usize;
    let count = u32_at(chunk, 8)? as usize;
    let flags = u32_at(chunk, 16)?;
    let strings_start = u32_at(chunk, 20)? as usize;
    let utf8 = flags & UTF8_FLAG != 0;

    (0..count)
        .map(|i| {
            let start = strings_start + u32_at(chunk, header_size + i * 4)? as usize;
            if utf8 {
                read_utf8(chunk, start)
            } else {
                read_utf16(chunk, start)
            }
        })
        .collect()
}

/// UTF-8 字符串前有两个长度：UTF-16 长度和字节长度，各占 1 或 2 字节
fn read_utf8(chunk: &[u8], start: usize) -> Result<String, String> {
    let (_, skip) = utf8_length(chunk, start)?;
    let (len, skip2) = utf8_length(chunk, start + skip)?;
    let begin = start + skip + skip2;
    let bytes = chunk.get(begin..begin + len).ok_or("字符串越界")?;
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

fn utf8_length(chunk: &[u8], offset: usize) -> Result<(usize, usize), String> {
    let first = *chunk.get(offset).ok_or("字符串长度越界")? as usize;
    if first & 0x80 == 0 {
        return Ok((first, 1));
    }
    let second = *chunk.get(offset + 1).ok_or("字符串长度越界")? as usize;
    Ok((((first & 0x7f) << 8) | second, 2))
}

fn read_utf16(chunk: &[u8], start: usize) -> Result<String, String> {
    let first = u16_at(chunk, start)? as usize;
    let (len, skip) = if first & 0x8000 != 0 {
        let second = u16_at(chunk, start + 2)? as usize;
        (((first & 0x7fff) << 16) | second, 4)
    } else {
        (first, 2)
    };
    let units = (0..len)
        .map(|i| u16_at(chunk, start + skip + i * 2))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(String::from_utf16_lossy(&units))
}

fn parse_manifest_element(
    chunk: &[u8],
    header_size: usize,
    strings: &[String],
    resource_ids: &[u32],
) -> Result<Option<VersionInfo>, String> {
    let lookup = |index: u32| -> Option<&str> {
        if index == NO_INDEX {
            return None;
        }
        strings.get(index as usize).map(String::as_str)
    };

    let ext = header_size;
    if lookup(u32_at(chunk, ext + 4)?) != Some("manifest") {
        return Ok(None);
    }
    let attr_start = u16_at(chunk, ext + 8)? as usize;
    let attr_size = u16_at(chunk, ext + 10)? as usize;
    let attr_count = u16_at(chunk, ext + 12)? as usize;

    let mut package = None;
    let mut version_code = None;
    for i in 0..attr_count {
        let offset = ext + attr_start + i * attr_size;
        let name_index = u32_at(chunk, offset + 4)?;
        let raw_value = u32_at(chunk, offset + 8)?;
        let data_type = *chunk.get(offset + 15).ok_or("属性越界")?;
        let data = u32_at(chunk, offset + 16)?;

        let name = lookup(name_index).unwrap_or("");
        let resource_id = resource_ids.get(name_index as usize).copied();
        let string_value = || {
            lookup(raw_value).or_else(|| (data_type == TYPE_STRING).then(|| lookup(data)).flatten())
        };

        if name == "package" {
            package = string_value().map(str::to_string);
        } else if name == "versionCode" || resource_id == Some(ATTR_VERSION_CODE) {
            version_code = match data_type {
                TYPE_INT_DEC | TYPE_INT_HEX => Some(data as i32 as i64),
                TYPE_STRING => string_value().and_then(|s| s.trim().parse().ok()),
                other => return Err(format!("versionCode 类型不支持: 0x{:02x}", other)),
            };
        }
    }

    let package = package.filter(|p| !p.is_empty()).ok_or("manifest 缺少 package")?;
    let version_code = version_code.ok_or("manifest 缺少 versionCode")?;
    Ok(Some(VersionInfo::new(package, version_code)))
}
