//! apkup: APK 应用内自更新
//!
//! 检查上次下载的更新包是否可以直接安装，必要时通过下载队列重新下载，
//! 申请安装未知来源应用的权限，然后把安装请求交给平台。

pub mod cli;
pub mod config;
pub mod core;
pub mod ui;
pub mod update;
pub mod utils;
