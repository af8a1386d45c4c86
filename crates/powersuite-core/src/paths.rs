//! 统一路径与目录约定，以及原子落盘工具。
//!
//! 目标：
//! - 将设置文件、提权交换目录等落盘路径集中管理，避免散落在各模块中
//! - 所有“覆盖写”都走 [`write_atomic`]（先写临时文件再替换），中途崩溃不会破坏旧文件
//!
//! 作者：PowerSuite 项目组（自动生成）
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use uuid::Uuid;

/// 配置目录/临时目录下的产品目录名。
///
/// 示例（Windows 默认）：
/// - `%APPDATA%\WindowsPowerSuite`
pub const VENDOR_DIR: &str = "WindowsPowerSuite";

/// 设置文件名。
pub const SETTINGS_FILE: &str = "settings.json";

/// 获取本项目的用户配置根目录。
///
/// 返回值：
/// - 成功：`<config dir>\WindowsPowerSuite`（Windows 上为 `%APPDATA%`）
///
/// 异常处理：
/// - 当前平台无法确定用户配置目录时返回错误。
pub fn config_dir() -> Result<PathBuf> {
    let base = dirs::config_dir().ok_or_else(|| anyhow!("无法确定用户配置目录"))?;
    Ok(base.join(VENDOR_DIR))
}

/// 默认设置文件路径。
///
/// 返回值：
/// - `<config dir>\WindowsPowerSuite\settings.json`
pub fn default_settings_file() -> Result<PathBuf> {
    Ok(config_dir()?.join(SETTINGS_FILE))
}

/// 提权请求/响应交换目录（位于系统临时目录下）。
///
/// 说明：
/// - 提权助手与当前进程属于同一用户，因此可访问同一临时目录
pub fn default_exchange_dir() -> PathBuf {
    std::env::temp_dir().join(VENDOR_DIR).join("elevation")
}

/// 确保目录存在（不存在则递归创建）。
///
/// 异常处理：
/// - 目录创建失败（权限、路径非法等）会返回错误。
pub fn ensure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).with_context(|| format!("创建目录失败: {}", path.display()))?;
    Ok(())
}

/// 原子写文件：写入同目录下的临时文件，刷盘后替换目标文件。
///
/// 参数：
/// - `path`：目标文件
/// - `bytes`：完整文件内容
///
/// 异常处理：
/// - 任一步骤失败都会返回错误，并尽力删除临时文件；目标文件保持原样
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    tokio::fs::create_dir_all(&parent)
        .await
        .with_context(|| format!("创建目录失败: {}", parent.display()))?;

    let file_name = path
        .file_name()
        .and_then(|s| s.to_str())
        .ok_or_else(|| anyhow!("非法文件路径: {}", path.display()))?;
    let tmp = parent.join(format!(".{file_name}.{}.tmp", Uuid::new_v4().simple()));

    let result = write_and_replace(&tmp, path, bytes).await;
    if result.is_err() {
        let _ = tokio::fs::remove_file(&tmp).await;
    }
    result
}

async fn write_and_replace(tmp: &Path, path: &Path, bytes: &[u8]) -> Result<()> {
    use tokio::io::AsyncWriteExt;

    let mut file = tokio::fs::File::create(tmp)
        .await
        .with_context(|| format!("创建临时文件失败: {}", tmp.display()))?;
    file.write_all(bytes)
        .await
        .with_context(|| format!("写入临时文件失败: {}", tmp.display()))?;
    file.sync_all()
        .await
        .with_context(|| format!("刷盘失败: {}", tmp.display()))?;
    drop(file);

    tokio::fs::rename(tmp, path)
        .await
        .with_context(|| format!("替换文件失败: {} -> {}", tmp.display(), path.display()))?;
    Ok(())
}
