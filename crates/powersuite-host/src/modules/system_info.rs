//! 系统信息模块（无需提权）。
//!
//! 命令：
//! - `summary`：返回 [`SystemSummary`]
//! - `process-running`：负载 `{"name": "<exe>"}`，返回是否有同名进程在运行
//!
//! 作者：PowerSuite 项目组（自动生成）
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use powersuite_core::module::{Module, ModuleCommand, ModuleContext, ModuleDescriptor, ModuleVersion};
use powersuite_windows::system::{self, SystemSummary};
use serde::Deserialize;
use tracing::debug;

pub const NAME: &str = "system-info";

pub fn descriptor() -> ModuleDescriptor {
    ModuleDescriptor::new(NAME)
        .description("查看操作系统、CPU、内存与进程概况")
        .icon("info")
        .category("系统")
        .version(ModuleVersion::new(1, 0, 0))
        .display_order(0)
}

#[derive(Debug, Deserialize)]
struct ProcessQuery {
    name: String,
}

#[derive(Default)]
pub struct SystemInfoModule {
    host_name: Option<String>,
}

#[async_trait]
impl Module for SystemInfoModule {
    async fn initialize(&mut self, _ctx: &ModuleContext) -> Result<()> {
        let summary = collect().await?;
        debug!("系统信息模块已初始化: {}", summary.host_name);
        self.host_name = Some(summary.host_name);
        Ok(())
    }

    async fn can_execute(&self) -> Result<bool> {
        Ok(true)
    }

    async fn execute(&mut self, command: &ModuleCommand) -> Result<Vec<u8>> {
        match command.name.as_str() {
            "summary" => Ok(serde_json::to_vec(&collect().await?)?),
            "process-running" => {
                let query: ProcessQuery = command.json()?;
                let running = tokio::task::spawn_blocking(move || system::is_process_running(&query.name))
                    .await
                    .context("进程查询任务失败")?;
                Ok(serde_json::to_vec(&running)?)
            }
            other => bail!("未知命令: {other}"),
        }
    }

    fn cleanup(&mut self) -> Result<()> {
        self.host_name = None;
        Ok(())
    }
}

async fn collect() -> Result<SystemSummary> {
    tokio::task::spawn_blocking(system::collect_summary)
        .await
        .context("系统信息采集任务失败")
}
