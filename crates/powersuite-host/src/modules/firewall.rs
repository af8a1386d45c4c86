//! 防火墙规则模块（需要管理员权限）。
//!
//! 命令：
//! - `add-rule`：负载为 [`FirewallRule`]
//! - `delete-rule` / `rule-exists`：负载 `{"name": "<规则名>"}`
//!
//! 规则名称会自动加上模块设置 `RulePrefix` 指定的前缀（默认 `PowerSuite`），
//! 便于与系统中其他规则区分。
//!
//! 作者：PowerSuite 项目组（自动生成）
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use powersuite_core::module::{Module, ModuleCommand, ModuleContext, ModuleDescriptor, ModuleVersion};
use powersuite_windows::firewall::{self, FirewallRule};
use serde::{Deserialize, Serialize};
use tracing::info;

pub const NAME: &str = "firewall";

const RULE_PREFIX_KEY: &str = "RulePrefix";
const DEFAULT_RULE_PREFIX: &str = "PowerSuite";

pub fn descriptor() -> ModuleDescriptor {
    ModuleDescriptor::new(NAME)
        .description("创建、删除、查询 Windows 防火墙规则")
        .icon("shield")
        .category("网络")
        .version(ModuleVersion::new(1, 0, 0))
        .requires_elevation(true)
        .display_order(10)
}

#[derive(Debug, Deserialize)]
struct RuleName {
    name: String,
}

#[derive(Debug, Serialize)]
struct RuleOutcome {
    name: String,
    exists: bool,
}

pub struct FirewallModule {
    prefix: String,
}

impl Default for FirewallModule {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_RULE_PREFIX.to_string(),
        }
    }
}

impl FirewallModule {
    fn qualified(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{} {name}", self.prefix)
        }
    }
}

#[async_trait]
impl Module for FirewallModule {
    async fn initialize(&mut self, ctx: &ModuleContext) -> Result<()> {
        self.prefix = ctx
            .setting(RULE_PREFIX_KEY, DEFAULT_RULE_PREFIX.to_string())
            .trim()
            .to_string();
        Ok(())
    }

    async fn can_execute(&self) -> Result<bool> {
        Ok(cfg!(windows))
    }

    async fn execute(&mut self, command: &ModuleCommand) -> Result<Vec<u8>> {
        let outcome = match command.name.as_str() {
            "add-rule" => {
                let mut rule: FirewallRule = command.json()?;
                rule.name = self.qualified(&rule.name);
                let name = rule.name.clone();
                blocking(move || firewall::add_rule(&rule)).await?;
                info!("已创建防火墙规则: {name}");
                RuleOutcome { name, exists: true }
            }
            "delete-rule" => {
                let name = self.qualified(&command.json::<RuleName>()?.name);
                let target = name.clone();
                blocking(move || firewall::delete_rule(&target)).await?;
                info!("已删除防火墙规则: {name}");
                RuleOutcome { name, exists: false }
            }
            "rule-exists" => {
                let name = self.qualified(&command.json::<RuleName>()?.name);
                let target = name.clone();
                let exists = blocking(move || firewall::rule_exists(&target)).await?;
                RuleOutcome { name, exists }
            }
            other => bail!("未知命令: {other}"),
        };
        Ok(serde_json::to_vec(&outcome)?)
    }

    fn cleanup(&mut self) -> Result<()> {
        Ok(())
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f).await.context("netsh 任务失败")?
}
