//! Windows 防火墙规则管理（基于 `netsh`）。
//!
//! 说明：
//! - 使用 `netsh advfirewall` 创建/删除/查询规则，避免直接绑定复杂的防火墙 COM API
//! - 规则定义可序列化，便于作为提权命令负载跨进程传递
//!
//! 权限要求：
//! - 创建/删除需要管理员权限；查询不需要
//!
//! 作者：PowerSuite 项目组（自动生成）
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use std::process::Command;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FirewallDirection {
    In,
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FirewallAction {
    Allow,
    Block,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FirewallProfile {
    #[default]
    Any,
    Domain,
    Private,
    Public,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FirewallProtocol {
    #[default]
    Any,
    Tcp,
    Udp,
}

/// 防火墙规则定义。
///
/// 字段说明：
/// - `program`：限定的程序路径（可选）
/// - `local_port`：本地端口（仅 TCP/UDP 规则可用）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallRule {
    pub name: String,
    pub direction: FirewallDirection,
    pub action: FirewallAction,
    #[serde(default)]
    pub program: Option<String>,
    #[serde(default)]
    pub protocol: FirewallProtocol,
    #[serde(default)]
    pub local_port: Option<u16>,
    #[serde(default)]
    pub profile: FirewallProfile,
}

impl FirewallRule {
    /// 校验规则能否安全地转换为 netsh 参数。
    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name)?;
        if self.local_port.is_some() && self.protocol == FirewallProtocol::Any {
            bail!("指定端口时协议必须为 tcp 或 udp");
        }
        if let Some(program) = &self.program {
            if program.trim().is_empty() || program.contains('"') {
                bail!("程序路径非法: {program}");
            }
        }
        Ok(())
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        bail!("规则名称为空");
    }
    if name.contains('"') {
        bail!("规则名称不能包含引号: {name}");
    }
    Ok(())
}

/// 生成创建规则的 netsh 参数（不含程序名）。
pub fn add_rule_args(rule: &FirewallRule) -> Result<Vec<String>> {
    rule.validate()?;
    let dir = match rule.direction {
        FirewallDirection::In => "in",
        FirewallDirection::Out => "out",
    };
    let action = match rule.action {
        FirewallAction::Allow => "allow",
        FirewallAction::Block => "block",
    };
    let profile = match rule.profile {
        FirewallProfile::Any => "any",
        FirewallProfile::Domain => "domain",
        FirewallProfile::Private => "private",
        FirewallProfile::Public => "public",
    };
    let protocol = match rule.protocol {
        FirewallProtocol::Any => "any",
        FirewallProtocol::Tcp => "tcp",
        FirewallProtocol::Udp => "udp",
    };

    let mut args: Vec<String> = ["advfirewall", "firewall", "add", "rule"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    args.push(format!("name={}", rule.name));
    args.push(format!("dir={dir}"));
    args.push(format!("action={action}"));
    if let Some(program) = &rule.program {
        args.push(format!("program={program}"));
    }
    args.push(format!("protocol={protocol}"));
    if let Some(port) = rule.local_port {
        args.push(format!("localport={port}"));
    }
    args.push("enable=yes".to_string());
    args.push(format!("profile={profile}"));
    Ok(args)
}

/// 生成删除规则的 netsh 参数。
pub fn delete_rule_args(rule_name: &str) -> Result<Vec<String>> {
    validate_name(rule_name)?;
    Ok(vec![
        "advfirewall".into(),
        "firewall".into(),
        "delete".into(),
        "rule".into(),
        format!("name={rule_name}"),
    ])
}

/// 创建一条防火墙规则。
///
/// 异常处理：
/// - 规则非法、`netsh` 启动失败或退出码非 0 会返回错误，并附带 stdout/stderr 便于排障
pub fn add_rule(rule: &FirewallRule) -> Result<()> {
    run_netsh(&add_rule_args(rule)?).map(|_| ())
}

/// 删除指定名称的防火墙规则。
pub fn delete_rule(rule_name: &str) -> Result<()> {
    run_netsh(&delete_rule_args(rule_name)?).map(|_| ())
}

/// 查询指定名称的规则是否存在。
///
/// 说明：
/// - netsh 在找不到规则时以非 0 退出，此处按“不存在”处理
pub fn rule_exists(rule_name: &str) -> Result<bool> {
    validate_name(rule_name)?;
    let out = Command::new("netsh")
        .args(["advfirewall", "firewall", "show", "rule"])
        .arg(format!("name={rule_name}"))
        .output()
        .context("执行 netsh 失败")?;
    Ok(out.status.success())
}

/// 执行 `netsh` 子命令，成功时返回 stdout。
///
/// 异常处理：
/// - 启动失败：返回错误（通常是系统缺失或权限问题）
/// - 执行失败：返回错误并携带 stdout/stderr
fn run_netsh(args: &[String]) -> Result<String> {
    let out = Command::new("netsh")
        .args(args)
        .output()
        .context("执行 netsh 失败")?;
    let stdout = String::from_utf8_lossy(&out.stdout).into_owned();
    if out.status.success() {
        return Ok(stdout);
    }
    let stderr = String::from_utf8_lossy(&out.stderr);
    Err(anyhow!(
        "netsh 执行失败: {}\n{}\n{}",
        out.status,
        stdout.trim(),
        stderr.trim()
    ))
}
