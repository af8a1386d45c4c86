//! 模块模型：描述信息、生命周期状态、模块接口与编译期注册表。
//!
//! 约定：
//! - 模块通过 [`ModuleTable`] 在启动时显式注册（描述 + 工厂函数），不做运行时类型扫描
//! - 模块实例由 [`crate::registry::ModuleLifecycleRegistry`] 独占持有，不对外暴露
//! - 模块操作以“命名命令 + 不透明负载”的形式调用，便于在需要提权时跨进程转发
//!
//! 作者：PowerSuite 项目组（自动生成）
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, OperationResult};
use crate::settings::SettingsStore;
use crate::value::{FromSettingValue, SettingValue};

/// 模块版本（`major.minor.patch`）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ModuleVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ModuleVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }
}

impl fmt::Display for ModuleVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for ModuleVersion {
    type Err = anyhow::Error;

    /// 解析 `1`、`1.2`、`1.2.3` 形式的版本号（缺省部分按 0 处理）。
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().split('.');
        let mut next = |name: &str| -> anyhow::Result<u32> {
            match parts.next() {
                Some(p) => p.parse().with_context(|| format!("版本号 {name} 部分非法: {s}")),
                None => Ok(0),
            }
        };
        let version = Self::new(next("major")?, next("minor")?, next("patch")?);
        if parts.next().is_some() {
            return Err(anyhow!("版本号段数过多: {s}"));
        }
        Ok(version)
    }
}

/// 模块描述信息（发现阶段生成）。
///
/// 字段说明：
/// - `name`：模块唯一名称（非空），同时作为注册表中的实例标识
/// - `requires_elevation`：模块操作是否需要管理员权限
/// - `enabled` / `display_order`：运行期可由宿主修改，其余字段发现后不变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    pub name: String,
    pub description: String,
    pub icon: String,
    pub version: ModuleVersion,
    pub category: String,
    #[serde(default)]
    pub requires_elevation: bool,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub display_order: i32,
}

fn default_enabled() -> bool {
    true
}

impl ModuleDescriptor {
    /// 以最少信息创建描述（其余字段取默认值，可链式修改）。
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            icon: String::new(),
            version: ModuleVersion::new(1, 0, 0),
            category: String::new(),
            requires_elevation: false,
            enabled: true,
            display_order: 0,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = icon.into();
        self
    }

    pub fn version(mut self, version: ModuleVersion) -> Self {
        self.version = version;
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn requires_elevation(mut self, requires: bool) -> Self {
        self.requires_elevation = requires;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn display_order(mut self, order: i32) -> Self {
        self.display_order = order;
        self
    }
}

/// 模块实例生命周期状态。
///
/// 状态流转：
/// - `Discovered → Initializing → Ready`（初始化失败进入 `Failed`）
/// - `Ready → Executing → Ready`（每次执行一个窗口）
/// - 任意状态 `→ Cleaned`（清理后需要新实例，不能原地重新初始化）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleState {
    Discovered,
    Initializing,
    Ready,
    Executing,
    Failed,
    Cleaned,
}

/// 模块命令：命令名 + 不透明负载（通常为 JSON 字节）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleCommand {
    pub name: String,
    pub payload: Vec<u8>,
}

impl ModuleCommand {
    /// 无负载命令。
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload: Vec::new(),
        }
    }

    /// 以 JSON 序列化负载创建命令。
    pub fn with_json<T: Serialize>(name: impl Into<String>, payload: &T) -> anyhow::Result<Self> {
        Ok(Self {
            name: name.into(),
            payload: serde_json::to_vec(payload).context("序列化命令负载失败")?,
        })
    }

    /// 将负载按 JSON 反序列化（供模块实现使用）。
    pub fn json<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        serde_json::from_slice(&self.payload)
            .with_context(|| format!("解析命令负载失败: {}", self.name))
    }
}

/// 模块运行上下文（初始化时传入）。
///
/// 说明：
/// - 模块只能读写自己名下的设置分组（`moduleSettings.<name>`）
#[derive(Clone)]
pub struct ModuleContext {
    module: String,
    settings: Arc<SettingsStore>,
}

impl ModuleContext {
    pub fn new(module: impl Into<String>, settings: Arc<SettingsStore>) -> Self {
        Self {
            module: module.into(),
            settings,
        }
    }

    /// 模块名。
    pub fn module_name(&self) -> &str {
        &self.module
    }

    /// 读取本模块的设置。
    pub fn setting<T: FromSettingValue>(&self, key: &str, default: T) -> T {
        self.settings.get_module_setting(&self.module, key, default)
    }

    /// 写入本模块的设置（仅内存，随宿主保存落盘）。
    pub fn set_setting<T: Into<SettingValue>>(&self, key: &str, value: T) {
        self.settings.set_module_setting(&self.module, key, value);
    }
}

/// 可插拔模块接口。
///
/// 异常处理：
/// - 各方法以 `anyhow::Result` 报告失败；注册表负责捕获并转换为 [`CoreError`]
/// - 模块内部 panic 同样会被注册表隔离，不会传播给宿主
#[async_trait]
pub trait Module: Send + Sync + 'static {
    /// 初始化模块（可读取本模块设置、探测系统能力等）。
    async fn initialize(&mut self, ctx: &ModuleContext) -> anyhow::Result<()>;

    /// 模块自身的前置条件检查（所需硬件/系统特性是否存在）。
    ///
    /// 注意：
    /// - 不应把“是否已提权”混入此检查；提权在执行阶段单独处理
    async fn can_execute(&self) -> anyhow::Result<bool>;

    /// 执行一条命令，返回不透明结果负载。
    async fn execute(&mut self, command: &ModuleCommand) -> anyhow::Result<Vec<u8>>;

    /// 释放模块持有的资源。
    fn cleanup(&mut self) -> anyhow::Result<()>;
}

/// 模块工厂：每次调用返回一个全新实例。
pub type ModuleFactory = Arc<dyn Fn() -> Box<dyn Module> + Send + Sync>;

/// 单条注册项（描述 + 工厂）。
#[derive(Clone)]
pub struct ModuleRegistration {
    pub descriptor: ModuleDescriptor,
    pub factory: ModuleFactory,
}

/// 编译期模块注册表（启动时组装）。
#[derive(Clone, Default)]
pub struct ModuleTable {
    entries: Vec<ModuleRegistration>,
    names: HashSet<String>,
}

impl ModuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册一个模块。
    ///
    /// 异常处理：
    /// - 名称为空或与已注册模块重名时返回 [`CoreError::InvalidRegistration`]
    pub fn register<F>(&mut self, descriptor: ModuleDescriptor, factory: F) -> OperationResult<()>
    where
        F: Fn() -> Box<dyn Module> + Send + Sync + 'static,
    {
        let name = descriptor.name.trim();
        if name.is_empty() {
            return Err(CoreError::InvalidRegistration("模块名称为空".to_string()));
        }
        if name.contains("::") {
            return Err(CoreError::InvalidRegistration(format!(
                "模块名称不能包含 \"::\": {name}"
            )));
        }
        if !self.names.insert(descriptor.name.clone()) {
            return Err(CoreError::InvalidRegistration(format!(
                "模块重名: {}",
                descriptor.name
            )));
        }
        self.entries.push(ModuleRegistration {
            descriptor,
            factory: Arc::new(factory),
        });
        Ok(())
    }

    /// 已注册条目数。
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn into_entries(self) -> Vec<ModuleRegistration> {
        self.entries
    }
}
