//! 模块生命周期注册表：发现、初始化、执行门控、清理。
//!
//! 实现要点：
//! - 模块实例保存在以模块名为键的槽位（arena）中，每个槽位带显式状态标签，实例从不外借
//! - 同一模块的执行串行（槽位内的异步互斥锁），不同模块互不影响
//! - 模块的初始化/执行在独立 tokio 任务中运行，模块内部 panic 会被隔离并转换为失败结果
//! - 需要提权的模块在未提权进程中一律经 [`ElevationBridge`] 转发，绝不在本进程直接执行
//!
//! 作者：PowerSuite 项目组（自动生成）
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, warn};

use crate::elevation::ElevationBridge;
use crate::error::{CoreError, OperationResult};
use crate::helper::CommandDispatcher;
use crate::ipc::ElevatedCommand;
use crate::module::{
    Module, ModuleCommand, ModuleContext, ModuleDescriptor, ModuleFactory, ModuleRegistration,
    ModuleState, ModuleTable,
};
use crate::notify::{report_failure, Notifier};
use crate::settings::SettingsStore;

/// 单个模块实例槽位。
struct ModuleSlot {
    state: Mutex<ModuleState>,
    last_error: Mutex<Option<String>>,
    instance: tokio::sync::Mutex<Option<Box<dyn Module>>>,
}

impl ModuleSlot {
    fn new(state: ModuleState) -> Self {
        Self {
            state: Mutex::new(state),
            last_error: Mutex::new(None),
            instance: tokio::sync::Mutex::new(None),
        }
    }

    fn state(&self) -> ModuleState {
        *self.state.lock()
    }

    fn set_state(&self, state: ModuleState) {
        *self.state.lock() = state;
    }

    fn record_error(&self, message: String) {
        *self.last_error.lock() = Some(message);
    }
}

/// 单次执行窗口：持有槽位实例锁，离开作用域时结束 `Executing` 状态。
///
/// 调用方中途放弃执行（超时、`select!`、任务中止）时同样会收尾：
/// 实例仍在则回到 `Ready`，实例已随被放弃的任务丢失则进入 `Failed`。
struct ExecutionWindow<'a> {
    slot: &'a ModuleSlot,
    instance: tokio::sync::MutexGuard<'a, Option<Box<dyn Module>>>,
    finished: bool,
}

impl Drop for ExecutionWindow<'_> {
    fn drop(&mut self) {
        if self.instance.is_some() {
            self.slot.set_state(ModuleState::Ready);
        } else {
            self.slot.set_state(ModuleState::Failed);
        }
        if !self.finished {
            warn!("模块执行被调用方中断");
            self.slot.record_error("执行被中断".to_string());
        }
    }
}

/// 执行路由。
#[derive(Clone, Copy, PartialEq, Eq)]
enum Route {
    /// 按描述与当前权限决定是否经提权桥转发。
    Gated,
    /// 强制在本进程执行（提权助手内部使用）。
    Direct,
}

/// 模块生命周期注册表。
pub struct ModuleLifecycleRegistry {
    registrations: RwLock<Vec<ModuleRegistration>>,
    slots: RwLock<HashMap<String, Arc<ModuleSlot>>>,
    init_gate: tokio::sync::Mutex<()>,
    settings: Arc<SettingsStore>,
    bridge: Arc<ElevationBridge>,
    notifier: Arc<dyn Notifier>,
}

impl ModuleLifecycleRegistry {
    /// 由编译期注册表创建。
    pub fn new(
        table: ModuleTable,
        settings: Arc<SettingsStore>,
        bridge: Arc<ElevationBridge>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            registrations: RwLock::new(table.into_entries()),
            slots: RwLock::new(HashMap::new()),
            init_gate: tokio::sync::Mutex::new(()),
            settings,
            bridge,
            notifier,
        }
    }

    /// 列出可用模块（不实例化）。
    ///
    /// 排序规则：
    /// - 按 `display_order` 升序；相同时按名称字典序
    pub fn discover(&self) -> Vec<ModuleDescriptor> {
        let mut list: Vec<ModuleDescriptor> = self
            .registrations
            .read()
            .iter()
            .map(|r| r.descriptor.clone())
            .collect();
        list.sort_by(|a, b| {
            a.display_order
                .cmp(&b.display_order)
                .then_with(|| a.name.cmp(&b.name))
        });
        list
    }

    /// 按名称获取模块描述（副本）。
    pub fn descriptor(&self, name: &str) -> OperationResult<ModuleDescriptor> {
        self.registrations
            .read()
            .iter()
            .find(|r| r.descriptor.name == name)
            .map(|r| r.descriptor.clone())
            .ok_or_else(|| CoreError::UnknownModule(name.to_string()))
    }

    /// 模块当前状态（未知模块返回 `None`）。
    pub fn state(&self, name: &str) -> Option<ModuleState> {
        if let Some(slot) = self.slot(name) {
            return Some(slot.state());
        }
        self.descriptor(name).ok().map(|_| ModuleState::Discovered)
    }

    /// 最近一次记录的失败原因（初始化失败、执行失败、清理时的次要错误）。
    pub fn last_error(&self, name: &str) -> Option<String> {
        self.slot(name).and_then(|s| s.last_error.lock().clone())
    }

    /// 启用/禁用模块。
    pub fn set_enabled(&self, name: &str, enabled: bool) -> OperationResult<()> {
        self.update_descriptor(name, |d| d.enabled = enabled)
    }

    /// 修改显示顺序。
    pub fn set_display_order(&self, name: &str, order: i32) -> OperationResult<()> {
        self.update_descriptor(name, |d| d.display_order = order)
    }

    /// 初始化模块（创建全新实例）。
    ///
    /// 行为：
    /// - 已处于 `Ready`/`Executing`：不做任何事，直接成功（执行窗口已失效的 `Executing` 除外）
    /// - `Failed`/`Cleaned`：丢弃旧槽位，使用新实例重新初始化
    /// - 初始化失败：槽位进入 `Failed` 并记录原因，不保留任何半初始化实例
    ///
    /// 异常处理：
    /// - 模块 setup 报错或 panic：返回 [`CoreError::Initialization`]
    pub async fn initialize(&self, name: &str) -> OperationResult<()> {
        let result = self.initialize_inner(name).await;
        if let Err(e) = &result {
            report_failure(self.notifier.as_ref(), e);
        }
        result
    }

    async fn initialize_inner(&self, name: &str) -> OperationResult<()> {
        let (descriptor, factory) = self.registration(name)?;
        if !descriptor.enabled {
            return Err(CoreError::ModuleDisabled(name.to_string()));
        }

        let _gate = self.init_gate.lock().await;
        if let Some(existing) = self.slot(name) {
            let live = match existing.state() {
                ModuleState::Ready => true,
                // 实例锁空闲却仍标记为执行中：执行窗口已失效，需要重建。
                ModuleState::Executing => existing.instance.try_lock().is_err(),
                _ => false,
            };
            if live {
                debug!("模块已初始化，跳过: {name}");
                return Ok(());
            }
        }

        let slot = Arc::new(ModuleSlot::new(ModuleState::Initializing));
        let mut instance = slot.instance.lock().await;
        self.slots.write().insert(name.to_string(), slot.clone());
        info!("初始化模块: {name}");

        let ctx = ModuleContext::new(name, self.settings.clone());
        let joined = tokio::spawn(async move {
            let mut module = factory();
            let result = module.initialize(&ctx).await;
            (module, result)
        })
        .await;

        let failure = match joined {
            Ok((module, Ok(()))) => {
                *instance = Some(module);
                slot.set_state(ModuleState::Ready);
                info!("模块已就绪: {name}");
                return Ok(());
            }
            Ok((_module, Err(e))) => e,
            Err(join) => anyhow!("模块初始化过程中崩溃: {join}"),
        };

        slot.set_state(ModuleState::Failed);
        slot.record_error(format!("{failure:#}"));
        error!(module = name, "模块初始化失败: {failure:#}");
        Err(CoreError::Initialization {
            module: name.to_string(),
            source: failure,
        })
    }

    /// 模块自身的前置条件检查。
    ///
    /// 返回值：
    /// - 未初始化、已禁用、检查失败时均返回 `false`
    /// - 需要提权但当前未提权，不影响本结果
    pub async fn can_execute(&self, name: &str) -> bool {
        match self.descriptor(name) {
            Ok(d) if d.enabled => {}
            _ => return false,
        }
        let Some(slot) = self.slot(name) else {
            return false;
        };
        let guard = slot.instance.lock().await;
        let Some(module) = guard.as_ref() else {
            return false;
        };
        if slot.state() != ModuleState::Ready {
            return false;
        }
        match module.can_execute().await {
            Ok(v) => v,
            Err(e) => {
                warn!(module = name, "前置条件检查失败: {e:#}");
                false
            }
        }
    }

    /// 执行模块命令，并将结果负载按 JSON 反序列化。
    pub async fn execute<T: DeserializeOwned>(&self, name: &str, command: ModuleCommand) -> OperationResult<T> {
        let command_name = command.name.clone();
        let payload = self.execute_raw(name, command).await?;
        serde_json::from_slice(&payload).map_err(|e| {
            let err = CoreError::Execution {
                module: name.to_string(),
                source: anyhow::Error::new(e).context(format!("解析命令结果失败: {command_name}")),
            };
            report_failure(self.notifier.as_ref(), &err);
            err
        })
    }

    /// 执行模块命令，返回原始结果负载。
    ///
    /// 行为：
    /// - 模块需要提权且当前进程未提权：征得用户确认后经提权桥执行，本进程不运行模块代码
    /// - 否则在本进程的 `Executing` 窗口内执行
    ///
    /// 异常处理：
    /// - 模块错误/panic 一律转换为失败结果，并通过通知接口提示用户
    pub async fn execute_raw(&self, name: &str, command: ModuleCommand) -> OperationResult<Vec<u8>> {
        let result = self.run(name, command, Route::Gated).await;
        if let Err(e) = &result {
            report_failure(self.notifier.as_ref(), e);
        }
        result
    }

    async fn run(&self, name: &str, command: ModuleCommand, route: Route) -> OperationResult<Vec<u8>> {
        let descriptor = self.descriptor(name)?;
        if !descriptor.enabled {
            return Err(CoreError::ModuleDisabled(name.to_string()));
        }
        let slot = self.slot(name).ok_or_else(|| CoreError::NotReady {
            module: name.to_string(),
            state: ModuleState::Discovered,
        })?;

        // 同一模块同一时刻只允许一个执行窗口。
        let instance = slot.instance.lock().await;
        let state = slot.state();
        if state != ModuleState::Ready || instance.is_none() {
            return Err(CoreError::NotReady {
                module: name.to_string(),
                state,
            });
        }

        slot.set_state(ModuleState::Executing);
        let mut window = ExecutionWindow {
            slot: &slot,
            instance,
            finished: false,
        };
        let elevate = route == Route::Gated && descriptor.requires_elevation && !self.bridge.is_elevated();
        let result = if elevate {
            self.run_elevated(name, &command).await
        } else {
            self.run_local(name, &mut window.instance, command).await
        };

        window.finished = true;
        if let Err(e) = &result {
            slot.record_error(e.to_string());
        }
        drop(window);
        result
    }

    async fn run_local(
        &self,
        name: &str,
        instance: &mut Option<Box<dyn Module>>,
        command: ModuleCommand,
    ) -> OperationResult<Vec<u8>> {
        let Some(mut module) = instance.take() else {
            return Err(CoreError::NotReady {
                module: name.to_string(),
                state: ModuleState::Failed,
            });
        };
        debug!(module = name, command = %command.name, "执行模块命令");
        let joined = tokio::spawn(async move {
            let result = module.execute(&command).await;
            (module, result)
        })
        .await;

        match joined {
            Ok((module, result)) => {
                *instance = Some(module);
                result.map_err(|source| CoreError::Execution {
                    module: name.to_string(),
                    source,
                })
            }
            Err(join) => {
                error!(module = name, "模块执行过程中崩溃，实例已丢弃: {join}");
                Err(CoreError::Execution {
                    module: name.to_string(),
                    source: anyhow!("模块执行过程中崩溃: {join}"),
                })
            }
        }
    }

    async fn run_elevated(&self, name: &str, command: &ModuleCommand) -> OperationResult<Vec<u8>> {
        let confirmed = self
            .notifier
            .confirm(
                "需要管理员权限",
                &format!("模块“{name}”的操作“{}”需要管理员权限，是否继续？", command.name),
                true,
            )
            .await;
        if !confirmed {
            info!(module = name, "用户取消了提权操作");
            return Err(CoreError::ElevationDenied);
        }
        let elevated = ElevatedCommand::new(
            ElevatedCommand::module_command_id(name, &command.name),
            command.payload.clone(),
        );
        self.bridge.execute_elevated_raw(elevated).await
    }

    /// 清理模块（尽力而为，幂等）。
    ///
    /// 行为：
    /// - 等待正在进行的执行结束后再清理
    /// - 模块清理时的错误/panic 被吞掉，但会记录到日志与 `last_error`
    /// - 已清理的模块再次清理不产生任何副作用
    pub async fn cleanup(&self, name: &str) {
        let slot = match self.slot(name) {
            Some(slot) => slot,
            None => {
                if self.descriptor(name).is_err() {
                    warn!("清理未知模块，已忽略: {name}");
                    return;
                }
                // 从未初始化过：直接标记为已清理。
                let slot = Arc::new(ModuleSlot::new(ModuleState::Cleaned));
                self.slots.write().entry(name.to_string()).or_insert(slot).clone()
            }
        };

        let mut instance = slot.instance.lock().await;
        if slot.state() == ModuleState::Cleaned {
            return;
        }
        if let Some(mut module) = instance.take() {
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| module.cleanup()));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(module = name, "模块清理出错（已忽略）: {e:#}");
                    slot.record_error(format!("清理出错: {e:#}"));
                }
                Err(_) => {
                    warn!(module = name, "模块清理时崩溃（已忽略）");
                    slot.record_error("清理时崩溃".to_string());
                }
            }
        }
        slot.set_state(ModuleState::Cleaned);
        info!("模块已清理: {name}");
    }

    /// 清理所有已知模块（宿主退出时调用）。
    pub async fn cleanup_all(&self) {
        let names: Vec<String> = self
            .registrations
            .read()
            .iter()
            .map(|r| r.descriptor.name.clone())
            .collect();
        for name in names {
            self.cleanup(&name).await;
        }
    }

    fn slot(&self, name: &str) -> Option<Arc<ModuleSlot>> {
        self.slots.read().get(name).cloned()
    }

    fn registration(&self, name: &str) -> OperationResult<(ModuleDescriptor, ModuleFactory)> {
        self.registrations
            .read()
            .iter()
            .find(|r| r.descriptor.name == name)
            .map(|r| (r.descriptor.clone(), r.factory.clone()))
            .ok_or_else(|| CoreError::UnknownModule(name.to_string()))
    }

    fn update_descriptor(&self, name: &str, f: impl FnOnce(&mut ModuleDescriptor)) -> OperationResult<()> {
        let mut registrations = self.registrations.write();
        let entry = registrations
            .iter_mut()
            .find(|r| r.descriptor.name == name)
            .ok_or_else(|| CoreError::UnknownModule(name.to_string()))?;
        f(&mut entry.descriptor);
        Ok(())
    }
}

/// 提权助手内的命令分发：`"<模块名>::<命令名>"` 路由到对应模块，按需初始化后直接执行。
#[async_trait]
impl CommandDispatcher for ModuleLifecycleRegistry {
    async fn dispatch(&self, command: &str, payload: &[u8]) -> anyhow::Result<Vec<u8>> {
        let (module, name) = ElevatedCommand::split_module_command(command)
            .ok_or_else(|| anyhow!("命令标识格式应为 <模块>::<命令>: {command}"))?;
        if !matches!(self.state(module), Some(ModuleState::Ready)) {
            self.initialize_inner(module).await?;
        }
        let command = ModuleCommand {
            name: name.to_string(),
            payload: payload.to_vec(),
        };
        Ok(self.run(module, command, Route::Direct).await?)
    }
}
