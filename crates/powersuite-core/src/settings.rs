//! 设置存储：类型化读写、持久化、变更通知与热加载。
//!
//! 持久化格式（JSON 对象）：
//! - 顶层为全局设置（`"Theme": "Dark"` 等）
//! - `moduleSettings` 为按模块名分组的模块私有设置，避免模块之间在顶层键上冲突
//! - 无法识别的条目（例如新版本写入的 `null`/数组）原样保留，重新保存时不会丢失
//!
//! 并发约定：
//! - 文档只由本存储持有；写操作串行（同一时刻只有一个写者），读操作只短暂持锁并返回副本
//! - 变更事件在释放文档锁之后同步派发，观察者内可以安全地再次读取设置
//!
//! 作者：PowerSuite 项目组（自动生成）
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};

use anyhow::{anyhow, Context};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::{CoreError, OperationResult};
use crate::paths;
use crate::value::{FromSettingValue, SettingValue};

/// 模块设置在持久化文件中的分组键。
pub const MODULE_SETTINGS_KEY: &str = "moduleSettings";

/// 内置全局设置键名。
pub mod keys {
    pub const THEME: &str = "Theme";
    pub const LANGUAGE: &str = "Language";
    pub const START_MINIMIZED: &str = "StartMinimized";
    pub const MINIMIZE_TO_TRAY: &str = "MinimizeToTray";
    pub const CHECK_FOR_UPDATES: &str = "CheckForUpdates";
    pub const UPDATE_CHANNEL: &str = "UpdateChannel";
    pub const LOGGING_LEVEL: &str = "LoggingLevel";
    pub const WINDOW_WIDTH: &str = "WindowWidth";
    pub const WINDOW_HEIGHT: &str = "WindowHeight";
    pub const IS_WINDOW_MAXIMIZED: &str = "IsWindowMaximized";
    pub const LAST_SELECTED_MODULE: &str = "LastSelectedModule";
}

/// 编译期内置默认值。
///
/// 说明：
/// - `LastSelectedModule` 没有默认值（首次设置前视为不存在）
pub fn builtin_defaults() -> BTreeMap<String, SettingValue> {
    let mut d = BTreeMap::new();
    d.insert(keys::THEME.to_string(), SettingValue::from("System"));
    d.insert(keys::LANGUAGE.to_string(), SettingValue::from("en-US"));
    d.insert(keys::START_MINIMIZED.to_string(), SettingValue::from(false));
    d.insert(keys::MINIMIZE_TO_TRAY.to_string(), SettingValue::from(true));
    d.insert(keys::CHECK_FOR_UPDATES.to_string(), SettingValue::from(true));
    d.insert(keys::UPDATE_CHANNEL.to_string(), SettingValue::from("Stable"));
    d.insert(keys::LOGGING_LEVEL.to_string(), SettingValue::from("Information"));
    d.insert(keys::WINDOW_WIDTH.to_string(), SettingValue::from(1200.0));
    d.insert(keys::WINDOW_HEIGHT.to_string(), SettingValue::from(800.0));
    d.insert(keys::IS_WINDOW_MAXIMIZED.to_string(), SettingValue::from(false));
    d
}

/// 设置文档（全局设置 + 模块设置 + 原样保留的未识别条目）。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettingsDocument {
    values: BTreeMap<String, SettingValue>,
    modules: BTreeMap<String, BTreeMap<String, SettingValue>>,
    passthrough: Map<String, Value>,
    module_passthrough: BTreeMap<String, Map<String, Value>>,
    /// 不是对象的模块分组（原样保留）。
    module_foreign: Map<String, Value>,
}

impl SettingsDocument {
    /// 以给定默认值创建文档。
    pub fn with_values(values: BTreeMap<String, SettingValue>) -> Self {
        Self {
            values,
            ..Self::default()
        }
    }

    /// 读取全局设置。
    pub fn get(&self, key: &str) -> Option<&SettingValue> {
        self.values.get(key)
    }

    /// 读取模块设置。
    pub fn module_get(&self, module: &str, key: &str) -> Option<&SettingValue> {
        self.modules.get(module).and_then(|m| m.get(key))
    }

    /// 全局设置键（有序）。
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// 存有设置的模块名（有序）。
    pub fn modules(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    /// 从持久化 JSON 解析文档。
    ///
    /// 异常处理：
    /// - 根节点不是对象时返回错误（由上层按“文件损坏”处理）
    pub fn from_json(value: Value) -> anyhow::Result<Self> {
        let Value::Object(root) = value else {
            return Err(anyhow!("设置文件根节点不是 JSON 对象"));
        };
        let mut doc = Self::default();
        for (key, raw) in root {
            if key == MODULE_SETTINGS_KEY {
                if let Value::Object(per_module) = raw {
                    for (module, section) in per_module {
                        let Value::Object(section) = section else {
                            warn!("模块设置分组不是对象，按未识别条目保留: {module}");
                            doc.module_foreign.insert(module, section);
                            continue;
                        };
                        let (known, unknown) = split_entries(section);
                        if !known.is_empty() {
                            doc.modules.insert(module.clone(), known);
                        }
                        if !unknown.is_empty() {
                            doc.module_passthrough.insert(module, unknown);
                        }
                    }
                    continue;
                }
                warn!("{MODULE_SETTINGS_KEY} 不是对象，按未识别条目保留");
                doc.passthrough.insert(key, raw);
                continue;
            }
            match SettingValue::from_json(&raw) {
                Some(v) => {
                    doc.values.insert(key, v);
                }
                None => {
                    doc.passthrough.insert(key, raw);
                }
            }
        }
        Ok(doc)
    }

    /// 序列化为持久化 JSON。
    pub fn to_json(&self) -> Value {
        let mut root = self.passthrough.clone();
        for (k, v) in &self.values {
            root.insert(k.clone(), v.to_json());
        }

        let module_names: BTreeSet<&String> = self
            .modules
            .keys()
            .chain(self.module_passthrough.keys())
            .collect();
        if !module_names.is_empty() || !self.module_foreign.is_empty() {
            let mut per_module = self.module_foreign.clone();
            for name in module_names {
                let mut section = self.module_passthrough.get(name).cloned().unwrap_or_default();
                if let Some(known) = self.modules.get(name) {
                    for (k, v) in known {
                        section.insert(k.clone(), v.to_json());
                    }
                }
                per_module.insert(name.clone(), Value::Object(section));
            }
            root.insert(MODULE_SETTINGS_KEY.to_string(), Value::Object(per_module));
        }
        Value::Object(root)
    }

    /// 以 `self` 为默认值，逐键合并持久化文档（持久化值优先）。
    fn merged_with(&self, persisted: SettingsDocument) -> SettingsDocument {
        let mut merged = self.clone();
        merged.values.extend(persisted.values);
        for (module, section) in persisted.modules {
            merged.modules.entry(module).or_default().extend(section);
        }
        merged.passthrough = persisted.passthrough;
        merged.module_passthrough = persisted.module_passthrough;
        merged.module_foreign = persisted.module_foreign;
        merged
    }
}

/// 拆分对象条目：可表示的进入设置值，其余原样保留。
fn split_entries(entries: Map<String, Value>) -> (BTreeMap<String, SettingValue>, Map<String, Value>) {
    let mut known = BTreeMap::new();
    let mut unknown = Map::new();
    for (k, raw) in entries {
        match SettingValue::from_json(&raw) {
            Some(v) => {
                known.insert(k, v);
            }
            None => {
                unknown.insert(k, raw);
            }
        }
    }
    (known, unknown)
}

/// 设置变更事件。
///
/// 字段说明：
/// - `module`：`None` 表示全局设置；`Some(name)` 表示该模块的私有设置
/// - `old_value` / `new_value`：`None` 表示变更前/后该键不存在
#[derive(Debug, Clone, PartialEq)]
pub struct SettingChangedEvent {
    pub key: String,
    pub module: Option<String>,
    pub old_value: Option<SettingValue>,
    pub new_value: Option<SettingValue>,
}

/// 观察者订阅句柄（用于取消订阅）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Observer = Arc<dyn Fn(&SettingChangedEvent) + Send + Sync>;

struct StoreState {
    doc: SettingsDocument,
    generation: u64,
    saved_generation: u64,
    last_modified: Option<SystemTime>,
}

/// 设置存储。
pub struct SettingsStore {
    path: PathBuf,
    defaults: SettingsDocument,
    state: Mutex<StoreState>,
    observers: Mutex<Vec<(SubscriptionId, Observer)>>,
    next_subscription: AtomicU64,
    save_gate: tokio::sync::Mutex<()>,
}

impl SettingsStore {
    /// 使用内置默认值创建存储（尚未加载持久化文件）。
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_defaults(path, builtin_defaults())
    }

    /// 使用自定义默认值创建存储。
    pub fn with_defaults(path: impl Into<PathBuf>, defaults: BTreeMap<String, SettingValue>) -> Self {
        let defaults = SettingsDocument::with_values(defaults);
        Self {
            path: path.into(),
            state: Mutex::new(StoreState {
                doc: defaults.clone(),
                generation: 0,
                saved_generation: 0,
                last_modified: None,
            }),
            defaults,
            observers: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
            save_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// 设置文件路径。
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 读取全局设置；不存在或类型不兼容时返回 `default`。
    pub fn get<T: FromSettingValue>(&self, key: &str, default: T) -> T {
        let state = self.state.lock();
        state.doc.get(key).and_then(T::from_setting).unwrap_or(default)
    }

    /// 读取全局设置的原始值（副本）。
    pub fn get_value(&self, key: &str) -> Option<SettingValue> {
        self.state.lock().doc.get(key).cloned()
    }

    /// 读取模块设置；不存在或类型不兼容时返回 `default`。
    pub fn get_module_setting<T: FromSettingValue>(&self, module: &str, key: &str, default: T) -> T {
        let state = self.state.lock();
        state
            .doc
            .module_get(module, key)
            .and_then(T::from_setting)
            .unwrap_or(default)
    }

    /// 写入全局设置（仅内存，立即可见）。
    ///
    /// 行为：
    /// - 值相等（按值比较）时不做任何事，也不派发事件
    /// - 值变化时标记为“脏”，并同步派发一条 [`SettingChangedEvent`]
    /// - `moduleSettings` 为保留键，写入会被忽略
    /// - NaN/无穷大无法写入 JSON，这类值会被忽略并记录警告
    pub fn set<T: Into<SettingValue>>(&self, key: &str, value: T) {
        if key == MODULE_SETTINGS_KEY {
            warn!("{MODULE_SETTINGS_KEY} 为保留键，请使用 set_module_setting");
            return;
        }
        let new_value = value.into();
        if !new_value.is_finite() {
            warn!("设置值不是有限数值，已忽略: {key}");
            return;
        }
        let event = {
            let mut state = self.state.lock();
            let old_value = state.doc.values.get(key).cloned();
            if old_value.as_ref() == Some(&new_value) {
                return;
            }
            state.doc.passthrough.remove(key);
            state.doc.values.insert(key.to_string(), new_value.clone());
            state.generation += 1;
            SettingChangedEvent {
                key: key.to_string(),
                module: None,
                old_value,
                new_value: Some(new_value),
            }
        };
        self.publish(&[event]);
    }

    /// 写入模块设置（仅内存，立即可见），语义同 [`SettingsStore::set`]。
    pub fn set_module_setting<T: Into<SettingValue>>(&self, module: &str, key: &str, value: T) {
        let new_value = value.into();
        if !new_value.is_finite() {
            warn!("模块设置值不是有限数值，已忽略: {module}.{key}");
            return;
        }
        let event = {
            let mut state = self.state.lock();
            let old_value = state.doc.module_get(module, key).cloned();
            if old_value.as_ref() == Some(&new_value) {
                return;
            }
            if let Some(unknown) = state.doc.module_passthrough.get_mut(module) {
                unknown.remove(key);
            }
            state.doc.module_foreign.remove(module);
            state
                .doc
                .modules
                .entry(module.to_string())
                .or_default()
                .insert(key.to_string(), new_value.clone());
            state.generation += 1;
            SettingChangedEvent {
                key: key.to_string(),
                module: Some(module.to_string()),
                old_value,
                new_value: Some(new_value),
            }
        };
        self.publish(&[event]);
    }

    /// 当前文档副本。
    pub fn snapshot(&self) -> SettingsDocument {
        self.state.lock().doc.clone()
    }

    /// 是否存在尚未保存的修改。
    pub fn is_dirty(&self) -> bool {
        let state = self.state.lock();
        state.generation != state.saved_generation
    }

    /// 注册变更观察者。
    pub fn subscribe<F>(&self, observer: F) -> SubscriptionId
    where
        F: Fn(&SettingChangedEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.observers.lock().push((id, Arc::new(observer)));
        id
    }

    /// 取消订阅。
    ///
    /// 返回值：
    /// - `true`：找到并移除了该观察者
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut observers = self.observers.lock();
        let before = observers.len();
        observers.retain(|(sid, _)| *sid != id);
        observers.len() != before
    }

    /// 将完整文档原子写入磁盘。
    ///
    /// 异常处理：
    /// - 序列化或写盘失败返回 [`CoreError::Persistence`]，磁盘上的旧文件保持不变
    pub async fn save(&self) -> OperationResult<()> {
        let _gate = self.save_gate.lock().await;
        let (json, generation) = {
            let state = self.state.lock();
            (state.doc.to_json(), state.generation)
        };
        let bytes = serde_json::to_vec_pretty(&json)
            .context("序列化设置失败")
            .map_err(|e| self.persistence_error(e))?;

        if let Err(e) = paths::write_atomic(&self.path, &bytes).await {
            warn!("保存设置失败: {e:#}");
            return Err(self.persistence_error(e));
        }

        let modified = file_modified(&self.path).await;
        let mut state = self.state.lock();
        state.saved_generation = generation;
        state.last_modified = modified;
        debug!("设置已保存: {}", self.path.display());
        Ok(())
    }

    /// 从磁盘加载设置，并与内置默认值合并（持久化值优先）。
    ///
    /// 行为：
    /// - 文件不存在（首次运行）或损坏：回退到默认值并返回成功
    /// - 损坏文件会尽力备份为 `*.corrupt`，避免下次保存时被覆盖而无法排查
    /// - 每个与当前内存值不同的键派发一条变更事件
    pub async fn load(&self) -> OperationResult<()> {
        let persisted = match tokio::fs::read(&self.path).await {
            Ok(bytes) => match parse_document(&bytes) {
                Ok(doc) => Some(doc),
                Err(e) => {
                    warn!("设置文件损坏，使用默认值: {}: {e:#}", self.path.display());
                    let backup = self.path.with_extension("json.corrupt");
                    let _ = tokio::fs::copy(&self.path, &backup).await;
                    None
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("未找到设置文件，使用默认值: {}", self.path.display());
                None
            }
            Err(e) => {
                warn!("读取设置文件失败，使用默认值: {}: {e}", self.path.display());
                None
            }
        };

        let new_doc = match persisted {
            Some(doc) => self.defaults.merged_with(doc),
            None => self.defaults.clone(),
        };
        let modified = file_modified(&self.path).await;

        let events = {
            let mut state = self.state.lock();
            let events = diff_documents(&state.doc, &new_doc);
            state.doc = new_doc;
            state.generation += 1;
            state.saved_generation = state.generation;
            state.last_modified = modified;
            events
        };
        self.publish(&events);
        Ok(())
    }

    /// 将所有设置恢复为默认值并保存。
    ///
    /// 说明：
    /// - 每个实际发生变化的键派发一条事件
    /// - 未识别条目（其他版本写入）保留不动
    pub async fn reset(&self) -> OperationResult<()> {
        let events = {
            let mut state = self.state.lock();
            let mut new_doc = self.defaults.clone();
            new_doc.passthrough = state.doc.passthrough.clone();
            new_doc.module_passthrough = state.doc.module_passthrough.clone();
            new_doc.module_foreign = state.doc.module_foreign.clone();
            let events = diff_documents(&state.doc, &new_doc);
            state.doc = new_doc;
            state.generation += 1;
            events
        };
        info!("设置已恢复默认值（{} 项变化）", events.len());
        self.publish(&events);
        self.save().await
    }

    /// 若设置文件被外部修改（修改时间变化），重新加载。
    ///
    /// 返回值：
    /// - `Ok(true)`：已重新加载
    /// - `Ok(false)`：文件未变化、文件不存在，或内存中有未保存修改（内存优先）
    pub async fn reload_if_changed(&self) -> OperationResult<bool> {
        let Some(current) = file_modified(&self.path).await else {
            return Ok(false);
        };
        {
            let state = self.state.lock();
            if state.last_modified == Some(current) {
                return Ok(false);
            }
            if state.generation != state.saved_generation {
                debug!("设置文件已变化，但内存中有未保存修改，跳过热加载");
                return Ok(false);
            }
        }
        info!("检测到设置文件被外部修改，重新加载: {}", self.path.display());
        self.load().await?;
        Ok(true)
    }

    /// 启动后台热加载任务（按固定间隔检查文件变化）。
    ///
    /// 说明：
    /// - 任务只持有弱引用；存储被释放后自动退出
    pub fn spawn_hot_reload(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(store) = weak.upgrade() else {
                    return;
                };
                if let Err(e) = store.reload_if_changed().await {
                    warn!("热加载设置失败: {e}");
                }
            }
        })
    }

    fn publish(&self, events: &[SettingChangedEvent]) {
        if events.is_empty() {
            return;
        }
        let observers: Vec<Observer> = self.observers.lock().iter().map(|(_, o)| o.clone()).collect();
        for event in events {
            debug!(key = %event.key, module = ?event.module, "设置已变更");
            for observer in &observers {
                observer(event);
            }
        }
    }

    fn persistence_error(&self, source: anyhow::Error) -> CoreError {
        CoreError::Persistence {
            path: self.path.clone(),
            source,
        }
    }
}

fn parse_document(bytes: &[u8]) -> anyhow::Result<SettingsDocument> {
    let value: Value = serde_json::from_slice(bytes).context("解析设置 JSON 失败")?;
    SettingsDocument::from_json(value)
}

async fn file_modified(path: &Path) -> Option<SystemTime> {
    tokio::fs::metadata(path).await.ok().and_then(|m| m.modified().ok())
}

/// 计算两份文档之间的逐键差异（全局设置在前，模块设置在后）。
fn diff_documents(old: &SettingsDocument, new: &SettingsDocument) -> Vec<SettingChangedEvent> {
    let mut events = Vec::new();

    let keys: BTreeSet<&String> = old.values.keys().chain(new.values.keys()).collect();
    for key in keys {
        let (a, b) = (old.values.get(key), new.values.get(key));
        if a != b {
            events.push(SettingChangedEvent {
                key: key.clone(),
                module: None,
                old_value: a.cloned(),
                new_value: b.cloned(),
            });
        }
    }

    let empty = BTreeMap::new();
    let modules: BTreeSet<&String> = old.modules.keys().chain(new.modules.keys()).collect();
    for module in modules {
        let a = old.modules.get(module).unwrap_or(&empty);
        let b = new.modules.get(module).unwrap_or(&empty);
        let keys: BTreeSet<&String> = a.keys().chain(b.keys()).collect();
        for key in keys {
            if a.get(key) != b.get(key) {
                events.push(SettingChangedEvent {
                    key: key.clone(),
                    module: Some(module.clone()),
                    old_value: a.get(key).cloned(),
                    new_value: b.get(key).cloned(),
                });
            }
        }
    }
    events
}
