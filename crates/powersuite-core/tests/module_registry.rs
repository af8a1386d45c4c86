mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use common::{Behavior, FakePlatform, RecordingNotifier};
use powersuite_core::helper::{CommandCatalog, CommandDispatcher};
use powersuite_core::module::{
    Module, ModuleCommand, ModuleContext, ModuleDescriptor, ModuleState, ModuleTable,
};
use powersuite_core::registry::ModuleLifecycleRegistry;
use powersuite_core::settings::SettingsStore;
use powersuite_core::{CoreError, FailureKind};

#[derive(Default)]
struct Counters {
    inits: AtomicUsize,
    executions: AtomicUsize,
    cleanups: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

struct SampleModule {
    counters: Arc<Counters>,
    fail_init: bool,
    greeting: String,
}

#[async_trait]
impl Module for SampleModule {
    async fn initialize(&mut self, ctx: &ModuleContext) -> anyhow::Result<()> {
        self.counters.inits.fetch_add(1, Ordering::SeqCst);
        if self.fail_init {
            bail!("缺少硬件");
        }
        self.greeting = ctx.setting("Greeting", "hello".to_string());
        Ok(())
    }

    async fn can_execute(&self) -> anyhow::Result<bool> {
        Ok(true)
    }

    async fn execute(&mut self, command: &ModuleCommand) -> anyhow::Result<Vec<u8>> {
        self.counters.executions.fetch_add(1, Ordering::SeqCst);
        let now = self.counters.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_active.fetch_max(now, Ordering::SeqCst);
        let result = match command.name.as_str() {
            "echo" => Ok(command.payload.clone()),
            "greet" => Ok(serde_json::to_vec(&self.greeting)?),
            "slow" => {
                tokio::time::sleep(Duration::from_millis(40)).await;
                Ok(Vec::new())
            }
            "panic" => panic!("模块内部错误"),
            other => Err(anyhow::anyhow!("未知命令: {other}")),
        };
        self.counters.active.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn cleanup(&mut self) -> anyhow::Result<()> {
        self.counters.cleanups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn sample(counters: &Arc<Counters>, fail_init: bool) -> impl Fn() -> Box<dyn Module> + Send + Sync + 'static {
    let counters = counters.clone();
    move || {
        Box::new(SampleModule {
            counters: counters.clone(),
            fail_init,
            greeting: String::new(),
        }) as Box<dyn Module>
    }
}

struct Harness {
    registry: Arc<ModuleLifecycleRegistry>,
    platform: Arc<FakePlatform>,
    notifier: Arc<RecordingNotifier>,
    helper_calls: Arc<AtomicUsize>,
    _dir: tempfile::TempDir,
}

fn harness(table: ModuleTable) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let helper_calls = Arc::new(AtomicUsize::new(0));
    let calls = helper_calls.clone();
    let mut catalog = CommandCatalog::new();
    catalog.register("admin::echo", move |payload| {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(payload.to_vec())
    });

    let platform = FakePlatform::new(Behavior::Serve, Arc::new(catalog));
    let bridge = Arc::new(common::bridge(dir.path(), platform.clone(), Duration::from_secs(5)));
    let settings = Arc::new(SettingsStore::new(dir.path().join("settings.json")));
    let notifier = Arc::new(RecordingNotifier::default());
    let registry = Arc::new(ModuleLifecycleRegistry::new(
        table,
        settings,
        bridge,
        notifier.clone(),
    ));
    Harness {
        registry,
        platform,
        notifier,
        helper_calls,
        _dir: dir,
    }
}

#[test]
fn registration_rejects_bad_names() {
    let counters = Arc::new(Counters::default());
    let mut table = ModuleTable::new();
    table.register(ModuleDescriptor::new("a"), sample(&counters, false)).unwrap();

    let dup = table.register(ModuleDescriptor::new("a"), sample(&counters, false));
    assert!(matches!(dup, Err(CoreError::InvalidRegistration(_))));
    let empty = table.register(ModuleDescriptor::new("  "), sample(&counters, false));
    assert!(matches!(empty, Err(CoreError::InvalidRegistration(_))));
    let sep = table.register(ModuleDescriptor::new("x::y"), sample(&counters, false));
    assert!(matches!(sep, Err(CoreError::InvalidRegistration(_))));
    assert_eq!(table.len(), 1);
}

#[tokio::test]
async fn discover_orders_by_display_order_then_name() {
    let counters = Arc::new(Counters::default());
    let mut table = ModuleTable::new();
    for (name, order) in [("b", 2), ("z", 1), ("a", 1)] {
        table
            .register(ModuleDescriptor::new(name).display_order(order), sample(&counters, false))
            .unwrap();
    }
    let h = harness(table);

    let names: Vec<String> = h.registry.discover().into_iter().map(|d| d.name).collect();
    assert_eq!(names, vec!["a", "z", "b"]);
    assert_eq!(counters.inits.load(Ordering::SeqCst), 0, "discover must not instantiate");

    h.registry.set_display_order("b", 0).unwrap();
    let names: Vec<String> = h.registry.discover().into_iter().map(|d| d.name).collect();
    assert_eq!(names, vec!["b", "a", "z"]);
}

#[tokio::test]
async fn initialize_then_execute_with_module_settings() {
    let counters = Arc::new(Counters::default());
    let mut table = ModuleTable::new();
    table.register(ModuleDescriptor::new("greeter"), sample(&counters, false)).unwrap();
    let h = harness(table);

    assert_eq!(h.registry.state("greeter"), Some(ModuleState::Discovered));
    h.registry.initialize("greeter").await.unwrap();
    assert_eq!(h.registry.state("greeter"), Some(ModuleState::Ready));
    assert!(h.registry.can_execute("greeter").await);

    let greeting: String = h
        .registry
        .execute("greeter", ModuleCommand::new("greet"))
        .await
        .unwrap();
    assert_eq!(greeting, "hello");

    // 已就绪时再次初始化不产生新实例。
    h.registry.initialize("greeter").await.unwrap();
    assert_eq!(counters.inits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_initialization_leaves_module_failed() {
    let counters = Arc::new(Counters::default());
    let mut table = ModuleTable::new();
    table.register(ModuleDescriptor::new("broken"), sample(&counters, true)).unwrap();
    let h = harness(table);

    let err = h.registry.initialize("broken").await.unwrap_err();
    assert_eq!(err.kind(), FailureKind::Initialization);
    assert_eq!(h.registry.state("broken"), Some(ModuleState::Failed));
    assert!(h.registry.last_error("broken").unwrap().contains("缺少硬件"));
    assert!(!h.registry.can_execute("broken").await);

    let err = h
        .registry
        .execute_raw("broken", ModuleCommand::new("echo"))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NotReady { state: ModuleState::Failed, .. }));
    assert!(!h.notifier.errors.lock().is_empty());
}

#[tokio::test]
async fn cleanup_is_idempotent_and_reinit_uses_fresh_instance() {
    let counters = Arc::new(Counters::default());
    let mut table = ModuleTable::new();
    table.register(ModuleDescriptor::new("m"), sample(&counters, false)).unwrap();
    let h = harness(table);

    h.registry.initialize("m").await.unwrap();
    h.registry.cleanup("m").await;
    h.registry.cleanup("m").await;
    assert_eq!(counters.cleanups.load(Ordering::SeqCst), 1);
    assert_eq!(h.registry.state("m"), Some(ModuleState::Cleaned));

    let err = h.registry.execute_raw("m", ModuleCommand::new("echo")).await.unwrap_err();
    assert!(matches!(err, CoreError::NotReady { state: ModuleState::Cleaned, .. }));

    h.registry.initialize("m").await.unwrap();
    assert_eq!(counters.inits.load(Ordering::SeqCst), 2);
    assert_eq!(h.registry.state("m"), Some(ModuleState::Ready));

    h.registry.cleanup_all().await;
    assert_eq!(counters.cleanups.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn executions_of_one_module_never_overlap() {
    let counters = Arc::new(Counters::default());
    let mut table = ModuleTable::new();
    table.register(ModuleDescriptor::new("m"), sample(&counters, false)).unwrap();
    let h = harness(table);
    h.registry.initialize("m").await.unwrap();

    let mut tasks = Vec::new();
    for _ in 0..5 {
        let registry = h.registry.clone();
        tasks.push(tokio::spawn(async move {
            registry.execute_raw("m", ModuleCommand::new("slow")).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }
    assert_eq!(counters.executions.load(Ordering::SeqCst), 5);
    assert_eq!(counters.max_active.load(Ordering::SeqCst), 1);
    assert_eq!(h.registry.state("m"), Some(ModuleState::Ready));
}

#[tokio::test]
async fn different_modules_run_concurrently() {
    let shared = Arc::new(Counters::default());
    let mut table = ModuleTable::new();
    table.register(ModuleDescriptor::new("one"), sample(&shared, false)).unwrap();
    table.register(ModuleDescriptor::new("two"), sample(&shared, false)).unwrap();
    let h = harness(table);
    h.registry.initialize("one").await.unwrap();
    h.registry.initialize("two").await.unwrap();

    let (a, b) = tokio::join!(
        h.registry.execute_raw("one", ModuleCommand::new("slow")),
        h.registry.execute_raw("two", ModuleCommand::new("slow")),
    );
    a.unwrap();
    b.unwrap();
    assert_eq!(shared.executions.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn elevated_module_is_routed_through_helper() {
    let counters = Arc::new(Counters::default());
    let mut table = ModuleTable::new();
    table
        .register(
            ModuleDescriptor::new("admin").requires_elevation(true),
            sample(&counters, false),
        )
        .unwrap();
    let h = harness(table);
    h.registry.initialize("admin").await.unwrap();

    let out = h
        .registry
        .execute_raw("admin", ModuleCommand {
            name: "echo".to_string(),
            payload: b"rule".to_vec(),
        })
        .await
        .unwrap();
    assert_eq!(out, b"rule");
    assert_eq!(counters.executions.load(Ordering::SeqCst), 0, "must not run locally");
    assert_eq!(h.helper_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.platform.launches(), 1);
    assert_eq!(h.registry.state("admin"), Some(ModuleState::Ready));
}

#[tokio::test]
async fn declined_confirmation_never_launches_helper() {
    let counters = Arc::new(Counters::default());
    let mut table = ModuleTable::new();
    table
        .register(
            ModuleDescriptor::new("admin").requires_elevation(true),
            sample(&counters, false),
        )
        .unwrap();
    let h = harness(table);
    h.notifier.decline.store(true, Ordering::SeqCst);
    h.registry.initialize("admin").await.unwrap();

    let err = h.registry.execute_raw("admin", ModuleCommand::new("echo")).await.unwrap_err();
    assert!(err.is_denied());
    assert_eq!(h.platform.launches(), 0);
    assert_eq!(counters.executions.load(Ordering::SeqCst), 0);
    assert_eq!(h.notifier.infos.lock().len(), 1, "denial is shown as info");
    assert!(h.notifier.errors.lock().is_empty());
}

#[tokio::test]
async fn elevated_process_runs_elevated_module_locally() {
    let counters = Arc::new(Counters::default());
    let mut table = ModuleTable::new();
    table
        .register(
            ModuleDescriptor::new("admin").requires_elevation(true),
            sample(&counters, false),
        )
        .unwrap();
    let h = harness(table);
    h.platform.elevated.store(true, Ordering::SeqCst);
    h.registry.initialize("admin").await.unwrap();

    h.registry.execute_raw("admin", ModuleCommand::new("echo")).await.unwrap();
    assert_eq!(counters.executions.load(Ordering::SeqCst), 1);
    assert_eq!(h.platform.launches(), 0);
}

#[tokio::test]
async fn panicking_module_is_contained() {
    let counters = Arc::new(Counters::default());
    let mut table = ModuleTable::new();
    table.register(ModuleDescriptor::new("m"), sample(&counters, false)).unwrap();
    let h = harness(table);
    h.registry.initialize("m").await.unwrap();

    let err = h.registry.execute_raw("m", ModuleCommand::new("panic")).await.unwrap_err();
    assert_eq!(err.kind(), FailureKind::Execution);
    assert_eq!(h.registry.state("m"), Some(ModuleState::Failed));

    h.registry.initialize("m").await.unwrap();
    assert_eq!(h.registry.state("m"), Some(ModuleState::Ready));
}

#[tokio::test]
async fn module_error_keeps_module_ready() {
    let counters = Arc::new(Counters::default());
    let mut table = ModuleTable::new();
    table.register(ModuleDescriptor::new("m"), sample(&counters, false)).unwrap();
    let h = harness(table);
    h.registry.initialize("m").await.unwrap();

    let err = h.registry.execute_raw("m", ModuleCommand::new("nope")).await.unwrap_err();
    assert_eq!(err.kind(), FailureKind::Execution);
    assert_eq!(h.registry.state("m"), Some(ModuleState::Ready));
    assert!(h.registry.last_error("m").is_some());
}

#[tokio::test]
async fn disabled_and_unknown_modules_are_rejected() {
    let counters = Arc::new(Counters::default());
    let mut table = ModuleTable::new();
    table.register(ModuleDescriptor::new("m"), sample(&counters, false)).unwrap();
    let h = harness(table);

    h.registry.set_enabled("m", false).unwrap();
    assert!(matches!(
        h.registry.initialize("m").await,
        Err(CoreError::ModuleDisabled(_))
    ));
    assert!(matches!(
        h.registry.initialize("ghost").await,
        Err(CoreError::UnknownModule(_))
    ));
    assert_eq!(h.registry.state("ghost"), None);
    assert!(h.registry.set_enabled("ghost", true).is_err());
}

#[tokio::test]
async fn registry_dispatches_helper_commands_directly() {
    let counters = Arc::new(Counters::default());
    let mut table = ModuleTable::new();
    table
        .register(
            ModuleDescriptor::new("admin").requires_elevation(true),
            sample(&counters, false),
        )
        .unwrap();
    let h = harness(table);

    let out = h.registry.dispatch("admin::echo", b"direct").await.unwrap();
    assert_eq!(out, b"direct");
    assert_eq!(counters.inits.load(Ordering::SeqCst), 1);
    assert_eq!(counters.executions.load(Ordering::SeqCst), 1);
    assert_eq!(h.platform.launches(), 0);

    assert!(h.registry.dispatch("no-separator", b"").await.is_err());
}

#[tokio::test]
async fn abandoned_execution_does_not_wedge_the_module() {
    let counters = Arc::new(Counters::default());
    let mut table = ModuleTable::new();
    table.register(ModuleDescriptor::new("m"), sample(&counters, false)).unwrap();
    let h = harness(table);
    h.registry.initialize("m").await.unwrap();

    let abandoned = tokio::time::timeout(
        Duration::from_millis(5),
        h.registry.execute_raw("m", ModuleCommand::new("slow")),
    )
    .await;
    assert!(abandoned.is_err(), "slow command should outlive the timeout");
    // 实例随被放弃的任务一起丢失。
    assert_eq!(h.registry.state("m"), Some(ModuleState::Failed));
    assert!(h.registry.last_error("m").is_some());

    h.registry.initialize("m").await.unwrap();
    assert_eq!(h.registry.state("m"), Some(ModuleState::Ready));
    let out = h
        .registry
        .execute_raw("m", ModuleCommand {
            name: "echo".to_string(),
            payload: b"again".to_vec(),
        })
        .await
        .unwrap();
    assert_eq!(out, b"again");
}

#[tokio::test]
async fn abandoned_elevated_execution_returns_module_to_ready() {
    let counters = Arc::new(Counters::default());
    let mut table = ModuleTable::new();
    table
        .register(
            ModuleDescriptor::new("admin").requires_elevation(true),
            sample(&counters, false),
        )
        .unwrap();
    let h = harness(table);
    *h.platform.behavior.lock() = Behavior::Hang;
    h.registry.initialize("admin").await.unwrap();

    let abandoned = tokio::time::timeout(
        Duration::from_millis(50),
        h.registry.execute_raw("admin", ModuleCommand::new("echo")),
    )
    .await;
    assert!(abandoned.is_err());
    assert_eq!(h.registry.state("admin"), Some(ModuleState::Ready));
    assert!(h.registry.can_execute("admin").await);
}
