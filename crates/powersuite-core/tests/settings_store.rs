use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use powersuite_core::settings::{keys, SettingChangedEvent, SettingsStore};
use powersuite_core::value::SettingValue;
use powersuite_core::FailureKind;

fn recorder(store: &SettingsStore) -> Arc<Mutex<Vec<SettingChangedEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    store.subscribe(move |e| sink.lock().push(e.clone()));
    events
}

#[tokio::test]
async fn first_run_uses_builtin_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let store = SettingsStore::new(dir.path().join("settings.json"));
    store.load().await.unwrap();

    assert_eq!(store.get(keys::THEME, String::new()), "System");
    assert_eq!(store.get(keys::LANGUAGE, String::new()), "en-US");
    assert!(!store.get(keys::START_MINIMIZED, true));
    assert!(store.get(keys::MINIMIZE_TO_TRAY, false));
    assert_eq!(store.get(keys::WINDOW_WIDTH, 0i32), 1200);
    assert_eq!(store.get(keys::WINDOW_HEIGHT, 0i32), 800);
    assert_eq!(store.get(keys::LOGGING_LEVEL, String::new()), "Information");
    assert_eq!(store.get_value(keys::LAST_SELECTED_MODULE), None);
    assert!(!store.is_dirty());
}

#[tokio::test]
async fn saved_values_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");

    let store = SettingsStore::new(&path);
    store.load().await.unwrap();
    store.set(keys::THEME, "Dark");
    store.set(keys::WINDOW_WIDTH, 1440);
    store.set(keys::START_MINIMIZED, true);
    store.set("Opacity", 0.85);
    store.set_module_setting("Firewall", "LastRule", "Block 445");
    store.set_module_setting("Firewall", "Limits", {
        let mut m = BTreeMap::new();
        m.insert("max".to_string(), SettingValue::Number(5.0));
        SettingValue::Map(m)
    });
    assert!(store.is_dirty());
    store.save().await.unwrap();
    assert!(!store.is_dirty());

    let reopened = SettingsStore::new(&path);
    reopened.load().await.unwrap();
    assert_eq!(reopened.get(keys::THEME, String::new()), "Dark");
    assert_eq!(reopened.get(keys::WINDOW_WIDTH, 0u32), 1440);
    assert!(reopened.get(keys::START_MINIMIZED, false));
    assert_eq!(reopened.get("Opacity", 0.0f64), 0.85);
    assert_eq!(reopened.snapshot(), store.snapshot());
    assert_eq!(
        reopened.get_module_setting("Firewall", "LastRule", String::new()),
        "Block 445"
    );
    let limits: BTreeMap<String, SettingValue> =
        reopened.get_module_setting("Firewall", "Limits", BTreeMap::new());
    assert_eq!(limits.get("max"), Some(&SettingValue::Number(5.0)));
}

#[tokio::test]
async fn type_mismatch_falls_back_to_default() {
    let dir = tempfile::tempdir().unwrap();
    let store = SettingsStore::new(dir.path().join("settings.json"));
    store.set("Volume", "loud");
    store.set("Ratio", 0.5);

    assert_eq!(store.get("Volume", 7i32), 7);
    assert_eq!(store.get("Ratio", 3i32), 3, "fractional value is not an integer");
    assert_eq!(store.get("Ratio", 0.0f64), 0.5);
    assert!(store.get("Missing", true));
}

#[tokio::test]
async fn set_is_visible_before_save() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");
    let store = SettingsStore::new(&path);

    store.set(keys::LANGUAGE, "zh-CN");
    assert_eq!(store.get(keys::LANGUAGE, String::new()), "zh-CN");
    assert!(!path.exists(), "set must not persist by itself");
}

#[tokio::test]
async fn observers_see_changes_and_can_unsubscribe() {
    let dir = tempfile::tempdir().unwrap();
    let store = SettingsStore::new(dir.path().join("settings.json"));
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let id = store.subscribe(move |e: &SettingChangedEvent| sink.lock().push(e.clone()));

    store.set(keys::THEME, "Dark");
    store.set(keys::THEME, "Dark");
    store.set_module_setting("Cleaner", "Depth", 3);

    {
        let events = events.lock();
        assert_eq!(events.len(), 2, "equal value must not notify");
        assert_eq!(events[0].key, keys::THEME);
        assert_eq!(events[0].module, None);
        assert_eq!(events[0].old_value, Some(SettingValue::from("System")));
        assert_eq!(events[0].new_value, Some(SettingValue::from("Dark")));
        assert_eq!(events[1].module.as_deref(), Some("Cleaner"));
        assert_eq!(events[1].old_value, None);
    }

    assert!(store.unsubscribe(id));
    assert!(!store.unsubscribe(id));
    store.set(keys::THEME, "Light");
    assert_eq!(events.lock().len(), 2);
}

#[tokio::test]
async fn reset_restores_defaults_and_notifies_changed_keys() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");
    let store = SettingsStore::new(&path);
    store.set(keys::THEME, "Dark");
    store.set(keys::WINDOW_HEIGHT, 900);
    store.save().await.unwrap();

    let events = recorder(&store);
    store.reset().await.unwrap();

    let events = events.lock();
    let changed: Vec<&str> = events.iter().map(|e| e.key.as_str()).collect();
    assert_eq!(changed, vec![keys::THEME, keys::WINDOW_HEIGHT]);
    assert_eq!(store.get(keys::THEME, String::new()), "System");
    assert!(!store.is_dirty());

    let on_disk: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(on_disk["Theme"], "System");
}

#[tokio::test]
async fn unknown_entries_are_preserved_on_save() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");
    std::fs::write(
        &path,
        r#"{
            "Theme": "Dark",
            "FutureFeature": [1, 2, 3],
            "Nothing": null,
            "moduleSettings": {
                "Firewall": { "Rules": ["a", "b"], "Enabled": true },
                "Legacy": "not-a-map"
            }
        }"#,
    )
    .unwrap();

    let store = SettingsStore::new(&path);
    store.load().await.unwrap();
    assert_eq!(store.get(keys::THEME, String::new()), "Dark");
    assert!(store.get_module_setting("Firewall", "Enabled", false));

    store.set(keys::LANGUAGE, "zh-CN");
    store.save().await.unwrap();

    let on_disk: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(on_disk["FutureFeature"], serde_json::json!([1, 2, 3]));
    assert_eq!(on_disk["Nothing"], serde_json::Value::Null);
    assert!(on_disk.as_object().unwrap().contains_key("Nothing"));
    assert_eq!(on_disk["moduleSettings"]["Firewall"]["Rules"], serde_json::json!(["a", "b"]));
    assert_eq!(on_disk["moduleSettings"]["Firewall"]["Enabled"], true);
    assert_eq!(on_disk["moduleSettings"]["Legacy"], "not-a-map");
    assert_eq!(on_disk["Language"], "zh-CN");
}

#[tokio::test]
async fn corrupt_file_falls_back_to_defaults_and_is_backed_up() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");
    std::fs::write(&path, b"{ this is not json").unwrap();

    let store = SettingsStore::new(&path);
    store.load().await.unwrap();
    assert_eq!(store.get(keys::THEME, String::new()), "System");
    assert!(dir.path().join("settings.json.corrupt").exists());
}

#[tokio::test]
async fn failed_save_reports_persistence_and_keeps_old_file() {
    let dir = tempfile::tempdir().unwrap();
    // 目标路径是一个目录：替换必然失败。
    let path = dir.path().join("settings.json");
    std::fs::create_dir(&path).unwrap();
    std::fs::write(path.join("keep.txt"), b"keep").unwrap();

    let store = SettingsStore::new(&path);
    store.set(keys::THEME, "Dark");
    let err = store.save().await.unwrap_err();
    assert_eq!(err.kind(), FailureKind::Persistence);
    assert!(store.is_dirty());
    assert!(path.join("keep.txt").exists());

    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty(), "temp file must be cleaned up");
}

#[tokio::test]
async fn external_edit_is_picked_up_by_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");
    let store = SettingsStore::new(&path);
    store.save().await.unwrap();
    assert!(!store.reload_if_changed().await.unwrap());

    tokio::time::sleep(Duration::from_millis(50)).await;
    std::fs::write(&path, br#"{ "Theme": "Light" }"#).unwrap();

    let events = recorder(&store);
    assert!(store.reload_if_changed().await.unwrap());
    assert_eq!(store.get(keys::THEME, String::new()), "Light");
    let events = events.lock();
    assert_eq!(events.len(), 1, "only the edited key changed: {events:?}");
    assert_eq!(events[0].key, keys::THEME);
    assert_eq!(events[0].old_value, Some(SettingValue::from("System")));
    assert_eq!(events[0].new_value, Some(SettingValue::from("Light")));
}

#[tokio::test]
async fn load_emits_one_event_per_differing_key() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");
    std::fs::write(
        &path,
        r#"{
            "Theme": "Light",
            "Language": "en-US",
            "WindowWidth": 1200,
            "Volume": 0.75,
            "moduleSettings": { "firewall": { "RulePrefix": "Lab" } }
        }"#,
    )
    .unwrap();

    let store = SettingsStore::new(&path);
    let events = recorder(&store);
    store.load().await.unwrap();

    let events = events.lock();
    let changed: Vec<(Option<&str>, &str)> = events
        .iter()
        .map(|e| (e.module.as_deref(), e.key.as_str()))
        .collect();
    assert_eq!(
        changed,
        vec![(None, keys::THEME), (None, "Volume"), (Some("firewall"), "RulePrefix")]
    );
    assert_eq!(events[1].old_value, None);
    assert_eq!(events[1].new_value, Some(SettingValue::Number(0.75)));
    assert!(!store.is_dirty());
}

#[tokio::test]
async fn non_finite_numbers_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");
    let store = SettingsStore::new(&path);
    let events = recorder(&store);

    store.set("Ratio", f64::INFINITY);
    store.set("Ratio", f64::NAN);
    store.set_module_setting("Firewall", "Weight", f64::NEG_INFINITY);
    store.set_module_setting("Firewall", "Limits", {
        let mut m = BTreeMap::new();
        m.insert("max".to_string(), SettingValue::Number(f64::NAN));
        SettingValue::Map(m)
    });

    assert!(events.lock().is_empty());
    assert!(!store.is_dirty());
    assert_eq!(store.get_value("Ratio"), None);
    assert_eq!(store.get_module_setting("Firewall", "Weight", 1.0f64), 1.0);

    store.set("Ratio", 0.5);
    store.save().await.unwrap();
    let reopened = SettingsStore::new(&path);
    reopened.load().await.unwrap();
    assert_eq!(reopened.get("Ratio", 0.0f64), 0.5);
}

#[tokio::test]
async fn reload_skips_when_memory_is_dirty() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");
    let store = SettingsStore::new(&path);
    store.save().await.unwrap();

    store.set(keys::THEME, "Dark");
    tokio::time::sleep(Duration::from_millis(50)).await;
    std::fs::write(&path, br#"{ "Theme": "Light" }"#).unwrap();

    assert!(!store.reload_if_changed().await.unwrap());
    assert_eq!(store.get(keys::THEME, String::new()), "Dark");
}

#[tokio::test]
async fn hot_reload_task_applies_external_changes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");
    let store = Arc::new(SettingsStore::new(&path));
    store.save().await.unwrap();
    let handle = store.spawn_hot_reload(Duration::from_millis(20));

    tokio::time::sleep(Duration::from_millis(50)).await;
    std::fs::write(&path, br#"{ "Language": "de-DE" }"#).unwrap();

    let mut applied = false;
    for _ in 0..100 {
        if store.get(keys::LANGUAGE, String::new()) == "de-DE" {
            applied = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    handle.abort();
    assert!(applied, "hot reload did not apply external change");
}
