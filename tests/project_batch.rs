use entry2js_core::manifest::OUTPUT_FIELD;
use entry2js_core::transpiler::{
    transpile_unit, TranspileOptions, TranspileProgress, TranspileUnit, Transpiler,
};
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

fn move_script() -> String {
    json!([[
        {"id": "h", "type": "when_run_button_click", "params": [null]},
        {"id": "r", "type": "repeat_inf", "params": [null], "statements": [[
            {"id": "m", "type": "move_direction", "params": [{"type": "number", "params": ["10"]}, null]}
        ]]}
    ]])
    .to_string()
}

fn write_project(dir: &Path, objects: &[&str], functions: &[&str]) -> PathBuf {
    let objects: Vec<Value> = objects
        .iter()
        .map(|id| json!({"id": id, "name": format!("Sprite {}", id), "script": move_script(), "keep": true}))
        .collect();
    let functions: Vec<Value> = functions
        .iter()
        .map(|id| {
            json!({"id": id, "content": json!([[
                {"id": "def", "type": "function_create", "params": [], "statements": [[]]}
            ]]).to_string()})
        })
        .collect();
    let path = dir.join("project.json");
    fs::write(
        &path,
        serde_json::to_string_pretty(&json!({"name": "demo", "objects": objects, "functions": functions}))
            .unwrap(),
    )
    .unwrap();
    path
}

fn read_manifest(path: &Path) -> Value {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

fn panic_on_boom(unit: &TranspileUnit) -> anyhow::Result<String> {
    if unit.object_id == "boom" {
        panic!("exploded while transpiling");
    }
    transpile_unit(unit)
}

fn stall_on_slow(unit: &TranspileUnit) -> anyhow::Result<String> {
    if unit.object_id == "slow" {
        std::thread::sleep(Duration::from_secs(3));
    }
    transpile_unit(unit)
}

fn reject_bad(unit: &TranspileUnit) -> anyhow::Result<String> {
    if unit.object_id == "bad" {
        anyhow::bail!("script rejected");
    }
    transpile_unit(unit)
}

#[test]
fn every_scripted_entry_gets_an_output_and_annotation() {
    let dir = tempfile::tempdir().unwrap();
    let manifest_path = write_project(dir.path(), &["a", "b"], &["f1"]);

    let mut transpiler = Transpiler::default();
    let report = transpiler.run(&manifest_path).unwrap();

    assert_eq!(report.succeeded, vec!["a", "b", "f1"]);
    assert!(report.failed.is_empty());
    assert_eq!(transpiler.progress(), TranspileProgress { started: 3, processed: 3 });

    let script_dir = dir.path().join("script");
    let a = fs::read_to_string(script_dir.join("a.js")).unwrap();
    assert!(a.contains("const self = runtime.object(\"a\");"));
    assert!(a.contains("await runtime.yield();"));
    assert!(script_dir.join("func_f1.js").is_file());

    let manifest = read_manifest(&manifest_path);
    assert_eq!(manifest["name"], json!("demo"));
    assert_eq!(manifest["objects"][0][OUTPUT_FIELD], json!("script/a.js"));
    assert_eq!(manifest["objects"][0]["keep"], json!(true));
    assert_eq!(manifest["functions"][0][OUTPUT_FIELD], json!("script/func_f1.js"));
}

#[test]
fn unwritable_output_fails_only_that_unit() {
    let dir = tempfile::tempdir().unwrap();
    let manifest_path = write_project(dir.path(), &["a", "b", "c"], &[]);
    // A directory where the output file should go makes the write fail.
    fs::create_dir_all(dir.path().join("script").join("b.js")).unwrap();

    let report = Transpiler::default().run(&manifest_path).unwrap();
    assert_eq!(report.succeeded, vec!["a", "c"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "b");

    let script_dir = dir.path().join("script");
    assert!(script_dir.join("a.js").is_file());
    assert!(script_dir.join("c.js").is_file());
    assert!(script_dir.join("b.error.log").is_file());

    let manifest = read_manifest(&manifest_path);
    assert!(manifest["objects"][1].get(OUTPUT_FIELD).is_none());
    assert_eq!(manifest["objects"][2][OUTPUT_FIELD], json!("script/c.js"));
}

#[test]
fn worker_errors_are_logged_with_their_message() {
    let dir = tempfile::tempdir().unwrap();
    let manifest_path = write_project(dir.path(), &["good", "bad"], &[]);

    let report = Transpiler::default()
        .with_worker(reject_bad)
        .run(&manifest_path)
        .unwrap();
    assert_eq!(report.succeeded, vec!["good"]);
    assert_eq!(report.failed, vec![("bad".to_string(), "script rejected".to_string())]);

    let log = fs::read_to_string(dir.path().join("script").join("bad.error.log")).unwrap();
    assert!(log.starts_with("script rejected\n\n"));
}

#[test]
fn panicking_unit_does_not_take_down_the_batch() {
    let dir = tempfile::tempdir().unwrap();
    let manifest_path = write_project(dir.path(), &["one", "boom", "two"], &[]);

    let mut labels = Vec::new();
    let mut on_progress = |state: &TranspileProgress, label: &str| {
        labels.push((state.processed, label.to_string()));
    };
    let mut transpiler = Transpiler::default().with_worker(panic_on_boom);
    let report = transpiler
        .run_with_progress(&manifest_path, Some(&mut on_progress))
        .unwrap();

    assert_eq!(report.succeeded, vec!["one", "two"]);
    assert_eq!(report.failed.len(), 1);
    assert!(report.failed[0].1.contains("exploded while transpiling"));
    let processed: Vec<usize> = labels.iter().map(|(n, _)| *n).collect();
    assert_eq!(processed, vec![1, 2, 3]);
    assert!(labels.iter().any(|(_, l)| l.starts_with("Failed 'Sprite boom'")));
}

#[test]
fn stalled_unit_times_out_without_blocking_the_rest() {
    let dir = tempfile::tempdir().unwrap();
    let manifest_path = write_project(dir.path(), &["fast", "slow"], &[]);

    let options = TranspileOptions {
        unit_timeout: Duration::from_millis(200),
        ..TranspileOptions::default()
    };
    let started = Instant::now();
    let report = Transpiler::new(options)
        .with_worker(stall_on_slow)
        .run(&manifest_path)
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(report.succeeded, vec!["fast"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "slow");
    assert!(report.failed[0].1.starts_with("timed out"));
    assert!(dir.path().join("script").join("slow.error.log").is_file());
}

#[test]
fn custom_output_directory_is_used_in_annotations() {
    let dir = tempfile::tempdir().unwrap();
    let manifest_path = write_project(dir.path(), &["a"], &[]);
    let options = TranspileOptions {
        out_dir_name: "js".to_string(),
        ..TranspileOptions::default()
    };
    let report = Transpiler::new(options).run(&manifest_path).unwrap();
    assert_eq!(report.output_dir, dir.path().join("js"));
    assert!(dir.path().join("js").join("a.js").is_file());
    assert_eq!(read_manifest(&manifest_path)["objects"][0][OUTPUT_FIELD], json!("js/a.js"));
}

#[test]
fn missing_or_broken_manifest_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    assert!(Transpiler::default().run(&dir.path().join("project.json")).is_err());

    let path = dir.path().join("project.json");
    fs::write(&path, "not json").unwrap();
    assert!(Transpiler::default().run(&path).is_err());
    assert!(!dir.path().join("script").exists());
}

#[test]
fn project_without_scripts_still_creates_output_dir() {
    let dir = tempfile::tempdir().unwrap();
    let manifest_path = write_project(dir.path(), &[], &[]);
    let report = Transpiler::default().run(&manifest_path).unwrap();
    assert!(report.succeeded.is_empty() && report.failed.is_empty());
    assert!(dir.path().join("script").is_dir());
}

fn reject_all(_unit: &TranspileUnit) -> anyhow::Result<String> {
    anyhow::bail!("nothing works")
}

fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn colliding_and_hostile_ids_get_separate_files_inside_the_output_dir() {
    let dir = tempfile::tempdir().unwrap();
    let manifest_path = write_project(dir.path(), &["x", "func_x", "../escaped"], &["x"]);
    let script_dir = dir.path().join("script");

    let report = Transpiler::default()
        .with_worker(reject_all)
        .run(&manifest_path)
        .unwrap();
    assert_eq!(report.failed.len(), 4);
    let logs = file_names(&script_dir);
    assert_eq!(logs.len(), 4);
    assert!(logs.iter().all(|name| name.ends_with(".error.log")));
    assert!(logs.contains(&"x.error.log".to_string()));
    assert!(logs.contains(&"func_x.error.log".to_string()));

    let report = Transpiler::default().run(&manifest_path).unwrap();
    assert_eq!(report.succeeded.len(), 4);
    let outputs = file_names(&script_dir);
    assert_eq!(outputs.len(), 4);
    assert!(outputs.iter().all(|name| name.ends_with(".js")));
    assert!(outputs.contains(&"x.js".to_string()));
    assert!(outputs.contains(&"func_x.js".to_string()));

    assert_eq!(file_names(dir.path()), vec!["project.json", "script"]);
    let func = fs::read_to_string(script_dir.join("func_x.js")).unwrap();
    assert!(!func.contains("const self"));

    let manifest = read_manifest(&manifest_path);
    let annotated: Vec<&str> = manifest["objects"]
        .as_array()
        .unwrap()
        .iter()
        .chain(manifest["functions"].as_array().unwrap())
        .map(|item| item[OUTPUT_FIELD].as_str().unwrap())
        .collect();
    for path in &annotated {
        assert!(path.starts_with("script/") && !path[7..].contains('/'));
    }
    assert_eq!(annotated[0], "script/x.js");
    assert_eq!(annotated[3], "script/func_x.js");
}

#[test]
fn rerun_clears_results_of_the_opposite_outcome() {
    let dir = tempfile::tempdir().unwrap();
    let manifest_path = write_project(dir.path(), &["good", "bad"], &[]);
    let script_dir = dir.path().join("script");

    Transpiler::default().run(&manifest_path).unwrap();
    assert!(script_dir.join("bad.js").is_file());

    Transpiler::default()
        .with_worker(reject_bad)
        .run(&manifest_path)
        .unwrap();
    assert!(!script_dir.join("bad.js").exists());
    assert!(script_dir.join("bad.error.log").is_file());
    let manifest = read_manifest(&manifest_path);
    assert!(manifest["objects"][1].get(OUTPUT_FIELD).is_none());
    assert_eq!(manifest["objects"][0][OUTPUT_FIELD], json!("script/good.js"));

    let report = Transpiler::default().run(&manifest_path).unwrap();
    assert_eq!(report.succeeded, vec!["bad", "good"]);
    assert!(!script_dir.join("bad.error.log").exists());
    assert!(script_dir.join("bad.js").is_file());
    assert_eq!(
        read_manifest(&manifest_path)["objects"][1][OUTPUT_FIELD],
        json!("script/bad.js")
    );
}

#[test]
fn callers_inside_a_runtime_use_run_async() {
    let dir = tempfile::tempdir().unwrap();
    let manifest_path = write_project(dir.path(), &["a"], &["f1"]);
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap();

    let mut transpiler = Transpiler::default();
    let report = runtime.block_on(async {
        let blocked = transpiler.run(&manifest_path).unwrap_err();
        assert!(blocked.to_string().contains("run_async"));
        transpiler
            .run_async(&manifest_path, Option::<&mut fn(&TranspileProgress, &str)>::None)
            .await
    });

    let report = report.unwrap();
    assert_eq!(report.succeeded, vec!["a", "f1"]);
    assert!(dir.path().join("script").join("a.js").is_file());
}
