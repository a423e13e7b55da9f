use std::path::Path;
use std::process::{Command, Output};

const ADD: &str = "function add(a,b){ return a+b; }\n";

fn jsmutator(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_jsmutator"))
        .args(args)
        .current_dir(dir)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run jsmutator")
}

fn create_js_project(dir: &Path, test_script: &str) {
    std::fs::create_dir_all(dir.join("lib")).unwrap();
    std::fs::write(dir.join("lib").join("add.js"), ADD).unwrap();
    std::fs::write(dir.join("test.sh"), test_script).unwrap();
    std::fs::write(dir.join("package.json"), "{\"name\": \"test-app\"}\n").unwrap();
}

const STRICT: &str = "grep -q 'return a+b;' lib/add.js\n";
const WEAK: &str = "grep -q 'return a' lib/add.js\n";

fn run_args<'a>(extra: &[&'a str]) -> Vec<&'a str> {
    let mut args = vec![
        "run", "--framework", "command", "--test-cmd", "sh test.sh", "--mutate", "lib/add.js",
    ];
    args.extend_from_slice(extra);
    args
}

fn json(output: &Output) -> serde_json::Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(stdout.trim()).unwrap_or_else(|e| {
        panic!(
            "Invalid JSON: {e}\nstdout: {stdout}\nstderr: {}",
            String::from_utf8_lossy(&output.stderr)
        )
    })
}

#[test]
fn e2e_full_run_json_output() {
    let dir = tempfile::TempDir::new().unwrap();
    create_js_project(dir.path(), STRICT);

    let output = jsmutator(dir.path(), &run_args(&["--json"]));
    assert_eq!(output.status.code(), Some(0));

    let report = json(&output);
    assert_eq!(report["status"], "success");
    assert_eq!(report["total"], 3);
    assert_eq!(report["killed"], 3);
    assert_eq!(report["score"], 1.0);
    assert!(report["results"].is_array());
}

#[test]
fn e2e_survivors_exit_with_one() {
    let dir = tempfile::TempDir::new().unwrap();
    create_js_project(dir.path(), WEAK);

    let output = jsmutator(dir.path(), &run_args(&["--json"]));
    assert_eq!(output.status.code(), Some(1));
    assert_eq!(json(&output)["survived"], 1);
}

#[test]
fn e2e_baseline_failure_exits_with_three() {
    let dir = tempfile::TempDir::new().unwrap();
    create_js_project(dir.path(), "exit 1\n");

    let output = jsmutator(dir.path(), &run_args(&[]));
    assert_eq!(output.status.code(), Some(3));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("fail before mutation"), "got: {stderr}");
    assert_eq!(std::fs::read_to_string(dir.path().join("lib/add.js")).unwrap(), ADD);
}

#[test]
fn e2e_config_file_is_used() {
    let dir = tempfile::TempDir::new().unwrap();
    create_js_project(dir.path(), STRICT);
    std::fs::write(
        dir.path().join("jsmutator.toml"),
        "framework = \"command\"\ntest_command = \"sh test.sh\"\nmutate = [\"lib/add.js\"]\nexclude_mutations = [\"MATH\"]\n",
    )
    .unwrap();

    let output = jsmutator(dir.path(), &["run", "--json"]);
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(json(&output)["total"], 2);
}

#[test]
fn e2e_invalid_config_is_a_usage_error() {
    let dir = tempfile::TempDir::new().unwrap();
    create_js_project(dir.path(), STRICT);
    std::fs::write(dir.path().join("jsmutator.toml"), "timeout_ms = \"soon\"\n").unwrap();

    let output = jsmutator(dir.path(), &["run"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn e2e_nothing_to_mutate_is_a_usage_error() {
    let dir = tempfile::TempDir::new().unwrap();
    create_js_project(dir.path(), STRICT);

    let output = jsmutator(dir.path(), &["run", "--framework", "command", "--test-cmd", "sh test.sh"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn e2e_state_file_written_and_status_reads_it() {
    let dir = tempfile::TempDir::new().unwrap();
    create_js_project(dir.path(), WEAK);

    jsmutator(dir.path(), &run_args(&["--json"]));
    let state_file = dir.path().join(".jsmutator-state.json");
    assert!(state_file.exists(), ".jsmutator-state.json should be written after a run");

    let status = jsmutator(dir.path(), &["status", "--json"]);
    assert!(status.status.success());
    assert_eq!(json(&status)["total"], 3);
}

#[test]
fn e2e_state_file_lives_in_the_project_root() {
    let dir = tempfile::TempDir::new().unwrap();
    let project = dir.path().join("app");
    create_js_project(&project, WEAK);

    let mut args = vec!["--project", "app"];
    args.extend(run_args(&["-q"]));
    let output = jsmutator(dir.path(), &args);
    assert_eq!(output.status.code(), Some(1));

    assert!(project.join(".jsmutator-state.json").exists());
    assert!(!dir.path().join(".jsmutator-state.json").exists());

    let status = jsmutator(dir.path(), &["status", "--json", "--project", "app"]);
    assert!(status.status.success());
    assert_eq!(json(&status)["survived"], 1);
}

#[test]
fn e2e_show_survivor_by_ref() {
    let dir = tempfile::TempDir::new().unwrap();
    create_js_project(dir.path(), WEAK);
    jsmutator(dir.path(), &run_args(&["-q"]));

    let shown = jsmutator(dir.path(), &["show", "@m1", "--json"]);
    assert!(shown.status.success());
    let mutant = json(&shown);
    assert_eq!(mutant["ref_id"], "m1");
    assert_eq!(mutant["operator"], "MATH");
    assert_eq!(mutant["replacement"], "-");

    let missing = jsmutator(dir.path(), &["show", "@m9"]);
    assert_eq!(missing.status.code(), Some(2));
}

#[test]
fn e2e_status_without_run_is_an_error() {
    let dir = tempfile::TempDir::new().unwrap();
    let output = jsmutator(dir.path(), &["status"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn e2e_quiet_mode_no_output() {
    let dir = tempfile::TempDir::new().unwrap();
    create_js_project(dir.path(), STRICT);

    let output = jsmutator(dir.path(), &run_args(&["-q"]));
    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.trim().is_empty(), "Quiet mode should produce no stdout, got: {stdout}");
}

#[test]
fn e2e_isolation_does_not_modify_original() {
    let dir = tempfile::TempDir::new().unwrap();
    create_js_project(dir.path(), STRICT);

    jsmutator(dir.path(), &run_args(&["-q", "--pipelines", "2"]));
    let after = std::fs::read_to_string(dir.path().join("lib/add.js")).unwrap();
    assert_eq!(after, ADD, "Source file should not be modified after isolated run");
}

#[test]
fn e2e_list_mutations_json() {
    let dir = tempfile::TempDir::new().unwrap();
    create_js_project(dir.path(), STRICT);

    let output = jsmutator(dir.path(), &["list", "lib/add.js", "--json"]);
    assert!(output.status.success());
    let mutations = json(&output);
    let mutations = mutations.as_array().unwrap();
    assert_eq!(mutations.len(), 3);
    assert_eq!(mutations[2]["operator"], "MATH");
    assert_eq!(mutations[2]["start_byte"], 27);
}

#[test]
fn e2e_list_rejects_unsupported_files() {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::write(dir.path().join("app.py"), "x = 1\n").unwrap();
    let output = jsmutator(dir.path(), &["list", "app.py"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn e2e_operators_lists_codes() {
    let dir = tempfile::TempDir::new().unwrap();
    let output = jsmutator(dir.path(), &["operators"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for code in ["BLOCK_STATEMENT", "OBJECT", "ARRAY", "METHOD_CALL", "COMPARISON", "MATH", "STRING_LITERAL"] {
        assert!(stdout.contains(code), "missing {code} in: {stdout}");
    }
}

#[test]
fn e2e_temp_dirs_cleaned_up() {
    let dir = tempfile::TempDir::new().unwrap();
    create_js_project(dir.path(), STRICT);
    // Marker file to recognise this project's sandboxes.
    std::fs::write(dir.path().join("sandbox-marker-e2e-cleanup"), "").unwrap();

    jsmutator(dir.path(), &run_args(&["-q", "--pipelines", "3"]));

    let leftover: Vec<_> = std::fs::read_dir(std::env::temp_dir())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("jsmutator-"))
        .filter(|e| e.path().join("sandbox-marker-e2e-cleanup").exists())
        .collect();

    assert!(
        leftover.is_empty(),
        "Temp dirs should be cleaned up after run, found: {:?}",
        leftover.iter().map(|e| e.path()).collect::<Vec<_>>()
    );
}
