//! E2E CLI tests covering:
//! - `keel init` skeleton and re-init guard
//! - item and version lifecycle, history leaves, truncation
//! - structure validation and coded error output
//! - lineage queries on both backends
//!
//! Each test runs the `keel` binary as a subprocess in an isolated temp directory.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::path::Path;
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Test Harness
// ---------------------------------------------------------------------------

/// Build a Command targeting the keel binary, rooted in `dir`.
fn keel_cmd(dir: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("keel"));
    cmd.current_dir(dir);
    cmd.env("KEEL_LOG", "error");
    cmd.env_remove("KEEL_BACKEND");
    cmd
}

fn init_project(dir: &Path, backend: &str) {
    keel_cmd(dir)
        .args(["init", "--backend", backend])
        .assert()
        .success();
}

/// Run a command that must succeed and parse its JSON output.
fn keel_json(dir: &Path, args: &[&str]) -> Value {
    let output = keel_cmd(dir).args(args).output().expect("keel should not crash");
    assert!(
        output.status.success(),
        "keel {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("command output should be JSON")
}

fn id_of(json: &Value) -> i64 {
    json["id"].as_i64().expect("output should have numeric 'id'")
}

fn ids(json: &Value, field: &str) -> Vec<i64> {
    json[field]
        .as_array()
        .unwrap_or_else(|| panic!("'{field}' should be an array"))
        .iter()
        .map(|v| v.as_i64().expect("numeric id"))
        .collect()
}

fn create_item(dir: &Path, kind: &str, key: &str) -> i64 {
    id_of(&keel_json(dir, &["item", "create", kind, key]))
}

fn create_node_version(dir: &Path, item_id: i64, parents: &[i64]) -> i64 {
    let item = item_id.to_string();
    let parent_args: Vec<String> = parents.iter().map(i64::to_string).collect();
    let mut args = vec!["version", "create", "node", item.as_str()];
    for parent in &parent_args {
        args.extend(["--parent", parent.as_str()]);
    }
    id_of(&keel_json(dir, &args))
}

// ---------------------------------------------------------------------------
// init
// ---------------------------------------------------------------------------

#[test]
fn init_creates_config_and_store() {
    let dir = TempDir::new().expect("temp dir");
    let json = keel_json(dir.path(), &["init"]);
    assert_eq!(json["backend"], "sqlite");
    assert!(dir.path().join(".keel/config.toml").exists());
    assert!(dir.path().join(".keel/catalog.sqlite3").exists());

    let config = std::fs::read_to_string(dir.path().join(".keel/config.toml")).expect("config");
    assert!(config.contains("backend = \"sqlite\""), "{config}");
}

#[test]
fn init_with_graph_backend_persists_choice() {
    let dir = TempDir::new().expect("temp dir");
    init_project(dir.path(), "graph");
    assert!(dir.path().join(".keel/catalog.graph.json").exists());

    // Later commands pick the backend up from config.
    let item = keel_json(dir.path(), &["item", "create", "node", "n"]);
    assert_eq!(item["source_key"], "n");
    let json = std::fs::read_to_string(dir.path().join(".keel/catalog.graph.json"))
        .expect("snapshot");
    assert!(json.contains("\"n\""));
}

#[test]
fn second_init_requires_force() {
    let dir = TempDir::new().expect("temp dir");
    init_project(dir.path(), "sqlite");
    keel_cmd(dir.path())
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
    keel_cmd(dir.path()).args(["init", "--force"]).assert().success();
}

#[test]
fn commands_before_init_report_not_initialized() {
    let dir = TempDir::new().expect("temp dir");
    keel_cmd(dir.path())
        .args(["item", "show", "node", "x"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error[E1001]"));
}

#[test]
fn root_flag_targets_another_directory() {
    let dir = TempDir::new().expect("temp dir");
    let elsewhere = TempDir::new().expect("temp dir");
    let root = dir.path().to_str().expect("utf-8 path");
    keel_cmd(elsewhere.path())
        .args(["--root", root, "init"])
        .assert()
        .success();
    assert!(dir.path().join(".keel/config.toml").exists());
    assert!(!elsewhere.path().join(".keel").exists());
}

// ---------------------------------------------------------------------------
// items and versions
// ---------------------------------------------------------------------------

#[test]
fn item_create_show_and_duplicate() {
    let dir = TempDir::new().expect("temp dir");
    init_project(dir.path(), "sqlite");

    let created = keel_json(
        dir.path(),
        &[
            "item", "create", "node", "orders", "--name", "Orders", "--tag", "rows=long:12",
            "--tag", "pii=boolean:false", "--tag", "due=long",
        ],
    );
    assert_eq!(created["name"], "Orders");
    assert_eq!(created["tags"]["rows"]["type"], "long");
    assert_eq!(created["tags"]["rows"]["value"]["type"], "long");
    assert_eq!(created["tags"]["rows"]["value"]["value"], 12);
    assert_eq!(created["tags"]["due"]["type"], "long");
    assert!(created["tags"]["due"]["value"].is_null());

    let by_key = keel_json(dir.path(), &["item", "show", "node", "orders"]);
    assert_eq!(by_key, created);
    let id = id_of(&created).to_string();
    let by_id = keel_json(dir.path(), &["item", "show", "node", "--id", id.as_str()]);
    assert_eq!(by_id, created);

    keel_cmd(dir.path())
        .args(["item", "create", "node", "orders"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error[E4001]"));

    keel_cmd(dir.path())
        .args(["item", "show", "edge", "orders"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error[E2001]"));
}

#[test]
fn versions_branch_merge_and_truncate() {
    let dir = TempDir::new().expect("temp dir");
    init_project(dir.path(), "sqlite");
    let item = create_item(dir.path(), "node", "n");

    let v1 = create_node_version(dir.path(), item, &[]);
    let v2 = create_node_version(dir.path(), item, &[v1]);
    let v3 = create_node_version(dir.path(), item, &[v1]);
    let leaves = keel_json(dir.path(), &["item", "leaves", "node", "n"]);
    assert_eq!(ids(&leaves, "leaves"), vec![v2, v3]);

    let v4 = create_node_version(dir.path(), item, &[v2, v3]);
    let dag = keel_json(dir.path(), &["item", "dag", "node", "n"]);
    assert_eq!(ids(&dag, "leaves"), vec![v4]);
    assert_eq!(dag["successors"].as_array().map(Vec::len), Some(5));

    let summary = keel_json(dir.path(), &["item", "truncate", "node", "n", "--height", "1"]);
    assert_eq!(ids(&summary, "leaves"), vec![v4]);
    assert_eq!(ids(&summary, "rerooted_version_ids"), vec![v4]);

    keel_cmd(dir.path())
        .args(["item", "truncate", "node", "n", "--height", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error[E3002]"));

    let missing = (v4 + 1_000).to_string();
    keel_cmd(dir.path())
        .args(["version", "create", "node", &item.to_string(), "--parent", &missing])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error[E4002]"));
}

#[test]
fn structure_validation_rejects_bad_tags() {
    let dir = TempDir::new().expect("temp dir");
    init_project(dir.path(), "sqlite");

    let structure_item = create_item(dir.path(), "structure", "schema").to_string();
    let structure = keel_json(
        dir.path(),
        &[
            "version", "create", "structure", &structure_item, "--attribute",
            "intfield=integer", "--attribute", "strfield=string",
        ],
    );
    let structure_id = id_of(&structure).to_string();
    assert_eq!(structure["attributes"]["intfield"], "integer");

    let node = create_item(dir.path(), "node", "validated").to_string();
    keel_cmd(dir.path())
        .args([
            "version", "create", "node", &node, "--structure", &structure_id, "--tag",
            "intfield=string:1", "--tag", "strfield=string:x",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error[E3001]"));

    let version = keel_json(
        dir.path(),
        &[
            "version", "create", "node", &node, "--structure", &structure_id, "--tag",
            "intfield=integer:1", "--tag", "strfield=string:x", "--reference",
            "http://www.google.com", "--param", "http=GET",
        ],
    );
    let shown = keel_json(dir.path(), &["version", "show", "node", &id_of(&version).to_string()]);
    assert_eq!(shown, version);
    assert_eq!(shown["reference"], "http://www.google.com");
    assert_eq!(shown["parameters"]["http"], "GET");
}

#[test]
fn malformed_tag_is_a_usage_error() {
    let dir = TempDir::new().expect("temp dir");
    init_project(dir.path(), "sqlite");
    keel_cmd(dir.path())
        .args(["item", "create", "node", "n", "--tag", "rows=12"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("expected key=type:value"));
}

// ---------------------------------------------------------------------------
// lineage
// ---------------------------------------------------------------------------

fn lineage_scenario(backend: &str) {
    let dir = TempDir::new().expect("temp dir");
    let d = dir.path();
    init_project(d, backend);

    let n1_item = create_item(d, "node", "n1");
    let n2_item = create_item(d, "node", "n2");
    let n3_item = create_item(d, "node", "n3");
    let n1 = create_node_version(d, n1_item, &[]);
    let n2 = create_node_version(d, n2_item, &[]);
    let n3 = create_node_version(d, n3_item, &[]);

    let edge = |key: &str, from_item: i64, to_item: i64, from: i64, to: i64| {
        let item = id_of(&keel_json(
            d,
            &[
                "item", "create", "edge", key, "--from", &from_item.to_string(), "--to",
                &to_item.to_string(),
            ],
        ));
        id_of(&keel_json(
            d,
            &[
                "version", "create", "edge", &item.to_string(), "--from", &from.to_string(),
                "--to", &to.to_string(),
            ],
        ))
    };
    let e12 = edge("calls", n1_item, n2_item, n1, n2);
    let e23 = edge("reads", n2_item, n3_item, n2, n3);

    let closure = keel_json(d, &["lineage", "closure", &n1.to_string()]);
    let mut expected = vec![e12, n2, e23, n3];
    expected.sort_unstable();
    assert_eq!(ids(&closure, "ids"), expected);

    let adjacent = keel_json(d, &["lineage", "adjacent", &n1.to_string()]);
    assert_eq!(ids(&adjacent, "ids"), vec![n2]);
    let filtered = keel_json(d, &["lineage", "adjacent", &n2.to_string(), "--label", "^calls$"]);
    assert!(ids(&filtered, "ids").is_empty());

    let lineage_item = create_item(d, "lineage_edge", "etl").to_string();
    keel_json(
        d,
        &[
            "version", "create", "lineage_edge", &lineage_item, "--from", &n1.to_string(),
            "--to", &n3.to_string(),
        ],
    );
    let provenance = keel_json(d, &["lineage", "provenance", &n1.to_string()]);
    assert_eq!(ids(&provenance, "ids"), vec![n3]);

    keel_cmd(d)
        .args(["lineage", "closure", &e12.to_string()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error[E2002]"));
}

#[test]
fn lineage_on_sqlite() {
    lineage_scenario("sqlite");
}

#[test]
fn lineage_on_graph() {
    lineage_scenario("graph");
}
