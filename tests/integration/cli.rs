//! CLI commands against a fixture file.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const FIXTURES: &str = r#"{
  "resources": [
    {
      "id": "r-roma", "kind": "restaurant", "title": "Trattoria Roma",
      "location": { "latitude": 45.764, "longitude": 4.835 },
      "schedule_key": "s-roma", "place_id": "p-roma",
      "tags": ["italian"], "city_id": "lyon"
    },
    {
      "id": "r-verde", "kind": "restaurant", "title": "Casa Verde",
      "location": { "latitude": 45.78, "longitude": 4.86 },
      "place_id": "p-verde",
      "tags": ["vegan"], "city_id": "lyon"
    },
    {
      "id": "r-jardin", "kind": "restaurant", "title": "Le Jardin",
      "location": { "latitude": 45.75, "longitude": 4.84 },
      "tags": ["vegan", "french"], "city_id": "lyon"
    },
    {
      "id": "e-jazz", "kind": "event", "title": "Jazz Night",
      "tags": ["music"], "city_id": "lyon"
    }
  ],
  "schedules": [
    {
      "restaurant_key": "s-roma",
      "slots": [
        { "starts_at": "2026-10-10T19:00:00Z" },
        { "starts_at": "2026-10-20T19:00:00Z", "seats": 4 }
      ]
    }
  ],
  "assessments": [
    { "place_id": "p-roma", "rating": 4.5, "count": 120 },
    { "place_id": "p-verde", "rating": 4.0, "count": 35 }
  ]
}"#;

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("fixtures.json"), FIXTURES).unwrap();
        Self {
            dir,
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn command(&self) -> Command {
        let mut cmd = Command::cargo_bin("discovery-feed").unwrap();
        cmd.env("NO_COLOR", "1")
            .env_remove("RUST_LOG")
            .arg("--quiet")
            .arg("--config")
            .arg(self.path("config.toml"));
        cmd
    }

    fn feed(&self) -> Command {
        let mut cmd = self.command();
        cmd.arg("feed").arg("--fixtures").arg(self.path("fixtures.json")).args(["--date", "2026-10-15"]);
        cmd
    }
}

fn ids(stdout: &[u8]) -> Vec<String> {
    let items: Vec<serde_json::Value> = serde_json::from_slice(stdout).unwrap();
    items.iter().map(|item| item["resource"]["id"].as_str().unwrap().to_string()).collect()
}

fn write_config(path: &Path, content: &str) {
    std::fs::write(path, content).unwrap();
}

#[test]
fn test_feed_prints_joined_list() {
    let workspace = Workspace::new();

    workspace
        .feed()
        .assert()
        .success()
        .stdout(predicate::str::contains("Trattoria Roma"))
        .stdout(predicate::str::contains("★ 4.5 (120)"))
        .stdout(predicate::str::contains("1 slots"))
        .stdout(predicate::str::contains("Jazz Night").not());
}

#[test]
fn test_feed_filters_and_sorts_by_distance() {
    let workspace = Workspace::new();

    let output = workspace
        .feed()
        .args(["--tag", "vegan", "--lat", "45.75", "--lon", "4.84", "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    assert_eq!(ids(&output), ["r-jardin", "r-verde"]);
    let items: Vec<serde_json::Value> = serde_json::from_slice(&output).unwrap();
    assert_eq!(items[0]["distance_meters"].as_f64(), Some(0.0));
    assert!(items[1]["assessment"]["rating"].is_number());
}

#[test]
fn test_feed_loads_several_pages() {
    let workspace = Workspace::new();
    write_config(&workspace.path("config.toml"), "per_page = 1\n");

    let output = workspace
        .feed()
        .args(["--city", "lyon", "--pages", "2", "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    assert_eq!(ids(&output), ["r-roma", "r-verde"]);
}

#[test]
fn test_feed_reads_events() {
    let workspace = Workspace::new();

    workspace
        .feed()
        .args(["--kind", "event"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Jazz Night"))
        .stdout(predicate::str::contains("Trattoria").not());
}

#[test]
fn test_feed_without_results() {
    let workspace = Workspace::new();

    workspace.feed().args(["--tag", "sushi"]).assert().success().stdout(predicate::str::contains("No results"));
}

#[test]
fn test_feed_missing_fixtures_fails() {
    let workspace = Workspace::new();

    workspace
        .command()
        .args(["feed", "--fixtures"])
        .arg(workspace.path("missing.json"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read fixtures"));
}

#[test]
fn test_feed_rejects_unknown_kind() {
    let workspace = Workspace::new();

    workspace.feed().args(["--kind", "museum"]).assert().failure();
}

#[test]
fn test_config_init_show_and_path() {
    let workspace = Workspace::new();
    let config = workspace.path("config.toml");

    workspace.command().args(["config", "path"]).assert().success().stdout(predicate::str::contains(
        config.display().to_string(),
    ));

    workspace.command().args(["config", "show"]).assert().success().stdout(predicate::str::contains("No config file found"));

    workspace.command().args(["config", "init"]).assert().success().stdout(predicate::str::contains("Created config"));
    assert!(config.exists());

    workspace.command().args(["config", "init"]).assert().success().stdout(predicate::str::contains("already exists"));
    workspace.command().arg("config").assert().success().stdout(predicate::str::contains("per_page = 20"));
}
