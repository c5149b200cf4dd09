use std::process::Command;

#[test]
fn init_creates_valid_toml() {
    let dir = tempfile::tempdir().unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_s0"))
        .arg("init")
        .current_dir(dir.path())
        .output()
        .unwrap();

    assert!(output.status.success(), "s0 init failed: {}", String::from_utf8_lossy(&output.stderr));

    let config_path = dir.path().join(".s0.toml");
    assert!(config_path.exists(), ".s0.toml should exist");

    let content = std::fs::read_to_string(&config_path).unwrap();
    for section in ["[embedding]", "[corpus]", "[llm]", "[generation]", "[server]"] {
        assert!(content.contains(section), "missing {section}");
    }

    // Every option is commented out, so the template parses to the defaults.
    let config: s0_core::S0Config = toml::from_str(&content).unwrap();
    assert_eq!(config.generation.similar_count, 5);
    assert_eq!(config.server.bind, "127.0.0.1:8000");
}

#[test]
fn init_refuses_if_exists() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(".s0.toml"), "# existing").unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_s0"))
        .arg("init")
        .current_dir(dir.path())
        .output()
        .unwrap();

    assert!(!output.status.success());
    let existing = std::fs::read_to_string(dir.path().join(".s0.toml")).unwrap();
    assert_eq!(existing, "# existing");
}

#[test]
fn doctor_reports_json_checks() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join(".s0.toml"),
        "[corpus]\nbackend = \"sqlite\"\nsqlite_path = \"missing.db\"\n\n[llm]\napi_key = \"test-key\"\n",
    )
    .unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_s0"))
        .args(["doctor", "--format", "json"])
        .current_dir(dir.path())
        .output()
        .unwrap();

    assert!(output.status.success(), "s0 doctor failed: {}", String::from_utf8_lossy(&output.stderr));
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let checks = report["checks"].as_array().unwrap();
    let status_of = |name: &str| {
        checks
            .iter()
            .find(|c| c["name"] == name)
            .map(|c| c["status"].as_str().unwrap().to_string())
            .unwrap()
    };
    assert_eq!(status_of("config_file"), "pass");
    assert_eq!(status_of("corpus"), "fail");
    assert_eq!(status_of("llm_api_key"), "pass");
    assert_eq!(status_of("server_bind"), "pass");
}

#[test]
fn doctor_fails_corrupt_sqlite_corpus() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("corpus.db"), "not a sqlite database\n".repeat(64)).unwrap();
    std::fs::write(
        dir.path().join(".s0.toml"),
        "[corpus]\nbackend = \"sqlite\"\nsqlite_path = \"corpus.db\"\n\n[llm]\napi_key = \"test-key\"\n",
    )
    .unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_s0"))
        .args(["doctor", "--format", "json"])
        .current_dir(dir.path())
        .output()
        .unwrap();

    assert!(output.status.success(), "s0 doctor failed: {}", String::from_utf8_lossy(&output.stderr));
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let corpus = report["checks"]
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["name"] == "corpus")
        .unwrap()
        .clone();
    assert_eq!(corpus["status"], "fail");
    assert!(corpus["detail"].as_str().unwrap().contains("unreadable"));
}
