use assert_cmd::Command;
use httpmock::prelude::*;
use predicates::str::contains;
use std::fs::write;

fn rfi_scanner() -> Command {
    let mut cmd = Command::cargo_bin("rfi-scanner").unwrap();
    // OLLAMA_*, RFI_SCANNER__* and RUST_LOG all feed settings; start every run from none of them.
    cmd.env_clear();
    cmd
}

fn config_pointing_at(host: &str) -> tempfile::NamedTempFile {
    let file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    write(
        file.path(),
        format!("[ollama]\nhost = \"{host}\"\nmodel = \"llama2\"\ntimeout = \"5s\"\n"),
    )
    .unwrap();
    file
}

#[test]
fn health_reports_reachable_server() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/api/tags");
        then.status(200).json_body(serde_json::json!({"models": []}));
    });
    let config = config_pointing_at(&server.base_url());

    rfi_scanner()
        .args(["--config", config.path().to_str().unwrap(), "health"])
        .assert()
        .success()
        .stdout(contains("Checking Ollama at"))
        .stdout(contains("ok"));
}

#[test]
fn health_fails_when_server_is_down() {
    let config = config_pointing_at("http://127.0.0.1:1");

    rfi_scanner()
        .args(["--config", config.path().to_str().unwrap(), "health"])
        .assert()
        .failure()
        .stdout(contains("unreachable"));
}

#[test]
fn models_lists_server_models() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/api/tags");
        then.status(200).json_body(serde_json::json!({
            "models": [{"name": "llama2:latest", "size": 42}]
        }));
    });
    let config = config_pointing_at(&server.base_url());

    rfi_scanner()
        .args(["--config", config.path().to_str().unwrap(), "models"])
        .assert()
        .success()
        .stdout(contains("1 model(s) available"))
        .stdout(contains("llama2:latest"));
}

#[test]
fn rejects_invalid_ollama_host() {
    let config = config_pointing_at("localhost:11434");

    rfi_scanner()
        .args(["--config", config.path().to_str().unwrap(), "health"])
        .assert()
        .failure()
        .stderr(contains("must start with http:// or https://"));
}
