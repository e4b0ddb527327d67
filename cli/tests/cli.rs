use std::{fs, path::Path, process::Command};

use tempfile::TempDir;

fn vitrine() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_vitrine"));
    cmd.env("NO_COLOR", "1");
    cmd.env("TERM", "dumb");
    cmd.env("CLICOLOR", "0");
    cmd.env("RUST_BACKTRACE", "0");
    cmd.env_remove("RUST_LOG");
    cmd
}

fn write(dir: &Path, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    path
}

fn stdout(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

const CARDS: &str = r#"[
  {
    "fqn": "cards.value",
    "name": "Value card",
    "descriptor": {
      "type": "latest",
      "templateHtml": "<b>{{text}}</b>",
      "templateCss": ".card b { color: red; }",
      "controllerScript": "self.text = '-'; self.onLatestDataUpdated = function () { self.text = self.ctx.utils.formatValue(self.ctx.latestData[0].latestValues.temperature, 'C', 1); };",
      "defaultConfig": "{\"datasources\": [{\"name\": \"d1\"}], \"timewindow\": {\"realtime\": {\"timewindowMs\": 60000}}}"
    }
  },
  {
    "fqn": "cards.label",
    "name": "Label card",
    "descriptor": {
      "type": "static",
      "templateHtml": "<i>{{label}}</i>",
      "controllerScript": "self.onInit = function () { self.label = self.ctx.settings.title || 'untitled'; };"
    }
  }
]"#;

#[test]
fn namespace_prints_the_instance_class() {
    let output = vitrine()
        .args(["namespace", "cards.value", "w1"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", stderr(&output));
    let class = stdout(&output);
    let class = class.trim();
    assert!(class.starts_with("widget-cards-value-"), "{class}");

    let again = vitrine()
        .args(["namespace", "cards.value", "w1"])
        .output()
        .unwrap();
    assert_eq!(stdout(&again).trim(), class);
}

#[test]
fn check_accepts_well_formed_widget_types() {
    let dir = TempDir::new().unwrap();
    let path = write(dir.path(), "cards.json", CARDS);

    let output = vitrine().arg("check").arg(&path).output().unwrap();
    assert!(output.status.success(), "{}", stderr(&output));
    let out = stdout(&output);
    assert!(out.contains("cards.value: ok"), "{out}");
    assert!(out.contains("cards.label: ok"), "{out}");
}

#[test]
fn check_reports_controller_syntax_errors() {
    let dir = TempDir::new().unwrap();
    let path = write(
        dir.path(),
        "broken.json",
        r#"{
          "fqn": "cards.broken",
          "name": "Broken",
          "descriptor": { "type": "static", "controllerScript": "self.onInit = function ( {" }
        }"#,
    );

    let output = vitrine().arg("check").arg(&path).output().unwrap();
    assert!(!output.status.success());
    let err = stderr(&output);
    assert!(err.contains("script::syntax"), "{err}");
    assert!(err.contains("check failed"), "{err}");
    assert!(!stdout(&output).contains("cards.broken: ok"));
}

#[test]
fn check_reports_missing_modules() {
    let dir = TempDir::new().unwrap();
    let path = write(
        dir.path(),
        "modules.json",
        r#"{
          "fqn": "cards.modular",
          "name": "Modular",
          "descriptor": {
            "type": "static",
            "controllerScript": { "body": "self.value = helpers.answer;", "modules": { "helpers": "missing.js" } }
          }
        }"#,
    );

    let output = vitrine().arg("check").arg(&path).output().unwrap();
    assert!(!output.status.success());
    assert!(stderr(&output).contains("missing.js"), "{}", stderr(&output));
}

#[test]
fn render_prints_the_head_and_the_widget_markup() {
    let dir = TempDir::new().unwrap();
    let path = write(dir.path(), "cards.json", CARDS);
    let data = write(
        dir.path(),
        "telemetry.json",
        r#"{ "d1": { "latest": { "temperature": 21.54 } } }"#,
    );

    let output = vitrine()
        .arg("render")
        .arg(&path)
        .arg("--data")
        .arg(&data)
        .args(["--id", "w1"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", stderr(&output));

    let out = stdout(&output);
    let namespace = stdout(
        &vitrine()
            .args(["namespace", "cards.value", "w1"])
            .output()
            .unwrap(),
    );
    let namespace = namespace.trim();
    assert!(out.contains(&format!(".{namespace} .card b")), "{out}");
    assert!(
        out.contains(&format!("<div class=\"{namespace}\"><b>21.5 C</b></div>")),
        "{out}"
    );
}

#[test]
fn render_uses_the_given_configuration() {
    let dir = TempDir::new().unwrap();
    let path = write(dir.path(), "cards.json", CARDS);
    let config = write(
        dir.path(),
        "widget.json",
        r#"{ "settings": { "title": "Boiler" } }"#,
    );

    let output = vitrine()
        .arg("render")
        .arg(&path)
        .args(["--fqn", "cards.label", "--config"])
        .arg(&config)
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", stderr(&output));
    assert!(stdout(&output).contains("<i>Boiler</i>"), "{}", stdout(&output));
}

#[test]
fn render_fails_for_unknown_widget_types() {
    let dir = TempDir::new().unwrap();
    let path = write(dir.path(), "cards.json", CARDS);

    let output = vitrine()
        .arg("render")
        .arg(&path)
        .args(["--fqn", "cards.nope"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    let err = stderr(&output);
    assert!(err.contains("cards.nope"), "{err}");
    assert!(err.contains("render failed"), "{err}");
}
