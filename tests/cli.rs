use assert_cmd::Command;
use httpmock::{
    Method::{GET, POST},
    MockServer,
};
use predicates::prelude::*;

// A scratch cwd keeps a developer's ./.env out of the picture.
fn bot(cwd: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("issue-triage-bot").unwrap();
    cmd.env_clear()
        .current_dir(cwd)
        .arg("--log-level")
        .arg("warn");
    cmd
}

#[test]
fn prints_version() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    bot(dir.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("issue-triage-bot "));
    Ok(())
}

#[test]
fn schedule_cron_line() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    bot(dir.path())
        .args([
            "schedule",
            "cron",
            "--binary",
            "/usr/local/bin/issue-triage-bot",
            "--workdir",
            "/srv/bot",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "0 * * * * cd /srv/bot && /usr/local/bin/issue-triage-bot run >> /srv/bot/cron.log 2>&1",
        ));
    Ok(())
}

#[test]
fn schedule_systemd_units() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    bot(dir.path())
        .args(["schedule", "systemd", "--binary", "/opt/bot", "--workdir", "/srv/bot"])
        .assert()
        .success()
        .stdout(predicate::str::contains("issue-triage-bot.service"))
        .stdout(predicate::str::contains("ExecStart=/opt/bot run"))
        .stdout(predicate::str::contains("OnCalendar=hourly"));
    Ok(())
}

#[test]
fn missing_configuration_fails() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    bot(dir.path())
        .arg("run")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("GITHUB_REPOS"))
        .stderr(predicate::str::contains("No GitHub authentication found"));
    Ok(())
}

#[test]
fn env_file_supplies_configuration() -> anyhow::Result<()> {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/user");
        then.status(200).json_body(serde_json::json!({"login": "bot"}));
    });
    server.mock(|when, then| {
        when.method(GET).path("/rate_limit");
        then.status(200)
            .json_body(serde_json::json!({"resources": {"core": {"limit": 5000, "remaining": 4999}}}));
    });
    server.mock(|when, then| {
        when.method(GET).path("/repos/o/r/issues");
        then.status(200).json_body(serde_json::json!([]));
    });

    let dir = tempfile::tempdir()?;
    let env_file = dir.path().join("bot.env");
    std::fs::write(
        &env_file,
        format!(
            "GITHUB_TOKEN=t\nGITHUB_REPOS=o/r\nGITHUB_API_URL={}\n",
            server.base_url()
        ),
    )?;
    bot(dir.path())
        .arg("--env-file")
        .arg(&env_file)
        .args(["run", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("o/r (0 unprocessed)"));
    Ok(())
}

#[test]
fn dry_run_lists_without_mutating() -> anyhow::Result<()> {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/user");
        then.status(200).json_body(serde_json::json!({"login": "bot"}));
    });
    server.mock(|when, then| {
        when.method(GET).path("/rate_limit");
        then.status(200)
            .json_body(serde_json::json!({"resources": {"core": {"limit": 5000, "remaining": 4999}}}));
    });
    server.mock(|when, then| {
        when.method(GET).path("/repos/x/y/issues");
        then.status(200).json_body(serde_json::json!([
            {"number": 1, "title": "Crash on start", "labels": []},
            {"number": 2, "title": "Handled", "labels": [{"name": "bot-processed"}]}
        ]));
    });
    let writes = server.mock(|when, then| {
        when.method(POST);
        then.status(500);
    });

    let dir = tempfile::tempdir()?;
    bot(dir.path())
        .env("GITHUB_TOKEN", "t")
        .env("GITHUB_REPOS", "o/r")
        .env("GITHUB_API_URL", server.base_url())
        .args(["run", "--repo", "x/y", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("x/y (1 unprocessed)"))
        .stdout(predicate::str::contains("#1 Crash on start"))
        .stdout(predicate::str::contains("Handled").not());
    writes.assert_hits(0);
    Ok(())
}

#[test]
fn rejected_token_aborts_before_processing() -> anyhow::Result<()> {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/user");
        then.status(401).json_body(serde_json::json!({"message": "Bad credentials"}));
    });
    server.mock(|when, then| {
        when.method(GET).path("/rate_limit");
        then.status(401).json_body(serde_json::json!({"message": "Bad credentials"}));
    });
    let issues = server.mock(|when, then| {
        when.method(GET).path("/repos/o/r/issues");
        then.status(200).json_body(serde_json::json!([]));
    });

    let dir = tempfile::tempdir()?;
    bot(dir.path())
        .env("GITHUB_TOKEN", "expired")
        .env("GITHUB_REPOS", "o/r")
        .env("GITHUB_API_URL", server.base_url())
        .env("DISABLE_ASSISTANT", "true")
        .arg("run")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("invalid or expired"));
    issues.assert_hits(0);
    Ok(())
}
