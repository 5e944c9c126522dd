//! End-to-end tests: scheduler + control API server + client.
//!
//! Alarms run real `/bin/sh` scripts in a temporary directory.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use ulticlock::config::ServerConfig;
use ulticlock::control::HistorySource;
use ulticlock::scheduler::tasks::format_time_spec;
use ulticlock::scheduler::{RunOutcome, ShellExecutor};
use ulticlock::{AlarmClient, ControlServer, Scheduler, ShutdownMode};

struct Harness {
    scheduler: Arc<Scheduler>,
    server: ControlServer,
    client: AlarmClient,
    dir: tempfile::TempDir,
}

impl Harness {
    async fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let executor = ShellExecutor::new(dir.path().join("scripts"));
        let scheduler = Arc::new(
            Scheduler::new(Arc::new(executor)).with_poll_interval(Duration::from_millis(50)),
        );
        scheduler.start();

        let history: HistorySource = {
            let scheduler = Arc::clone(&scheduler);
            Arc::new(move || scheduler.history())
        };
        let config = ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
        };
        let server = ControlServer::start(scheduler.handle(), history, &config)
            .await
            .unwrap();
        let client = AlarmClient::new(server.base_url()).unwrap();
        Self {
            scheduler,
            server,
            client,
            dir,
        }
    }

    fn marker(&self, name: &str) -> std::path::PathBuf {
        self.dir.path().join(name)
    }

    async fn stop(self) {
        self.server.shutdown().await;
        self.scheduler.shutdown(ShutdownMode::Wait).await;
    }
}

fn spec_in(secs: i64) -> String {
    format_time_spec(Utc::now() + chrono::Duration::seconds(secs))
}

async fn wait_for(path: &Path) {
    for _ in 0..100 {
        if path.exists() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("{} never appeared", path.display());
}

#[tokio::test]
async fn due_alarm_runs_once_and_is_cleaned_up() {
    let h = Harness::start().await;
    let marker = h.marker("fired");
    let cmd = format!("echo x >> '{}'", marker.display());

    assert!(h.client.create("A1", &spec_in(1), &cmd).await.unwrap());
    assert!(h.client.status("A1").await.unwrap().pending);

    wait_for(&marker).await;
    // Give any erroneous second run time to happen.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(std::fs::read_to_string(&marker).unwrap(), "x\n");

    let status = h.client.status("A1").await.unwrap();
    assert!(!status.pending);
    assert!(h.client.list().await.unwrap().is_empty());

    let history = h.client.history().await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].alarm_id, "A1");
    assert_eq!(history[0].outcome, RunOutcome::Success);
    assert!(!h.dir.path().join("scripts").join("alarm-A1.sh").exists());

    h.stop().await;
}

#[tokio::test]
async fn snoozed_alarm_fires_after_snooze() {
    let h = Harness::start().await;
    let marker = h.marker("snoozed");
    let cmd = format!("touch '{}'", marker.display());

    assert!(h.client.create("S", "2099-01-01 00:00:00", &cmd).await.unwrap());
    assert!(h.client.snooze("S", Some(1)).await.unwrap());

    let status = h.client.status("S").await.unwrap();
    let trigger = status.trigger_time.expect("pending alarm has a trigger time");
    assert!(trigger <= Utc::now() + chrono::Duration::seconds(2));

    wait_for(&marker).await;
    h.stop().await;
}

#[tokio::test]
async fn rejected_operations_leave_state_unchanged() {
    let h = Harness::start().await;

    assert!(h
        .client
        .create("D", "2099-01-01 00:00:00", "echo first")
        .await
        .unwrap());
    assert!(!h
        .client
        .create("D", "2099-06-01 00:00:00", "echo second")
        .await
        .unwrap());
    assert!(!h.client.create("P", "tomorrow", "echo hi").await.unwrap());
    assert!(!h.client.modify("D", "31/12/2099").await.unwrap());
    assert!(!h.client.modify("missing", "2099-01-01 00:00:00").await.unwrap());
    assert!(!h.client.snooze("missing", None).await.unwrap());

    let list = h.client.list().await.unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].command, "echo first");
    assert_eq!(format_time_spec(list[0].trigger_time), "2099-01-01 00:00:00");
    assert!(!h.client.status("P").await.unwrap().pending);

    h.stop().await;
}

#[tokio::test]
async fn modify_then_cancel_twice() {
    let h = Harness::start().await;
    assert!(h
        .client
        .create("M", "2099-01-01 00:00:00", "true")
        .await
        .unwrap());
    assert!(h.client.modify("M", "2099-03-01 12:00:00").await.unwrap());
    let status = h.client.status("M").await.unwrap();
    assert_eq!(
        format_time_spec(status.trigger_time.unwrap()),
        "2099-03-01 12:00:00"
    );

    assert!(h.client.cancel("M").await.unwrap());
    assert!(!h.client.cancel("M").await.unwrap());
    assert!(!h.client.status("M").await.unwrap().pending);

    h.stop().await;
}

#[tokio::test]
async fn status_codes_and_error_bodies() {
    let h = Harness::start().await;
    let http = reqwest::Client::new();
    let base = h.server.base_url();

    let create = serde_json::json!({
        "alarm_id": "C",
        "time_spec": "2099-01-01 00:00:00",
        "command": "true"
    });
    let resp = http.post(format!("{base}/create")).json(&create).send().await.unwrap();
    assert_eq!(resp.status(), 200);

    let resp = http.post(format!("{base}/create")).json(&create).send().await.unwrap();
    assert_eq!(resp.status(), 409);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["kind"], "duplicate_id");

    let resp = http
        .post(format!("{base}/cancel"))
        .json(&serde_json::json!({"alarm_id": "nope"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let resp = http
        .post(format!("{base}/modify"))
        .json(&serde_json::json!({"alarm_id": "C", "new_time_spec": "soon"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["kind"], "parse_error");

    let resp = http
        .post(format!("{base}/create"))
        .json(&serde_json::json!({"alarm_id": "../x", "time_spec": "2099-01-01 00:00:00", "command": "true"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["kind"], "invalid_request");

    let resp = http
        .post(format!("{base}/create"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["kind"], "invalid_request");

    let resp = http
        .post(format!("{base}/create"))
        .json(&serde_json::json!({"alarm_id": "x"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["kind"], "invalid_request");
    assert!(!h.client.status("x").await.unwrap().pending);

    // Server still healthy after bad input.
    let resp = http.get(format!("{base}/status/C")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["pending"], true);
    assert_eq!(body["command"], "true");

    h.stop().await;
}

#[tokio::test]
async fn status_round_trips_ids_with_url_characters() {
    let h = Harness::start().await;
    let ids = ["a#1", "b?x=1", "c%20d", "wake up", "e&f=g"];
    for id in ids {
        assert!(h
            .client
            .create(id, "2099-01-01 00:00:00", "true")
            .await
            .unwrap());
    }
    for id in ids {
        let status = h.client.status(id).await.unwrap();
        assert_eq!(status.alarm_id, id);
        assert!(status.pending, "{id} should be pending");
    }
    h.stop().await;
}

#[tokio::test]
async fn failing_command_is_recorded_and_id_is_freed() {
    let h = Harness::start().await;
    assert!(h
        .client
        .create("F", &spec_in(0), "echo broken >&2; exit 7")
        .await
        .unwrap());

    let mut history = Vec::new();
    for _ in 0..100 {
        history = h.client.history().await.unwrap();
        if !history.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(history.len(), 1);
    match &history[0].outcome {
        RunOutcome::Failed { reason } => {
            assert!(reason.contains("exit code 7"), "{reason}");
            assert!(reason.contains("broken"), "{reason}");
        }
        other => panic!("unexpected outcome {other:?}"),
    }

    // The ID can be reused once the failed run is done.
    assert!(h
        .client
        .create("F", "2099-01-01 00:00:00", "true")
        .await
        .unwrap());

    h.stop().await;
}
