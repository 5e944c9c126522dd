//! Calendar sync against a mock iCalendar server, driving a real scheduler.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use chrono::{TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;
use ulticlock::calendar::{CalendarSync, EventStore};
use ulticlock::config::{CalendarConfig, UlticlockConfig};
use ulticlock::scheduler::{Clock, ManualClock, RunOutcome, Scheduler, ShellExecutor};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn vevent(uid: &str, summary: &str, start: &str) -> String {
    format!("BEGIN:VEVENT\nUID:{uid}\nSUMMARY:{summary}\nDTSTART:{start}\nEND:VEVENT\n")
}

fn feed(events: &[String]) -> String {
    format!(
        "BEGIN:VCALENDAR\nVERSION:2.0\nPRODID:-//test//EN\n{}END:VCALENDAR\n",
        events.concat()
    )
}

async fn serve_feed(server: &MockServer, body: String) {
    server.reset().await;
    Mock::given(method("GET"))
        .and(path("/cal.ics"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn feed_changes_flow_into_the_scheduler() {
    let server = MockServer::start().await;
    serve_feed(
        &server,
        feed(&[
            vevent("wake", "Alarm wake up", "20310314T063000Z"),
            vevent("standup", "Standup", "20310314T090000Z"),
            vevent("gym", "Alarm gym", "20310315T180000Z"),
        ]),
    )
    .await;

    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("notified");
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2031, 3, 14, 5, 0, 0).unwrap(),
    ));
    let scheduler = Scheduler::new(Arc::new(ShellExecutor::new(dir.path().join("scripts"))))
        .with_clock(clock.clone());

    let mut config = UlticlockConfig::default();
    config.database_path = dir.path().join("events.db");
    config.calendars = vec![CalendarConfig::new(
        "mock",
        format!("{}/cal.ics", server.uri()),
    )];
    config.sync.notify_command = format!("echo {{title}} >> '{}'", marker.display());

    let store = Arc::new(EventStore::open(&config.database_path).unwrap());
    let sync = CalendarSync::from_config(&config, Arc::clone(&store), scheduler.handle()).unwrap();

    // First pass: two keyword events scheduled, the meeting ignored.
    let report = sync.sync_once().await.unwrap();
    assert_eq!(report.events, 2);
    assert_eq!(report.created, 2);
    let control = scheduler.handle();
    let ids: Vec<String> = control.list().into_iter().map(|t| t.alarm_id).collect();
    assert_eq!(ids, vec!["wake:03-14", "gym:03-15"]);
    assert_eq!(store.list().unwrap().len(), 2);

    // Feed moves the wake-up and drops the gym session.
    serve_feed(
        &server,
        feed(&[vevent("wake", "Alarm wake up", "20310314T064500Z")]),
    )
    .await;
    let report = sync.sync_once().await.unwrap();
    assert_eq!(report.rescheduled, 1);
    assert_eq!(report.cancelled, 1);
    assert_eq!(
        control.status("wake:03-14").trigger_time,
        Some(Utc.with_ymd_and_hms(2031, 3, 14, 6, 45, 0).unwrap())
    );
    assert!(!control.status("gym:03-15").pending);

    let next = store
        .next_due_event(clock.now())
        .unwrap()
        .expect("one stored event");
    assert_eq!(next.start_time, "06:45:00");

    // Time passes: the alarm fires and runs the notification command.
    clock.set(Utc.with_ymd_and_hms(2031, 3, 14, 6, 45, 0).unwrap());
    assert_eq!(scheduler.tick(), 1);
    for _ in 0..200 {
        if !scheduler.history().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let history = scheduler.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].outcome, RunOutcome::Success);
    assert_eq!(
        std::fs::read_to_string(&marker).unwrap(),
        "Alarm wake up\n"
    );

    // A later sync does not resurrect an alarm whose start has passed.
    let report = sync.sync_once().await.unwrap();
    assert_eq!(report.created, 0);
    assert!(control.list().is_empty());
}

#[tokio::test]
async fn unreachable_calendar_cancels_nothing() {
    let server = MockServer::start().await;
    serve_feed(
        &server,
        feed(&[vevent("wake", "Alarm wake up", "20310314T063000Z")]),
    )
    .await;

    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2031, 3, 14, 5, 0, 0).unwrap(),
    ));
    let scheduler =
        Scheduler::new(Arc::new(ShellExecutor::new(dir.path()))).with_clock(clock.clone());

    let mut config = UlticlockConfig::default();
    config.calendars = vec![CalendarConfig::new(
        "mock",
        format!("{}/cal.ics", server.uri()),
    )];
    let store = Arc::new(EventStore::open_in_memory().unwrap());
    let sync = CalendarSync::from_config(&config, store, scheduler.handle()).unwrap();

    sync.sync_once().await.unwrap();
    assert!(scheduler.handle().status("wake:03-14").pending);

    server.reset().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let report = sync.sync_once().await.unwrap();
    assert_eq!(report.calendars_failed, 1);
    assert_eq!(report.cancelled, 0);
    assert!(scheduler.handle().status("wake:03-14").pending);
}
