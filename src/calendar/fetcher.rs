//! iCalendar feed fetching and parsing.
//!
//! [`EventSource`] is the seam the sync service depends on; [`IcalFetcher`]
//! implements it over HTTP(S). Parsing is a pure function,
//! [`parse_calendar`], so it can be tested without a server.

use crate::calendar::event::Event;
use crate::config::CalendarConfig;
use crate::error::{AlarmError, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use ical::parser::ical::component::IcalEvent;
use std::io::BufReader;
use std::time::Duration;
use tracing::debug;

/// Request timeout for feed downloads.
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// A source of keyword-matching calendar events.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Events whose title starts with `keyword` and whose start date lies in
    /// `[from, to]`, sorted by date then start time.
    async fn fetch(&self, keyword: &str, from: NaiveDate, to: NaiveDate) -> Result<Vec<Event>>;
}

/// Fetches one iCalendar feed over HTTP(S).
#[derive(Debug, Clone)]
pub struct IcalFetcher {
    config: CalendarConfig,
    client: reqwest::Client,
}

impl IcalFetcher {
    /// Build a fetcher for one configured feed.
    ///
    /// # Errors
    ///
    /// Returns [`AlarmError::Calendar`] if the HTTP client cannot be built.
    pub fn new(config: CalendarConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .danger_accept_invalid_certs(!config.verify_cert)
            .build()
            .map_err(|e| AlarmError::Calendar(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    /// Download the raw feed text.
    ///
    /// # Errors
    ///
    /// Returns [`AlarmError::Calendar`] on transport failure or a non-2xx status.
    pub async fn fetch_text(&self) -> Result<String> {
        let mut request = self.client.get(&self.config.ical_url);
        if let Some(user) = &self.config.user_name {
            request = request.basic_auth(user, self.config.password.as_deref());
        }

        let resp = request.send().await.map_err(|e| {
            AlarmError::Calendar(format!("{}: request failed: {e}", self.config.label()))
        })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AlarmError::Calendar(format!(
                "{}: failed to fetch calendar: status {status}",
                self.config.label()
            )));
        }

        resp.text().await.map_err(|e| {
            AlarmError::Calendar(format!("{}: failed to read body: {e}", self.config.label()))
        })
    }
}

#[async_trait]
impl EventSource for IcalFetcher {
    fn name(&self) -> &str {
        self.config.label()
    }

    async fn fetch(&self, keyword: &str, from: NaiveDate, to: NaiveDate) -> Result<Vec<Event>> {
        let text = self.fetch_text().await?;
        let events = parse_calendar(&text, keyword, from, to)
            .map_err(|e| AlarmError::Calendar(format!("{}: {e}", self.config.label())))?;
        debug!(calendar = self.name(), count = events.len(), "calendar fetched");
        Ok(events)
    }
}

/// Extract keyword-matching events starting within `[from, to]` from
/// iCalendar text.
///
/// Events lacking `UID`, `SUMMARY` or a readable `DTSTART` are skipped.
/// Recurrence rules are not expanded.
///
/// # Errors
///
/// Returns [`AlarmError::Calendar`] if the text is not valid iCalendar.
pub fn parse_calendar(
    text: &str,
    keyword: &str,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<Event>> {
    let parser = ical::IcalParser::new(BufReader::new(text.as_bytes()));
    let mut events = Vec::new();

    for calendar in parser {
        let calendar =
            calendar.map_err(|e| AlarmError::Calendar(format!("invalid iCalendar: {e}")))?;
        for raw in &calendar.events {
            let Some(event) = convert_event(raw) else {
                continue;
            };
            let Ok(date) = NaiveDate::parse_from_str(&event.date, "%Y-%m-%d") else {
                continue;
            };
            if event.title.starts_with(keyword) && date >= from && date <= to {
                events.push(event);
            }
        }
    }

    events.sort_by(|a, b| (&a.date, &a.start_time).cmp(&(&b.date, &b.start_time)));
    Ok(events)
}

fn property<'a>(event: &'a IcalEvent, name: &str) -> Option<&'a str> {
    event
        .properties
        .iter()
        .find(|p| p.name.eq_ignore_ascii_case(name))
        .and_then(|p| p.value.as_deref())
}

fn convert_event(raw: &IcalEvent) -> Option<Event> {
    let uid = property(raw, "UID")?;
    let title = property(raw, "SUMMARY")?;
    let start = parse_ical_datetime(property(raw, "DTSTART")?)?;
    let end = property(raw, "DTEND")
        .and_then(parse_ical_datetime)
        .unwrap_or(start);

    Some(Event {
        event_id: format!("{uid}:{}", start.format("%m-%d")),
        date: start.format("%Y-%m-%d").to_string(),
        start_time: start.format("%H:%M:%S").to_string(),
        end_time: end.format("%H:%M:%S").to_string(),
        title: title.to_owned(),
    })
}

/// Parse `YYYYMMDDTHHMMSS[Z]` or `YYYYMMDD` (midnight).
fn parse_ical_datetime(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    let value = value.strip_suffix('Z').unwrap_or(value);
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S") {
        return Some(dt);
    }
    NaiveDate::parse_from_str(value, "%Y%m%d")
        .ok()
        .map(|d| d.and_time(NaiveTime::MIN))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const FEED: &str = "BEGIN:VCALENDAR\n\
VERSION:2.0\n\
PRODID:-//test//EN\n\
BEGIN:VEVENT\n\
UID:late@test\n\
SUMMARY:Alarm second\n\
DTSTART:20310315T080000Z\n\
DTEND:20310315T083000Z\n\
END:VEVENT\n\
BEGIN:VEVENT\n\
UID:early@test\n\
SUMMARY:Alarm first\n\
DTSTART;TZID=Europe/Paris:20310314T063000\n\
END:VEVENT\n\
BEGIN:VEVENT\n\
UID:meeting@test\n\
SUMMARY:Team meeting\n\
DTSTART:20310314T090000Z\n\
DTEND:20310314T100000Z\n\
END:VEVENT\n\
BEGIN:VEVENT\n\
UID:allday@test\n\
SUMMARY:Alarm holiday\n\
DTSTART;VALUE=DATE:20310316\n\
DTEND;VALUE=DATE:20310317\n\
END:VEVENT\n\
BEGIN:VEVENT\n\
UID:far@test\n\
SUMMARY:Alarm far away\n\
DTSTART:20310501T070000Z\n\
END:VEVENT\n\
BEGIN:VEVENT\n\
SUMMARY:Alarm without uid\n\
DTSTART:20310314T050000Z\n\
END:VEVENT\n\
END:VCALENDAR\n";

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn filters_by_keyword_and_window_and_sorts() {
        let events = parse_calendar(FEED, "Alarm", date(2031, 3, 14), date(2031, 3, 21)).unwrap();
        let ids: Vec<&str> = events.iter().map(|e| e.event_id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["early@test:03-14", "late@test:03-15", "allday@test:03-16"]
        );
    }

    #[test]
    fn fills_times_and_defaults_end_to_start() {
        let events = parse_calendar(FEED, "Alarm", date(2031, 3, 14), date(2031, 3, 14)).unwrap();
        assert_eq!(events.len(), 1);
        let e = &events[0];
        assert_eq!(e.date, "2031-03-14");
        assert_eq!(e.start_time, "06:30:00");
        assert_eq!(e.end_time, "06:30:00");
        assert_eq!(e.title, "Alarm first");
    }

    #[test]
    fn all_day_event_starts_at_midnight() {
        let events = parse_calendar(FEED, "Alarm", date(2031, 3, 16), date(2031, 3, 16)).unwrap();
        assert_eq!(events[0].start_time, "00:00:00");
    }

    #[test]
    fn window_edges_are_inclusive() {
        let events = parse_calendar(FEED, "Alarm", date(2031, 3, 15), date(2031, 3, 16)).unwrap();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn empty_calendar_yields_nothing() {
        let text = "BEGIN:VCALENDAR\nVERSION:2.0\nEND:VCALENDAR\n";
        let events = parse_calendar(text, "Alarm", date(2031, 1, 1), date(2031, 12, 31)).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn ical_datetime_forms() {
        assert_eq!(
            parse_ical_datetime("20310314T063000Z").unwrap().to_string(),
            "2031-03-14 06:30:00"
        );
        assert_eq!(
            parse_ical_datetime("20310314T063000").unwrap().to_string(),
            "2031-03-14 06:30:00"
        );
        assert_eq!(
            parse_ical_datetime("20310314").unwrap().to_string(),
            "2031-03-14 00:00:00"
        );
        assert!(parse_ical_datetime("tomorrow").is_none());
    }

    #[tokio::test]
    async fn fetch_uses_basic_auth() {
        let server = MockServer::start().await;
        // "me:secret"
        Mock::given(method("GET"))
            .and(path("/cal.ics"))
            .and(header("authorization", "Basic bWU6c2VjcmV0"))
            .respond_with(ResponseTemplate::new(200).set_body_string(FEED))
            .mount(&server)
            .await;

        let mut config = CalendarConfig::new("test", format!("{}/cal.ics", server.uri()));
        config.user_name = Some("me".into());
        config.password = Some("secret".into());
        let fetcher = IcalFetcher::new(config).unwrap();

        let events = fetcher
            .fetch("Alarm", date(2031, 3, 14), date(2031, 3, 21))
            .await
            .unwrap();
        assert_eq!(events.len(), 3);
    }

    #[tokio::test]
    async fn non_success_status_is_calendar_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let fetcher =
            IcalFetcher::new(CalendarConfig::new("locked", format!("{}/cal.ics", server.uri())))
                .unwrap();
        let err = fetcher
            .fetch("Alarm", date(2031, 3, 14), date(2031, 3, 21))
            .await
            .expect_err("401");
        assert!(matches!(err, AlarmError::Calendar(ref m) if m.contains("401")), "{err}");
    }
}
