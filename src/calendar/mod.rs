//! Calendar pipeline: fetch iCalendar feeds, keep the matching events in
//! SQLite, and turn them into scheduler alarms.

pub mod event;
pub mod fetcher;
pub mod store;
pub mod sync;

pub use event::Event;
pub use fetcher::{EventSource, IcalFetcher, parse_calendar};
pub use store::{EventStore, StoreError};
pub use sync::{CalendarSync, SyncReport};
