//! Built-in tools for calendar availability, mail search, and contact lookup.

pub mod calendar;
pub mod contacts;
pub mod search;

pub use calendar::{CalendarBackend, CalendarCheckTool, GoogleCalendar};
pub use contacts::{ContactBackend, GooglePeople, LookupContactTool};
pub use search::SearchEmailsTool;
