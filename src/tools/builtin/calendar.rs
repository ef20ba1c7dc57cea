//! Calendar availability tool.
//!
//! Parses loose date phrases ("thursday afternoon", "tomorrow", ISO dates),
//! asks the calendar backend for busy periods, and reports free slots inside
//! working hours.

use std::sync::{Arc, LazyLock};
use std::time::Instant;

use async_trait::async_trait;
use chrono::{
    DateTime, Datelike, Duration, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::GoogleConfig;
use crate::google::GoogleClient;
use crate::pipeline::types::Item;
use crate::tools::tool::{Tool, ToolError, ToolOutput, require_str};

const WORK_START_HOUR: u32 = 9;
const WORK_END_HOUR: u32 = 18;
const DEFAULT_MIN_DURATION_MINUTES: i64 = 30;
const SUMMARY_SLOTS: usize = 5;

static SCHEDULING: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(meet|meeting|schedule|reschedule|availability|available|free|call|catch up|calendar|slot)\b",
    )
    .ok()
});

static DATE_PHRASE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b((?:next\s+)?(?:monday|tuesday|wednesday|thursday|friday|saturday|sunday)(?:\s+(?:morning|afternoon))?|today|tomorrow(?:\s+(?:morning|afternoon))?|next week|\d{4}-\d{2}-\d{2})\b",
    )
    .ok()
});

/// A span of local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSlot {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl TimeSlot {
    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }

    pub fn display(&self) -> String {
        if self.start.date() == self.end.date() {
            format!(
                "{}: {} - {}",
                self.start.format("%a %b %d"),
                self.start.format("%I:%M %p"),
                self.end.format("%I:%M %p")
            )
        } else {
            format!(
                "{} - {}",
                self.start.format("%a %b %d %I:%M %p"),
                self.end.format("%a %b %d %I:%M %p")
            )
        }
    }

    fn to_json(self) -> serde_json::Value {
        serde_json::json!({
            "start": self.start.format("%Y-%m-%dT%H:%M:%S").to_string(),
            "end": self.end.format("%Y-%m-%dT%H:%M:%S").to_string(),
            "display": self.display(),
            "duration_minutes": self.duration_minutes(),
        })
    }
}

/// Where busy periods come from.
#[async_trait]
pub trait CalendarBackend: Send + Sync {
    async fn busy(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<(DateTime<Utc>, DateTime<Utc>)>, ToolError>;
}

/// Google Calendar `freeBusy` query.
pub struct GoogleCalendar {
    client: GoogleClient,
    base_url: String,
    calendar_id: String,
}

impl GoogleCalendar {
    pub fn new(client: GoogleClient, config: &GoogleConfig) -> Self {
        Self {
            client,
            base_url: config.calendar_base_url.trim_end_matches('/').to_string(),
            calendar_id: config.calendar_id.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FreeBusyRequest<'a> {
    time_min: String,
    time_max: String,
    items: [FreeBusyItem<'a>; 1],
}

#[derive(Debug, Serialize)]
struct FreeBusyItem<'a> {
    id: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct FreeBusyResponse {
    #[serde(default)]
    calendars: std::collections::HashMap<String, FreeBusyCalendar>,
}

#[derive(Debug, Default, Deserialize)]
struct FreeBusyCalendar {
    #[serde(default)]
    busy: Vec<BusyPeriod>,
}

#[derive(Debug, Deserialize)]
struct BusyPeriod {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

#[async_trait]
impl CalendarBackend for GoogleCalendar {
    async fn busy(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<(DateTime<Utc>, DateTime<Utc>)>, ToolError> {
        let request = FreeBusyRequest {
            time_min: start.to_rfc3339(),
            time_max: end.to_rfc3339(),
            items: [FreeBusyItem {
                id: &self.calendar_id,
            }],
        };
        let mut response: FreeBusyResponse = self
            .client
            .post_json("calendar_freebusy", &format!("{}/freeBusy", self.base_url), &request)
            .await?;
        Ok(response
            .calendars
            .remove(&self.calendar_id)
            .unwrap_or_default()
            .busy
            .into_iter()
            .map(|p| (p.start, p.end))
            .collect())
    }
}

/// Parse a loose date phrase relative to `now`.
///
/// Day phrases resolve to 09:00, or 13:00 with "afternoon". A weekday name
/// means its next occurrence after today; "next" pushes it one more week.
pub fn parse_date(text: &str, now: NaiveDateTime) -> Option<NaiveDateTime> {
    let text = text.trim();
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt);
        }
    }

    let text = text.to_lowercase();

    let hour = if text.contains("afternoon") {
        13
    } else {
        WORK_START_HOUR
    };
    let phrase = text.replace("afternoon", "").replace("morning", "");
    let phrase = phrase.trim();
    let today = now.date();

    let day = match phrase {
        "" | "today" => Some(today),
        "tomorrow" => today.succ_opt(),
        "next week" => today.checked_add_signed(Duration::weeks(1)),
        _ => weekday_date(phrase, today).or_else(|| {
            ["%Y-%m-%d", "%m/%d/%Y"]
                .iter()
                .find_map(|f| NaiveDate::parse_from_str(phrase, f).ok())
        }),
    }?;

    day.and_hms_opt(hour, 0, 0)
}

fn weekday_date(phrase: &str, today: NaiveDate) -> Option<NaiveDate> {
    const DAYS: [&str; 7] = [
        "monday",
        "tuesday",
        "wednesday",
        "thursday",
        "friday",
        "saturday",
        "sunday",
    ];
    let target = DAYS.iter().position(|d| phrase.contains(d))? as i64;
    let current = today.weekday().num_days_from_monday() as i64;
    let mut ahead = target - current;
    if ahead <= 0 {
        ahead += 7;
    }
    if phrase.contains("next") {
        ahead += 7;
    }
    today.checked_add_signed(Duration::days(ahead))
}

/// Free slots of at least `min_minutes` inside working hours, day by day.
pub fn free_slots(
    start: NaiveDateTime,
    end: NaiveDateTime,
    busy: &[TimeSlot],
    min_minutes: i64,
) -> Vec<TimeSlot> {
    let mut busy: Vec<TimeSlot> = busy.to_vec();
    busy.sort_by_key(|b| b.start);

    let mut slots = Vec::new();
    let mut day = start.date();
    while day <= end.date() {
        let (Some(open), Some(close)) = (
            day.and_hms_opt(WORK_START_HOUR, 0, 0),
            day.and_hms_opt(WORK_END_HOUR, 0, 0),
        ) else {
            break;
        };
        let window_end = close.min(end);
        let mut cursor = open.max(start);

        for b in &busy {
            if b.end <= cursor || b.start >= window_end {
                continue;
            }
            if b.start > cursor {
                push_slot(&mut slots, cursor, b.start, min_minutes);
            }
            cursor = cursor.max(b.end);
        }
        push_slot(&mut slots, cursor, window_end, min_minutes);

        match day.succ_opt() {
            Some(next) => day = next,
            None => break,
        }
    }
    slots
}

fn push_slot(slots: &mut Vec<TimeSlot>, start: NaiveDateTime, end: NaiveDateTime, min: i64) {
    let slot = TimeSlot { start, end };
    if start < end && slot.duration_minutes() >= min {
        slots.push(slot);
    }
}

pub fn summarize(free: &[TimeSlot]) -> String {
    if free.is_empty() {
        return "No available time slots found in the requested period.".into();
    }
    let mut lines = vec!["Available times:".to_string()];
    lines.extend(
        free.iter()
            .take(SUMMARY_SLOTS)
            .map(|s| format!("  - {}", s.display())),
    );
    if free.len() > SUMMARY_SLOTS {
        lines.push(format!("  ... and {} more slots", free.len() - SUMMARY_SLOTS));
    }
    lines.join("\n")
}

fn to_local_naive(dt: DateTime<Utc>) -> NaiveDateTime {
    dt.with_timezone(&Local).naive_local()
}

fn to_utc(naive: NaiveDateTime) -> DateTime<Utc> {
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
}

/// `calendar_check`: free slots for a requested day or range.
pub struct CalendarCheckTool {
    backend: Arc<dyn CalendarBackend>,
}

impl CalendarCheckTool {
    pub fn new(backend: Arc<dyn CalendarBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for CalendarCheckTool {
    fn name(&self) -> &str {
        "calendar_check"
    }

    fn description(&self) -> &str {
        "Check calendar availability for a date or range. Returns busy and free \
         time slots. Applies when the sender asks about meeting times or scheduling."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "start_date": {
                    "type": "string",
                    "description": "Start in ISO format or relative (e.g. 'tomorrow', 'next Monday', 'thursday afternoon')"
                },
                "end_date": {
                    "type": "string",
                    "description": "End in ISO format or relative. Defaults to the end of the start day."
                },
                "min_duration_minutes": {
                    "type": "integer",
                    "description": "Minimum free slot length in minutes",
                    "default": DEFAULT_MIN_DURATION_MINUTES
                }
            },
            "required": ["start_date"]
        })
    }

    fn plan(&self, item: &Item) -> Option<serde_json::Value> {
        let text = item.latest_text();
        if !SCHEDULING.as_ref()?.is_match(&text) {
            return None;
        }
        match DATE_PHRASE.as_ref().and_then(|re| re.find(&text)) {
            Some(m) => Some(serde_json::json!({ "start_date": m.as_str().to_lowercase() })),
            None => Some(serde_json::json!({ "start_date": "tomorrow", "end_date": "next week" })),
        }
    }

    async fn execute(&self, params: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let started = Instant::now();
        let now = Local::now().naive_local();

        let raw_start = require_str(&params, "start_date")?;
        let start = parse_date(raw_start, now)
            .ok_or_else(|| ToolError::InvalidParameters(format!("could not parse date: {raw_start}")))?;
        let end = match params.get("end_date").and_then(|v| v.as_str()) {
            Some(raw) => parse_date(raw, now)
                .ok_or_else(|| ToolError::InvalidParameters(format!("could not parse date: {raw}")))?,
            None => start
                .date()
                .and_time(NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN)),
        };
        if start >= end {
            return Err(ToolError::InvalidParameters(
                "start date must be before end date".into(),
            ));
        }
        let min_minutes = params
            .get("min_duration_minutes")
            .and_then(|v| v.as_i64())
            .filter(|m| *m > 0)
            .unwrap_or(DEFAULT_MIN_DURATION_MINUTES);

        info!(%start, %end, "Checking calendar availability");
        let busy: Vec<TimeSlot> = self
            .backend
            .busy(to_utc(start), to_utc(end))
            .await?
            .into_iter()
            .map(|(s, e)| TimeSlot {
                start: to_local_naive(s),
                end: to_local_naive(e),
            })
            .collect();
        let free = free_slots(start, end, &busy, min_minutes);

        Ok(ToolOutput::success(
            serde_json::json!({
                "start_date": start.format("%Y-%m-%dT%H:%M:%S").to_string(),
                "end_date": end.format("%Y-%m-%dT%H:%M:%S").to_string(),
                "busy_slots": busy.iter().map(|s| s.to_json()).collect::<Vec<_>>(),
                "free_slots": free.iter().map(|s| s.to_json()).collect::<Vec<_>>(),
                "summary": summarize(&free),
            }),
            started.elapsed(),
        ))
    }
}
