//! Event extraction from the Microsoft Outlook desktop app.
//!
//! Outlook has no local API, so events are read by driving it with
//! AppleScript through `osascript`. The script walks every Outlook calendar,
//! keeps only events that look like received invitations (an organizer or
//! attendees present, or invitation keywords in the title), restricts them to
//! the configured time window, and prints one `|#|`-delimited record per
//! event. Output parsing is forgiving: a record that cannot be parsed is
//! skipped with a warning rather than failing the snapshot.

use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use tokio::process::Command;

use crate::error::{SyncError, SyncResult};
use crate::event::Event;

const FIELD_SEPARATOR: &str = "|#|";
const SCRIPT_TIMEOUT: Duration = Duration::from_secs(60);

/// Reads invitation events out of a running Outlook instance.
pub struct OutlookReader {
    look_behind_days: i64,
    look_ahead_days: i64,
}

impl OutlookReader {
    pub fn new(look_behind_days: i64, look_ahead_days: i64) -> Self {
        Self {
            look_behind_days,
            look_ahead_days,
        }
    }

    /// Whether the Outlook process is running.
    pub async fn is_outlook_running() -> bool {
        Command::new("pgrep")
            .args(["-f", "Microsoft Outlook"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }

    /// Take a snapshot of invitation events within the configured window.
    pub async fn snapshot(&self) -> SyncResult<Vec<Event>> {
        if !Self::is_outlook_running().await {
            return Err(SyncError::Extraction(
                "Microsoft Outlook is not running".to_string(),
            ));
        }

        let script = build_event_script(self.look_behind_days, self.look_ahead_days);
        let output = run_applescript(&script).await?;

        let mut events = Vec::new();
        for line in output.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match parse_record(line) {
                Some(event) => events.push(event),
                None => eprintln!("⚠️  Skipping unparseable event record: {}", line),
            }
        }

        Ok(events)
    }
}

/// Run a script through `osascript`, with a timeout so a hung Outlook
/// dialog cannot stall the whole cycle.
async fn run_applescript(script: &str) -> SyncResult<String> {
    let child = Command::new("osascript")
        .args(["-e", script])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .env("TERM", "dumb")
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| SyncError::Extraction(format!("Failed to spawn osascript: {}", e)))?;

    let output = tokio::time::timeout(SCRIPT_TIMEOUT, child.wait_with_output())
        .await
        .map_err(|_| {
            SyncError::Extraction(format!(
                "AppleScript timed out after {}s",
                SCRIPT_TIMEOUT.as_secs()
            ))
        })?
        .map_err(|e| SyncError::Extraction(format!("osascript failed: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(SyncError::Extraction(format!(
            "AppleScript error: {}",
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Build the AppleScript that extracts invitation events from Outlook.
fn build_event_script(days_back: i64, days_forward: i64) -> String {
    format!(
        r#"
        tell application "Microsoft Outlook"
            set eventList to {{}}
            set calendarList to every calendar

            repeat with cal in calendarList
                try
                    set calendarName to name of cal
                    set calEvents to every calendar event in cal

                    repeat with evt in calEvents
                        try
                            set eventTitle to subject of evt
                            set eventStart to start time of evt
                            set eventEnd to end time of evt
                            set eventLocation to ""
                            set eventOrganizer to ""
                            set isInvited to false

                            try
                                set eventLocation to location of evt
                            end try

                            try
                                set eventOrganizer to organizer of evt
                                if eventOrganizer is not missing value and eventOrganizer is not "" then
                                    set isInvited to true
                                end if
                            end try

                            try
                                set eventAttendees to attendees of evt
                                if eventAttendees is not missing value and (count of eventAttendees) > 0 then
                                    set isInvited to true
                                end if
                            end try

                            if eventTitle contains "[회의요청]" or eventTitle contains "초대" or eventTitle contains "Invitation" or eventTitle contains "invited" then
                                set isInvited to true
                            end if

                            if isInvited then
                                set currentDate to current date
                                set startDiff to (eventStart - currentDate) / days

                                if startDiff > -{days_back} and startDiff < {days_forward} then
                                    set eventContent to ""
                                    set eventImportance to ""

                                    try
                                        set eventContent to content of evt
                                    end try

                                    try
                                        set eventImportance to importance of evt as string
                                    end try

                                    set eventInfo to eventTitle & "|#|" & (eventStart as string) & "|#|" & (eventEnd as string) & "|#|" & calendarName & "|#|" & eventLocation & "|#|" & eventOrganizer & "|#|" & eventContent & "|#|" & eventImportance
                                    set end of eventList to eventInfo
                                end if
                            end if
                        on error
                            -- Skip problematic events
                        end try
                    end repeat
                on error
                    -- Skip problematic calendars
                end try
            end repeat

            set AppleScript's text item delimiters to "\n"
            set resultString to eventList as string
            set AppleScript's text item delimiters to ""
            return resultString
        end tell
        "#
    )
}

/// Parse one `|#|`-delimited record into an Event.
///
/// Record layout: title, start, end, calendar name, location, organizer,
/// content, importance. Trailing fields may be absent for older Outlook
/// builds, so everything past the fourth field is optional.
fn parse_record(line: &str) -> Option<Event> {
    let parts: Vec<&str> = line.split(FIELD_SEPARATOR).collect();
    if parts.len() < 4 {
        return None;
    }

    let start = parse_applescript_date(parts[1])?;
    let end = parse_applescript_date(parts[2])?;
    let field = |i: usize| parts.get(i).map(|s| s.to_string()).unwrap_or_default();

    Some(Event::new(
        parts[0].to_string(),
        start,
        end,
        field(4),
        field(5),
        parts[3].to_string(),
        field(6),
        field(7),
    ))
}

/// Parse an AppleScript date string.
///
/// Outlook renders dates in the system locale, so both the Korean form
/// (`2024년 6월 1일 오전 10:00:00`) and the English form
/// (`June 1, 2024 at 10:00:00 AM`) are handled, with or without a leading
/// weekday name.
fn parse_applescript_date(raw: &str) -> Option<NaiveDateTime> {
    static WEEKDAY: OnceLock<Regex> = OnceLock::new();
    static KOREAN: OnceLock<Regex> = OnceLock::new();

    let weekday = WEEKDAY.get_or_init(|| {
        Regex::new(
            r"(월요일|화요일|수요일|목요일|금요일|토요일|일요일|Monday|Tuesday|Wednesday|Thursday|Friday|Saturday|Sunday),?\s*",
        )
        .expect("weekday regex")
    });
    let korean = KOREAN.get_or_init(|| {
        Regex::new(r"(\d{4})년\s*(\d{1,2})월\s*(\d{1,2})일\s*(오전|오후)\s*(\d{1,2}):(\d{2}):(\d{2})")
            .expect("korean date regex")
    });

    let cleaned = weekday.replace_all(raw.trim(), "");

    if let Some(m) = korean.captures(&cleaned) {
        let year: i32 = m[1].parse().ok()?;
        let month: u32 = m[2].parse().ok()?;
        let day: u32 = m[3].parse().ok()?;
        let mut hour: u32 = m[5].parse().ok()?;
        let minute: u32 = m[6].parse().ok()?;
        let second: u32 = m[7].parse().ok()?;

        // 12-hour clock: 오전 = AM, 오후 = PM
        match &m[4] {
            "오후" if hour != 12 => hour += 12,
            "오전" if hour == 12 => hour = 0,
            _ => {}
        }

        return NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second);
    }

    NaiveDateTime::parse_from_str(cleaned.trim(), "%B %d, %Y at %I:%M:%S %p").ok()
}

/// Post a macOS notification. Failures are ignored; notifications are
/// best-effort decoration around monitor mode.
pub async fn send_notification(title: &str, body: &str) {
    let script = format!(
        "display notification \"{}\" with title \"{}\"",
        body.replace('"', "'"),
        title.replace('"', "'")
    );
    let _ = Command::new("osascript")
        .args(["-e", &script])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_korean_date() {
        let parsed = parse_applescript_date("2024년 6월 1일 오전 10:00:00").unwrap();
        assert_eq!(
            parsed,
            NaiveDate::from_ymd_opt(2024, 6, 1)
                .unwrap()
                .and_hms_opt(10, 0, 0)
                .unwrap()
        );
    }

    #[test]
    fn test_parse_korean_date_pm_and_noon_midnight() {
        let pm = parse_applescript_date("2024년 6월 1일 오후 3:30:00").unwrap();
        assert_eq!(pm.format("%H:%M").to_string(), "15:30");

        let noon = parse_applescript_date("2024년 6월 1일 오후 12:00:00").unwrap();
        assert_eq!(noon.format("%H:%M").to_string(), "12:00");

        let midnight = parse_applescript_date("2024년 6월 1일 오전 12:00:00").unwrap();
        assert_eq!(midnight.format("%H:%M").to_string(), "00:00");
    }

    #[test]
    fn test_parse_date_with_weekday_prefix() {
        let korean = parse_applescript_date("토요일 2024년 6월 1일 오전 10:00:00");
        assert!(korean.is_some());

        let english = parse_applescript_date("Saturday, June 1, 2024 at 10:00:00 AM");
        assert_eq!(
            english.unwrap(),
            NaiveDate::from_ymd_opt(2024, 6, 1)
                .unwrap()
                .and_hms_opt(10, 0, 0)
                .unwrap()
        );
    }

    #[test]
    fn test_unparseable_date_is_none() {
        assert!(parse_applescript_date("sometime next week").is_none());
    }

    #[test]
    fn test_parse_record_full() {
        let line = "Sync Review|#|2024년 6월 1일 오전 10:00:00|#|2024년 6월 1일 오전 11:00:00|#|Calendar|#|Room 4|#|alice|#|agenda attached|#|normal";
        let event = parse_record(line).unwrap();

        assert_eq!(event.title, "Sync Review");
        assert_eq!(event.source_calendar, "Calendar");
        assert_eq!(event.location, "Room 4");
        assert_eq!(event.organizer, "alice");
        assert_eq!(event.content, "agenda attached");
        assert_eq!(event.importance, "normal");
        assert!(event.stable_id.starts_with("outlook-"));
    }

    #[test]
    fn test_parse_record_minimal_fields() {
        let line = "Standup|#|2024년 6월 1일 오전 9:00:00|#|2024년 6월 1일 오전 9:15:00|#|Calendar";
        let event = parse_record(line).unwrap();

        assert_eq!(event.title, "Standup");
        assert_eq!(event.organizer, "");
        assert_eq!(event.location, "");
    }

    #[test]
    fn test_parse_record_too_few_fields() {
        assert!(parse_record("Standup|#|2024년 6월 1일 오전 9:00:00").is_none());
    }

    #[test]
    fn test_record_with_bad_date_is_skipped() {
        let line = "Standup|#|???|#|???|#|Calendar";
        assert!(parse_record(line).is_none());
    }
}
