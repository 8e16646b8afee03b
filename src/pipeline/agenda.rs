//! Agenda document parsing.
//!
//! Line-oriented extraction from plain-text or markdown agendas: labeled
//! metadata fields (`Titel:`, `Datum:`, `Ort:`, `Teilnehmer:`), `HH:MM
//! name` session lines, end times patched from the following session's
//! start. Works entirely offline so stage 1 stays hashable before any
//! service client exists.

use chrono::{NaiveDate, NaiveTime};
use regex::Regex;

use crate::models::{AgendaSession, WorkshopMeta};

/// Parse agenda text into workshop metadata and ordered sessions.
///
/// `source_stem` (the file name without extension) serves as the title of
/// last resort. An agenda without recognizable session lines yields a
/// single session named after the workshop.
pub fn parse_agenda(text: &str, source_stem: &str) -> (WorkshopMeta, Vec<AgendaSession>) {
    let title = extract_title(text, source_stem);
    let meta = WorkshopMeta {
        title: title.clone(),
        workshop_date: extract_date(text, source_stem),
        location: extract_labeled(text, &["Ort", "Location", "Veranstaltungsort"]),
        participants: extract_labeled(text, &["Teilnehmer", "Participants", "TN"])
            .and_then(|v| leading_number(&v)),
    };

    let mut sessions = extract_sessions(text);
    // Patch end times from the next session's start
    for i in 0..sessions.len().saturating_sub(1) {
        if sessions[i].end_time.is_none() {
            sessions[i].end_time = sessions[i + 1].start_time;
        }
    }
    if sessions.is_empty() {
        sessions.push(AgendaSession {
            id: "session_001".into(),
            order: 1,
            name: title,
            start_time: None,
            end_time: None,
        });
    }
    (meta, sessions)
}

pub fn default_sessions() -> Vec<AgendaSession> {
    vec![AgendaSession {
        id: "session_001".into(),
        order: 1,
        name: "Workshop".into(),
        start_time: None,
        end_time: None,
    }]
}

fn extract_labeled(text: &str, labels: &[&str]) -> Option<String> {
    let pattern = format!(r"(?mi)^(?:{})\s*:\s*(.+)$", labels.join("|"));
    let re = Regex::new(&pattern).expect("static label pattern");
    re.captures(text)
        .map(|c| c.get(1).map(|m| m.as_str().trim().to_string()))
        .flatten()
}

fn leading_number(value: &str) -> Option<u32> {
    let digits: String = value.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

fn extract_title(text: &str, source_stem: &str) -> String {
    if let Some(labeled) = extract_labeled(text, &["Titel", "Title", "Thema", "Name"]) {
        return labeled;
    }
    // First substantial line that is not a session time entry
    let time_line = Regex::new(r"^\d{1,2}[:.]\d{2}").expect("static pattern");
    for line in text.lines() {
        let line = line.trim().trim_start_matches('#').trim();
        if line.len() > 3 && !time_line.is_match(line) {
            return line.to_string();
        }
    }
    clean_filename(source_stem)
}

fn extract_date(text: &str, source_stem: &str) -> Option<NaiveDate> {
    if let Some(labeled) = extract_labeled(text, &["Datum", "Date"]) {
        if let Some(date) = parse_date(&labeled) {
            return Some(date);
        }
    }
    parse_date(text).or_else(|| parse_date(source_stem))
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    let dmy = Regex::new(r"\b(\d{2})\.(\d{2})\.(\d{4})\b").expect("static pattern");
    if let Some(c) = dmy.captures(text) {
        if let Some(date) = ymd(&c[3], &c[2], &c[1]) {
            return Some(date);
        }
    }
    let dmy_short = Regex::new(r"\b(\d{2})\.(\d{2})\.(\d{2})\b").expect("static pattern");
    if let Some(c) = dmy_short.captures(text) {
        let year = format!("20{}", &c[3]);
        if let Some(date) = ymd(&year, &c[2], &c[1]) {
            return Some(date);
        }
    }
    let iso = Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})\b").expect("static pattern");
    if let Some(c) = iso.captures(text) {
        if let Some(date) = ymd(&c[1], &c[2], &c[3]) {
            return Some(date);
        }
    }
    None
}

fn ymd(year: &str, month: &str, day: &str) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, day.parse().ok()?)
}

fn extract_sessions(text: &str) -> Vec<AgendaSession> {
    let session_line = Regex::new(r"(?m)^\s*(\d{1,2})[:.](\d{2})\s+(.+)$").expect("static pattern");
    let mut sessions = Vec::new();
    for captures in session_line.captures_iter(text) {
        let name = captures[3].trim().trim_end_matches(['-', '–']).trim();
        if name.len() <= 2 {
            continue;
        }
        let start = NaiveTime::from_hms_opt(
            captures[1].parse::<u32>().unwrap_or(0),
            captures[2].parse::<u32>().unwrap_or(0),
            0,
        );
        if start.is_none() {
            continue;
        }
        let order = sessions.len() as u32 + 1;
        sessions.push(AgendaSession {
            id: format!("session_{order:03}"),
            order,
            name: name.to_string(),
            start_time: start,
            end_time: None,
        });
    }
    sessions
}

/// Derive a readable title from a file stem: strip dates and version
/// suffixes, turn separators into spaces.
fn clean_filename(stem: &str) -> String {
    let date_part = Regex::new(r"\d{2}[.\-_]\d{2}[.\-_]\d{2,4}").expect("static pattern");
    let version_part = Regex::new(r"(?i)_final|_v\d+|_draft").expect("static pattern");
    let separators = Regex::new(r"[_\-]+").expect("static pattern");

    let cleaned = date_part.replace_all(stem, "");
    let cleaned = version_part.replace_all(&cleaned, "");
    let cleaned = separators.replace_all(&cleaned, " ").trim().to_string();
    if cleaned.is_empty() {
        stem.to_string()
    } else {
        cleaned
    }
}
