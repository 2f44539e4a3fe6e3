use crate::client::{KindOutcome, SyncReport};
use crate::identity::Identity;
use crate::records::EntityKind;
use chrono::DateTime;
use serde_json::Value;
use terminal_size::{terminal_size, Width};

// Render journal records as an ASCII table, one layout per entry kind.
// Returns true if a table was printed (i.e., there were rows), false otherwise.
pub fn print_records(kind: EntityKind, records: &[Value]) -> bool {
    if records.is_empty() {
        return false;
    }
    let termw = get_terminal_width();
    let cols = columns_for(kind);
    let rows: Vec<Vec<String>> = records.iter().map(|r| row_for(kind, r)).collect();

    let mut widths: Vec<usize> = cols.iter().map(|s| display_len(s).min(termw)).collect();
    for r in &rows {
        for (i, cell) in r.iter().enumerate().take(cols.len()) {
            let w = display_len(cell);
            if w > widths[i] {
                widths[i] = w.min(termw);
            }
        }
    }

    let sep = build_separator(&widths);
    println!("{}", sep);
    println!("{}", build_row(&cols, &widths));
    println!("{}", sep);
    for r in &rows {
        println!("{}", build_row(r, &widths));
    }
    println!("{}", sep);
    println!("{}: {} rows", kind, rows.len());
    true
}

pub fn print_user(user: &Identity) {
    println!("signed in as {} <{}>", user.display_name, user.contact_handle);
    if let Some(tz) = &user.attrs.timezone {
        println!("  timezone: {}", tz);
    }
    if let Some(goal) = user.attrs.daily_calorie_goal {
        println!("  daily calorie goal: {}", goal);
    }
    if let Some(hours) = user.attrs.sleep_goal_hours {
        println!("  sleep goal: {}h", hours);
    }
}

pub fn print_sync_report(report: &SyncReport) {
    for (kind, outcome) in &report.outcomes {
        let what = match outcome {
            KindOutcome::Hit => "cached".to_string(),
            KindOutcome::Fetched(n) => format!("fetched {} records", n),
            KindOutcome::Failed => "FAILED (kept previous data)".to_string(),
        };
        println!("  {:<9} {}", kind.to_string(), what);
    }
    if let Some(fault) = &report.fault {
        println!("  note: {}", fault);
    }
}

fn columns_for(kind: EntityKind) -> Vec<String> {
    let names: &[&str] = match kind {
        EntityKind::Meals => &["when", "name", "calories", "notes"],
        EntityKind::Sleep => &["start", "end", "hours", "quality"],
        EntityKind::Checkins => &["when", "mood", "note"],
    };
    names.iter().map(|s| s.to_string()).collect()
}

fn row_for(kind: EntityKind, rec: &Value) -> Vec<String> {
    match kind {
        EntityKind::Meals => vec![
            fmt_ts(rec.get("eatenAt")),
            str_cell(rec.get("name")),
            num_cell(rec.get("calories")),
            str_cell(rec.get("notes")),
        ],
        EntityKind::Sleep => {
            let start = rec.get("startedAt").and_then(|v| v.as_i64());
            let end = rec.get("endedAt").and_then(|v| v.as_i64());
            let hours = match (start, end) {
                (Some(s), Some(e)) if e > s => format!("{:.1}", (e - s) as f64 / 3_600_000.0),
                _ => String::new(),
            };
            let quality = rec
                .get("quality")
                .and_then(|v| v.as_u64())
                .map(|q| format!("{}/5", q))
                .unwrap_or_default();
            vec![fmt_ts(rec.get("startedAt")), fmt_ts(rec.get("endedAt")), hours, quality]
        }
        EntityKind::Checkins => {
            let mood = rec
                .get("mood")
                .and_then(|v| v.as_u64())
                .map(|m| format!("{}/5", m))
                .unwrap_or_default();
            vec![fmt_ts(rec.get("loggedAt")), mood, str_cell(rec.get("note"))]
        }
    }
}

fn fmt_ts(v: Option<&Value>) -> String {
    let ms = match v.and_then(|x| x.as_i64()) {
        Some(ms) => ms,
        None => return String::new(),
    };
    match DateTime::from_timestamp_millis(ms) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M").to_string(),
        None => ms.to_string(),
    }
}

fn str_cell(v: Option<&Value>) -> String {
    match v {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn num_cell(v: Option<&Value>) -> String {
    match v.and_then(|x| x.as_u64()) {
        Some(n) => n.to_string(),
        None => String::new(),
    }
}

fn get_terminal_width() -> usize {
    match terminal_size() {
        Some((Width(w), _)) => (w as usize).saturating_sub(4).max(20),
        None => 80,
    }
}

fn display_len(s: &str) -> usize {
    s.chars().count()
}

fn build_separator(widths: &[usize]) -> String {
    let mut s = String::new();
    s.push('+');
    for w in widths {
        s.push_str(&"-".repeat(*w + 2));
        s.push('+');
    }
    s
}

fn build_row(cells: &[String], widths: &[usize]) -> String {
    let mut s = String::new();
    s.push('|');
    for (i, w) in widths.iter().enumerate() {
        let cell = cells.get(i).cloned().unwrap_or_default();
        let (text, align_right) = (truncate(&cell, *w), is_numeric_like(&cell));
        s.push(' ');
        if align_right {
            let pad = w.saturating_sub(display_len(&text));
            s.push_str(&" ".repeat(pad));
            s.push_str(&text);
        } else {
            s.push_str(&text);
            let pad = w.saturating_sub(display_len(&text));
            s.push_str(&" ".repeat(pad));
        }
        s.push(' ');
        s.push('|');
    }
    s
}

fn truncate(s: &str, max: usize) -> String {
    let len = s.chars().count();
    if len <= max {
        return s.to_string();
    }
    if max <= 1 {
        return "…".to_string();
    }
    let take = max - 1;
    s.chars().take(take).collect::<String>() + "…"
}

fn is_numeric_like(s: &str) -> bool {
    // crude detection for aligning numbers to the right
    let st = s.trim();
    if st.is_empty() {
        return false;
    }
    let mut has_digit = false;
    for ch in st.chars() {
        if ch.is_ascii_digit() {
            has_digit = true;
            continue;
        }
        if ".-+/:".contains(ch) {
            continue;
        }
        return false;
    }
    has_digit
}
