//! Duration and time-of-day parsing for the policy file.

use std::time::Duration;

use chrono::NaiveTime;

const START_TIME_FORMATS: [&str; 4] = ["%H:%M", "%I:%M%p", "%I:%M %p", "%H:%M:%S"];

fn unit_seconds(unit: &str) -> Option<f64> {
    match unit {
        "h" => Some(3600.0),
        "m" => Some(60.0),
        "s" => Some(1.0),
        "ms" => Some(1e-3),
        "us" | "µs" => Some(1e-6),
        "ns" => Some(1e-9),
        _ => None,
    }
}

/// Parses a duration string like "1h", "30m", "1h30m", "45s" or "500ms".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let mut rest = s.trim();
    if rest == "0" {
        return Some(Duration::ZERO);
    }
    if rest.is_empty() {
        return None;
    }

    let mut seconds = 0.0;
    while !rest.is_empty() {
        let number_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, tail) = rest.split_at(number_end);
        let number: f64 = number.parse().ok()?;

        let unit_end = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_end);
        seconds += number * unit_seconds(unit)?;
        rest = tail;
    }
    Duration::try_from_secs_f64(seconds).ok()
}

/// Parses a start-of-day time like "23:00" or "11:00PM".
pub fn parse_start_time(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    START_TIME_FORMATS
        .iter()
        .find_map(|format| NaiveTime::parse_from_str(s, format).ok())
}
