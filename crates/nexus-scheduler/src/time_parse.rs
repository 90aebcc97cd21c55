//! Natural-language reminder time parsing (§4.7, SPEC_FULL §2.5).
//!
//! The teacher's `reminder` tool only accepts `fire_at` (strict RFC3339),
//! `fire_in_seconds`, and two recurring forms. This covers every shape
//! §4.7 names for one-shot reminders: relative (`in 30 minutes`), named
//! days (`tomorrow at 9am`), dotted time (`11.22pm tonight`), military
//! (`1130hr`), and ISO. Time-only expressions that have already passed
//! roll forward by one day. When an IANA zone is supplied the expression
//! is interpreted as a local instant in that zone and converted to UTC;
//! otherwise all times are taken as UTC.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc, Weekday};
use once_cell::sync::Lazy;
use regex::Regex;

static RELATIVE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^in\s+(\d+)\s*(second|minute|hour|day|week)s?$").expect("valid regex"));

static NAMED_DAY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(today|tomorrow|tonight|next\s+(mon|tues?|wed(?:nes)?|thu(?:rs)?|fri|sat(?:ur)?|sun)\w*)\s*(?:at\s+)?(\d{1,2})(?::(\d{2}))?\s*(am|pm)?$",
    )
    .expect("valid regex")
});

static DOTTED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(\d{1,2})\.(\d{2})\s*(am|pm)\s*(tonight|today|tomorrow)?$").expect("valid regex"));

static MILITARY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d{3,4})\s*hrs?$").expect("valid regex"));

/// Resolve a user-supplied time expression to a UTC instant. `now` is the
/// reference instant; `iana_zone` (e.g. `"America/Chicago"`) localizes
/// bare clock times before converting back to UTC. Returns `None` if the
/// expression matches none of the accepted shapes.
pub fn parse_time_expression(
    text: &str,
    now: DateTime<Utc>,
    iana_zone: Option<&str>,
) -> Option<DateTime<Utc>> {
    let text = text.trim();
    let tz = iana_zone.and_then(|z| z.parse::<chrono_tz::Tz>().ok());

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }

    if let Some(caps) = RELATIVE_RE.captures(text) {
        let amount: i64 = caps.get(1)?.as_str().parse().ok()?;
        let unit = caps.get(2)?.as_str().to_lowercase();
        let delta = match unit.as_str() {
            "second" => Duration::seconds(amount),
            "minute" => Duration::minutes(amount),
            "hour" => Duration::hours(amount),
            "day" => Duration::days(amount),
            "week" => Duration::weeks(amount),
            _ => return None,
        };
        return Some(now + delta);
    }

    if let Some(caps) = NAMED_DAY_RE.captures(text) {
        let day_token = caps.get(1)?.as_str().to_lowercase();
        let mut hour: u32 = caps.get(3)?.as_str().parse().ok()?;
        let minute: u32 = caps.get(4).map(|m| m.as_str().parse().unwrap_or(0)).unwrap_or(0);
        if let Some(ampm) = caps.get(5) {
            apply_ampm(&mut hour, ampm.as_str());
        } else if day_token == "tonight" {
            // Bare "tonight at 9" with no am/pm means PM.
            if hour < 12 {
                hour += 12;
            }
        }
        if hour > 23 || minute > 59 {
            return None;
        }

        let (today, _) = localize(now, tz);
        let target_date = if day_token == "today" || day_token == "tonight" {
            today
        } else if day_token == "tomorrow" {
            today + Duration::days(1)
        } else {
            let weekday = parse_weekday_prefix(&day_token)?;
            next_weekday_on_or_after(today + Duration::days(1), weekday)
        };
        return to_utc(tz, target_date, NaiveTime::from_hms_opt(hour, minute, 0)?);
    }

    if let Some(caps) = DOTTED_RE.captures(text) {
        let mut hour: u32 = caps.get(1)?.as_str().parse().ok()?;
        let minute: u32 = caps.get(2)?.as_str().parse().ok()?;
        apply_ampm(&mut hour, caps.get(3)?.as_str());
        if hour > 23 || minute > 59 {
            return None;
        }
        let (today, current_time) = localize(now, tz);
        let target_date = match caps.get(4).map(|m| m.as_str().to_lowercase()).as_deref() {
            Some("tomorrow") => today + Duration::days(1),
            _ => today,
        };
        let candidate_time = NaiveTime::from_hms_opt(hour, minute, 0)?;
        let date = if target_date == today && candidate_time <= current_time {
            today + Duration::days(1)
        } else {
            target_date
        };
        return to_utc(tz, date, candidate_time);
    }

    if let Some(caps) = MILITARY_RE.captures(text) {
        let digits = caps.get(1)?.as_str();
        let (hour, minute): (u32, u32) = if digits.len() == 3 {
            (digits[..1].parse().ok()?, digits[1..].parse().ok()?)
        } else {
            (digits[..2].parse().ok()?, digits[2..].parse().ok()?)
        };
        if hour > 23 || minute > 59 {
            return None;
        }
        let (today, current_time) = localize(now, tz);
        let candidate_time = NaiveTime::from_hms_opt(hour, minute, 0)?;
        let date = if candidate_time <= current_time {
            today + Duration::days(1)
        } else {
            today
        };
        return to_utc(tz, date, candidate_time);
    }

    None
}

fn apply_ampm(hour: &mut u32, token: &str) {
    let is_pm = token.eq_ignore_ascii_case("pm");
    *hour %= 12;
    if is_pm {
        *hour += 12;
    }
}

fn parse_weekday_prefix(token: &str) -> Option<Weekday> {
    // token looks like "next monday" / "next tues" / "next wed" ...
    let day = token.strip_prefix("next")?.trim();
    let day = day.get(..3)?;
    match day {
        "mon" => Some(Weekday::Mon),
        "tue" => Some(Weekday::Tue),
        "wed" => Some(Weekday::Wed),
        "thu" => Some(Weekday::Thu),
        "fri" => Some(Weekday::Fri),
        "sat" => Some(Weekday::Sat),
        "sun" => Some(Weekday::Sun),
        _ => None,
    }
}

fn next_weekday_on_or_after(start: NaiveDate, weekday: Weekday) -> NaiveDate {
    let mut d = start;
    for _ in 0..7 {
        if d.weekday() == weekday {
            return d;
        }
        d += Duration::days(1);
    }
    start
}

fn localize(now: DateTime<Utc>, tz: Option<chrono_tz::Tz>) -> (NaiveDate, NaiveTime) {
    match tz {
        Some(z) => {
            let local = now.with_timezone(&z);
            (local.date_naive(), local.time())
        }
        None => (now.date_naive(), now.time()),
    }
}

fn to_utc(tz: Option<chrono_tz::Tz>, date: NaiveDate, time: NaiveTime) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::new(date, time);
    match tz {
        Some(z) => z.from_local_datetime(&naive).single().map(|dt| dt.with_timezone(&Utc)),
        None => Utc.from_local_datetime(&naive).single(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn relative_minutes() {
        let now = Utc.with_ymd_and_hms(2026, 7, 28, 10, 0, 0).unwrap();
        let parsed = parse_time_expression("in 30 minutes", now, None).unwrap();
        assert_eq!(parsed, now + Duration::minutes(30));
    }

    #[test]
    fn named_day_tomorrow_am() {
        let now = Utc.with_ymd_and_hms(2026, 7, 28, 10, 0, 0).unwrap();
        let parsed = parse_time_expression("tomorrow at 9am", now, None).unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2026, 7, 29, 9, 0, 0).unwrap());
    }

    #[test]
    fn dotted_time_tonight_rolls_if_passed() {
        let now = Utc.with_ymd_and_hms(2026, 7, 28, 23, 30, 0).unwrap();
        let parsed = parse_time_expression("11.22pm tonight", now, None).unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2026, 7, 29, 23, 22, 0).unwrap());
    }

    #[test]
    fn dotted_time_tonight_same_day_if_not_passed() {
        let now = Utc.with_ymd_and_hms(2026, 7, 28, 10, 0, 0).unwrap();
        let parsed = parse_time_expression("11.22pm tonight", now, None).unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2026, 7, 28, 23, 22, 0).unwrap());
    }

    #[test]
    fn military_time_rolls_forward_when_passed() {
        let now = Utc.with_ymd_and_hms(2026, 7, 28, 12, 0, 0).unwrap();
        let parsed = parse_time_expression("1130hr", now, None).unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2026, 7, 29, 11, 30, 0).unwrap());
    }

    #[test]
    fn next_weekday_skips_ahead_a_full_week() {
        // 2026-07-28 is a Tuesday.
        let now = Utc.with_ymd_and_hms(2026, 7, 28, 10, 0, 0).unwrap();
        let parsed = parse_time_expression("next tuesday at 10am", now, None).unwrap();
        assert_eq!(parsed.date_naive(), NaiveDate::from_ymd_opt(2026, 8, 4).unwrap());
    }

    #[test]
    fn iso_passthrough() {
        let now = Utc.with_ymd_and_hms(2026, 7, 28, 10, 0, 0).unwrap();
        let parsed = parse_time_expression("2026-08-01T12:00:00Z", now, None).unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap());
    }

    #[test]
    fn unrecognized_expression_returns_none() {
        let now = Utc::now();
        assert!(parse_time_expression("sometime next year", now, None).is_none());
    }
}
