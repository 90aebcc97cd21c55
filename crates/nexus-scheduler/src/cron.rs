//! Cron expression parsing and next-fire computation (§4.7, §6.4, SPEC_FULL §2.6).
//!
//! The teacher's `schedule.rs` stubs `Schedule::Cron` out entirely. This
//! module replaces the stub: standard 5-field cron, the named shortcuts
//! `@hourly|@daily|@weekly|@monthly` and their bare `hourly|daily|weekly|
//! monthly` spellings, the natural phrase `daily at HH[:MM][am|pm]`, and
//! `next <weekday>[ at HH[:MM][am|pm]]`. Anything else degrades to "daily
//! at 09:00" with a warning rather than refusing to schedule the job.

use std::collections::HashSet;

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc, Weekday};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

/// Upper bound on minute-by-minute search before giving up and falling
/// back to the default. Four years of minutes easily covers `29 2 *`
/// (leap-day-only) schedules.
const MAX_SEARCH_MINUTES: i64 = 4 * 366 * 24 * 60;

static DAILY_AT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^daily at (\d{1,2})(?::(\d{2}))?\s*(am|pm)?$").expect("valid regex")
});

static NEXT_WEEKDAY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^next (sun|mon|tue|wed|thu|fri|sat)[a-z]*(?:\s+at\s+(\d{1,2})(?::(\d{2}))?\s*(am|pm)?)?$")
        .expect("valid regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
struct CronFields {
    minutes: HashSet<u32>,
    hours: HashSet<u32>,
    days_of_month: HashSet<u32>,
    months: HashSet<u32>,
    days_of_week: HashSet<u32>,
}

/// Compute the next fire time strictly after `from`. Always returns a
/// value — unparseable expressions degrade to "daily at 09:00" per §4.7.
pub fn compute_next_run(expression: &str, from: DateTime<Utc>) -> DateTime<Utc> {
    let expr = expression.trim();

    if let Some(fields) = parse_shortcut(expr) {
        return next_matching(&fields, from);
    }
    if let Some(caps) = DAILY_AT_RE.captures(expr) {
        if let Some(dt) = daily_at_from_captures(&caps, from) {
            return dt;
        }
    }
    if let Some(caps) = NEXT_WEEKDAY_RE.captures(expr) {
        if let Some(dt) = next_weekday_from_captures(&caps, from) {
            return dt;
        }
    }
    match parse_fields(expr) {
        Some(fields) => next_matching(&fields, from),
        None => {
            warn!(expression = expr, "unrecognized cron expression; degrading to daily at 09:00");
            next_daily_at(9, 0, from)
        }
    }
}

fn parse_shortcut(expr: &str) -> Option<CronFields> {
    let canonical = match expr.to_ascii_lowercase().as_str() {
        "@hourly" | "hourly" => "0 * * * *",
        "@daily" | "daily" => "0 0 * * *",
        "@weekly" | "weekly" => "0 0 * * 0",
        "@monthly" | "monthly" => "0 0 1 * *",
        _ => return None,
    };
    parse_fields(canonical)
}

/// `next <weekday>[ at HH[:MM][am|pm]]` — the nearest future occurrence of
/// that weekday, defaulting to 09:00 when no time is given (§6.4).
fn next_weekday_from_captures(caps: &regex::Captures, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let target = match caps.get(1)?.as_str().to_ascii_lowercase().as_str() {
        "sun" => Weekday::Sun,
        "mon" => Weekday::Mon,
        "tue" => Weekday::Tue,
        "wed" => Weekday::Wed,
        "thu" => Weekday::Thu,
        "fri" => Weekday::Fri,
        "sat" => Weekday::Sat,
        _ => return None,
    };

    let mut hour: u32 = 9;
    let mut minute: u32 = 0;
    if let Some(h) = caps.get(2) {
        hour = h.as_str().parse().ok()?;
        minute = caps
            .get(3)
            .map(|m| m.as_str().parse().unwrap_or(0))
            .unwrap_or(0);
        if let Some(ampm) = caps.get(4) {
            let is_pm = ampm.as_str().eq_ignore_ascii_case("pm");
            hour %= 12;
            if is_pm {
                hour += 12;
            }
        }
    }
    if hour > 23 || minute > 59 {
        return None;
    }

    let from_dow = from.weekday().num_days_from_sunday();
    let target_dow = target.num_days_from_sunday();
    let mut days_ahead = (target_dow as i64 - from_dow as i64).rem_euclid(7);
    if days_ahead == 0 {
        days_ahead = 7; // "next <today>" always means next week, not today.
    }
    let candidate_day = from + Duration::days(days_ahead);
    Utc.with_ymd_and_hms(
        candidate_day.year(),
        candidate_day.month(),
        candidate_day.day(),
        hour,
        minute,
        0,
    )
    .single()
}

fn daily_at_from_captures(caps: &regex::Captures, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let mut hour: u32 = caps.get(1)?.as_str().parse().ok()?;
    let minute: u32 = caps
        .get(2)
        .map(|m| m.as_str().parse().unwrap_or(0))
        .unwrap_or(0);
    if let Some(ampm) = caps.get(3) {
        let is_pm = ampm.as_str().eq_ignore_ascii_case("pm");
        hour %= 12;
        if is_pm {
            hour += 12;
        }
    }
    if hour > 23 || minute > 59 {
        return None;
    }
    Some(next_daily_at(hour, minute, from))
}

fn next_daily_at(hour: u32, minute: u32, from: DateTime<Utc>) -> DateTime<Utc> {
    let candidate = Utc
        .with_ymd_and_hms(from.year(), from.month(), from.day(), hour, minute, 0)
        .single()
        .unwrap_or(from);
    if candidate > from {
        candidate
    } else {
        candidate + Duration::days(1)
    }
}

/// Parse a standard 5-field `minute hour dom month dow` expression.
/// Each field accepts `*`, a number, a comma list, a range `a-b`, and a
/// step `*/n` or `a-b/n`. `dow` additionally treats `7` as Sunday (`0`).
fn parse_fields(expr: &str) -> Option<CronFields> {
    let parts: Vec<&str> = expr.split_whitespace().collect();
    if parts.len() != 5 {
        return None;
    }
    let minutes = parse_field(parts[0], 0, 59)?;
    let hours = parse_field(parts[1], 0, 23)?;
    let days_of_month = parse_field(parts[2], 1, 31)?;
    let months = parse_field(parts[3], 1, 12)?;
    let mut days_of_week = parse_field(parts[4], 0, 7)?;
    if days_of_week.remove(&7) {
        days_of_week.insert(0);
    }
    Some(CronFields {
        minutes,
        hours,
        days_of_month,
        months,
        days_of_week,
    })
}

fn parse_field(spec: &str, min: u32, max: u32) -> Option<HashSet<u32>> {
    let mut out = HashSet::new();
    for part in spec.split(',') {
        let (range_part, step) = match part.split_once('/') {
            Some((r, s)) => (r, Some(s.parse::<u32>().ok()?)),
            None => (part, None),
        };
        let (lo, hi) = if range_part == "*" {
            (min, max)
        } else if let Some((a, b)) = range_part.split_once('-') {
            (a.parse::<u32>().ok()?, b.parse::<u32>().ok()?)
        } else {
            let v = range_part.parse::<u32>().ok()?;
            (v, v)
        };
        if lo > hi || hi > max || lo < min {
            return None;
        }
        let step = step.unwrap_or(1).max(1);
        let mut v = lo;
        while v <= hi {
            out.insert(v);
            v += step;
        }
    }
    if out.is_empty() {
        return None;
    }
    Some(out)
}

fn next_matching(fields: &CronFields, from: DateTime<Utc>) -> DateTime<Utc> {
    // Start searching at the next whole minute.
    let mut candidate = (from + Duration::minutes(1))
        .with_second(0)
        .and_then(|d| d.with_nanosecond(0))
        .unwrap_or(from + Duration::minutes(1));

    for _ in 0..MAX_SEARCH_MINUTES {
        let dow = candidate.weekday().num_days_from_sunday();
        if fields.minutes.contains(&candidate.minute())
            && fields.hours.contains(&candidate.hour())
            && fields.days_of_month.contains(&candidate.day())
            && fields.months.contains(&candidate.month())
            && fields.days_of_week.contains(&dow)
        {
            return candidate;
        }
        candidate += Duration::minutes(1);
    }

    // Exhausted the search window (e.g. a self-contradictory expression);
    // degrade the same way an unparseable expression would.
    warn!("cron expression matched no instant within the search window; falling back");
    next_daily_at(9, 0, from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn hourly_shortcut_fires_on_the_hour() {
        let from = Utc.with_ymd_and_hms(2026, 7, 28, 14, 15, 0).unwrap();
        let next = compute_next_run("@hourly", from);
        assert_eq!((next.hour(), next.minute()), (15, 0));
    }

    #[test]
    fn daily_at_phrase_with_pm_rolls_to_correct_hour() {
        let from = Utc.with_ymd_and_hms(2026, 7, 28, 10, 0, 0).unwrap();
        let next = compute_next_run("daily at 9:30pm", from);
        assert_eq!((next.hour(), next.minute()), (21, 30));
        assert_eq!(next.day(), 28);
    }

    #[test]
    fn daily_at_phrase_rolls_forward_when_passed() {
        let from = Utc.with_ymd_and_hms(2026, 7, 28, 22, 0, 0).unwrap();
        let next = compute_next_run("daily at 9:30pm", from);
        assert_eq!(next.day(), 29);
    }

    #[test]
    fn five_field_step_expression() {
        let from = Utc.with_ymd_and_hms(2026, 7, 28, 0, 1, 0).unwrap();
        let next = compute_next_run("*/15 * * * *", from);
        assert_eq!(next.minute(), 15);
    }

    #[test]
    fn weekday_field_matches_sunday_as_zero_or_seven() {
        // 2026-08-02 is a Sunday.
        let from = Utc.with_ymd_and_hms(2026, 7, 28, 0, 0, 0).unwrap();
        let next_zero = compute_next_run("0 9 * * 0", from);
        let next_seven = compute_next_run("0 9 * * 7", from);
        assert_eq!(next_zero, next_seven);
        assert_eq!(next_zero.weekday(), chrono::Weekday::Sun);
    }

    #[test]
    fn bare_shortcut_matches_at_form() {
        let from = Utc.with_ymd_and_hms(2026, 7, 28, 14, 15, 0).unwrap();
        assert_eq!(compute_next_run("hourly", from), compute_next_run("@hourly", from));
    }

    #[test]
    fn next_weekday_rolls_to_following_week_when_today() {
        // 2026-07-28 is a Tuesday.
        let from = Utc.with_ymd_and_hms(2026, 7, 28, 10, 0, 0).unwrap();
        let next = compute_next_run("next tuesday", from);
        assert_eq!(next.weekday(), chrono::Weekday::Tue);
        assert_eq!((next.hour(), next.minute()), (9, 0));
        assert!(next > from + Duration::days(6));
    }

    #[test]
    fn next_weekday_with_explicit_time() {
        let from = Utc.with_ymd_and_hms(2026, 7, 28, 10, 0, 0).unwrap();
        let next = compute_next_run("next friday at 5:30pm", from);
        assert_eq!(next.weekday(), chrono::Weekday::Fri);
        assert_eq!((next.hour(), next.minute()), (17, 30));
    }

    #[test]
    fn unparseable_expression_degrades_to_nine_am_daily() {
        let from = Utc.with_ymd_and_hms(2026, 7, 28, 0, 0, 0).unwrap();
        let next = compute_next_run("whenever works", from);
        assert_eq!((next.hour(), next.minute()), (9, 0));
    }
}
