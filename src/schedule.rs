//! Schedule validation and translation.
//!
//! Callers submit plain 5-field crontab expressions. The external tool
//! wants a Quartz-style 7-field line where exactly one of day-of-month and
//! day-of-week is the `?` placeholder, prefixed with a seconds field and
//! suffixed with a year field.

use std::sync::LazyLock;

use rand::Rng;
use regex::Regex;

use crate::error::{Result, SchedulerError};

/// Upper bound (exclusive) for the random seconds field. Spreading job
/// starts over the first seconds of the minute keeps the backend from
/// launching every job of a minute at once.
pub const JITTER_MAX_SECONDS: u32 = 10;

const MONTH_NAMES: &str = "JAN|FEB|MAR|APR|MAI|JUN|JUL|AUG|SEP|OCT|NOV|DEC";
const WEEKDAY_NAMES: &str = "SUN|MON|TUE|WED|THU|FRI|SAT";

/// Builds the pattern for one schedule field: a comma list of terms, each
/// either `*` or a value/range, optionally followed by a step suffix.
fn field_pattern(term: &str) -> String {
    let basic = format!(r"(\*|(({term})(-({term}))?))(/(0[1-9]|[1-9]\d?))?");
    format!(r"^({basic})(,({basic}))*$")
}

static FIELD_PATTERNS: LazyLock<[Regex; 5]> = LazyLock::new(|| {
    let minute = r"[0-5]?\d";
    let hour = r"[0-1]?\d|2[0-3]";
    let day_of_month = format!(r"[LW]|\?|0?[1-9]|[1-2]\d|3[0-1]|{WEEKDAY_NAMES}");
    let month = format!(r"0?[1-9]|1[0-2]|{MONTH_NAMES}");
    let day_of_week = format!(r"[LW]|\?|[1-7](#[1-7])?|{WEEKDAY_NAMES}");
    [
        compile_field(minute),
        compile_field(hour),
        compile_field(&day_of_month),
        compile_field(&month),
        compile_field(&day_of_week),
    ]
});

fn compile_field(term: &str) -> Regex {
    Regex::new(&format!("(?i){}", field_pattern(term))).expect("invalid schedule field pattern")
}

const FIELD_NAMES: [&str; 5] = ["minute", "hour", "day-of-month", "month", "day-of-week"];

/// Check that `schedule` is a well-formed 5-field expression.
pub fn validate(schedule: &str) -> Result<()> {
    let fields: Vec<&str> = schedule.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(SchedulerError::ArgsMalformed(format!(
            "schedule '{schedule}' must have 5 fields, got {}",
            fields.len()
        )));
    }
    for ((field, pattern), name) in fields.iter().zip(FIELD_PATTERNS.iter()).zip(FIELD_NAMES) {
        if !pattern.is_match(field) {
            return Err(SchedulerError::ArgsMalformed(format!(
                "invalid {name} field '{field}' in schedule '{schedule}'"
            )));
        }
    }
    Ok(())
}

/// Translate a 5-field crontab expression into the backend's native format,
/// using thread-local randomness for the seconds jitter.
pub fn translate(schedule: &str) -> Result<String> {
    translate_with(schedule, &mut rand::thread_rng())
}

/// Translate with an injected randomness source, for deterministic tests.
///
/// The backend requires exactly one of day-of-month/day-of-week to be the
/// `?` placeholder, so `* ... *` pairs and concrete-weekday expressions are
/// rewritten before the jitter and year fields are added.
pub fn translate_with<R: Rng>(schedule: &str, rng: &mut R) -> Result<String> {
    validate(schedule)?;
    let fields: Vec<&str> = schedule.split_whitespace().collect();
    let (minute, hour, mut day_of_month, month, mut day_of_week) =
        (fields[0], fields[1], fields[2], fields[3], fields[4]);

    if day_of_month == "*" && day_of_week == "*" {
        day_of_week = "?";
    } else if day_of_week != "*" && day_of_week != "?" && day_of_month == "*" {
        day_of_month = "?";
    }

    let seconds = rng.gen_range(0..JITTER_MAX_SECONDS);
    Ok(format!(
        "{seconds} {minute} {hour} {day_of_month} {month} {day_of_week} *"
    ))
}

/// Append the domain to a bare hostname; pass full names through.
pub fn fqdnify(hostname: &str, domain: &str) -> String {
    if hostname.ends_with(&format!(".{domain}")) {
        hostname.to_string()
    } else {
        format!("{hostname}.{domain}")
    }
}

static JOB_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9-]+$").expect("invalid job id pattern"));

static TARGET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\w.-]+$").expect("invalid target pattern"));

/// Check a caller-supplied job identifier.
pub fn validate_job_id(job_id: &str) -> Result<()> {
    if JOB_ID_RE.is_match(job_id) {
        Ok(())
    } else {
        Err(SchedulerError::ArgsMalformed(format!(
            "invalid job id '{job_id}'"
        )))
    }
}

/// Check a target hostname before it reaches a command line.
pub fn validate_target(target: &str) -> Result<()> {
    if TARGET_RE.is_match(target) {
        Ok(())
    } else {
        Err(SchedulerError::ArgsMalformed(format!(
            "invalid target host '{target}'"
        )))
    }
}
