//! Due-time computation for every schedule kind.

use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};

use crate::{CronError, CronJob, Result, RunStatus, Schedule};

/// Longest accepted interval or idle timeout (100 years).
pub const MAX_PERIOD_MS: i64 = 100 * 365 * 24 * 60 * 60 * 1000;

/// Reject schedules that can never produce a due time.
pub fn validate_schedule(schedule: &Schedule) -> Result<()> {
    match schedule {
        Schedule::At { at_ms } if *at_ms < 0 => {
            Err(CronError::InvalidJob(format!("at: invalid timestamp {at_ms}")))
        }
        Schedule::Every { every_ms, .. } if !(1..=MAX_PERIOD_MS).contains(every_ms) => {
            Err(CronError::InvalidJob(format!(
                "every: interval must be between 1 and {MAX_PERIOD_MS} ms, got {every_ms}"
            )))
        }
        Schedule::Every {
            anchor_ms: Some(anchor_ms),
            ..
        } if *anchor_ms < 0 => Err(CronError::InvalidJob(format!(
            "every: invalid anchor {anchor_ms}"
        ))),
        Schedule::Idle { timeout_ms, .. } if !(1..=MAX_PERIOD_MS).contains(timeout_ms) => {
            Err(CronError::InvalidJob(format!(
                "idle: timeout must be between 1 and {MAX_PERIOD_MS} ms, got {timeout_ms}"
            )))
        }
        Schedule::Cron { expr } => parse_cron(expr).map(|_| ()),
        _ => Ok(()),
    }
}

/// Whether `job` should run at `now_ms`.
pub fn is_job_due(job: &CronJob, now_ms: i64, forced: bool) -> bool {
    if forced {
        return true;
    }
    job.enabled && job.state.next_run_at_ms.is_some_and(|next| next <= now_ms)
}

/// Fresh next due time for `job` as of `now_ms`.
///
/// Idle schedules restart their countdown from `now_ms`; fixed schedules
/// return their next occurrence. `None` means nothing is pending.
pub fn compute_next_run_at_ms(job: &CronJob, now_ms: i64) -> Option<i64> {
    match &job.schedule {
        Schedule::At { at_ms } => {
            let already_ran = job.state.last_status == Some(RunStatus::Ok)
                && job.state.last_run_at_ms.is_some_and(|last| last >= *at_ms);
            (!already_ran).then_some(*at_ms)
        }
        Schedule::Every {
            every_ms,
            anchor_ms,
        } => next_interval_tick(*every_ms, anchor_ms.unwrap_or(now_ms), now_ms),
        Schedule::Cron { expr } => match next_cron_occurrence(expr, now_ms) {
            Ok(next) => next,
            Err(e) => {
                tracing::warn!(job_id = %job.id, "cron: cannot compute next run: {e}");
                None
            }
        },
        Schedule::Idle { timeout_ms, .. } => Some(now_ms.saturating_add(*timeout_ms)),
    }
}

/// First `anchor + k * every` strictly after `now`; the anchor itself while
/// it is still in the future. `None` when the tick is not representable.
fn next_interval_tick(every_ms: i64, anchor_ms: i64, now_ms: i64) -> Option<i64> {
    let every_ms = every_ms.max(1);
    let anchor_ms = anchor_ms.max(0);
    if now_ms < anchor_ms {
        return Some(anchor_ms);
    }
    let steps = (now_ms - anchor_ms) / every_ms + 1;
    steps
        .checked_mul(every_ms)
        .and_then(|offset| anchor_ms.checked_add(offset))
}

fn next_cron_occurrence(expr: &str, now_ms: i64) -> Result<Option<i64>> {
    let schedule = parse_cron(expr)?;
    let from: DateTime<Utc> = Utc
        .timestamp_millis_opt(now_ms)
        .single()
        .ok_or_else(|| CronError::InvalidJob(format!("timestamp out of range: {now_ms}")))?;
    Ok(schedule.after(&from).next().map(|dt| dt.timestamp_millis()))
}

/// Parse a cron expression. Five fields are read as classic crontab and get a
/// leading seconds field; six or seven (seconds, optional year) are passed to
/// the `cron` crate as written.
fn parse_cron(expr: &str) -> Result<cron::Schedule> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    let with_seconds = match fields.len() {
        5 => format!("0 {}", fields.join(" ")),
        6 | 7 => fields.join(" "),
        n => {
            return Err(CronError::InvalidJob(format!(
                "cron: {expr:?} has {n} fields; use 5 (crontab) or 6-7 (with seconds)"
            )));
        }
    };
    cron::Schedule::from_str(&with_seconds)
        .map_err(|e| CronError::InvalidJob(format!("cron: cannot parse {expr:?}: {e}")))
}
