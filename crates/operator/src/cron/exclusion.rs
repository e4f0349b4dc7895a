use chrono::{DateTime, TimeZone};
use tracing::warn;

use super::Schedule;

/// Returns the first exclusion expression whose next occurrence after `now`
/// still falls on `now`'s calendar day, if any. Entries that fail to parse
/// are skipped.
pub fn excluded_by<Tz: TimeZone>(dates: &[String], now: &DateTime<Tz>) -> Option<String> {
    let day = now.date_naive();

    for expr in dates {
        let schedule = match Schedule::parse(expr) {
            Ok(schedule) => schedule,
            Err(e) => {
                warn!("Ignoring malformed exclude date {}: {}", expr, e);
                continue;
            }
        };

        if let Some(next) = schedule.next_after(now) {
            if next.date_naive() == day {
                return Some(expr.clone());
            }
        }
    }
    None
}
