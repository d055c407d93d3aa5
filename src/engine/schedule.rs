use chrono::{
    DateTime, Datelike, Days, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, TimeZone, Utc,
    Weekday,
};
use chrono_tz::Tz;

use crate::domain::ScheduledSlot;

/// `start_at` local time on the first weekday after today.
///
/// Never books the current day, even on a weekday morning, so invitees always
/// get at least a day's notice. Saturday and Sunday are skipped. No holiday
/// calendar.
pub fn next_business_slot(
    now: DateTime<Utc>,
    tz: Tz,
    start_at: NaiveTime,
    duration_minutes: u32,
) -> ScheduledSlot {
    let today = now.with_timezone(&tz).date_naive();
    let date = skip_weekend(today + Days::new(1));

    let start = resolve_local(tz, date.and_time(start_at));
    let end = start + TimeDelta::minutes(i64::from(duration_minutes));
    ScheduledSlot { start, end }
}

fn skip_weekend(date: NaiveDate) -> NaiveDate {
    match date.weekday() {
        Weekday::Sat => date + Days::new(2),
        Weekday::Sun => date + Days::new(1),
        _ => date,
    }
}

// A wall-clock time inside a DST gap does not exist; push it past the gap.
fn resolve_local(tz: Tz, naive: NaiveDateTime) -> DateTime<Tz> {
    if let Some(dt) = tz.from_local_datetime(&naive).earliest() {
        return dt;
    }
    let shifted = naive + TimeDelta::hours(1);
    tz.from_local_datetime(&shifted)
        .earliest()
        .unwrap_or_else(|| tz.from_utc_datetime(&naive))
}

#[cfg(test)]
mod tests {
    use chrono::Timelike;

    use super::*;

    fn hour(h: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, 0, 0).unwrap()
    }

    fn local(tz: Tz, y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        tz.with_ymd_and_hms(y, m, d, h, min, 0)
            .single()
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn friday_afternoon_rolls_to_monday() {
        // 2025-01-10 is a Friday.
        let now = local(chrono_tz::UTC, 2025, 1, 10, 15, 0);
        let slot = next_business_slot(now, chrono_tz::UTC, hour(14), 60);
        assert_eq!(slot.start.weekday(), Weekday::Mon);
        assert_eq!(slot.start.date_naive(), NaiveDate::from_ymd_opt(2025, 1, 13).unwrap());
        assert_eq!(slot.start.hour(), 14);
        assert_eq!(slot.end - slot.start, TimeDelta::minutes(60));
        assert_eq!(slot.timezone(), "UTC");
    }

    #[test]
    fn weekday_morning_still_books_the_next_day() {
        // Monday 13:55, five minutes before the business hour.
        let now = local(chrono_tz::UTC, 2025, 1, 13, 13, 55);
        let slot = next_business_slot(now, chrono_tz::UTC, hour(14), 30);
        assert_eq!(slot.start.date_naive(), NaiveDate::from_ymd_opt(2025, 1, 14).unwrap());
        assert_eq!(slot.start.hour(), 14);
        assert_eq!(slot.end.hour(), 14);
        assert_eq!(slot.end.minute(), 30);
    }

    #[test]
    fn exactly_at_the_hour_moves_to_the_next_day() {
        let now = local(chrono_tz::UTC, 2025, 1, 13, 14, 0);
        let slot = next_business_slot(now, chrono_tz::UTC, hour(14), 60);
        assert_eq!(slot.start.date_naive(), NaiveDate::from_ymd_opt(2025, 1, 14).unwrap());
    }

    #[test]
    fn weekend_mornings_land_on_monday() {
        let saturday = local(chrono_tz::UTC, 2025, 1, 11, 10, 0);
        let sunday = local(chrono_tz::UTC, 2025, 1, 12, 20, 0);
        for now in [saturday, sunday] {
            let slot = next_business_slot(now, chrono_tz::UTC, hour(14), 60);
            assert_eq!(slot.start.date_naive(), NaiveDate::from_ymd_opt(2025, 1, 13).unwrap());
        }
    }

    #[test]
    fn business_day_is_judged_in_the_meeting_timezone() {
        // Friday 23:30 UTC is already Saturday morning in Seoul.
        let now = local(chrono_tz::UTC, 2025, 1, 10, 23, 30);
        let slot = next_business_slot(now, chrono_tz::Asia::Seoul, hour(14), 60);
        assert_eq!(slot.start.date_naive(), NaiveDate::from_ymd_opt(2025, 1, 13).unwrap());
        assert_eq!(slot.start.hour(), 14);
        assert_eq!(slot.start.with_timezone(&Utc).hour(), 5);
        assert_eq!(slot.timezone(), "Asia/Seoul");
    }

    #[test]
    fn local_hour_survives_a_dst_change() {
        // US clocks spring forward on Sunday 2025-03-09.
        let tz = chrono_tz::America::New_York;
        let now = local(tz, 2025, 3, 7, 15, 0);
        let slot = next_business_slot(now, tz, hour(14), 60);
        assert_eq!(slot.start.date_naive(), NaiveDate::from_ymd_opt(2025, 3, 10).unwrap());
        assert_eq!(slot.start.hour(), 14);
        assert_eq!(slot.start.with_timezone(&Utc).hour(), 18);
    }

    #[test]
    fn is_deterministic_for_a_fixed_now() {
        let now = local(chrono_tz::UTC, 2025, 1, 15, 11, 0);
        let a = next_business_slot(now, chrono_tz::UTC, hour(14), 45);
        let b = next_business_slot(now, chrono_tz::UTC, hour(14), 45);
        assert_eq!(a, b);
    }
}
