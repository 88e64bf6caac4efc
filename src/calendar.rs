// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

use ahash::AHashSet;
use chrono::{Datelike, NaiveDate, Weekday};
use compact_str::CompactString;
use gtfs_structures::{Calendar, CalendarDate, Exception};
use std::collections::HashMap;

/// Resolve the set of service ids running on a calendar date.
///
/// A service is active when the date falls inside its range (inclusive on
/// both ends) and its weekday flag is set. Calendar-date exceptions are
/// applied strictly afterwards, in file order, so a removal always wins
/// over the weekly pattern for that exact date.
pub fn active_service_ids(
    calendar: &HashMap<String, Calendar>,
    calendar_dates: &HashMap<String, Vec<CalendarDate>>,
    date: NaiveDate,
) -> AHashSet<CompactString> {
    let mut active: AHashSet<CompactString> = AHashSet::new();

    for (service_id, entry) in calendar {
        if date < entry.start_date || date > entry.end_date {
            continue;
        }

        if weekday_flag(entry, date.weekday()) {
            active.insert(CompactString::from(service_id.as_str()));
        }
    }

    for (service_id, exceptions) in calendar_dates {
        for exception in exceptions {
            if exception.date != date {
                continue;
            }

            match exception.exception_type {
                Exception::Added => {
                    active.insert(CompactString::from(service_id.as_str()));
                }
                Exception::Deleted => {
                    active.remove(service_id.as_str());
                }
            }
        }
    }

    active
}

fn weekday_flag(entry: &Calendar, weekday: Weekday) -> bool {
    match weekday {
        Weekday::Mon => entry.monday,
        Weekday::Tue => entry.tuesday,
        Weekday::Wed => entry.wednesday,
        Weekday::Thu => entry.thursday,
        Weekday::Fri => entry.friday,
        Weekday::Sat => entry.saturday,
        Weekday::Sun => entry.sunday,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weekday_service(id: &str) -> Calendar {
        Calendar {
            id: id.to_string(),
            monday: true,
            tuesday: true,
            wednesday: true,
            thursday: true,
            friday: true,
            saturday: false,
            sunday: false,
            start_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2026, 12, 31).unwrap(),
        }
    }

    fn exception(service_id: &str, date: NaiveDate, exception_type: Exception) -> CalendarDate {
        CalendarDate {
            service_id: service_id.to_string(),
            date,
            exception_type,
        }
    }

    #[test]
    fn weekly_pattern_selects_matching_weekday() {
        let calendar = HashMap::from([("WKDY".to_string(), weekday_service("WKDY"))]);
        let calendar_dates = HashMap::new();

        // 2026-02-13 is a Friday, 2026-02-14 a Saturday
        let friday = NaiveDate::from_ymd_opt(2026, 2, 13).unwrap();
        let saturday = NaiveDate::from_ymd_opt(2026, 2, 14).unwrap();

        assert!(active_service_ids(&calendar, &calendar_dates, friday).contains("WKDY"));
        assert!(!active_service_ids(&calendar, &calendar_dates, saturday).contains("WKDY"));
    }

    #[test]
    fn date_range_is_inclusive() {
        let mut entry = weekday_service("WKDY");
        entry.start_date = NaiveDate::from_ymd_opt(2026, 2, 13).unwrap();
        entry.end_date = NaiveDate::from_ymd_opt(2026, 2, 13).unwrap();
        let calendar = HashMap::from([("WKDY".to_string(), entry)]);
        let calendar_dates = HashMap::new();

        let friday = NaiveDate::from_ymd_opt(2026, 2, 13).unwrap();
        let thursday = NaiveDate::from_ymd_opt(2026, 2, 12).unwrap();

        assert!(active_service_ids(&calendar, &calendar_dates, friday).contains("WKDY"));
        assert!(!active_service_ids(&calendar, &calendar_dates, thursday).contains("WKDY"));
    }

    #[test]
    fn added_exception_activates_service_outside_weekly_pattern() {
        let calendar = HashMap::from([("WKDY".to_string(), weekday_service("WKDY"))]);
        let saturday = NaiveDate::from_ymd_opt(2026, 2, 14).unwrap();
        let calendar_dates = HashMap::from([(
            "WKDY".to_string(),
            vec![exception("WKDY", saturday, Exception::Added)],
        )]);

        assert!(active_service_ids(&calendar, &calendar_dates, saturday).contains("WKDY"));
    }

    #[test]
    fn removed_exception_always_wins_over_weekly_pattern() {
        let calendar = HashMap::from([("WKDY".to_string(), weekday_service("WKDY"))]);
        let friday = NaiveDate::from_ymd_opt(2026, 2, 13).unwrap();
        let calendar_dates = HashMap::from([(
            "WKDY".to_string(),
            vec![exception("WKDY", friday, Exception::Deleted)],
        )]);

        assert!(!active_service_ids(&calendar, &calendar_dates, friday).contains("WKDY"));
    }

    #[test]
    fn exceptions_only_apply_on_their_exact_date() {
        let calendar = HashMap::from([("WKDY".to_string(), weekday_service("WKDY"))]);
        let friday = NaiveDate::from_ymd_opt(2026, 2, 13).unwrap();
        let next_friday = NaiveDate::from_ymd_opt(2026, 2, 20).unwrap();
        let calendar_dates = HashMap::from([(
            "WKDY".to_string(),
            vec![exception("WKDY", friday, Exception::Deleted)],
        )]);

        assert!(active_service_ids(&calendar, &calendar_dates, next_friday).contains("WKDY"));
    }

    #[test]
    fn exception_only_services_run_without_a_calendar_entry() {
        let calendar = HashMap::new();
        let holiday = NaiveDate::from_ymd_opt(2026, 7, 1).unwrap();
        let calendar_dates = HashMap::from([(
            "HOLIDAY".to_string(),
            vec![exception("HOLIDAY", holiday, Exception::Added)],
        )]);

        let active = active_service_ids(&calendar, &calendar_dates, holiday);
        assert!(active.contains("HOLIDAY"));
        assert_eq!(active.len(), 1);
    }
}
