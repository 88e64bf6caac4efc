// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

use crate::route_alias::{RouteId, compare_route_ids};
use crate::spans::ExpectedCoverage;
use crate::state::MissingState;
use ahash::AHashMap;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteCoverageRow {
    pub route_id: RouteId,
    pub expected: u32,
    pub tracking: u32,
    pub missing: u32,
    /// Epoch second at which this route first became under-covered.
    pub missing_since: Option<u64>,
}

impl RouteCoverageRow {
    pub fn missing_minutes(&self, now_epoch: u64) -> Option<u64> {
        self.missing_since
            .map(|since| now_epoch.saturating_sub(since) / 60)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CoverageReport {
    pub rows: Vec<RouteCoverageRow>,
    pub total_expected: u32,
    pub total_tracking: u32,
    pub total_missing: u32,
    pub checked_at: u64,
}

pub struct ReconcileOutcome {
    pub report: CoverageReport,
    pub next_state: MissingState,
    pub should_alert: bool,
}

/// Compare expected coverage against live tracking counts and roll the
/// missing-duration state forward.
///
/// Every under-covered route keeps (or gains) a `first_missing_at` entry;
/// every fully covered route loses its entry immediately. The alert gate
/// only opens when at least one route has been under-covered for the whole
/// `alert_after_secs` window, but an alerting report still lists every
/// route currently short, including ones below the threshold.
pub fn reconcile_coverage(
    expected: &ExpectedCoverage,
    tracking_by_route: &AHashMap<RouteId, u32>,
    total_tracking: u32,
    prev_state: &MissingState,
    now_epoch: u64,
    alert_after_secs: u64,
) -> ReconcileOutcome {
    let mut next_state = MissingState::default();
    let mut rows = Vec::new();
    let mut total_missing = 0u32;
    let mut should_alert = false;

    let all_routes = expected
        .by_route
        .keys()
        .chain(tracking_by_route.keys())
        .unique()
        .sorted_by(|a, b| compare_route_ids(a, b));

    for route_id in all_routes {
        let expected_count = expected.by_route.get(route_id).copied().unwrap_or(0);
        let tracking_count = tracking_by_route.get(route_id).copied().unwrap_or(0);
        let missing = expected_count.saturating_sub(tracking_count);
        total_missing += missing;

        let mut missing_since = None;
        if missing > 0 {
            let first_seen = prev_state
                .first_missing_at
                .get(route_id)
                .copied()
                .unwrap_or(now_epoch);
            next_state
                .first_missing_at
                .insert(route_id.clone(), first_seen);
            missing_since = Some(first_seen);

            if now_epoch.saturating_sub(first_seen) >= alert_after_secs {
                should_alert = true;
            }
        }

        // Routes with live vehicles but nothing scheduled stay out of the
        // report rows; they still count toward the tracking total.
        if expected_count > 0 {
            rows.push(RouteCoverageRow {
                route_id: route_id.clone(),
                expected: expected_count,
                tracking: tracking_count,
                missing,
                missing_since,
            });
        }
    }

    ReconcileOutcome {
        report: CoverageReport {
            rows,
            total_expected: expected.total,
            total_tracking,
            total_missing,
            checked_at: now_epoch,
        },
        next_state,
        should_alert,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route_alias::normalize_route_id;

    fn route(raw: &str) -> RouteId {
        normalize_route_id(raw).unwrap()
    }

    fn coverage(entries: &[(&str, u32)]) -> ExpectedCoverage {
        let mut expected = ExpectedCoverage::default();
        for (raw, count) in entries {
            expected.by_route.insert(route(raw), *count);
            expected.total += count;
        }
        expected
    }

    fn tracking(entries: &[(&str, u32)]) -> AHashMap<RouteId, u32> {
        entries
            .iter()
            .map(|(raw, count)| (route(raw), *count))
            .collect()
    }

    #[test]
    fn sustained_shortfall_past_threshold_alerts() {
        let now = 100_000u64;
        let mut prev = MissingState::default();
        prev.first_missing_at.insert(route("2"), now - 25 * 60);

        let outcome = reconcile_coverage(
            &coverage(&[("2", 2)]),
            &tracking(&[]),
            0,
            &prev,
            now,
            20 * 60,
        );

        assert!(outcome.should_alert);
        assert_eq!(outcome.report.total_missing, 2);

        let row = &outcome.report.rows[0];
        assert_eq!(row.route_id, route("2"));
        assert_eq!(row.missing, 2);
        assert!(row.missing_minutes(now).unwrap() >= 25);
    }

    #[test]
    fn fresh_shortfall_records_state_but_stays_quiet() {
        let now = 100_000u64;

        // expected keys arrive pre-normalized from the span builder, so a
        // "7B" schedule and a "7" live report land on the same route
        let outcome = reconcile_coverage(
            &coverage(&[("7B", 2)]),
            &tracking(&[("7", 1)]),
            1,
            &MissingState::default(),
            now,
            20 * 60,
        );

        assert!(!outcome.should_alert);
        assert_eq!(
            outcome.next_state.first_missing_at.get(&route("7")).copied(),
            Some(now)
        );
        assert_eq!(outcome.report.total_missing, 1);
    }

    #[test]
    fn existing_first_seen_is_preserved_while_still_missing() {
        let now = 100_000u64;
        let first_seen = now - 3 * 60;
        let mut prev = MissingState::default();
        prev.first_missing_at.insert(route("7"), first_seen);

        let outcome = reconcile_coverage(
            &coverage(&[("7", 2)]),
            &tracking(&[("7", 1)]),
            1,
            &prev,
            now,
            20 * 60,
        );

        assert!(!outcome.should_alert);
        assert_eq!(
            outcome.next_state.first_missing_at.get(&route("7")).copied(),
            Some(first_seen)
        );
    }

    #[test]
    fn recovered_route_is_dropped_from_state_immediately() {
        let now = 100_000u64;
        let mut prev = MissingState::default();
        prev.first_missing_at.insert(route("2"), now - 40 * 60);

        let outcome = reconcile_coverage(
            &coverage(&[("2", 2)]),
            &tracking(&[("2", 2)]),
            2,
            &prev,
            now,
            20 * 60,
        );

        assert!(!outcome.should_alert);
        assert!(outcome.next_state.is_empty());
        assert_eq!(outcome.report.total_missing, 0);
    }

    #[test]
    fn alert_threshold_boundary_is_inclusive() {
        let now = 100_000u64;
        let mut prev = MissingState::default();
        prev.first_missing_at.insert(route("2"), now - 20 * 60);

        let outcome = reconcile_coverage(
            &coverage(&[("2", 1)]),
            &tracking(&[]),
            0,
            &prev,
            now,
            20 * 60,
        );

        assert!(outcome.should_alert);
    }

    #[test]
    fn alerting_report_lists_routes_below_the_threshold_too() {
        let now = 100_000u64;
        let mut prev = MissingState::default();
        prev.first_missing_at.insert(route("2"), now - 30 * 60);
        prev.first_missing_at.insert(route("7"), now - 2 * 60);

        let outcome = reconcile_coverage(
            &coverage(&[("2", 1), ("7", 1), ("10", 1)]),
            &tracking(&[("10", 1)]),
            1,
            &prev,
            now,
            20 * 60,
        );

        assert!(outcome.should_alert);

        let listed: Vec<&str> = outcome
            .report
            .rows
            .iter()
            .map(|row| row.route_id.as_str())
            .collect();
        assert_eq!(listed, vec!["2", "7", "10"]);

        let short_routes: Vec<&str> = outcome
            .report
            .rows
            .iter()
            .filter(|row| row.missing > 0)
            .map(|row| row.route_id.as_str())
            .collect();
        assert_eq!(short_routes, vec!["2", "7"]);
    }

    #[test]
    fn tracking_only_routes_stay_out_of_rows_but_count_in_totals() {
        let outcome = reconcile_coverage(
            &coverage(&[("2", 1)]),
            &tracking(&[("2", 1), ("99", 1)]),
            2,
            &MissingState::default(),
            100_000,
            20 * 60,
        );

        assert_eq!(outcome.report.rows.len(), 1);
        assert_eq!(outcome.report.total_tracking, 2);
        assert!(outcome.next_state.is_empty());
    }

    #[test]
    fn empty_expectation_produces_empty_state() {
        let mut prev = MissingState::default();
        prev.first_missing_at.insert(route("2"), 50_000);

        let outcome = reconcile_coverage(
            &ExpectedCoverage::default(),
            &tracking(&[]),
            0,
            &prev,
            100_000,
            20 * 60,
        );

        assert!(!outcome.should_alert);
        assert!(outcome.next_state.is_empty());
        assert!(outcome.report.rows.is_empty());
    }
}
