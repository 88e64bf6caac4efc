// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

use crate::SECONDS_PER_DAY;
use crate::route_alias::{RouteId, normalize_route_id};
use ahash::{AHashMap, AHashSet};
use chrono::{DateTime, NaiveDate, Timelike, Utc};
use chrono_tz::Tz;
use compact_str::CompactString;
use gtfs_structures::Trip;
use itertools::Itertools;
use std::collections::HashMap;

/// Active window of one trip, in seconds since local midnight of its
/// service day. `end_secs` exceeds 86400 for trips running past midnight.
///
/// Invariant: `start_secs <= end_secs`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TripSpan {
    pub trip_id: CompactString,
    pub route_id: RouteId,
    pub block_key: CompactString,
    pub start_secs: u32,
    pub end_secs: u32,
}

/// One time window per trip on an active service, derived from the first
/// and last scheduled stop time. Trips with no parseable stop time at all
/// are dropped, malformed rows are not a hard failure.
pub fn build_trip_spans(
    trips: &HashMap<String, Trip>,
    active_services: &AHashSet<CompactString>,
) -> Vec<TripSpan> {
    let mut spans = Vec::new();

    for (trip_id, trip) in trips {
        if !active_services.contains(trip.service_id.as_str()) {
            continue;
        }

        let stop_seconds = trip
            .stop_times
            .iter()
            .map(|stop_time| stop_time.arrival_time.or(stop_time.departure_time));

        if let Some(span) = span_for_trip(
            trip_id,
            &trip.route_id,
            trip.block_id.as_deref(),
            stop_seconds,
        ) {
            spans.push(span);
        }
    }

    spans
}

pub fn span_for_trip(
    trip_id: &str,
    raw_route_id: &str,
    block_id: Option<&str>,
    stop_seconds: impl Iterator<Item = Option<u32>>,
) -> Option<TripSpan> {
    let mut bounds: Option<(u32, u32)> = None;

    for secs in stop_seconds.flatten() {
        bounds = Some(match bounds {
            None => (secs, secs),
            Some((min, max)) => (min.min(secs), max.max(secs)),
        });
    }

    let (start_secs, end_secs) = bounds?;
    let route_id = normalize_route_id(raw_route_id)?;

    // Trips without a block id can never merge with anything, so the trip
    // id itself is a fine grouping key.
    let block_key = match block_id {
        Some(block) if !block.trim().is_empty() => CompactString::from(block),
        _ => CompactString::from(format!("trip:{}", trip_id)),
    };

    Some(TripSpan {
        trip_id: CompactString::from(trip_id),
        route_id,
        block_key,
        start_secs,
        end_secs,
    })
}

/// Collapse short scheduled gaps between consecutive trips of the same
/// block on the same route, so an 11:58 arrival followed by a 12:05
/// departure reads as one continuous vehicle presence instead of a
/// seven-minute "missing bus". Spans in different groups never merge.
pub fn merge_layovers(spans: Vec<TripSpan>, grace_secs: u32) -> Vec<TripSpan> {
    if grace_secs == 0 {
        return spans;
    }

    let grouped = spans
        .into_iter()
        .map(|span| ((span.route_id.clone(), span.block_key.clone()), span))
        .into_group_map();

    let mut merged = Vec::new();

    for (_, group) in grouped {
        let mut sorted = group
            .into_iter()
            .sorted_by_key(|span| (span.start_secs, span.end_secs));

        let Some(mut current) = sorted.next() else {
            continue;
        };

        for span in sorted {
            if span.start_secs.saturating_sub(current.end_secs) <= grace_secs {
                current.end_secs = current.end_secs.max(span.end_secs);
            } else {
                merged.push(std::mem::replace(&mut current, span));
            }
        }

        merged.push(current);
    }

    merged
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExpectedCoverage {
    pub by_route: AHashMap<RouteId, u32>,
    pub total: u32,
}

/// Count spans containing `now_secs`, bounds inclusive on both ends.
pub fn expected_now(spans: &[TripSpan], now_secs: u32) -> ExpectedCoverage {
    let mut coverage = ExpectedCoverage::default();

    for span in spans {
        if now_secs >= span.start_secs && now_secs <= span.end_secs {
            *coverage.by_route.entry(span.route_id.clone()).or_insert(0) += 1;
            coverage.total += 1;
        }
    }

    coverage
}

/// Expected coverage for "now", including yesterday's service day.
///
/// Service days are resolved per calendar date, but stop times may run past
/// 24:00:00. A just-past-midnight "now" therefore still belongs to
/// yesterday's service day for late trips: yesterday's spans are evaluated
/// at `now + 86400` and both per-route maps are summed. Skipping the second
/// evaluation would flag the last trips of every service day as missing.
pub fn expected_with_rollover(
    today_spans: &[TripSpan],
    yesterday_spans: &[TripSpan],
    now_secs: u32,
) -> ExpectedCoverage {
    let mut combined = expected_now(today_spans, now_secs);
    let rollover = expected_now(yesterday_spans, now_secs + SECONDS_PER_DAY);

    for (route_id, count) in rollover.by_route {
        *combined.by_route.entry(route_id).or_insert(0) += count;
    }
    combined.total += rollover.total;

    combined
}

/// The two service dates and seconds-of-day relevant to an instant, in the
/// agency's timezone. Threaded explicitly so coverage evaluation never
/// reads the ambient clock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NowContext {
    pub today: NaiveDate,
    pub yesterday: NaiveDate,
    pub now_secs: u32,
}

pub fn now_context(now: DateTime<Utc>, tz: Tz) -> NowContext {
    let local = now.with_timezone(&tz);
    let today = local.date_naive();

    NowContext {
        today,
        yesterday: today - chrono::Duration::days(1),
        now_secs: local.time().num_seconds_from_midnight(),
    }
}
