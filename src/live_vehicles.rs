// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

use crate::route_alias::{RouteId, normalize_route_id};
use ahash::AHashMap;
use compact_str::CompactString;
use gtfs_realtime::FeedMessage;
use prost::Message;
use std::time::Duration;

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// One vehicle as reported by the realtime feed. `route_id` is None for a
/// vehicle between trips; `last_reported` is the position timestamp in
/// epoch seconds when the feed carries one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LiveVehicleReport {
    pub vehicle_id: CompactString,
    pub route_id: Option<RouteId>,
    pub last_reported: Option<u64>,
}

pub fn parse_vehicle_feed(
    bytes: &[u8],
) -> Result<FeedMessage, Box<dyn std::error::Error + Sync + Send>> {
    let message = FeedMessage::decode(bytes);

    match message {
        Ok(message) => Ok(message),
        Err(e) => Err(Box::new(e)),
    }
}

/// Flatten a decoded feed into vehicle reports. Entities without a vehicle
/// position are ignored; the vehicle id falls back from descriptor id to
/// descriptor label to entity id. Route ids are canonicalized here, once,
/// at ingestion.
pub fn reports_from_feed(feed: FeedMessage) -> Vec<LiveVehicleReport> {
    let mut reports = Vec::new();

    for entity in feed.entity {
        let Some(vehicle) = entity.vehicle else {
            continue;
        };
        if vehicle.position.is_none() {
            continue;
        }

        let descriptor_id = vehicle.vehicle.as_ref().and_then(|descriptor| {
            descriptor
                .id
                .clone()
                .or_else(|| descriptor.label.clone())
        });

        let route_id = vehicle
            .trip
            .as_ref()
            .and_then(|trip| trip.route_id.as_deref())
            .and_then(normalize_route_id);

        reports.push(LiveVehicleReport {
            vehicle_id: CompactString::from(descriptor_id.unwrap_or(entity.id)),
            route_id,
            last_reported: vehicle.timestamp,
        });
    }

    reports
}

pub async fn fetch_vehicle_positions(
    client: &reqwest::Client,
    url: &str,
) -> Result<Vec<LiveVehicleReport>, Box<dyn std::error::Error + Sync + Send>> {
    let response = client
        .get(url)
        .timeout(FETCH_TIMEOUT)
        .send()
        .await?
        .error_for_status()?;

    let bytes = response.bytes().await?;
    let feed = parse_vehicle_feed(&bytes)?;

    Ok(reports_from_feed(feed))
}

/// Per-route counts of vehicles whose last report is recent enough to
/// count as tracking. A silent vehicle is indistinguishable from an absent
/// one, so stale reports are dropped entirely.
pub fn count_tracking(
    reports: &[LiveVehicleReport],
    now_epoch: u64,
    silence_secs: u64,
) -> (AHashMap<RouteId, u32>, u32) {
    let mut by_route: AHashMap<RouteId, u32> = AHashMap::new();
    let mut total = 0u32;

    for report in reports {
        let Some(route_id) = &report.route_id else {
            //between trips, not assignable to any route
            continue;
        };
        let Some(last_reported) = report.last_reported else {
            continue;
        };
        if now_epoch.saturating_sub(last_reported) > silence_secs {
            continue;
        }

        *by_route.entry(route_id.clone()).or_insert(0) += 1;
        total += 1;
    }

    (by_route, total)
}
