// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

use crate::state::HeartbeatRecord;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const PING_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthEventKind {
    Down,
    Recovered,
}

/// Payload handed to the notification layer when the monitor pipeline
/// itself goes stale or comes back.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemHealthEvent {
    pub kind: HealthEventKind,
    pub checked_at: u64,
    pub last_success_at: Option<u64>,
    pub threshold_minutes: u64,
    pub details: String,
}

/// Decide whether the pipeline is stale enough to page about.
///
/// Fires only while a previous success exists, its age exceeds the
/// threshold, and no down alert has been sent since that success. The
/// caller must persist `alerted_down = true` before attempting delivery so
/// a crashing send cannot page on every subsequent run.
pub fn staleness_alert(
    heartbeat: &HeartbeatRecord,
    now_epoch: u64,
    max_age_minutes: u64,
) -> Option<SystemHealthEvent> {
    let last_success_at = heartbeat.last_success_at?;
    let age_secs = now_epoch.saturating_sub(last_success_at);

    if age_secs <= max_age_minutes * 60 || heartbeat.alerted_down {
        return None;
    }

    Some(SystemHealthEvent {
        kind: HealthEventKind::Down,
        checked_at: now_epoch,
        last_success_at: Some(last_success_at),
        threshold_minutes: max_age_minutes,
        details: format!("No successful monitor run in {} minutes.", age_secs / 60),
    })
}

/// Stamp the run itself, success not yet known.
pub fn note_run(heartbeat: &mut HeartbeatRecord, now_epoch: u64) {
    heartbeat.last_run_at = Some(now_epoch);
}

/// Stamp a successful run. Returns the one-time recovery event when this
/// success is the first one after a down alert.
pub fn note_success(
    heartbeat: &mut HeartbeatRecord,
    now_epoch: u64,
    max_age_minutes: u64,
) -> Option<SystemHealthEvent> {
    let recovered = heartbeat.alerted_down.then(|| SystemHealthEvent {
        kind: HealthEventKind::Recovered,
        checked_at: now_epoch,
        last_success_at: heartbeat.last_success_at,
        threshold_minutes: max_age_minutes,
        details: "Monitor completed a successful run.".to_string(),
    });

    heartbeat.last_run_at = Some(now_epoch);
    heartbeat.last_success_at = Some(now_epoch);
    heartbeat.alerted_down = false;

    recovered
}

/// External liveness ping, fired on every run regardless of outcome so a
/// scheduler that stopped invoking the job is distinguishable from a job
/// that runs and fails. Failures are logged and otherwise ignored.
pub async fn ping_heartbeat(client: &reqwest::Client, url: Option<&str>) {
    let Some(url) = url else {
        return;
    };

    match client.get(url).timeout(PING_TIMEOUT).send().await {
        Ok(response) => println!("Heartbeat ping: {}", response.status().as_u16()),
        Err(e) => eprintln!("Heartbeat ping failed: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_success_fires_down_alert_once() {
        let now = 100_000u64;
        let mut heartbeat = HeartbeatRecord {
            last_run_at: Some(now - 60),
            last_success_at: Some(now - 95 * 60),
            alerted_down: false,
        };

        let event = staleness_alert(&heartbeat, now, 90).unwrap();
        assert_eq!(event.kind, HealthEventKind::Down);
        assert_eq!(event.last_success_at, Some(now - 95 * 60));
        assert_eq!(event.threshold_minutes, 90);

        // once the flag is persisted, later runs stay quiet
        heartbeat.alerted_down = true;
        assert!(staleness_alert(&heartbeat, now + 300, 90).is_none());
    }

    #[test]
    fn recent_success_is_healthy() {
        let now = 100_000u64;
        let heartbeat = HeartbeatRecord {
            last_run_at: Some(now),
            last_success_at: Some(now - 10 * 60),
            alerted_down: false,
        };

        assert!(staleness_alert(&heartbeat, now, 90).is_none());
    }

    #[test]
    fn no_prior_success_never_alerts() {
        assert!(staleness_alert(&HeartbeatRecord::default(), 100_000, 90).is_none());
    }

    #[test]
    fn age_exactly_at_threshold_is_still_healthy() {
        let now = 100_000u64;
        let heartbeat = HeartbeatRecord {
            last_run_at: None,
            last_success_at: Some(now - 90 * 60),
            alerted_down: false,
        };

        assert!(staleness_alert(&heartbeat, now, 90).is_none());
    }

    #[test]
    fn first_success_after_down_emits_recovered_and_clears_flag() {
        let now = 100_000u64;
        let mut heartbeat = HeartbeatRecord {
            last_run_at: Some(now - 60),
            last_success_at: Some(now - 95 * 60),
            alerted_down: true,
        };

        let recovered = note_success(&mut heartbeat, now, 90).unwrap();
        assert_eq!(recovered.kind, HealthEventKind::Recovered);
        assert_eq!(recovered.last_success_at, Some(now - 95 * 60));

        assert!(!heartbeat.alerted_down);
        assert_eq!(heartbeat.last_success_at, Some(now));
        assert_eq!(heartbeat.last_run_at, Some(now));

        // the clear happens exactly once
        assert!(note_success(&mut heartbeat, now + 300, 90).is_none());
    }

    #[test]
    fn note_run_touches_only_the_run_stamp() {
        let mut heartbeat = HeartbeatRecord {
            last_run_at: Some(1),
            last_success_at: Some(2),
            alerted_down: true,
        };

        note_run(&mut heartbeat, 99);

        assert_eq!(heartbeat.last_run_at, Some(99));
        assert_eq!(heartbeat.last_success_at, Some(2));
        assert!(heartbeat.alerted_down);
    }
}
