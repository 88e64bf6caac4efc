use chrono_tz::Tz;
use fleetwatch::notify::MailerConfig;
use std::path::PathBuf;

const DEFAULT_TIMEZONE: Tz = Tz::UTC;

/// Everything the monitor job reads from the environment, validated up
/// front so a misconfigured deployment fails before any network I/O.
#[derive(Clone, Debug)]
pub struct MonitorConfig {
    pub gtfs_static_url: String,
    pub gtfs_rt_vehicles_url: String,
    pub cache_dir: PathBuf,
    pub cache_max_age_hours: u64,
    pub silence_threshold_min: u64,
    pub alert_after_min: u64,
    pub layover_grace_min: u64,
    pub watchdog_max_age_min: u64,
    pub timezone: Tz,
    pub heartbeat_url: Option<String>,
    pub mailer: MailerConfig,
    pub test_alert_recipient: Option<String>,
    pub test_alert_every_run: bool,
}

impl MonitorConfig {
    pub fn from_env() -> Result<MonitorConfig, Vec<String>> {
        let mut missing: Vec<String> = Vec::new();

        let gtfs_static_url = require(&mut missing, "GTFS_STATIC_URL");
        let gtfs_rt_vehicles_url = require(&mut missing, "GTFS_RT_VEHICLES_URL");
        let recipient = require(&mut missing, "ALERT_RECIPIENT");
        let api_key = require(&mut missing, "RESEND_API_KEY");
        let from_email = require(&mut missing, "RESEND_FROM_EMAIL");

        if !missing.is_empty() {
            return Err(missing);
        }

        Ok(MonitorConfig {
            gtfs_static_url,
            gtfs_rt_vehicles_url,
            cache_dir: PathBuf::from(
                std::env::var("CACHE_DIR").unwrap_or_else(|_| "cache".to_string()),
            ),
            cache_max_age_hours: env_u64("GTFS_CACHE_MAX_AGE_HOURS", 24),
            silence_threshold_min: env_u64("SILENCE_THRESHOLD_MIN", 5),
            alert_after_min: env_u64("ALERT_AFTER_MIN", 20),
            layover_grace_min: env_u64("LAYOVER_GRACE_MIN", 10),
            watchdog_max_age_min: env_u64("WATCHDOG_MAX_AGE_MIN", 90),
            timezone: env_timezone("MONITOR_TIMEZONE"),
            heartbeat_url: env_opt("HEARTBEAT_URL"),
            mailer: MailerConfig {
                api_key,
                from_email,
                recipient,
            },
            test_alert_recipient: env_opt("TEST_ALERT_RECIPIENT"),
            test_alert_every_run: env_flag("TEST_ALERT_EVERY_RUN"),
        })
    }
}

fn require(missing: &mut Vec<String>, key: &str) -> String {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => value,
        _ => {
            missing.push(key.to_string());
            String::new()
        }
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str) -> bool {
    matches!(
        std::env::var(key)
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase()
            .as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn env_timezone(key: &str) -> Tz {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse::<Tz>() {
            Ok(tz) => tz,
            Err(_) => {
                eprintln!(
                    "Invalid {} value {:?}, falling back to {}",
                    key, raw, DEFAULT_TIMEZONE
                );
                DEFAULT_TIMEZONE
            }
        },
        Err(_) => DEFAULT_TIMEZONE,
    }
}
