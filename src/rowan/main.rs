// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

// Rowan is the coverage monitor: on every scheduled invocation it
// reconciles the published timetable against live vehicle reports and
// pages when a route has been under-covered for a sustained period.

use chrono::{DateTime, Utc};
use fleetwatch::calendar::active_service_ids;
use fleetwatch::live_vehicles;
use fleetwatch::notify;
use fleetwatch::reconcile::reconcile_coverage;
use fleetwatch::spans::{build_trip_spans, expected_with_rollover, merge_layovers, now_context};
use fleetwatch::state::{self, HeartbeatRecord, MissingState};
use fleetwatch::timetable::load_timetable;
use fleetwatch::watchdog;
use std::time::Duration;

mod config;

use config::MonitorConfig;

fn make_reqwest_client() -> reqwest::Client {
    reqwest::ClientBuilder::new()
        .use_rustls_tls()
        .user_agent("Catenary Rowan")
        .timeout(Duration::from_secs(60))
        .connect_timeout(Duration::from_secs(20))
        .deflate(true)
        .gzip(true)
        .brotli(true)
        .build()
        .unwrap()
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    env_logger::init();

    let now = Utc::now();
    let now_epoch = now.timestamp() as u64;

    let client = make_reqwest_client();

    let config = match MonitorConfig::from_env() {
        Ok(config) => config,
        Err(missing) => {
            eprintln!("Missing required env vars: {}", missing.join(", "));
            // still tell the scheduler-level monitor that the cron fired
            watchdog::ping_heartbeat(&client, std::env::var("HEARTBEAT_URL").ok().as_deref())
                .await;
            std::process::exit(1);
        }
    };

    println!(
        "Starting coverage check at {}",
        now.with_timezone(&config.timezone).format("%H:%M:%S")
    );

    let heartbeat_file = state::heartbeat_path(&config.cache_dir);
    let mut heartbeat: HeartbeatRecord = state::load_json_state(&heartbeat_file);

    // Watchdog first, independent of whatever this cycle concludes about
    // bus coverage.
    if let Some(event) = watchdog::staleness_alert(&heartbeat, now_epoch, config.watchdog_max_age_min)
    {
        eprintln!(
            "Watchdog: {} Sending DOWN alert.",
            event.details
        );
        heartbeat.alerted_down = true;
        if let Err(e) = state::write_json_atomic(&heartbeat_file, &heartbeat) {
            eprintln!("Could not persist heartbeat: {}", e);
        }
        if let Err(e) =
            notify::send_system_alert(&client, &config.mailer, &event, config.timezone).await
        {
            // an undelivered DOWN alert defeats the watchdog entirely
            eprintln!("Watchdog DOWN alert delivery FAILED, staleness is going unreported: {}", e);
        }
    }

    watchdog::note_run(&mut heartbeat, now_epoch);
    if let Err(e) = state::write_json_atomic(&heartbeat_file, &heartbeat) {
        eprintln!("Could not persist heartbeat: {}", e);
    }

    match run_cycle(&client, &config, now, now_epoch).await {
        Ok(()) => {
            if let Some(recovered) =
                watchdog::note_success(&mut heartbeat, now_epoch, config.watchdog_max_age_min)
            {
                println!("Watchdog: previous runs were alerting DOWN. Sending RECOVERED alert.");
                if let Err(e) =
                    notify::send_system_alert(&client, &config.mailer, &recovered, config.timezone)
                        .await
                {
                    eprintln!("Watchdog RECOVERED alert delivery FAILED: {}", e);
                }
            }
            if let Err(e) = state::write_json_atomic(&heartbeat_file, &heartbeat) {
                eprintln!("Could not persist heartbeat: {}", e);
            }
            watchdog::ping_heartbeat(&client, config.heartbeat_url.as_deref()).await;
        }
        Err(e) => {
            eprintln!("Fatal error: {}", e);
            // heartbeat still pinged so the cron-level monitor sees the run
            watchdog::ping_heartbeat(&client, config.heartbeat_url.as_deref()).await;
            std::process::exit(1);
        }
    }
}

async fn run_cycle(
    client: &reqwest::Client,
    config: &MonitorConfig,
    now: DateTime<Utc>,
    now_epoch: u64,
) -> Result<(), Box<dyn std::error::Error + Sync + Send>> {
    if config.test_alert_every_run {
        let mut test_mailer = config.mailer.clone();
        if let Some(recipient) = &config.test_alert_recipient {
            test_mailer.recipient = recipient.clone();
        }
        println!("TEST_ALERT_EVERY_RUN enabled, sending scheduled test email");
        if let Err(e) = notify::send_test_alert(
            client,
            &test_mailer,
            now_epoch,
            "Scheduled monitor test run.",
            config.timezone,
        )
        .await
        {
            eprintln!("Test alert failed: {}", e);
        }
    }

    let gtfs = load_timetable(
        client,
        &config.gtfs_static_url,
        &config.cache_dir,
        config.cache_max_age_hours,
    )
    .await?;

    let ctx = now_context(now, config.timezone);
    let grace_secs = (config.layover_grace_min * 60) as u32;

    let today_spans = merge_layovers(
        build_trip_spans(
            &gtfs.trips,
            &active_service_ids(&gtfs.calendar, &gtfs.calendar_dates, ctx.today),
        ),
        grace_secs,
    );
    // Yesterday's late trips can still be on the road past midnight.
    let yesterday_spans = merge_layovers(
        build_trip_spans(
            &gtfs.trips,
            &active_service_ids(&gtfs.calendar, &gtfs.calendar_dates, ctx.yesterday),
        ),
        grace_secs,
    );

    let expected = expected_with_rollover(&today_spans, &yesterday_spans, ctx.now_secs);

    let missing_file = state::missing_state_path(&config.cache_dir);

    if expected.total == 0 {
        println!("No vehicles scheduled at this time, nothing to reconcile");
        // drop carried durations so they cannot bleed into the next
        // service day
        state::write_json_atomic(&missing_file, &MissingState::default())?;
        return Ok(());
    }

    println!(
        "Expecting {} vehicles across {} routes",
        expected.total,
        expected.by_route.len()
    );

    let reports =
        live_vehicles::fetch_vehicle_positions(client, &config.gtfs_rt_vehicles_url).await?;
    let (tracking_by_route, total_tracking) =
        live_vehicles::count_tracking(&reports, now_epoch, config.silence_threshold_min * 60);
    println!("Tracking {} vehicles with recent GPS", total_tracking);

    let prev_state: MissingState = state::load_json_state(&missing_file);
    let outcome = reconcile_coverage(
        &expected,
        &tracking_by_route,
        total_tracking,
        &prev_state,
        now_epoch,
        config.alert_after_min * 60,
    );
    state::write_json_atomic(&missing_file, &outcome.next_state)?;

    if outcome.report.total_missing == 0 {
        println!("All expected vehicles are tracking");
        return Ok(());
    }

    if !outcome.should_alert {
        println!(
            "{} vehicles missing, none past the {} min threshold yet",
            outcome.report.total_missing, config.alert_after_min
        );
        return Ok(());
    }

    println!(
        "{} vehicles missing past the {} min threshold, sending alert",
        outcome.report.total_missing, config.alert_after_min
    );
    if let Err(e) =
        notify::send_coverage_alert(client, &config.mailer, &outcome.report, config.timezone).await
    {
        eprintln!("Coverage alert delivery failed: {}", e);
    }

    Ok(())
}
