// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

use crate::reconcile::CoverageReport;
use crate::watchdog::{HealthEventKind, SystemHealthEvent};
use chrono::DateTime;
use chrono_tz::Tz;
use serde::Serialize;
use std::time::Duration;

const RESEND_ENDPOINT: &str = "https://api.resend.com/emails";
const SEND_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Clone, Debug)]
pub struct MailerConfig {
    pub api_key: String,
    pub from_email: String,
    pub recipient: String,
}

#[derive(Serialize)]
struct OutboundEmail<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
    text: &'a str,
}

async fn send_mail(
    client: &reqwest::Client,
    config: &MailerConfig,
    subject: &str,
    html: &str,
    text: &str,
) -> Result<(), Box<dyn std::error::Error + Sync + Send>> {
    let payload = OutboundEmail {
        from: &config.from_email,
        to: [config.recipient.as_str()],
        subject,
        html,
        text,
    };

    let response = client
        .post(RESEND_ENDPOINT)
        .timeout(SEND_TIMEOUT)
        .bearer_auth(&config.api_key)
        .json(&payload)
        .send()
        .await?;

    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    if !status.is_success() {
        return Err(format!("mail delivery failed with {}: {}", status, body).into());
    }

    println!("Alert email sent ({})", status.as_u16());
    Ok(())
}

fn format_local(epoch: u64, tz: Tz) -> String {
    match DateTime::from_timestamp(epoch as i64, 0) {
        Some(utc) => utc
            .with_timezone(&tz)
            .format("%b %-d, %Y %-I:%M %p %Z")
            .to_string(),
        None => "unknown".to_string(),
    }
}

fn format_local_opt(epoch: Option<u64>, tz: Tz) -> String {
    match epoch {
        Some(epoch) => format_local(epoch, tz),
        None => "unknown".to_string(),
    }
}

fn missing_summary(report: &CoverageReport) -> String {
    let noun = if report.total_missing == 1 {
        "vehicle is"
    } else {
        "vehicles are"
    };
    format!(
        "{} of {} expected {} not reporting GPS data",
        report.total_missing, report.total_expected, noun
    )
}

pub fn coverage_subject(report: &CoverageReport) -> String {
    let noun = if report.total_missing == 1 {
        "vehicle"
    } else {
        "vehicles"
    };
    format!(
        "Fleetwatch GPS alert: {}/{} {} not tracking",
        report.total_missing, report.total_expected, noun
    )
}

pub fn coverage_text(report: &CoverageReport, tz: Tz) -> String {
    let mut lines = vec![
        "FLEETWATCH TRACKING ALERT".to_string(),
        "=".repeat(40),
        String::new(),
        missing_summary(report),
        format!("Checked: {}", format_local(report.checked_at, tz)),
        String::new(),
        "Route  | Expected | Tracking | Missing | Not reporting".to_string(),
        "-------+----------+----------+---------+--------------".to_string(),
    ];

    for row in &report.rows {
        let duration = match row.missing_minutes(report.checked_at) {
            Some(minutes) => format!("{} min", minutes),
            None => "-".to_string(),
        };
        lines.push(format!(
            "{:<6} | {:>8} | {:>8} | {:>7} | {}",
            row.route_id, row.expected, row.tracking, row.missing, duration
        ));
    }

    lines.push("-------+----------+----------+---------+--------------".to_string());
    lines.push(format!(
        "TOTAL  | {:>8} | {:>8} | {:>7} |",
        report.total_expected, report.total_tracking, report.total_missing
    ));
    lines.push(String::new());
    lines.push("Note: some variance is normal (vehicles between trips, operator changes).".to_string());
    lines.push("Persistent gaps may indicate GPS equipment issues.".to_string());

    lines.join("\n")
}

pub fn coverage_html(report: &CoverageReport, tz: Tz) -> String {
    let mut table_rows = String::new();
    for row in &report.rows {
        let duration = match row.missing_minutes(report.checked_at) {
            Some(minutes) => format!("{} min", minutes),
            None => "&mdash;".to_string(),
        };
        table_rows.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td><strong>{}</strong></td><td>{}</td></tr>\n",
            row.route_id, row.expected, row.tracking, row.missing, duration
        ));
    }

    format!(
        "<!DOCTYPE html>\n<html><body style=\"font-family:Arial,Helvetica,sans-serif;font-size:14px\">\n\
         <h2>Fleetwatch tracking alert</h2>\n\
         <p><strong>{}</strong></p>\n\
         <p>Checked: {}</p>\n\
         <table border=\"1\" cellpadding=\"6\" cellspacing=\"0\">\n\
         <tr><th>Route</th><th>Expected</th><th>Tracking</th><th>Missing</th><th>Not reporting</th></tr>\n\
         {}\
         <tr><td><strong>TOTAL</strong></td><td>{}</td><td>{}</td><td><strong>{}</strong></td><td></td></tr>\n\
         </table>\n\
         <p style=\"color:#666\">Note: some variance is normal (vehicles between trips, operator changes).\n\
         Persistent gaps may indicate GPS equipment issues.</p>\n\
         </body></html>",
        missing_summary(report),
        format_local(report.checked_at, tz),
        table_rows,
        report.total_expected,
        report.total_tracking,
        report.total_missing
    )
}

pub async fn send_coverage_alert(
    client: &reqwest::Client,
    config: &MailerConfig,
    report: &CoverageReport,
    tz: Tz,
) -> Result<(), Box<dyn std::error::Error + Sync + Send>> {
    let subject = coverage_subject(report);
    let html = coverage_html(report, tz);
    let text = coverage_text(report, tz);

    send_mail(client, config, &subject, &html, &text).await
}

pub fn system_subject(event: &SystemHealthEvent) -> &'static str {
    match event.kind {
        HealthEventKind::Down => "Fleetwatch health: reporting pipeline stale",
        HealthEventKind::Recovered => "Fleetwatch health: reporting recovered",
    }
}

pub fn system_text(event: &SystemHealthEvent, tz: Tz) -> String {
    let (label, intro) = match event.kind {
        HealthEventKind::Down => ("DOWN", "The coverage reporting pipeline appears stale."),
        HealthEventKind::Recovered => ("RECOVERED", "The coverage reporting pipeline has recovered."),
    };

    [
        format!("FLEETWATCH MONITOR HEALTH: {}", label),
        String::new(),
        intro.to_string(),
        format!("Checked: {}", format_local(event.checked_at, tz)),
        format!(
            "Last successful monitor run: {}",
            format_local_opt(event.last_success_at, tz)
        ),
        format!("Watchdog max age: {} minutes", event.threshold_minutes),
        format!("Details: {}", event.details),
    ]
    .join("\n")
}

pub async fn send_system_alert(
    client: &reqwest::Client,
    config: &MailerConfig,
    event: &SystemHealthEvent,
    tz: Tz,
) -> Result<(), Box<dyn std::error::Error + Sync + Send>> {
    let text = system_text(event, tz);
    let html = format!(
        "<!DOCTYPE html>\n<html><body style=\"font-family:Arial,Helvetica,sans-serif;font-size:14px\">\n<pre>{}</pre>\n</body></html>",
        text
    );

    send_mail(client, config, system_subject(event), &html, &text).await
}

pub async fn send_test_alert(
    client: &reqwest::Client,
    config: &MailerConfig,
    checked_at: u64,
    details: &str,
    tz: Tz,
) -> Result<(), Box<dyn std::error::Error + Sync + Send>> {
    let text = [
        "FLEETWATCH TEST EMAIL".to_string(),
        String::new(),
        "This is a scheduled test email confirming the monitor is running.".to_string(),
        format!("Checked: {}", format_local(checked_at, tz)),
        format!("Details: {}", details),
    ]
    .join("\n");
    let html = format!(
        "<!DOCTYPE html>\n<html><body style=\"font-family:Arial,Helvetica,sans-serif;font-size:14px\">\n<pre>{}</pre>\n</body></html>",
        text
    );

    send_mail(
        client,
        config,
        "Fleetwatch test: scheduled check",
        &html,
        &text,
    )
    .await
}
