//! Course Enrollment Demo
//!
//! Walks one lottery round from wish list submission to closing:
//! - Participants and capacity-limited events are seeded in memory
//! - Wish lists are submitted while the round is open
//! - The scheduler ticks past the draw instant; the controller draws,
//!   mails every participant plus the audit address, then closes the round
//! - A first-come-first-served registration runs alongside
//!
//! # Usage
//!
//! ```bash
//! # Mails are logged unless SMTP_HOST is set and the `smtp` feature is enabled
//! cargo run --bin demo
//! ```

use anyhow::Context;
use chrono::Utc;
use enrollment::{
    Capacity, Collaborators, Config, EnrollmentApp, Event, Participant, Procedure,
    RegistrationRequest, WishItem, WishListSubmission,
    app::mailer_from_config,
    metrics::register_metrics,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.observability.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Metrics endpoint; the demo keeps going without one
    let metrics_addr: SocketAddr = format!(
        "{}:{}",
        config.observability.metrics_host, config.observability.metrics_port
    )
    .parse()
    .context("invalid METRICS_HOST/METRICS_PORT")?;
    match PrometheusBuilder::new().with_http_listener(metrics_addr).install() {
        Ok(()) => info!(addr = %metrics_addr, "Prometheus exporter listening"),
        Err(e) => warn!(error = %e, "Metrics exporter unavailable"),
    }
    register_metrics();

    println!("\n🎓 ============================================");
    println!("   Course Enrollment - Lottery Round Demo");
    println!("============================================\n");

    let mailer = mailer_from_config(&config.mail)?;
    let app = EnrollmentApp::new(&config, Collaborators::in_memory(mailer));
    let service = app.service();
    let storage = service.storage();

    // ========== Seed Data ==========

    let mandator = enrollment::MandatorId::new();
    let events = [
        storage.save_event(Event::new("Rock Climbing", mandator, Capacity::new(2)))?,
        storage.save_event(Event::new("Sailing", mandator, Capacity::new(1)))?,
        storage.save_event(Event::new("Yoga", mandator, Capacity::new(3)))?,
    ];
    let participants = ["Ada", "Grace", "Linus", "Barbara", "Ken"]
        .into_iter()
        .map(|name| {
            let username = name.to_lowercase();
            let email = format!("{username}@example.edu");
            storage.save_participant(Participant::new(name, &username, email))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let draw_at = Utc::now() + chrono::Duration::seconds(2);
    let lottery = storage.save_procedure(Procedure::draw(
        "Summer sports lottery",
        mandator,
        events.iter().map(|event| event.id).collect(),
        draw_at,
    ))?;
    println!("📋 Lottery \"{}\" draws at {draw_at}", lottery.name);

    // ========== Wish Lists ==========

    // Everyone wants climbing first; preferences diverge after that
    let preferences: [&[usize]; 5] = [&[0, 1, 2], &[0, 2], &[0, 1], &[1, 0, 2], &[0]];
    for (participant, ranking) in participants.iter().zip(preferences) {
        let items = ranking
            .iter()
            .zip(1..)
            .map(|(&event, priority)| WishItem::new(events[event].id, priority))
            .collect();
        service.submit_wish_list(WishListSubmission {
            procedure_id: lottery.id,
            participant_id: participant.id,
            initiator_id: participant.id,
            items,
        })?;
        println!("  ✓ {} submitted {} wishes", participant.name, ranking.len());
    }

    // ========== First Come, First Served ==========

    let walk_in =
        storage.save_procedure(Procedure::fifo("Walk-in yoga", mandator, vec![events[2].id]))?;
    let grant = service.register(RegistrationRequest {
        procedure_id: walk_in.id,
        event_id: events[2].id,
        participant_id: participants[4].id,
        initiator_id: participants[4].id,
        exam_only: false,
    })?;
    println!("\n🚶 {} walked into Yoga (grant {})", participants[4].name, grant.id);

    // ========== Round Lifecycle ==========

    println!("\n⏳ Waiting for the draw instant...");
    tokio::time::sleep(Duration::from_secs(3)).await;

    let mut ticks = 0;
    loop {
        app.scheduler().tick().await?;
        ticks += 1;
        if storage.procedure(&lottery.id)?.closed_at.is_some() {
            break;
        }
        if ticks >= 5 {
            anyhow::bail!("round did not close after {ticks} ticks");
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    println!("✓ Round drawn, notified and closed after {ticks} tick(s)\n");

    // ========== Results ==========

    println!("🎟️  Seats:");
    for event in &events {
        let entry = service.ledger().entry(&event.id)?;
        println!("  {} ({}/{})", event.name, entry.occupied, event.capacity);
        for grant in storage.grants_for_event(&event.id)? {
            let holder = storage.participant(&grant.participant_id)?;
            let via = if grant.procedure_id == Some(lottery.id) { "lottery" } else { "walk-in" };
            println!("    - {} ({via})", holder.name);
        }
    }

    let lottery_grants = storage.grants_for_procedure(&lottery.id)?;
    println!("\n📄 Lottery grants as JSON:\n{}", serde_json::to_string_pretty(&lottery_grants)?);

    let errors = app.store().state(|s| s.errors.clone()).await;
    if !errors.is_empty() {
        warn!(?errors, "Controller recorded errors");
    }

    println!("\n============================================\n");
    Ok(())
}
