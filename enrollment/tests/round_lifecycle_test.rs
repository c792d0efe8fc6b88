//! Round lifecycle integration tests.
//!
//! Drives the round controller through the scheduler with a manual clock:
//! nothing happens before the draw instant, one tick afterwards draws,
//! notifies and closes, mail failures stay isolated, and an interrupted
//! draw is resumed instead of repeated.
//!
//! Run with: `cargo test --test round_lifecycle_test`

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

use chrono::Duration;
use coursedraw_core::environment::Clock;
use coursedraw_testing::test_instant;
use enrollment::controller::RoundPhase;
use enrollment::mocks::{AUDIT_ADDRESS, EnrollmentFixture};
use enrollment::storage::Storage;
use enrollment::{Event, Participant, Procedure, RoundState, Scheduler};
use std::collections::HashSet;

struct Round {
    fx: EnrollmentFixture,
    scheduler: Scheduler,
    procedure: Procedure,
    events: Vec<Event>,
    participants: Vec<Participant>,
}

/// Four participants, each with a different first choice among four single-seat events
fn round() -> Round {
    let fx = EnrollmentFixture::new();
    let events: Vec<Event> = ["Climbing", "Sailing", "Yoga", "Fencing"]
        .into_iter()
        .map(|name| fx.event(name, 1).unwrap())
        .collect();
    let refs: Vec<&Event> = events.iter().collect();
    let procedure = fx
        .draw_procedure(&refs, test_instant() + Duration::hours(1))
        .unwrap();
    let participants: Vec<Participant> = ["Ada", "Grace", "Linus", "Barbara"]
        .into_iter()
        .map(|name| fx.participant(name).unwrap())
        .collect();
    for (i, participant) in participants.iter().enumerate() {
        let other = &events[(i + 1) % events.len()];
        fx.submit(&procedure, participant, &[(&events[i], 1), (other, 2)])
            .unwrap();
        fx.clock.advance(Duration::seconds(1));
    }

    let scheduler = Scheduler::new(
        fx.service.controller_store(),
        fx.clock.clone(),
        std::time::Duration::from_secs(60),
    );
    Round {
        fx,
        scheduler,
        procedure,
        events,
        participants,
    }
}

impl Round {
    fn reload(&self) -> Procedure {
        self.fx.storage.procedure(&self.procedure.id).unwrap()
    }
}

#[tokio::test]
async fn tick_before_the_draw_instant_changes_nothing() {
    let round = round();

    round.scheduler.tick().await.unwrap();

    let procedure = round.reload();
    assert_eq!(procedure.state, RoundState::Open);
    assert!(procedure.draw_completed_at.is_none());
    assert!(round.fx.mailer.sent().is_empty());
    assert_eq!(round.fx.storage.inner().wish_list_count().unwrap(), 4);
    let window = round.scheduler.store().state(|s| s.window()).await;
    assert_eq!(window, Some((None, round.fx.clock.now())));
}

#[tokio::test]
async fn due_round_is_drawn_notified_and_closed_in_one_tick() {
    let round = round();
    round.fx.clock.advance(Duration::hours(2));

    round.scheduler.tick().await.unwrap();

    let procedure = round.reload();
    assert_eq!(procedure.state, RoundState::Closed);
    assert!(procedure.draw_completed_at.is_some());
    assert!(procedure.notified_at.is_some());
    assert!(procedure.closed_at.is_some());
    assert_eq!(round.fx.storage.inner().wish_list_count().unwrap(), 0);

    // Every first choice was distinct, so everybody got it
    let grants = round.fx.storage.grants_for_procedure(&procedure.id).unwrap();
    assert_eq!(grants.len(), 4);
    for (participant, event) in round.participants.iter().zip(&round.events) {
        assert!(grants
            .iter()
            .any(|g| g.participant_id == participant.id && g.event_id == event.id));
        assert_eq!(round.fx.mailer.sent_to(&participant.email).len(), 1);
    }

    let audit = round.fx.mailer.sent_to(AUDIT_ADDRESS);
    assert_eq!(audit.len(), 1);
    assert!(audit[0].body.contains("Ada (ada)"));

    let phase = round
        .scheduler
        .store()
        .state(|s| s.phase(&procedure.id))
        .await;
    assert_eq!(phase, Some(RoundPhase::Closed));
}

#[tokio::test]
async fn repeated_ticks_never_notify_twice() {
    let round = round();
    round.fx.clock.advance(Duration::hours(2));

    round.scheduler.tick().await.unwrap();
    let mails = round.fx.mailer.sent().len();
    round.fx.clock.advance(Duration::minutes(1));
    round.scheduler.tick().await.unwrap();
    round.scheduler.tick().await.unwrap();

    assert_eq!(round.fx.mailer.sent().len(), mails);
    assert_eq!(round.fx.storage.grants_for_procedure(&round.procedure.id).unwrap().len(), 4);
}

#[tokio::test]
async fn failed_mail_for_one_participant_does_not_stop_the_others() {
    let round = round();
    round.fx.mailer.fail_for("ada@example.edu");
    round.fx.clock.advance(Duration::hours(2));

    round.scheduler.tick().await.unwrap();

    let summary = round
        .scheduler
        .store()
        .state(|s| s.notifications.get(&round.procedure.id).cloned())
        .await
        .unwrap();
    assert_eq!(summary.failed, vec![round.participants[0].id]);
    assert_eq!(summary.sent, 3);
    assert!(summary.audit_sent);
    assert_eq!(round.fx.mailer.sent_to("grace@example.edu").len(), 1);

    // Grants stay, the round still closes
    assert_eq!(round.fx.storage.grants_for_procedure(&round.procedure.id).unwrap().len(), 4);
    assert_eq!(round.reload().state, RoundState::Closed);
}

#[tokio::test]
async fn interrupted_draw_is_resumed_on_the_next_tick() {
    let round = round();
    round.fx.storage.fail_grants_after(2);
    round.fx.clock.advance(Duration::hours(2));

    round.scheduler.tick().await.unwrap();

    let procedure = round.reload();
    assert_eq!(procedure.state, RoundState::Drawn);
    assert!(procedure.is_interrupted_draw());
    assert_eq!(round.fx.storage.grants_for_procedure(&procedure.id).unwrap().len(), 2);
    assert!(round.fx.storage.checkpoint(&procedure.id).unwrap().is_some());
    assert!(round.fx.mailer.sent().is_empty());
    let error = round
        .scheduler
        .store()
        .state(|s| s.errors.get(&procedure.id).cloned())
        .await;
    assert!(error.is_some());

    round.fx.storage.heal();
    round.fx.clock.advance(Duration::minutes(1));
    round.scheduler.tick().await.unwrap();

    let procedure = round.reload();
    assert_eq!(procedure.state, RoundState::Closed);
    assert!(round.fx.storage.checkpoint(&procedure.id).unwrap().is_none());

    let grants = round.fx.storage.grants_for_procedure(&procedure.id).unwrap();
    assert_eq!(grants.len(), 4);
    let holders: HashSet<_> = grants.iter().map(|g| g.participant_id).collect();
    assert_eq!(holders.len(), 4, "nobody may win twice after a resume");

    let report = round
        .scheduler
        .store()
        .state(|s| s.reports.get(&procedure.id).cloned())
        .await
        .unwrap();
    assert!(report.resumed);
    assert_eq!(report.grants.len(), 2);
}

#[tokio::test]
async fn winners_and_losers_get_different_mails() {
    let fx = EnrollmentFixture::new();
    let seat = fx.event("Front row", 1).unwrap();
    let procedure = fx.draw_procedure(&[&seat], test_instant()).unwrap();
    let ada = fx.participant("Ada").unwrap();
    let grace = fx.participant("Grace").unwrap();
    fx.submit(&procedure, &ada, &[(&seat, 1)]).unwrap();
    fx.submit(&procedure, &grace, &[(&seat, 1)]).unwrap();
    let scheduler = Scheduler::new(
        fx.service.controller_store(),
        fx.clock.clone(),
        std::time::Duration::from_secs(60),
    );

    scheduler.tick().await.unwrap();

    let grants = fx.storage.grants_for_procedure(&procedure.id).unwrap();
    assert_eq!(grants.len(), 1);
    let (winner, loser) = if grants[0].participant_id == ada.id {
        (&ada, &grace)
    } else {
        (&grace, &ada)
    };

    let won = fx.mailer.sent_to(&winner.email);
    assert_eq!(won.len(), 1);
    assert_eq!(won[0].subject, "Spring lottery: you received a seat");
    assert!(won[0].body.contains("Front row"));

    let lost = fx.mailer.sent_to(&loser.email);
    assert_eq!(lost.len(), 1);
    assert_eq!(lost[0].subject, "Spring lottery: draw results");
    assert!(lost[0].body.contains("no seat"));
}

#[test]
fn lists_that_missed_before_a_crash_miss_again_on_resume() {
    let fx = EnrollmentFixture::new();
    let contested = fx.event("Climbing", 1).unwrap();
    let fallback = fx.event("Sailing", 10).unwrap();
    let roomy = fx.event("Yoga", 10).unwrap();
    let procedure = fx
        .draw_procedure(&[&contested, &fallback, &roomy], test_instant())
        .unwrap();
    for name in ["Ada", "Grace", "Linus"] {
        let participant = fx.participant(name).unwrap();
        fx.submit(&procedure, &participant, &[(&contested, 1), (&fallback, 2)])
            .unwrap();
    }
    for name in ["Barbara", "Edsger", "Donald", "Frances"] {
        let participant = fx.participant(name).unwrap();
        fx.submit(&procedure, &participant, &[(&roomy, 1)]).unwrap();
    }
    fx.storage.fail_grants_after(2);

    assert!(fx.service.draw(&procedure.id).is_err());
    assert_eq!(fx.storage.grants_for_procedure(&procedure.id).unwrap().len(), 2);

    fx.storage.heal();
    let report = fx.service.resume(&procedure.id).unwrap();

    assert!(report.resumed);
    assert_eq!(report.grants.len(), 3);
    assert_eq!(fx.storage.grants_for_event(&contested.id).unwrap().len(), 1);
    assert!(fx.storage.grants_for_event(&fallback.id).unwrap().is_empty());
    assert_eq!(fx.storage.grants_for_event(&roomy.id).unwrap().len(), 4);
    assert!(fx.storage.checkpoint(&procedure.id).unwrap().is_none());
}

#[tokio::test]
async fn scheduler_stops_on_shutdown_signal() {
    let round = round();
    let (tx, rx) = tokio::sync::watch::channel(false);
    let scheduler = round.scheduler.clone();

    let handle = tokio::spawn(async move { scheduler.run(rx).await });
    tx.send(true).unwrap();

    tokio::time::timeout(std::time::Duration::from_secs(5), handle)
        .await
        .expect("scheduler did not stop")
        .unwrap();
}
