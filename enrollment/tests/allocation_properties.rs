//! Property-based tests for allocation invariants
//!
//! Random wish lists over a handful of small events, drawn with random
//! seeds. Whatever the shuffle does, capacity holds, no list yields two
//! grants and no participant holds the same event twice.

#![allow(clippy::unwrap_used)]

use coursedraw_testing::test_instant;
use enrollment::mocks::EnrollmentFixture;
use enrollment::storage::Storage;
use enrollment::{Event, Procedure, SeatRequest};
use proptest::prelude::*;
use std::collections::HashSet;

const EVENTS: usize = 4;

/// One participant's lists: a shuffled event order cut into up to two lists
fn participant_lists() -> impl Strategy<Value = (Vec<usize>, Vec<usize>)> {
    (
        Just((0..EVENTS).collect::<Vec<_>>()).prop_shuffle(),
        1..=EVENTS,
        0..=EVENTS,
    )
        .prop_map(|(order, split, extra)| {
            let end = (split + extra).min(EVENTS);
            (order[..split].to_vec(), order[split..end].to_vec())
        })
}

fn submit_as(
    fx: &EnrollmentFixture,
    round: &Procedure,
    name: &str,
    events: &[Event],
    picks: &[usize],
) {
    if picks.is_empty() {
        return;
    }
    let participant = fx.participant(name).unwrap();
    let items: Vec<(&Event, u32)> = picks
        .iter()
        .zip(1..)
        .map(|(&event, priority)| (&events[event], priority))
        .collect();
    fx.submit(round, &participant, &items).unwrap();
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: a draw never overfills an event, even when seats were
    /// already taken before the draw
    #[test]
    fn draw_never_exceeds_capacity(
        capacities in prop::collection::vec(0u32..3, EVENTS),
        prefilled in prop::collection::vec(any::<bool>(), EVENTS),
        lists in prop::collection::vec(participant_lists(), 1..8),
        seed in any::<u64>(),
    ) {
        let fx = EnrollmentFixture::with_seed(seed);
        let events: Vec<Event> = capacities
            .iter()
            .enumerate()
            .map(|(i, capacity)| fx.event(&format!("Event{i}"), *capacity).unwrap())
            .collect();
        let refs: Vec<&Event> = events.iter().collect();
        let round = fx.draw_procedure(&refs, test_instant()).unwrap();

        let walk_in = fx.participant("Walk-in").unwrap();
        for (event, fill) in events.iter().zip(&prefilled) {
            if *fill {
                // Ignored when the event has no seats
                let _ = fx.service.ledger().try_occupy(SeatRequest {
                    participant_id: walk_in.id,
                    event_id: event.id,
                    procedure_id: None,
                    mandator_id: fx.mandator,
                    exam_only: false,
                });
            }
        }

        for (i, (first, second)) in lists.iter().enumerate() {
            submit_as(&fx, &round, &format!("P{i}a"), &events, first);
            submit_as(&fx, &round, &format!("P{i}b"), &events, second);
        }

        fx.service.draw(&round.id).unwrap();

        for event in &events {
            let held = fx.storage.grants_for_event(&event.id).unwrap();
            prop_assert!(held.len() <= event.capacity.value() as usize);
        }
    }

    /// Property: every wish list yields at most one grant and no participant
    /// holds an event twice
    #[test]
    fn at_most_one_grant_per_list(
        lists in prop::collection::vec(participant_lists(), 1..8),
        seed in any::<u64>(),
    ) {
        let fx = EnrollmentFixture::with_seed(seed);
        let events: Vec<Event> = (0..EVENTS)
            .map(|i| fx.event(&format!("Event{i}"), 2).unwrap())
            .collect();
        let refs: Vec<&Event> = events.iter().collect();
        let round = fx.draw_procedure(&refs, test_instant()).unwrap();

        // Both lists belong to the same participant here
        let mut submitted = Vec::new();
        for (i, (first, second)) in lists.iter().enumerate() {
            let participant = fx.participant(&format!("P{i}")).unwrap();
            for picks in [first, second] {
                if picks.is_empty() {
                    continue;
                }
                let items: Vec<(&Event, u32)> = picks
                    .iter()
                    .zip(1..)
                    .map(|(&event, priority)| (&events[event], priority))
                    .collect();
                submitted.push(fx.submit(&round, &participant, &items).unwrap());
            }
        }

        let report = fx.service.draw(&round.id).unwrap();
        let grants = fx.storage.grants_for_procedure(&round.id).unwrap();
        prop_assert_eq!(grants.len(), report.grants.len());

        for list in &submitted {
            let from_list = grants
                .iter()
                .filter(|g| g.participant_id == list.participant_id && list.requests(&g.event_id))
                .count();
            prop_assert!(from_list <= 1);
        }

        let mut pairs = HashSet::new();
        for grant in &grants {
            prop_assert!(pairs.insert((grant.participant_id, grant.event_id)));
        }
    }
}
