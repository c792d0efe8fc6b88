//! Eligibility gate: the rule engine's yes/no answer for a seat request.

use crate::types::{Event, Participant, Procedure};

/// External predicate deciding whether a participant may request a seat
///
/// Asked once per wish item at submission time and once per single-seat
/// registration. The draw itself never consults it.
pub trait EligibilityGate: Send + Sync {
    /// Whether `participant` may request `event` through `procedure`
    fn is_allowed(&self, participant: &Participant, procedure: &Procedure, event: &Event) -> bool;
}

/// Gate that admits everyone
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl EligibilityGate for AllowAll {
    fn is_allowed(
        &self,
        _participant: &Participant,
        _procedure: &Procedure,
        _event: &Event,
    ) -> bool {
        true
    }
}

impl<F> EligibilityGate for F
where
    F: Fn(&Participant, &Procedure, &Event) -> bool + Send + Sync,
{
    fn is_allowed(&self, participant: &Participant, procedure: &Procedure, event: &Event) -> bool {
        self(participant, procedure, event)
    }
}
