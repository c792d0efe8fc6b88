//! Post-draw notifications and the audit log.
//!
//! One mail per participant who submitted at least one wish list in the
//! round, using the `Drawn` template if they received any seat and
//! `DrawnNoLuck` otherwise. Every participant also contributes one line to
//! an aggregate audit mail sent to the operational address.
//!
//! A failed send is logged at WARN and the batch moves on. Grants are never
//! touched here.

use crate::error::{EnrollmentError, Result};
use crate::mail::{MailMessage, MailSender};
use crate::storage::Storage;
use crate::template::{TemplateContext, TemplateKind, TemplateService};
use crate::types::{EventId, Grant, Participant, ParticipantId, Procedure, ProcedureId, WishList};
use coursedraw_core::environment::Clock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Outcome of one dispatch run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Participants mailed successfully
    pub sent: usize,
    /// Participants whose mail could not be rendered or delivered
    pub failed: Vec<ParticipantId>,
    /// Whether the aggregate audit mail went out
    pub audit_sent: bool,
    /// The audit log, one line per participant
    pub audit: String,
}

/// Mails draw results and the audit log
pub struct NotificationDispatcher {
    storage: Arc<dyn Storage>,
    mailer: Arc<dyn MailSender>,
    templates: Arc<dyn TemplateService>,
    clock: Arc<dyn Clock>,
    from_address: String,
    audit_address: String,
}

/// Everything one participant is told about
struct ParticipantSummary<'a> {
    wish_lists: Vec<&'a WishList>,
    grants: Vec<&'a Grant>,
}

impl NotificationDispatcher {
    /// Create a dispatcher
    #[must_use]
    pub fn new(
        storage: Arc<dyn Storage>,
        mailer: Arc<dyn MailSender>,
        templates: Arc<dyn TemplateService>,
        clock: Arc<dyn Clock>,
        from_address: impl Into<String>,
        audit_address: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            mailer,
            templates,
            clock,
            from_address: from_address.into(),
            audit_address: audit_address.into(),
        }
    }

    /// Mail every participant of a drawn round, then the audit log
    ///
    /// Marks the procedure as notified once the batch has been attempted,
    /// regardless of individual send failures. Delivery is at-least-once:
    /// if writing `notified_at` fails, the round stays in the notify step
    /// and the next tick mails the whole batch again.
    ///
    /// # Errors
    ///
    /// - [`EnrollmentError::NotFound`] if the procedure does not exist
    /// - [`EnrollmentError::InvalidInput`] if the draw has not completed or
    ///   participants were already notified
    /// - [`EnrollmentError::Storage`] if loading lists or grants fails
    #[instrument(skip(self), fields(procedure_id = %procedure_id))]
    pub fn dispatch(&self, procedure_id: &ProcedureId) -> Result<DispatchSummary> {
        let procedure = self.storage.procedure(procedure_id)?;
        if procedure.draw_completed_at.is_none() {
            return Err(EnrollmentError::InvalidInput(format!(
                "procedure {procedure_id} has no completed draw to report"
            )));
        }
        if procedure.notified_at.is_some() {
            return Err(EnrollmentError::InvalidInput(format!(
                "participants of procedure {procedure_id} were already notified"
            )));
        }

        let wish_lists = self.storage.wish_lists_for_procedure(procedure_id)?;
        let grants = self.storage.grants_for_procedure(procedure_id)?;
        let summaries = summarize(&wish_lists, &grants);
        let mut event_names = EventNames::new(self.storage.as_ref());

        let mut summary = DispatchSummary::default();
        let mut audit_lines = Vec::with_capacity(summaries.len());

        for (participant_id, participant_summary) in &summaries {
            let participant = match self.storage.participant(participant_id) {
                Ok(participant) => participant,
                Err(e) => {
                    warn!(
                        participant_id = %participant_id,
                        error = %e,
                        "Cannot notify unknown participant"
                    );
                    crate::metrics::record_notification(false);
                    summary.failed.push(*participant_id);
                    continue;
                },
            };

            let rendered_lists = participant_summary
                .wish_lists
                .iter()
                .map(|list| render_wish_list(list, &mut event_names))
                .collect::<Vec<_>>();
            let rendered_grants = participant_summary
                .grants
                .iter()
                .map(|grant| event_names.name(&grant.event_id))
                .collect::<Vec<_>>();

            audit_lines.push(format!(
                "{} | {} ({}) | wish lists: {} | grants: {}",
                procedure.name,
                participant.name,
                participant.username,
                if rendered_lists.is_empty() {
                    "-".to_string()
                } else {
                    rendered_lists.join("; ")
                },
                if rendered_grants.is_empty() {
                    "-".to_string()
                } else {
                    rendered_grants.join(", ")
                },
            ));

            match self.notify(&procedure, &participant, &rendered_lists, &rendered_grants) {
                Ok(()) => {
                    crate::metrics::record_notification(true);
                    summary.sent += 1;
                },
                Err(reason) => {
                    warn!(
                        participant_id = %participant.id,
                        to = %participant.email,
                        error = %reason,
                        "Draw notification failed, continuing with the batch"
                    );
                    crate::metrics::record_notification(false);
                    summary.failed.push(participant.id);
                },
            }
        }

        summary.audit = audit_lines.join("\n");
        summary.audit_sent = self.send_audit(&procedure, &summary.audit);

        let now = self.clock.now();
        self.storage
            .update_procedure(procedure_id, &mut |p| p.notified_at = Some(now))?;

        info!(
            procedure = %procedure.name,
            sent = summary.sent,
            failed = summary.failed.len(),
            "Participants notified"
        );
        Ok(summary)
    }

    fn notify(
        &self,
        procedure: &Procedure,
        participant: &Participant,
        wish_lists: &[String],
        grants: &[String],
    ) -> std::result::Result<(), String> {
        let kind = if grants.is_empty() {
            TemplateKind::DrawnNoLuck
        } else {
            TemplateKind::Drawn
        };

        let mut context = TemplateContext::new();
        context.insert("name".to_string(), participant.name.clone());
        context.insert("username".to_string(), participant.username.clone());
        context.insert("procedure".to_string(), procedure.name.clone());
        context.insert(
            "wish_lists".to_string(),
            wish_lists
                .iter()
                .enumerate()
                .map(|(i, list)| format!("  {}. {list}", i + 1))
                .collect::<Vec<_>>()
                .join("\n"),
        );
        context.insert(
            "grants".to_string(),
            grants
                .iter()
                .map(|name| format!("  - {name}"))
                .collect::<Vec<_>>()
                .join("\n"),
        );

        let rendered = self
            .templates
            .render(kind, &context)
            .map_err(|e| e.to_string())?;
        self.mailer
            .send(&MailMessage {
                to: participant.email.clone(),
                from: self.from_address.clone(),
                subject: rendered.subject,
                body: rendered.body,
            })
            .map_err(|e| e.to_string())
    }

    fn send_audit(&self, procedure: &Procedure, audit: &str) -> bool {
        let message = MailMessage {
            to: self.audit_address.clone(),
            from: self.from_address.clone(),
            subject: format!("Draw audit: {}", procedure.name),
            body: audit.to_string(),
        };
        match self.mailer.send(&message) {
            Ok(()) => true,
            Err(e) => {
                warn!(to = %self.audit_address, error = %e, "Audit mail failed");
                false
            },
        }
    }
}

impl std::fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationDispatcher")
            .field("from_address", &self.from_address)
            .field("audit_address", &self.audit_address)
            .finish_non_exhaustive()
    }
}

/// Group lists and grants by participant, keyed in a stable order
fn summarize<'a>(
    wish_lists: &'a [WishList],
    grants: &'a [Grant],
) -> BTreeMap<ParticipantId, ParticipantSummary<'a>> {
    let mut summaries: BTreeMap<ParticipantId, ParticipantSummary<'a>> = BTreeMap::new();
    for list in wish_lists {
        summaries
            .entry(list.participant_id)
            .or_insert_with(|| ParticipantSummary {
                wish_lists: Vec::new(),
                grants: Vec::new(),
            })
            .wish_lists
            .push(list);
    }
    for grant in grants {
        // Only participants with a wish list are notified.
        if let Some(summary) = summaries.get_mut(&grant.participant_id) {
            summary.grants.push(grant);
        }
    }
    for summary in summaries.values_mut() {
        summary.wish_lists.sort_by_key(|list| list.submitted_at);
    }
    summaries
}

/// Render a list as its event names in rank order, e.g. `Algebra > Biology`
fn render_wish_list(list: &WishList, names: &mut EventNames<'_>) -> String {
    list.items()
        .iter()
        .map(|item| names.name(&item.event_id))
        .collect::<Vec<_>>()
        .join(" > ")
}

/// Event name lookups, cached for the batch
struct EventNames<'a> {
    storage: &'a dyn Storage,
    cache: HashMap<EventId, String>,
}

impl<'a> EventNames<'a> {
    fn new(storage: &'a dyn Storage) -> Self {
        Self {
            storage,
            cache: HashMap::new(),
        }
    }

    /// Falls back to the id for events deleted since the draw
    fn name(&mut self, event_id: &EventId) -> String {
        self.cache
            .entry(*event_id)
            .or_insert_with(|| {
                self.storage
                    .event(event_id)
                    .map_or_else(|_| event_id.to_string(), |event| event.name)
            })
            .clone()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;
    use crate::types::{MandatorId, WishItem};

    #[test]
    fn grants_without_a_wish_list_are_not_summarized() {
        let procedure_id = ProcedureId::new();
        let mandator = MandatorId::new();
        let event = EventId::new();
        let alice = ParticipantId::new();
        let list = WishList::new(
            procedure_id,
            alice,
            alice,
            mandator,
            vec![WishItem::new(event, 1)],
            chrono::Utc::now(),
        );
        let grants = vec![
            Grant::new(alice, event, Some(procedure_id), mandator, chrono::Utc::now(), false),
            Grant::new(
                ParticipantId::new(),
                event,
                Some(procedure_id),
                mandator,
                chrono::Utc::now(),
                false,
            ),
        ];

        let lists = [list];
        let summaries = summarize(&lists, &grants);
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[&alice].grants.len(), 1);
        assert_eq!(summaries[&alice].wish_lists.len(), 1);
    }
}
