//! Application coordinator - builds the service, the controller store and the scheduler.

use super::services::{Collaborators, EnrollmentService, MailAddresses};
use crate::config::{Config, MailConfig};
use crate::controller::{ControllerStore, Scheduler};
use crate::eligibility::AllowAll;
use crate::mail::{ConsoleMailSender, MailError, MailSender};
use crate::storage::InMemoryStorage;
use crate::template::BuiltinTemplates;
use coursedraw_core::environment::{EntropySource, SystemClock};
use std::sync::Arc;

impl Collaborators {
    /// In-memory storage, no rule restrictions, built-in templates,
    /// entropy-seeded lottery and wall-clock time
    #[must_use]
    pub fn in_memory(mailer: Arc<dyn MailSender>) -> Self {
        Self {
            storage: Arc::new(InMemoryStorage::new()),
            eligibility: Arc::new(AllowAll),
            mailer,
            templates: Arc::new(BuiltinTemplates),
            random: Arc::new(EntropySource),
            clock: Arc::new(SystemClock),
        }
    }
}

/// Pick the mail transport the configuration asks for
///
/// # Errors
///
/// Returns [`MailError`] if the SMTP relay cannot be set up.
pub fn mailer_from_config(config: &MailConfig) -> Result<Arc<dyn MailSender>, MailError> {
    match &config.smtp {
        #[cfg(feature = "smtp")]
        Some(smtp) => {
            let sender = crate::mail::SmtpMailSender::new(
                &smtp.host,
                smtp.port,
                smtp.username.clone(),
                smtp.password.clone(),
            )?;
            tracing::info!(host = %smtp.host, port = smtp.port, "SMTP mail delivery enabled");
            Ok(Arc::new(sender))
        },
        #[cfg(not(feature = "smtp"))]
        Some(smtp) => {
            tracing::warn!(
                host = %smtp.host,
                "SMTP_HOST is set but the `smtp` feature is disabled; mails will only be logged"
            );
            Ok(Arc::new(ConsoleMailSender))
        },
        None => Ok(Arc::new(ConsoleMailSender)),
    }
}

/// Main enrollment application.
///
/// Coordinates:
/// - The [`EnrollmentService`] facade
/// - The round controller store
/// - The periodic scheduler driving it
pub struct EnrollmentApp {
    service: Arc<EnrollmentService>,
    scheduler: Scheduler,
}

impl EnrollmentApp {
    /// Build the application from configuration and collaborators
    #[must_use]
    pub fn new(config: &Config, collaborators: Collaborators) -> Self {
        let clock = Arc::clone(&collaborators.clock);
        let addresses = MailAddresses {
            from: config.mail.from_address.clone(),
            audit: config.mail.audit_address.clone(),
        };
        let service = Arc::new(EnrollmentService::new(collaborators, &addresses));
        let scheduler =
            Scheduler::new(service.controller_store(), clock, config.scheduler.period());
        Self { service, scheduler }
    }

    /// The request facade
    #[must_use]
    pub const fn service(&self) -> &Arc<EnrollmentService> {
        &self.service
    }

    /// The round controller store
    #[must_use]
    pub const fn store(&self) -> &ControllerStore {
        self.scheduler.store()
    }

    /// The tick driver
    #[must_use]
    pub const fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }
}

impl std::fmt::Debug for EnrollmentApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnrollmentApp")
            .field("service", &self.service)
            .field("scheduler", &self.scheduler)
            .finish()
    }
}
