//! Application wiring.
//!
//! - [`EnrollmentService`]: request facade routing through the procedure table
//! - [`EnrollmentApp`]: service plus round controller store and scheduler

mod coordinator;
mod services;

pub use coordinator::{EnrollmentApp, mailer_from_config};
pub use services::{Collaborators, EnrollmentService, MailAddresses};
