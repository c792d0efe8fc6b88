//! Course Enrollment - lottery-based seat allocation built on the Course Draw framework
//!
//! Participants register for capacity-limited events through *procedures*.
//! Three procedure kinds exist:
//!
//! - **Draw**: participants submit ranked wish lists while the round is open;
//!   at the draw instant a multi-round lottery distributes the seats
//! - **Fifo**: seats are granted immediately to whoever asks first
//! - **Confirm**: an administrator registers a participant directly
//!
//! # Architecture
//!
//! ```text
//!                    ┌────────────────────┐
//!  requests ───────▶ │ EnrollmentService  │ ── procedure dispatch table
//!                    └────────────────────┘
//!                      │             │
//!            ┌─────────┘             └─────────┐
//!            ▼                                 ▼
//!   ┌────────────────┐                ┌────────────────┐
//!   │  WishListDesk  │                │   Registrar    │
//!   └────────────────┘                └────────────────┘
//!            │                                 │
//!            ▼                                 ▼
//!   ┌────────────────┐   try_occupy   ┌────────────────┐
//!   │AllocationEngine│ ─────────────▶ │   SeatLedger   │
//!   └────────────────┘                └────────────────┘
//!            ▲
//!            │ draw / resume / notify / close
//!   ┌────────────────┐      tick      ┌────────────────┐
//!   │RoundController │ ◀───────────── │   Scheduler    │
//!   └────────────────┘                └────────────────┘
//! ```
//!
//! # Key Features
//!
//! ## 1. Capacity is never exceeded
//!
//! Every seat goes through [`SeatLedger::try_occupy`], which checks and writes
//! under a per-event lock. Concurrent registrations for the last seat see
//! exactly one winner.
//!
//! ## 2. Fair, replayable lottery
//!
//! Each lottery round shuffles the remaining wish lists with a fresh seed.
//! Inject a fixed [`coursedraw_core::environment::RandomSource`] and the whole
//! draw replays identically.
//!
//! ## 3. Crash-safe round lifecycle
//!
//! The round controller only acts on durable markers (`draw_completed_at`,
//! `notified_at`, `closed_at`), so a restarted process resumes an interrupted
//! draw instead of repeating it, and mails each participant exactly once.
//!
//! # Usage
//!
//! See the [`app`] module for wiring and the `demo` binary for a full round.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod app;
pub mod config;
pub mod controller;
pub mod eligibility;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod locks;
pub mod mail;
pub mod metrics;
pub mod notification;
pub mod procedure;
pub mod registration;
pub mod revocation;
pub mod storage;
pub mod template;
pub mod types;
pub mod wishlist;

#[cfg(feature = "test-utils")]
pub mod mocks;

pub use app::{Collaborators, EnrollmentApp, EnrollmentService, MailAddresses};
pub use config::Config;
pub use controller::{RoundAction, RoundController, RoundStep, Scheduler};
pub use engine::{AllocationEngine, DrawReport};
pub use error::{EnrollmentError, Result};
pub use ledger::{LedgerError, SeatLedger, SeatRequest};
pub use notification::{DispatchSummary, NotificationDispatcher};
pub use registration::{Registrar, RegistrationRequest};
pub use revocation::{Revocation, RevocationSummary};
pub use types::*;
pub use wishlist::{WishListDesk, WishListSubmission};
