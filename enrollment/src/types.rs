//! Domain types for course enrollment.
//!
//! Identifiers, entities and value objects shared by the ledger, the draw
//! engine, the round controller and the notification dispatcher.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random `", stringify!($name), "`")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Create a `", stringify!($name), "` from a `Uuid`")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a participant (student)
    ParticipantId
);
uuid_id!(
    /// Unique identifier for a course event (the thing that has seats)
    EventId
);
uuid_id!(
    /// Unique identifier for a registration procedure (a round)
    ProcedureId
);
uuid_id!(
    /// Unique identifier for a mandator (tenant)
    MandatorId
);
uuid_id!(
    /// Unique identifier for a submitted wish list
    WishListId
);
uuid_id!(
    /// Unique identifier for a grant (confirmed registration)
    GrantId
);

// ============================================================================
// Value Objects
// ============================================================================

/// Maximum number of participants an event admits
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Capacity(pub u32);

impl Capacity {
    /// Creates a new `Capacity`
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Returns the capacity value
    #[must_use]
    pub const fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for Capacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Entities
// ============================================================================

/// A person who can hold seats
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Participant ID
    pub id: ParticipantId,
    /// Display name used in mails and the audit log
    pub name: String,
    /// Login name
    pub username: String,
    /// Mail address for notifications
    pub email: String,
}

impl Participant {
    /// Creates a participant with a fresh ID
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        username: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        Self {
            id: ParticipantId::new(),
            name: name.into(),
            username: username.into(),
            email: email.into(),
        }
    }
}

/// A course event with limited seats
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Event ID
    pub id: EventId,
    /// Human-readable name
    pub name: String,
    /// Owning mandator
    pub mandator_id: MandatorId,
    /// Seat limit
    pub capacity: Capacity,
}

impl Event {
    /// Creates an event with a fresh ID
    #[must_use]
    pub fn new(name: impl Into<String>, mandator_id: MandatorId, capacity: Capacity) -> Self {
        Self {
            id: EventId::new(),
            name: name.into(),
            mandator_id,
            capacity,
        }
    }
}

/// Lifecycle of an allocation round
///
/// `Open → Drawn → Closed`, each step taken exactly once.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoundState {
    /// Accepting wish lists
    Open,
    /// Lottery started; no more submissions
    Drawn,
    /// Participants notified and wish lists purged
    Closed,
}

impl fmt::Display for RoundState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Open => "OPEN",
            Self::Drawn => "DRAWN",
            Self::Closed => "CLOSED",
        };
        f.write_str(label)
    }
}

/// How a procedure hands out seats
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcedureKind {
    /// First come, first served
    Fifo,
    /// Ranked wish lists resolved by lottery
    Draw,
    /// Registration confirmed by an administrator on the participant's behalf
    Confirm,
}

impl fmt::Display for ProcedureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Fifo => "fifo",
            Self::Draw => "draw",
            Self::Confirm => "confirm",
        };
        f.write_str(label)
    }
}

/// A registration procedure; for draws this is the allocation round
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Procedure {
    /// Procedure ID
    pub id: ProcedureId,
    /// Human-readable name
    pub name: String,
    /// Owning mandator
    pub mandator_id: MandatorId,
    /// Allocation strategy
    pub kind: ProcedureKind,
    /// Events participants may register for through this procedure
    pub event_ids: Vec<EventId>,
    /// Round lifecycle state
    pub state: RoundState,
    /// When the lottery runs (draw procedures only)
    pub draw_at: Option<DateTime<Utc>>,
    /// Set once every lottery round has been processed
    pub draw_completed_at: Option<DateTime<Utc>>,
    /// Set once participants have been mailed
    pub notified_at: Option<DateTime<Utc>>,
    /// Set when the round reaches `Closed`
    pub closed_at: Option<DateTime<Utc>>,
}

impl Procedure {
    fn with_kind(
        kind: ProcedureKind,
        name: impl Into<String>,
        mandator_id: MandatorId,
        event_ids: Vec<EventId>,
        draw_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: ProcedureId::new(),
            name: name.into(),
            mandator_id,
            kind,
            event_ids,
            state: RoundState::Open,
            draw_at,
            draw_completed_at: None,
            notified_at: None,
            closed_at: None,
        }
    }

    /// A lottery round drawn at `draw_at`
    #[must_use]
    pub fn draw(
        name: impl Into<String>,
        mandator_id: MandatorId,
        event_ids: Vec<EventId>,
        draw_at: DateTime<Utc>,
    ) -> Self {
        Self::with_kind(ProcedureKind::Draw, name, mandator_id, event_ids, Some(draw_at))
    }

    /// A first-come-first-served procedure
    #[must_use]
    pub fn fifo(name: impl Into<String>, mandator_id: MandatorId, event_ids: Vec<EventId>) -> Self {
        Self::with_kind(ProcedureKind::Fifo, name, mandator_id, event_ids, None)
    }

    /// An administrator-confirmed procedure
    #[must_use]
    pub fn confirm(
        name: impl Into<String>,
        mandator_id: MandatorId,
        event_ids: Vec<EventId>,
    ) -> Self {
        Self::with_kind(ProcedureKind::Confirm, name, mandator_id, event_ids, None)
    }

    /// Whether `event_id` is offered by this procedure
    #[must_use]
    pub fn offers(&self, event_id: &EventId) -> bool {
        self.event_ids.contains(event_id)
    }

    /// Whether the draw instant has been reached
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.draw_at.is_some_and(|at| at <= now)
    }

    /// A draw that started but never recorded completion
    #[must_use]
    pub const fn is_interrupted_draw(&self) -> bool {
        matches!(self.state, RoundState::Drawn) && self.draw_completed_at.is_none()
    }
}

/// One ranked seat request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WishItem {
    /// Requested event
    pub event_id: EventId,
    /// Priority value; lower is preferred, 1 is the highest
    pub priority: u32,
}

impl WishItem {
    /// Creates a wish item
    #[must_use]
    pub const fn new(event_id: EventId, priority: u32) -> Self {
        Self { event_id, priority }
    }
}

/// A participant's ranked seat requests for one round
///
/// Items are kept sorted by priority. Never mutated after submission.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WishList {
    /// Wish list ID
    pub id: WishListId,
    /// Round this list was submitted to
    pub procedure_id: ProcedureId,
    /// Who the seats are for
    pub participant_id: ParticipantId,
    /// Who submitted (an administrator may submit on a participant's behalf)
    pub initiator_id: ParticipantId,
    /// Tenant
    pub mandator_id: MandatorId,
    /// Requests in priority order
    items: Vec<WishItem>,
    /// Submission time
    pub submitted_at: DateTime<Utc>,
}

impl WishList {
    /// Creates a wish list, ordering `items` by priority
    #[must_use]
    pub fn new(
        procedure_id: ProcedureId,
        participant_id: ParticipantId,
        initiator_id: ParticipantId,
        mandator_id: MandatorId,
        mut items: Vec<WishItem>,
        submitted_at: DateTime<Utc>,
    ) -> Self {
        items.sort_by_key(|item| item.priority);
        Self {
            id: WishListId::new(),
            procedure_id,
            participant_id,
            initiator_id,
            mandator_id,
            items,
            submitted_at,
        }
    }

    /// Items in priority order
    #[must_use]
    pub fn items(&self) -> &[WishItem] {
        &self.items
    }

    /// Number of items
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the list has no items
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The item at 1-based `rank` (position in priority order)
    #[must_use]
    pub fn item_at_rank(&self, rank: usize) -> Option<&WishItem> {
        rank.checked_sub(1).and_then(|index| self.items.get(index))
    }

    /// Whether any item requests `event_id`
    #[must_use]
    pub fn requests(&self, event_id: &EventId) -> bool {
        self.items.iter().any(|item| item.event_id == *event_id)
    }
}

/// A confirmed registration: the participant occupies a seat in the event
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    /// Grant ID
    pub id: GrantId,
    /// Seat holder
    pub participant_id: ParticipantId,
    /// Event the seat belongs to
    pub event_id: EventId,
    /// Procedure that created the grant; cleared if the procedure is removed
    pub procedure_id: Option<ProcedureId>,
    /// Tenant
    pub mandator_id: MandatorId,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Exam-only registrations do not occupy a seat
    pub exam_only: bool,
}

impl Grant {
    /// Creates a grant with a fresh ID
    #[must_use]
    pub fn new(
        participant_id: ParticipantId,
        event_id: EventId,
        procedure_id: Option<ProcedureId>,
        mandator_id: MandatorId,
        created_at: DateTime<Utc>,
        exam_only: bool,
    ) -> Self {
        Self {
            id: GrantId::new(),
            participant_id,
            event_id,
            procedure_id,
            mandator_id,
            created_at,
            exam_only,
        }
    }

    /// Whether this grant counts against the event's capacity
    #[must_use]
    pub const fn occupies_seat(&self) -> bool {
        !self.exam_only
    }
}

/// Occupancy of one event, derived from its live grants
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Event
    pub event_id: EventId,
    /// Seat limit
    pub capacity: Capacity,
    /// Seat-occupying grants
    pub occupied: u32,
}

impl LedgerEntry {
    /// Whether at least one seat is free
    #[must_use]
    pub const fn has_space(&self) -> bool {
        self.occupied < self.capacity.value()
    }

    /// Free seats
    #[must_use]
    pub const fn remaining(&self) -> u32 {
        self.capacity.value().saturating_sub(self.occupied)
    }
}

/// Progress marker written at the start of every lottery round
///
/// Lets an interrupted draw continue from the round it was in, among the
/// wish lists that were still alive at that point.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrawCheckpoint {
    /// Round being drawn
    pub procedure_id: ProcedureId,
    /// 1-based lottery round about to be processed
    pub lottery_round: usize,
    /// Wish lists alive at the start of that round
    pub alive: Vec<WishListId>,
    /// When the checkpoint was written
    pub recorded_at: DateTime<Utc>,
}
