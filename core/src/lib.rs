//! # Course Draw Core
//!
//! Core traits and types shared by the course draw crates.
//!
//! The seat allocation subsystem is written as a functional core with an
//! imperative shell:
//!
//! - **State**: Domain state owned by a reducer (e.g. which rounds are in flight)
//! - **Action**: All inputs to a reducer (commands and the events produced by effects)
//! - **Reducer**: `(State, Action, Environment) → (State, Effects)`
//! - **Effect**: Descriptions of side effects, executed by the runtime `Store`
//! - **Environment**: Injected dependencies (clock, randomness, storage, mail)
//!
//! ## Example
//!
//! ```ignore
//! use coursedraw_core::*;
//!
//! impl Reducer for RoundController {
//!     type State = ControllerState;
//!     type Action = RoundAction;
//!     type Environment = ControllerEnvironment;
//!
//!     fn reduce(
//!         &self,
//!         state: &mut ControllerState,
//!         action: RoundAction,
//!         env: &ControllerEnvironment,
//!     ) -> SmallVec<[Effect<RoundAction>; 4]> {
//!         smallvec![Effect::None]
//!     }
//! }
//! ```

pub use chrono::{DateTime, Utc};
pub use smallvec::{SmallVec, smallvec};

/// Reducer module - The core trait for business logic
pub mod reducer {
    use super::SmallVec;
    use super::effect::Effect;

    /// The Reducer trait - core abstraction for business logic
    ///
    /// Reducers validate an action, update state in place and return the
    /// effects the runtime should execute. They never perform I/O themselves.
    pub trait Reducer {
        /// The state type this reducer operates on
        type State;

        /// The action type this reducer processes
        type Action;

        /// The environment type with injected dependencies
        type Environment;

        /// Reduce an action into state changes and effects
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> SmallVec<[Effect<Self::Action>; 4]>;
    }
}

/// Effect module - Side effect descriptions
///
/// Effects are values, not execution. The runtime decides when and how they run.
pub mod effect {
    use std::future::Future;
    use std::pin::Pin;
    use std::time::Duration;

    /// Effect type - describes a side effect to be executed
    ///
    /// # Type Parameters
    ///
    /// - `Action`: The action type that effects can produce (feedback loop)
    pub enum Effect<Action> {
        /// No-op effect
        None,

        /// Run effects concurrently
        Parallel(Vec<Effect<Action>>),

        /// Run effects one after another
        Sequential(Vec<Effect<Action>>),

        /// Dispatch an action after a delay
        Delay {
            /// How long to wait
            duration: Duration,
            /// Action to dispatch after delay
            action: Box<Action>,
        },

        /// Arbitrary async computation
        ///
        /// If the future yields `Some(action)`, the action is fed back into the reducer.
        Future(Pin<Box<dyn Future<Output = Option<Action>> + Send>>),
    }

    impl<Action> std::fmt::Debug for Effect<Action>
    where
        Action: std::fmt::Debug,
    {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Effect::None => write!(f, "Effect::None"),
                Effect::Parallel(effects) => {
                    f.debug_tuple("Effect::Parallel").field(effects).finish()
                },
                Effect::Sequential(effects) => {
                    f.debug_tuple("Effect::Sequential").field(effects).finish()
                },
                Effect::Delay { duration, action } => f
                    .debug_struct("Effect::Delay")
                    .field("duration", duration)
                    .field("action", action)
                    .finish(),
                Effect::Future(_) => write!(f, "Effect::Future(<future>)"),
            }
        }
    }

    impl<Action> Effect<Action> {
        /// Combine effects to run in parallel
        #[must_use]
        pub const fn merge(effects: Vec<Effect<Action>>) -> Effect<Action> {
            Effect::Parallel(effects)
        }

        /// Chain effects to run sequentially
        #[must_use]
        pub const fn chain(effects: Vec<Effect<Action>>) -> Effect<Action> {
            Effect::Sequential(effects)
        }

        /// Wrap an async computation that feeds one action back
        pub fn future<F>(fut: F) -> Effect<Action>
        where
            F: Future<Output = Option<Action>> + Send + 'static,
        {
            Effect::Future(Box::pin(fut))
        }

        /// Whether this effect does nothing
        #[must_use]
        pub const fn is_none(&self) -> bool {
            matches!(self, Effect::None)
        }
    }
}

/// Environment module - Dependency injection traits
///
/// Everything nondeterministic (time, randomness) is reached through these
/// traits so tests can substitute deterministic implementations.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }

    /// Source of fresh seeds for per-round reseeding.
    ///
    /// Consumers call [`RandomSource::next_seed`] once per lottery round and
    /// build a new generator from it; the source itself is never used as a
    /// generator. A deterministic source therefore pins every round's order.
    pub trait RandomSource: Send + Sync {
        /// Draw the seed for the next round
        fn next_seed(&self) -> u64;
    }

    /// Seeds taken from the thread-local entropy-backed generator
    #[derive(Debug, Clone, Copy, Default)]
    pub struct EntropySource;

    impl RandomSource for EntropySource {
        fn next_seed(&self) -> u64 {
            rand::random()
        }
    }
}
