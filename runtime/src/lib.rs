//! # Course Draw Runtime
//!
//! The `Store` owns reducer state and executes the effects reducers return.
//!
//! Unlike a fire-and-forget event loop, `send` drives the action it was given
//! to completion: every effect is awaited and every action an effect feeds
//! back is reduced before `send` returns. A periodic tick therefore finishes
//! its whole cascade (draw, notify, close) inside the call that triggered it.
//!
//! ## Example
//!
//! ```ignore
//! use coursedraw_runtime::Store;
//!
//! let store = Store::new(ControllerState::default(), RoundController::new(), env);
//! store.send(RoundAction::Tick { now }).await?;
//! let closed = store.state(|s| s.closed_rounds()).await;
//! ```

use coursedraw_core::{effect::Effect, reducer::Reducer};
use futures::future::{BoxFuture, FutureExt, join_all};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

/// Error types for the Store runtime
pub mod error {
    use thiserror::Error;

    /// Errors that can occur during Store operations
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum StoreError {
        /// Store is shutting down and not accepting new actions
        #[error("Store is shutting down")]
        ShutdownInProgress,

        /// A single `send` produced more feedback actions than allowed
        ///
        /// Guards against reducers that keep re-dispatching to themselves.
        #[error("Action limit of {0} exceeded while draining feedback actions")]
        ActionLimitExceeded(usize),
    }
}

pub use error::StoreError;

/// Default cap on actions reduced by one `send` (initial action plus feedback)
pub const DEFAULT_ACTION_LIMIT: usize = 10_000;

/// The Store - runtime for reducer execution
///
/// Cloning a store is cheap; clones share state.
pub struct Store<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    state: Arc<RwLock<S>>,
    reducer: Arc<R>,
    environment: Arc<E>,
    shutdown: Arc<AtomicBool>,
    action_limit: usize,
}

impl<S, A, E, R> Clone for Store<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            reducer: Arc::clone(&self.reducer),
            environment: Arc::clone(&self.environment),
            shutdown: Arc::clone(&self.shutdown),
            action_limit: self.action_limit,
        }
    }
}

impl<S, A, E, R> Store<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E> + Send + Sync + 'static,
    A: Send + std::fmt::Debug + 'static,
    S: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Create a new store with initial state, reducer, and environment
    #[must_use]
    pub fn new(initial_state: S, reducer: R, environment: E) -> Self {
        Self {
            state: Arc::new(RwLock::new(initial_state)),
            reducer: Arc::new(reducer),
            environment: Arc::new(environment),
            shutdown: Arc::new(AtomicBool::new(false)),
            action_limit: DEFAULT_ACTION_LIMIT,
        }
    }

    /// Override the feedback action cap
    #[must_use]
    pub const fn with_action_limit(mut self, limit: usize) -> Self {
        self.action_limit = limit;
        self
    }

    /// Send an action and drive its effects to completion
    ///
    /// The reducer runs under the state write lock; effects run after the
    /// lock is released so reads stay possible while an effect is blocked
    /// on I/O. Feedback actions are reduced in the order they were produced.
    ///
    /// Returns the number of actions reduced (at least one).
    ///
    /// # Errors
    ///
    /// - [`StoreError::ShutdownInProgress`] if [`Store::shutdown`] was called.
    /// - [`StoreError::ActionLimitExceeded`] if the feedback loop does not settle.
    #[tracing::instrument(skip(self, action), name = "store_send")]
    pub async fn send(&self, action: A) -> Result<usize, StoreError> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(StoreError::ShutdownInProgress);
        }

        let mut queue = VecDeque::from([action]);
        let mut reduced = 0usize;

        while let Some(action) = queue.pop_front() {
            reduced += 1;
            if reduced > self.action_limit {
                tracing::error!(limit = self.action_limit, "Feedback loop did not settle");
                return Err(StoreError::ActionLimitExceeded(self.action_limit));
            }

            tracing::trace!(?action, "Reducing action");
            let effects = {
                let mut state = self.state.write().await;
                self.reducer.reduce(&mut state, action, &self.environment)
            };

            for effect in effects {
                queue.extend(Self::run_effect(effect).await);
            }
        }

        metrics::counter!("store.actions.reduced").increment(reduced as u64);
        Ok(reduced)
    }

    /// Read from the current state
    pub async fn state<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&S) -> T,
    {
        let state = self.state.read().await;
        f(&state)
    }

    /// Stop accepting new actions
    ///
    /// A `send` already in progress finishes its cascade.
    pub fn shutdown(&self) {
        tracing::info!("Store shutdown requested");
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Whether [`Store::shutdown`] has been called
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Execute one effect, returning the actions it produced
    fn run_effect(effect: Effect<A>) -> BoxFuture<'static, Vec<A>> {
        async move {
            match effect {
                Effect::None => {
                    metrics::counter!("store.effects.executed", "type" => "none").increment(1);
                    Vec::new()
                },
                Effect::Future(fut) => {
                    metrics::counter!("store.effects.executed", "type" => "future").increment(1);
                    fut.await.into_iter().collect()
                },
                Effect::Delay { duration, action } => {
                    metrics::counter!("store.effects.executed", "type" => "delay").increment(1);
                    tracing::trace!(?duration, "Executing Effect::Delay");
                    tokio::time::sleep(duration).await;
                    vec![*action]
                },
                Effect::Sequential(effects) => {
                    metrics::counter!("store.effects.executed", "type" => "sequential")
                        .increment(1);
                    let mut produced = Vec::new();
                    for effect in effects {
                        produced.extend(Self::run_effect(effect).await);
                    }
                    produced
                },
                Effect::Parallel(effects) => {
                    metrics::counter!("store.effects.executed", "type" => "parallel")
                        .increment(1);
                    join_all(effects.into_iter().map(Self::run_effect))
                        .await
                        .into_iter()
                        .flatten()
                        .collect()
                },
            }
        }
        .boxed()
    }
}
