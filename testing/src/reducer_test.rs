//! Given-When-Then harness for reducers
//!
//! Runs actions through a reducer synchronously, without a runtime, and
//! hands the resulting state and the effects of the last action to
//! assertion closures. Effects are inspected, never executed.

#![allow(clippy::module_name_repetitions)] // ReducerTest is the natural name

use coursedraw_core::{effect::Effect, reducer::Reducer};

type StateAssertion<S> = Box<dyn FnOnce(&S)>;
type EffectAssertion<A> = Box<dyn FnOnce(&[Effect<A>])>;

/// Fluent reducer test
///
/// # Example
///
/// ```ignore
/// ReducerTest::new(RoundController::new())
///     .with_env(env)
///     .given_state(ControllerState::default())
///     .given_actions(vec![RoundAction::Tick { now }])
///     .when_action(RoundAction::RoundsLoaded { now, rounds })
///     .then_state(|state| assert!(state.is_in_flight(&id)))
///     .then_effects(|effects| assert_eq!(effects.len(), 1))
///     .run();
/// ```
pub struct ReducerTest<R>
where
    R: Reducer,
{
    reducer: R,
    environment: Option<R::Environment>,
    initial_state: Option<R::State>,
    history: Vec<R::Action>,
    action: Option<R::Action>,
    state_assertions: Vec<StateAssertion<R::State>>,
    effect_assertions: Vec<EffectAssertion<R::Action>>,
}

impl<R> ReducerTest<R>
where
    R: Reducer,
{
    /// Start a test for `reducer`
    #[must_use]
    pub const fn new(reducer: R) -> Self {
        Self {
            reducer,
            environment: None,
            initial_state: None,
            history: Vec::new(),
            action: None,
            state_assertions: Vec::new(),
            effect_assertions: Vec::new(),
        }
    }

    /// Set the environment
    #[must_use]
    pub fn with_env(mut self, env: R::Environment) -> Self {
        self.environment = Some(env);
        self
    }

    /// Set the initial state (Given)
    #[must_use]
    pub fn given_state(mut self, state: R::State) -> Self {
        self.initial_state = Some(state);
        self
    }

    /// Actions applied before the action under test; their effects are discarded
    #[must_use]
    pub fn given_actions(mut self, actions: Vec<R::Action>) -> Self {
        self.history = actions;
        self
    }

    /// The action under test (When)
    #[must_use]
    pub fn when_action(mut self, action: R::Action) -> Self {
        self.action = Some(action);
        self
    }

    /// Assert on the resulting state (Then)
    #[must_use]
    pub fn then_state<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&R::State) + 'static,
    {
        self.state_assertions.push(Box::new(assertion));
        self
    }

    /// Assert on the effects returned for the action under test (Then)
    #[must_use]
    pub fn then_effects<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&[Effect<R::Action>]) + 'static,
    {
        self.effect_assertions.push(Box::new(assertion));
        self
    }

    /// Run the reducer and every assertion, returning the final state
    ///
    /// # Panics
    ///
    /// Panics if state, action or environment was not provided, or if an
    /// assertion fails.
    #[allow(clippy::panic)] // Test harness reports misuse by panicking
    pub fn run(self) -> R::State {
        let Some(mut state) = self.initial_state else {
            panic!("ReducerTest: call given_state() before run()");
        };
        let Some(env) = self.environment else {
            panic!("ReducerTest: call with_env() before run()");
        };
        let Some(action) = self.action else {
            panic!("ReducerTest: call when_action() before run()");
        };

        for earlier in self.history {
            let _ = self.reducer.reduce(&mut state, earlier, &env);
        }

        let effects = self.reducer.reduce(&mut state, action, &env);

        for assertion in self.state_assertions {
            assertion(&state);
        }
        for assertion in self.effect_assertions {
            assertion(&effects);
        }

        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coursedraw_core::{SmallVec, smallvec};

    #[derive(Default)]
    struct Tally {
        seen: Vec<u8>,
    }

    struct TallyReducer;

    impl Reducer for TallyReducer {
        type State = Tally;
        type Action = u8;
        type Environment = u8;

        fn reduce(&self, state: &mut Tally, action: u8, limit: &u8) -> SmallVec<[Effect<u8>; 4]> {
            state.seen.push(action);
            if action < *limit {
                smallvec![Effect::Delay {
                    duration: std::time::Duration::ZERO,
                    action: Box::new(action + 1),
                }]
            } else {
                SmallVec::new()
            }
        }
    }

    #[test]
    fn history_is_applied_before_action_under_test() {
        let state = ReducerTest::new(TallyReducer)
            .with_env(5)
            .given_state(Tally::default())
            .given_actions(vec![1, 2])
            .when_action(3)
            .then_state(|state| assert_eq!(state.seen, vec![1, 2, 3]))
            .then_effects(|effects| assert_eq!(effects.len(), 1))
            .run();
        assert_eq!(state.seen.len(), 3);
    }

    #[test]
    fn no_effects_at_limit() {
        ReducerTest::new(TallyReducer)
            .with_env(5)
            .given_state(Tally::default())
            .when_action(5)
            .then_effects(|effects| assert!(effects.is_empty()))
            .run();
    }
}
