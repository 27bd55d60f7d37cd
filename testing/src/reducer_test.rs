//! Given/When/Then harness for reducers.
//!
//! Reducers are pure apart from the effects they return, so a reducer test
//! never needs a runtime: seed the state, optionally replay earlier events,
//! send the command under test and inspect the state and the effect
//! descriptions it produced.

#![allow(clippy::module_name_repetitions)]

use shackles_core::{effect::Effect, reducer::Reducer};

type StateAssertion<S> = Box<dyn FnOnce(&S)>;
type EffectAssertion<A> = Box<dyn FnOnce(&[Effect<A>])>;

/// Fluent reducer test.
///
/// # Example
///
/// ```ignore
/// use shackles_testing::{assertions, ReducerTest};
///
/// ReducerTest::new(VerificationReducer)
///     .with_env(env)
///     .given_state(VerificationState::for_participant(pending))
///     .given_actions(vec![VerificationAction::TransitionCommitted { .. }])
///     .when_action(VerificationAction::VerifyPayment { .. })
///     .then_state(|state| assert!(state.last_error.is_some()))
///     .then_effects(assertions::assert_no_effects)
///     .run();
/// ```
pub struct ReducerTest<R, S, A, E>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    reducer: R,
    environment: Option<E>,
    initial_state: Option<S>,
    history: Vec<A>,
    action: Option<A>,
    state_assertions: Vec<StateAssertion<S>>,
    effect_assertions: Vec<EffectAssertion<A>>,
}

impl<R, S, A, E> ReducerTest<R, S, A, E>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    /// Start a test for `reducer`.
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

    /// Set the environment.
    #[must_use]
    pub fn with_env(mut self, env: E) -> Self {
        self.environment = Some(env);
        self
    }

    /// Given: the starting state.
    #[must_use]
    pub fn given_state(mut self, state: S) -> Self {
        self.initial_state = Some(state);
        self
    }

    /// Given: actions already applied before the one under test.
    ///
    /// Their effects are dropped without being executed.
    #[must_use]
    pub fn given_actions(mut self, actions: Vec<A>) -> Self {
        self.history = actions;
        self
    }

    /// When: the action under test.
    #[must_use]
    pub fn when_action(mut self, action: A) -> Self {
        self.action = Some(action);
        self
    }

    /// Then: an assertion on the resulting state.
    #[must_use]
    pub fn then_state<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&S) + 'static,
    {
        self.state_assertions.push(Box::new(assertion));
        self
    }

    /// Then: an assertion on the effects returned for the action under test.
    #[must_use]
    pub fn then_effects<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&[Effect<A>]) + 'static,
    {
        self.effect_assertions.push(Box::new(assertion));
        self
    }

    /// Run the reducer and every assertion.
    ///
    /// # Panics
    ///
    /// Panics if the state, action or environment is missing, or if any
    /// assertion fails.
    #[allow(clippy::panic, clippy::expect_used)]
    pub fn run(self) {
        let mut state = self
            .initial_state
            .expect("Initial state must be set with given_state()");
        let env = self
            .environment
            .expect("Environment must be set with with_env()");
        let action = self.action.expect("Action must be set with when_action()");

        for earlier in self.history {
            drop(self.reducer.reduce(&mut state, earlier, &env));
        }

        let effects = self.reducer.reduce(&mut state, action, &env);

        for assertion in self.state_assertions {
            assertion(&state);
        }
        for assertion in self.effect_assertions {
            assertion(&effects);
        }
    }
}

/// Helper assertions for effects
pub mod assertions {
    use shackles_core::effect::Effect;

    /// Assert that nothing would be executed.
    ///
    /// `Effect::None` and empty or all-`None` compositions count as nothing.
    ///
    /// # Panics
    ///
    /// Panics if any effect does work.
    #[allow(clippy::panic)]
    pub fn assert_no_effects<A: std::fmt::Debug>(effects: &[Effect<A>]) {
        assert!(
            effects.iter().all(Effect::is_none),
            "Expected no effects, but found {}: {:?}",
            effects.len(),
            effects
        );
    }

    /// Assert the number of effects
    ///
    /// # Panics
    ///
    /// Panics if the number of effects doesn't match expected.
    #[allow(clippy::panic)]
    pub fn assert_effects_count<A>(effects: &[Effect<A>], expected: usize) {
        assert_eq!(
            effects.len(),
            expected,
            "Expected {expected} effects, but found {}",
            effects.len()
        );
    }

    /// Assert that at least one effect performs async work.
    ///
    /// Looks inside `Parallel` and `Sequential` compositions.
    ///
    /// # Panics
    ///
    /// Panics if no `Future` effect is found.
    #[allow(clippy::panic)]
    pub fn assert_has_future_effect<A>(effects: &[Effect<A>]) {
        fn contains_future<A>(effect: &Effect<A>) -> bool {
            match effect {
                Effect::Future(_) => true,
                Effect::Parallel(inner) | Effect::Sequential(inner) => {
                    inner.iter().any(contains_future)
                },
                Effect::None | Effect::Delay { .. } => false,
            }
        }

        assert!(
            effects.iter().any(contains_future),
            "Expected at least one Future effect, but none found"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shackles_core::{smallvec, SmallVec};

    #[derive(Clone, Debug)]
    struct Gate {
        admitted: u32,
        open: bool,
    }

    #[derive(Clone, Debug)]
    enum GateAction {
        Open,
        Admit,
        Admitted,
    }

    struct GateReducer;

    impl Reducer for GateReducer {
        type State = Gate;
        type Action = GateAction;
        type Environment = ();

        fn reduce(
            &self,
            state: &mut Gate,
            action: GateAction,
            _env: &(),
        ) -> SmallVec<[Effect<GateAction>; 4]> {
            match action {
                GateAction::Open => {
                    state.open = true;
                    SmallVec::new()
                },
                GateAction::Admit if !state.open => smallvec![Effect::None],
                GateAction::Admit => smallvec![Effect::chain(vec![Effect::Future(Box::pin(
                    async { Some(GateAction::Admitted) }
                ))])],
                GateAction::Admitted => {
                    state.admitted += 1;
                    SmallVec::new()
                },
            }
        }
    }

    #[test]
    fn closed_gate_does_nothing() {
        ReducerTest::new(GateReducer)
            .with_env(())
            .given_state(Gate { admitted: 0, open: false })
            .when_action(GateAction::Admit)
            .then_state(|state| assert_eq!(state.admitted, 0))
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn history_is_replayed_before_the_action() {
        ReducerTest::new(GateReducer)
            .with_env(())
            .given_state(Gate { admitted: 0, open: false })
            .given_actions(vec![GateAction::Open, GateAction::Admitted])
            .when_action(GateAction::Admit)
            .then_state(|state| {
                assert!(state.open);
                assert_eq!(state.admitted, 1);
            })
            .then_effects(|effects| {
                assertions::assert_effects_count(effects, 1);
                assertions::assert_has_future_effect(effects);
            })
            .run();
    }
}
