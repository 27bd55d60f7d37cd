//! # Shackles Runtime
//!
//! The [`Store`] drives a reducer: it applies an action, executes the effects
//! the reducer describes and feeds every action those effects produce back into
//! the reducer until the system is quiescent.
//!
//! Stores here are request-scoped. A service loads the participant it is
//! working on, seeds a fresh store with that state, sends one command and reads
//! the outcome back. `send` therefore resolves only once every effect chained
//! off the command has finished.
//!
//! ## Example
//!
//! ```ignore
//! use shackles_runtime::Store;
//!
//! let store = Store::new(CheckInState::for_participant(participant), CheckInReducer, env);
//! store.send(CheckInAction::CheckIn { target, staff }).await?;
//! let outcome = store.state(|s| s.outcome.clone()).await;
//! ```

use futures::future::{join_all, BoxFuture};
use shackles_core::{effect::Effect, reducer::Reducer};
use std::collections::VecDeque;
use tokio::sync::RwLock;

/// Bounded retry with exponential backoff
pub mod retry;

/// Error types for the Store runtime
pub mod error {
    use thiserror::Error;

    /// Errors that can occur during Store operations
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum StoreError {
        /// The reducer kept producing feedback actions past the configured limit.
        ///
        /// This indicates a reducer that answers an event with an effect that
        /// produces the same event again.
        #[error("Feedback loop exceeded {0} actions")]
        FeedbackLimitExceeded(usize),
    }
}

pub use error::StoreError;
pub use retry::{retry_with_predicate, RetryError, RetryPolicy};

/// Default cap on actions processed by a single `send`.
pub const DEFAULT_MAX_ACTIONS: usize = 64;

/// The Store - runtime for reducer execution
///
/// # Type Parameters
///
/// - `S`: State type
/// - `A`: Action type
/// - `E`: Environment type
/// - `R`: Reducer type
pub struct Store<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    state: RwLock<S>,
    reducer: R,
    environment: E,
    max_actions: usize,
}

impl<S, A, E, R> Store<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E> + Send + Sync,
    A: Send + std::fmt::Debug + 'static,
    S: Send + Sync,
    E: Send + Sync,
{
    /// Create a new store with initial state, reducer, and environment
    #[must_use]
    pub fn new(initial_state: S, reducer: R, environment: E) -> Self {
        Self {
            state: RwLock::new(initial_state),
            reducer,
            environment,
            max_actions: DEFAULT_MAX_ACTIONS,
        }
    }

    /// Override the feedback-loop guard.
    #[must_use]
    pub const fn with_max_actions(mut self, max_actions: usize) -> Self {
        self.max_actions = max_actions;
        self
    }

    /// Send an action and run it, and everything it causes, to completion.
    ///
    /// Actions are processed in FIFO order. Effects returned for one action are
    /// executed before the next queued action is reduced, so the state seen by a
    /// feedback action always includes the changes of the action that caused it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::FeedbackLimitExceeded`] if more than `max_actions`
    /// actions are processed for this one `send`.
    #[tracing::instrument(skip(self, action), name = "store_send")]
    pub async fn send(&self, action: A) -> Result<(), StoreError> {
        let mut queue = VecDeque::from([action]);
        let mut processed = 0usize;

        while let Some(action) = queue.pop_front() {
            processed += 1;
            if processed > self.max_actions {
                tracing::error!(limit = self.max_actions, "Store feedback loop exceeded limit");
                return Err(StoreError::FeedbackLimitExceeded(self.max_actions));
            }

            tracing::trace!(?action, "Reducing action");
            let effects = {
                let mut state = self.state.write().await;
                self.reducer.reduce(&mut *state, action, &self.environment)
            };

            for effect in effects {
                queue.extend(execute_effect(effect).await);
            }
        }

        Ok(())
    }

    /// Read current state via a closure
    pub async fn state<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&S) -> T,
    {
        let state = self.state.read().await;
        f(&*state)
    }

    /// Consume the store and return its final state.
    pub fn into_state(self) -> S {
        self.state.into_inner()
    }
}

/// Execute an effect and collect the actions it produces.
///
/// # Effect Types
///
/// - `None`: No-op
/// - `Future`: Awaited, its action (if any) is returned
/// - `Delay`: Sleeps, then returns the action
/// - `Parallel`: Executes effects concurrently, actions in declaration order
/// - `Sequential`: Executes effects in order, waiting for each to complete
fn execute_effect<A>(effect: Effect<A>) -> BoxFuture<'static, Vec<A>>
where
    A: Send + 'static,
{
    Box::pin(async move {
        match effect {
            Effect::None => {
                metrics::counter!("shackles_store_effects_total", "type" => "none").increment(1);
                Vec::new()
            },
            Effect::Future(future) => {
                metrics::counter!("shackles_store_effects_total", "type" => "future").increment(1);
                future.await.into_iter().collect()
            },
            Effect::Delay { duration, action } => {
                metrics::counter!("shackles_store_effects_total", "type" => "delay").increment(1);
                tokio::time::sleep(duration).await;
                vec![*action]
            },
            Effect::Parallel(effects) => {
                metrics::counter!("shackles_store_effects_total", "type" => "parallel")
                    .increment(1);
                join_all(effects.into_iter().map(execute_effect))
                    .await
                    .into_iter()
                    .flatten()
                    .collect()
            },
            Effect::Sequential(effects) => {
                metrics::counter!("shackles_store_effects_total", "type" => "sequential")
                    .increment(1);
                let mut actions = Vec::new();
                for effect in effects {
                    actions.extend(execute_effect(effect).await);
                }
                actions
            },
        }
    })
}
