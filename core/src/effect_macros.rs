//! Declarative macros for ergonomic effect construction
//!
//! Reducers describe their I/O as `Effect::Future` values; these macros keep
//! that description to the async body itself.

/// Create an `Effect::Future` from an async block
///
/// The body is moved into the future and must evaluate to `Option<Action>`.
///
/// # Example
///
/// ```rust,ignore
/// use shackles_core::async_effect;
///
/// async_effect! {
///     match attendance.insert_attendance(&record).await {
///         Ok(()) => Some(CheckInAction::CheckedIn { record }),
///         Err(error) => Some(CheckInAction::CheckInFailed { error: error.into() }),
///     }
/// }
/// ```
#[macro_export]
macro_rules! async_effect {
    ($($body:tt)*) => {
        $crate::effect::Effect::Future(
            ::std::boxed::Box::pin(async move { $($body)* })
        )
    };
}

/// Create an `Effect::Delay` for scheduling delayed actions
///
/// # Example
///
/// ```rust,ignore
/// use shackles_core::delay;
/// use std::time::Duration;
///
/// delay! {
///     duration: Duration::from_millis(50),
///     action: Action::HoldExpired { key }
/// }
/// ```
#[macro_export]
macro_rules! delay {
    (
        duration: $duration:expr,
        action: $action:expr
    ) => {
        $crate::effect::Effect::Delay {
            duration: $duration,
            action: ::std::boxed::Box::new($action),
        }
    };
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use crate::effect::Effect;
    use std::time::Duration;

    #[derive(Clone, Debug, PartialEq)]
    enum TestAction {
        Loaded { value: i32 },
        Expired,
    }

    #[tokio::test]
    async fn async_effect_resolves_to_feedback_action() {
        let effect = async_effect! {
            Some(TestAction::Loaded { value: 42 })
        };

        let Effect::Future(future) = effect else {
            panic!("expected a future effect");
        };
        assert_eq!(future.await, Some(TestAction::Loaded { value: 42 }));
    }

    #[test]
    fn delay_macro_boxes_the_action() {
        let effect = delay! {
            duration: Duration::from_secs(30),
            action: TestAction::Expired
        };

        assert!(matches!(
            effect,
            Effect::Delay { ref action, .. } if **action == TestAction::Expired
        ));
    }
}
