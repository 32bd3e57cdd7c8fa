use thiserror::Error;

/// Errors raised by the settlement machinery itself.
///
/// These never escape as a panic or a `Result` from the settle calls.
/// They are delivered as rejection reasons, wrapped in
/// [`Value::Error`](crate::Value::Error), so every observer sees them the
/// same way it sees any other rejection.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// A deferred was resolved or rejected with its own promise.
    #[error("deferred settled with its own promise")]
    SelfResolution,
}
