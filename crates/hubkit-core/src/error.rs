// Object-model error taxonomy.
//
// Transport failures pass through from `hubkit-api`; everything else
// here is about data shape, argument validation, or session lifetime.

use thiserror::Error;

/// Errors produced by the object model.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// The underlying HTTP request failed.
    #[error(transparent)]
    Api(#[from] hubkit_api::Error),

    // ── Data shape ──────────────────────────────────────────────────
    /// A response payload did not have the shape the model requires.
    #[error("corrupt payload: {message}")]
    Data {
        message: String,
        /// The JSON fragment that failed to map, for diagnostics.
        fragment: serde_json::Value,
    },

    // ── Caller errors ───────────────────────────────────────────────
    /// A caller-supplied key component failed validation.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// A page index beyond the currently known page count was requested.
    #[error("page index {index} is out of range (page count is {count})")]
    PageOutOfRange { index: usize, count: usize },

    /// An issue without the pull-request marker was viewed as one.
    #[error("issue #{number} is not a pull request")]
    NotAPullRequest { number: u64 },

    // ── Lifetime ────────────────────────────────────────────────────
    /// The owning session was dropped while an entity was still in use.
    #[error("the owning session has been dropped")]
    SessionClosed,
}

impl Error {
    /// Shorthand for a [`Error::Data`] carrying the offending fragment.
    pub(crate) fn data(message: impl Into<String>, fragment: &serde_json::Value) -> Self {
        Self::Data {
            message: message.into(),
            fragment: fragment.clone(),
        }
    }

    /// True when retrying the same call later could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Api(hubkit_api::Error::Transport(_)))
    }
}
