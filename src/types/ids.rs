//! Strongly-typed identifiers.
//!
//! Every id that crosses a store or bus boundary gets its own newtype, so a
//! pipeline execution id can never be handed to a ledger lookup by accident.
//! Pipeline-minted ids are UUIDv4; the externally-issued [`UserId`] is
//! validated as a store-path segment instead.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Generates a UUIDv4-backed id newtype.
///
/// `new()` mints a fresh id. `from_string` re-wraps an id read back from a
/// store row or message and only checks non-emptiness, because persisted
/// documents may predate the current id format.
macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            pub fn from_string(s: String) -> Result<Self, &'static str> {
                if s.is_empty() {
                    return Err(concat!(stringify!($name), " cannot be empty"));
                }
                Ok(Self(s))
            }

            pub fn as_str(&self) -> &str {
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
                f.write_str(&self.0)
            }
        }
    };
}

uuid_id!(
    /// Stable within one pipeline execution; preserved across resumes.
    ActivityId
);
uuid_id!(
    /// One per logical pipeline invocation, minted at the splitter.
    PipelineExecutionId
);
uuid_id!(
    /// One per stage invocation; keys the audit rows.
    ExecutionId
);
uuid_id!(
    /// One per paused activity awaiting user input.
    PendingInputId
);
uuid_id!(
    /// Stamped by source intake; one half of the splitter dedup key.
    RawMessageId
);
uuid_id!(
    /// A user's pipeline configuration document.
    PipelineId
);

/// Opaque user id issued by the auth layer.
///
/// The value is used verbatim as the `users/{userId}` document path segment,
/// so path separators are rejected at construction. Never minted here; it
/// always arrives from outside.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    pub fn from_string(s: String) -> Result<Self, &'static str> {
        if s.is_empty() {
            return Err("UserId cannot be empty");
        }
        if s.contains('/') {
            return Err("UserId cannot contain a path separator");
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
