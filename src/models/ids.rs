//! Identifier newtypes shared across the domain models.
//!
//! ## Rust learning notes
//!
//! Wrapping a `String`/`Uuid` in a single-field tuple struct (a "newtype")
//! buys us compile-time protection against mixing up e.g. a `NodeId` and a
//! `TraceId` that both happen to be strings under the hood, at zero runtime
//! cost.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl<S: Into<String>> From<S> for $name {
            fn from(s: S) -> Self {
                $name(s.into())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

string_id!(WorkflowId);
string_id!(NodeId);
string_id!(RulesetId);
string_id!(ToolProviderId);
string_id!(PromptTemplateId);

/// Correlation token propagated through events and logs for a single instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TraceId(pub String);

impl TraceId {
    pub fn new() -> Self {
        TraceId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<S: Into<String>> From<S> for TraceId {
    fn from(s: S) -> Self {
        TraceId(s.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newtypes_round_trip_through_display() {
        let w = WorkflowId::from("line-a-temp-escalation");
        assert_eq!(w.as_str(), "line-a-temp-escalation");
        assert_eq!(format!("{w}"), "line-a-temp-escalation");
    }

    #[test]
    fn trace_id_defaults_are_unique() {
        let a = TraceId::new();
        let b = TraceId::new();
        assert_ne!(a, b);
    }
}
