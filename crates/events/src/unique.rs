//! Unique constraint operations.
//!
//! A claim on a logically unique value (a domain name, a username within an
//! organization, a membership) that the append-only log does not index itself.
//! Claims live in the store's constraint table and are only ever mutated inside the
//! same atomic push as the events that justify them.

use serde::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UniqueAction {
    /// Claim the key; fails the whole push if it is already claimed.
    Add,
    /// Release the key. Releasing an unclaimed key is not an error.
    Remove,
    /// Release every key of the pushing aggregate's instance.
    RemoveInstance,
}

/// Whether a key is unique within one instance or across all of them.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintScope {
    #[default]
    Instance,
    Global,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniqueConstraint {
    pub unique_type: String,
    pub unique_field: String,
    pub action: UniqueAction,
    /// Reported verbatim when an `Add` collides.
    pub error_message: String,
    pub scope: ConstraintScope,
}

impl UniqueConstraint {
    pub fn add(
        unique_type: impl Into<String>,
        unique_field: impl Into<String>,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            unique_type: unique_type.into(),
            unique_field: unique_field.into(),
            action: UniqueAction::Add,
            error_message: error_message.into(),
            scope: ConstraintScope::Instance,
        }
    }

    pub fn remove(unique_type: impl Into<String>, unique_field: impl Into<String>) -> Self {
        Self {
            unique_type: unique_type.into(),
            unique_field: unique_field.into(),
            action: UniqueAction::Remove,
            error_message: String::new(),
            scope: ConstraintScope::Instance,
        }
    }

    pub fn remove_instance() -> Self {
        Self {
            unique_type: String::new(),
            unique_field: String::new(),
            action: UniqueAction::RemoveInstance,
            error_message: String::new(),
            scope: ConstraintScope::Instance,
        }
    }

    /// Make the key unique across all instances.
    pub fn global(mut self) -> Self {
        self.scope = ConstraintScope::Global;
        self
    }

    /// Storage key of this constraint when pushed from `instance_id`.
    ///
    /// Fields compare case-insensitively; global keys use an empty instance.
    pub fn key(&self, instance_id: &str) -> ConstraintKey {
        ConstraintKey {
            instance_id: match self.scope {
                ConstraintScope::Instance => instance_id.to_string(),
                ConstraintScope::Global => String::new(),
            },
            unique_type: self.unique_type.clone(),
            unique_field: self.unique_field.to_lowercase(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConstraintKey {
    pub instance_id: String,
    pub unique_type: String,
    pub unique_field: String,
}
