use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ValidationError;

/// Free-form key/value bag carried to the provider untouched
pub type Extras = Map<String, Value>;

/// What to deliver and to whom
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub user_ids: BTreeSet<String>,
    pub title: String,
    pub body: String,
    /// Application data delivered alongside the alert
    #[serde(default)]
    pub data: Extras,
    /// Provider options (sound, badge, priority, ...)
    #[serde(default)]
    pub options: Extras,
}

impl Payload {
    #[must_use]
    pub fn new<I, S>(user_ids: I, title: impl Into<String>, body: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            user_ids: user_ids.into_iter().map(Into::into).collect(),
            title: title.into(),
            body: body.into(),
            data: Extras::new(),
            options: Extras::new(),
        }
    }

    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// The same payload addressed to `user_ids` only
    #[must_use]
    pub fn for_users(&self, user_ids: BTreeSet<String>) -> Self {
        Self {
            user_ids,
            ..self.clone()
        }
    }

    /// Reject payloads no provider could deliver
    ///
    /// # Errors
    /// If there are no recipients, or the title or body is blank
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.user_ids.is_empty() {
            return Err(ValidationError::NoRecipients);
        }

        if self.title.trim().is_empty() {
            return Err(ValidationError::EmptyTitle);
        }

        if self.body.trim().is_empty() {
            return Err(ValidationError::EmptyBody);
        }

        Ok(())
    }
}

/// A payload together with the identifier callers track it by
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub payload: Payload,
}

impl Notification {
    /// Wrap `payload` under a freshly generated identifier
    #[must_use]
    pub fn new(payload: Payload) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            payload,
        }
    }

    #[must_use]
    pub fn with_id(id: impl Into<String>, payload: Payload) -> Self {
        Self {
            id: id.into(),
            payload,
        }
    }
}
