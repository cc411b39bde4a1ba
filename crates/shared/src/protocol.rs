use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{domain::FieldId, error::FailureKind};

/// Report key reserved for errors that belong to the whole form.
pub const FORM_ERROR_KEY: &str = "form";

/// Field name to error messages. Every entry holds at least one message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorReport {
    fields: BTreeMap<String, Vec<String>>,
}

impl ErrorReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Coerces a server error body into a report.
    ///
    /// Accepts an object whose values are either a single message or an array
    /// of messages. Anything that is not an object yields an empty report, and
    /// entries that would end up without a message are dropped.
    pub fn normalize(raw: &Value) -> Self {
        let Value::Object(object) = raw else {
            return Self::new();
        };

        let mut report = Self::new();
        for (field, value) in object {
            let messages: Vec<String> = match value {
                Value::Null => continue,
                Value::Array(items) => items.iter().filter_map(message_text).collect(),
                other => message_text(other).into_iter().collect(),
            };
            report.extend(field.clone(), messages);
        }
        report
    }

    pub fn insert(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.fields
            .entry(field.into())
            .or_default()
            .push(message.into());
    }

    pub fn extend(&mut self, field: impl Into<String>, messages: Vec<String>) {
        if messages.is_empty() {
            return;
        }
        self.fields.entry(field.into()).or_default().extend(messages);
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.fields.get(field).map(Vec::as_slice)
    }

    pub fn form_errors(&self) -> Option<&[String]> {
        self.get(FORM_ERROR_KEY)
    }

    /// Field-specific entries, excluding the form-level key.
    pub fn field_errors(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.iter().filter(|(field, _)| *field != FORM_ERROR_KEY)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.fields
            .iter()
            .map(|(field, messages)| (field.as_str(), messages.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

fn message_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

/// Caller data threaded unchanged from `submit` to outcome callbacks and events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubmitContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<FieldId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl SubmitContext {
    pub fn for_field(field: FieldId) -> Self {
        Self {
            field: Some(field),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Notifications emitted on a form document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum FormEvent {
    Success {
        context: SubmitContext,
        body: Value,
    },
    Error {
        context: SubmitContext,
        report: ErrorReport,
        kind: FailureKind,
    },
    ViewEnd {
        field: FieldId,
    },
    EditStart {
        field: FieldId,
    },
    EditEnd {
        field: FieldId,
    },
    ViewStart {
        field: FieldId,
    },
    EditError {
        field: FieldId,
    },
    ValueChanged {
        name: String,
    },
}

impl FormEvent {
    /// Event name as exposed to page code, e.g. `edit-start`.
    pub fn name(&self) -> &'static str {
        match self {
            FormEvent::Success { .. } => "success",
            FormEvent::Error { .. } => "error",
            FormEvent::ViewEnd { .. } => "view-end",
            FormEvent::EditStart { .. } => "edit-start",
            FormEvent::EditEnd { .. } => "edit-end",
            FormEvent::ViewStart { .. } => "view-start",
            FormEvent::EditError { .. } => "edit-error",
            FormEvent::ValueChanged { .. } => "change",
        }
    }

    pub fn field(&self) -> Option<FieldId> {
        match self {
            FormEvent::ViewEnd { field }
            | FormEvent::EditStart { field }
            | FormEvent::EditEnd { field }
            | FormEvent::ViewStart { field }
            | FormEvent::EditError { field } => Some(*field),
            FormEvent::Success { context, .. } | FormEvent::Error { context, .. } => {
                context.field
            }
            FormEvent::ValueChanged { .. } => None,
        }
    }
}
