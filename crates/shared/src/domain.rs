use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::{MethodParseError, OptionsParseError};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u64);
    };
}

id_newtype!(FieldId);
id_newtype!(RequestId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[serde(alias = "get")]
    Get,
    #[default]
    #[serde(alias = "post")]
    Post,
    #[serde(alias = "put")]
    Put,
    #[serde(alias = "patch")]
    Patch,
    #[serde(alias = "delete")]
    Delete,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }

    /// Methods whose form pairs travel in the query string instead of the body.
    pub fn sends_query(self) -> bool {
        matches!(self, HttpMethod::Get | HttpMethod::Delete)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = MethodParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            _ => Err(MethodParseError(raw.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldMode {
    #[default]
    View,
    Edit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceOption {
    pub value: String,
    pub label: String,
}

/// Value to label mapping of a closed-choice field, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionsMap {
    entries: Vec<ChoiceOption>,
}

impl OptionsMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses either a JSON object (`{"s":"Small"}`) or the CSS-like
    /// `value:label;value:label` encoding used by markup attributes.
    pub fn parse(raw: &str) -> Result<Self, OptionsParseError> {
        let trimmed = raw.trim();
        if trimmed.starts_with('{') {
            Self::parse_json(trimmed)
        } else {
            Ok(Self::parse_css_like(trimmed))
        }
    }

    fn parse_json(raw: &str) -> Result<Self, OptionsParseError> {
        let object: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(raw).map_err(OptionsParseError::Json)?;
        let mut options = Self::new();
        for (value, label) in object {
            let label = match label {
                serde_json::Value::String(label) => label,
                serde_json::Value::Null => continue,
                other => other.to_string(),
            };
            options.insert(value, label);
        }
        Ok(options)
    }

    fn parse_css_like(raw: &str) -> Self {
        let mut options = Self::new();
        for pair in raw.split(';') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            let Some((value, label)) = pair.split_once(':') else {
                continue;
            };
            options.insert(value.trim(), label.trim());
        }
        options
    }

    /// Inserts or relabels `value`, keeping its original position.
    pub fn insert(&mut self, value: impl Into<String>, label: impl Into<String>) {
        let value = value.into();
        let label = label.into();
        match self.entries.iter_mut().find(|entry| entry.value == value) {
            Some(entry) => entry.label = label,
            None => self.entries.push(ChoiceOption { value, label }),
        }
    }

    pub fn label_for(&self, value: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|entry| entry.value == value)
            .map(|entry| entry.label.as_str())
    }

    pub fn value_for_label(&self, label: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|entry| entry.label == label)
            .map(|entry| entry.value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChoiceOption> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
