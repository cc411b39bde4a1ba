use shared::{
    domain::{FieldId, RequestId},
    error::{MethodParseError, OptionsParseError},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("form has no target url: set the action attribute or pass a url")]
    MissingTargetUrl,
    #[error("relative target url '{url}' needs a base_url")]
    RelativeUrl { url: String },
    #[error("invalid target url '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error(transparent)]
    Method(#[from] MethodParseError),
    #[error("attribute {attribute} must be true or false, got '{value}'")]
    InvalidFlag { attribute: String, value: String },
    #[error("failed to compile redirect token pattern: {0}")]
    RedirectPattern(#[from] regex::Error),
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("no submission controller is attached to this form")]
    NotAttached,
    #[error("request {} is still in flight", .active.0)]
    InFlight { active: RequestId },
}

#[derive(Debug, Error)]
pub enum EditError {
    #[error("editable element has no data-name attribute")]
    MissingName,
    #[error(transparent)]
    Options(#[from] OptionsParseError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("field {} is already being edited on this form", .active.0)]
    FormBusy { active: FieldId },
    #[error("field {} is not in edit mode", .field.0)]
    NotEditing { field: FieldId },
    #[error("'{value}' is not one of the options of field {}", .field.0)]
    UnknownOption { field: FieldId, value: String },
    #[error(transparent)]
    Submit(#[from] SubmitError),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("transport unavailable: {0}")]
    Unavailable(String),
}
