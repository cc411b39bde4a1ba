pub mod behaviors;
pub mod config;
pub mod document;
pub mod editable;
pub mod error;
pub mod redirect;
pub mod submission;
pub mod transport;

pub use behaviors::{
    ErrorDecorator, ErrorParser, ErrorRenderer, FailureHandler, FormBehaviors, Navigator,
    SuccessHandler,
};
pub use config::{BodyEncoding, FormSettings, ResolvedSettings};
pub use document::{ErrorMarkup, FormControl, FormDocument, FormDom, RenderedErrors};
pub use editable::{EditableElement, EditableField, FieldSnapshot, InputWidget};
pub use error::{ConfigError, EditError, SubmitError, TransportError};
pub use redirect::RedirectTemplate;
pub use submission::{SubmissionController, SubmissionHandle, SubmitOptions};
pub use transport::{FormRequest, FormTransport, ReqwestTransport, TransportResponse};

#[cfg(test)]
#[path = "tests/submission_tests.rs"]
mod submission_tests;

#[cfg(test)]
#[path = "tests/editable_tests.rs"]
mod editable_tests;

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;
