use std::sync::Arc;

use serde_json::Value;
use shared::protocol::{ErrorReport, SubmitContext, FORM_ERROR_KEY};
use tracing::{debug, info};

use crate::document::{ErrorMarkup, FormDom, RenderedErrors};

pub const ERROR_CLASS: &str = "form-error";

pub trait ErrorParser: Send + Sync {
    fn parse(&self, raw: &Value) -> ErrorReport;
}

pub trait ErrorDecorator: Send + Sync {
    /// Builds markup for one field. `errors` is never empty.
    fn decorate(&self, field: &str, errors: &[String]) -> ErrorMarkup;
}

pub trait ErrorRenderer: Send + Sync {
    /// Replaces whatever error markup `dom` shows with `errors`.
    fn render(&self, dom: &mut FormDom, errors: &RenderedErrors);
}

pub trait SuccessHandler: Send + Sync {
    fn on_success(&self, body: &Value, context: &SubmitContext);
}

pub trait FailureHandler: Send + Sync {
    fn on_error(&self, report: &ErrorReport, context: &SubmitContext);
}

pub trait Navigator: Send + Sync {
    fn navigate(&self, target: &str);
}

pub struct DefaultErrorParser;

impl ErrorParser for DefaultErrorParser {
    fn parse(&self, raw: &Value) -> ErrorReport {
        ErrorReport::normalize(raw)
    }
}

/// Wraps the first message in `<div class="form-error">`. Later messages
/// surface on the next submission once the first one is fixed.
pub struct DefaultErrorDecorator;

impl ErrorDecorator for DefaultErrorDecorator {
    fn decorate(&self, _field: &str, errors: &[String]) -> ErrorMarkup {
        let first = errors.first().map(String::as_str).unwrap_or_default();
        ErrorMarkup(format!(
            "<div class=\"{ERROR_CLASS}\">{}</div>",
            html_escape(first)
        ))
    }
}

pub struct DefaultErrorRenderer;

impl ErrorRenderer for DefaultErrorRenderer {
    fn render(&self, dom: &mut FormDom, errors: &RenderedErrors) {
        dom.clear_errors();
        if let Some(form) = &errors.form {
            dom.set_form_banner(form.clone());
        }
        for (field, markup) in &errors.fields {
            if !dom.insert_field_error(field, markup.clone()) {
                debug!(field = %field, "form: no control to render error after");
            }
        }
    }
}

pub struct NoopSuccessHandler;

impl SuccessHandler for NoopSuccessHandler {
    fn on_success(&self, _body: &Value, _context: &SubmitContext) {}
}

pub struct NoopFailureHandler;

impl FailureHandler for NoopFailureHandler {
    fn on_error(&self, _report: &ErrorReport, _context: &SubmitContext) {}
}

pub struct LogNavigator;

impl Navigator for LogNavigator {
    fn navigate(&self, target: &str) {
        info!(%target, "form: navigating after successful submission");
    }
}

impl<F> SuccessHandler for F
where
    F: Fn(&Value, &SubmitContext) + Send + Sync,
{
    fn on_success(&self, body: &Value, context: &SubmitContext) {
        self(body, context)
    }
}

impl<F> FailureHandler for F
where
    F: Fn(&ErrorReport, &SubmitContext) + Send + Sync,
{
    fn on_error(&self, report: &ErrorReport, context: &SubmitContext) {
        self(report, context)
    }
}

#[derive(Clone)]
pub struct FormBehaviors {
    pub parser: Arc<dyn ErrorParser>,
    pub decorator: Arc<dyn ErrorDecorator>,
    pub renderer: Arc<dyn ErrorRenderer>,
    pub on_success: Arc<dyn SuccessHandler>,
    pub on_error: Arc<dyn FailureHandler>,
    pub navigator: Arc<dyn Navigator>,
}

impl Default for FormBehaviors {
    fn default() -> Self {
        Self {
            parser: Arc::new(DefaultErrorParser),
            decorator: Arc::new(DefaultErrorDecorator),
            renderer: Arc::new(DefaultErrorRenderer),
            on_success: Arc::new(NoopSuccessHandler),
            on_error: Arc::new(NoopFailureHandler),
            navigator: Arc::new(LogNavigator),
        }
    }
}

impl FormBehaviors {
    pub fn with_parser(mut self, parser: impl ErrorParser + 'static) -> Self {
        self.parser = Arc::new(parser);
        self
    }

    pub fn with_decorator(mut self, decorator: impl ErrorDecorator + 'static) -> Self {
        self.decorator = Arc::new(decorator);
        self
    }

    pub fn with_renderer(mut self, renderer: impl ErrorRenderer + 'static) -> Self {
        self.renderer = Arc::new(renderer);
        self
    }

    pub fn on_success(mut self, handler: impl SuccessHandler + 'static) -> Self {
        self.on_success = Arc::new(handler);
        self
    }

    pub fn on_error(mut self, handler: impl FailureHandler + 'static) -> Self {
        self.on_error = Arc::new(handler);
        self
    }

    pub fn with_navigator(mut self, navigator: impl Navigator + 'static) -> Self {
        self.navigator = Arc::new(navigator);
        self
    }

    /// Runs the decorator over each entry of `report`, first message only.
    pub fn decorate(&self, report: &ErrorReport) -> RenderedErrors {
        let mut rendered = RenderedErrors::default();
        for (field, messages) in report.iter() {
            if messages.is_empty() {
                continue;
            }
            let markup = self.decorator.decorate(field, &messages[..1]);
            if field == FORM_ERROR_KEY {
                rendered.form = Some(markup);
            } else {
                rendered.fields.insert(field.to_string(), markup);
            }
        }
        rendered
    }
}

fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
