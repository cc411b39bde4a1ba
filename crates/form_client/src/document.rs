use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use shared::{
    domain::FieldId,
    protocol::{FormEvent, SubmitContext},
};
use tokio::sync::{broadcast, Mutex, OnceCell};
use tracing::{debug, warn};

use crate::{
    error::SubmitError,
    submission::{SubmissionController, SubmissionHandle},
};

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormControl {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorMarkup(pub String);

impl ErrorMarkup {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedErrors {
    pub form: Option<ErrorMarkup>,
    pub fields: BTreeMap<String, ErrorMarkup>,
}

impl RenderedErrors {
    pub fn is_empty(&self) -> bool {
        self.form.is_none() && self.fields.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct FormDom {
    attributes: HashMap<String, String>,
    controls: Vec<FormControl>,
    form_banner: Option<ErrorMarkup>,
    field_errors: BTreeMap<String, ErrorMarkup>,
    location: Option<String>,
}

impl FormDom {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_control(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.controls.push(FormControl {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn controls(&self) -> &[FormControl] {
        &self.controls
    }

    pub fn value(&self, name: &str) -> Option<&str> {
        self.controls
            .iter()
            .find(|control| control.name == name)
            .map(|control| control.value.as_str())
    }

    pub fn has_control(&self, name: &str) -> bool {
        self.controls.iter().any(|control| control.name == name)
    }

    pub fn set_value(&mut self, name: &str, value: impl Into<String>) -> bool {
        match self.controls.iter_mut().find(|control| control.name == name) {
            Some(control) => {
                control.value = value.into();
                true
            }
            None => false,
        }
    }

    pub fn upsert_control(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.controls.iter_mut().find(|control| control.name == name) {
            Some(control) => control.value = value,
            None => self.controls.push(FormControl {
                name: name.to_string(),
                value,
            }),
        }
    }

    /// Name/value pairs in document order. Unless `send_empty_values` is set,
    /// empty values are dropped and repeated names collapse to the last value.
    pub fn serialize_pairs(&self, send_empty_values: bool) -> Vec<(String, String)> {
        if send_empty_values {
            return self
                .controls
                .iter()
                .map(|control| (control.name.clone(), control.value.clone()))
                .collect();
        }

        let mut pairs: Vec<(String, String)> = Vec::with_capacity(self.controls.len());
        for control in self.controls.iter().filter(|c| !c.value.is_empty()) {
            match pairs.iter_mut().find(|(name, _)| *name == control.name) {
                Some(pair) => pair.1 = control.value.clone(),
                None => pairs.push((control.name.clone(), control.value.clone())),
            }
        }
        pairs
    }

    pub fn clear_errors(&mut self) {
        self.form_banner = None;
        self.field_errors.clear();
    }

    pub fn set_form_banner(&mut self, markup: ErrorMarkup) {
        self.form_banner = Some(markup);
    }

    /// Places `markup` after the control named `field`. Returns false, and
    /// renders nothing, when the form has no such control.
    pub fn insert_field_error(&mut self, field: &str, markup: ErrorMarkup) -> bool {
        if !self.has_control(field) {
            return false;
        }
        self.field_errors.insert(field.to_string(), markup);
        true
    }

    pub fn form_banner(&self) -> Option<&ErrorMarkup> {
        self.form_banner.as_ref()
    }

    pub fn field_error(&self, field: &str) -> Option<&ErrorMarkup> {
        self.field_errors.get(field)
    }

    pub fn field_errors(&self) -> &BTreeMap<String, ErrorMarkup> {
        &self.field_errors
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    pub(crate) fn set_location(&mut self, target: impl Into<String>) {
        self.location = Some(target.into());
    }
}

struct DocumentInner {
    dom: Arc<Mutex<FormDom>>,
    events: broadcast::Sender<FormEvent>,
    controller: OnceCell<Arc<SubmissionController>>,
    editor: Mutex<Option<FieldId>>,
    next_field_id: AtomicU64,
}

#[derive(Clone)]
pub struct FormDocument {
    inner: Arc<DocumentInner>,
}

impl FormDocument {
    pub fn new(dom: FormDom) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(DocumentInner {
                dom: Arc::new(Mutex::new(dom)),
                events,
                controller: OnceCell::new(),
                editor: Mutex::new(None),
                next_field_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<FormEvent> {
        self.inner.events.subscribe()
    }

    pub fn controller(&self) -> Option<Arc<SubmissionController>> {
        self.inner.controller.get().cloned()
    }

    pub async fn dom(&self) -> FormDom {
        self.inner.dom.lock().await.clone()
    }

    pub async fn value(&self, name: &str) -> Option<String> {
        self.inner.dom.lock().await.value(name).map(str::to_string)
    }

    pub async fn location(&self) -> Option<String> {
        self.inner.dom.lock().await.location().map(str::to_string)
    }

    /// A user edit of the control `name`: emits `change` and, on a watched
    /// form, submits it. Returns false when the form has no such control.
    pub async fn set_value(&self, name: &str, value: impl Into<String>) -> bool {
        if !self.inner.dom.lock().await.set_value(name, value) {
            debug!(control = name, "form: change ignored for unknown control");
            return false;
        }
        self.emit(FormEvent::ValueChanged {
            name: name.to_string(),
        });

        if let Some(controller) = self.controller() {
            if controller.settings().watch && controller.submit_watched().await.is_none() {
                debug!(control = name, "form: watched change queued behind pending request");
            }
        }
        true
    }

    pub async fn request_submit(
        &self,
        context: SubmitContext,
    ) -> Result<SubmissionHandle, SubmitError> {
        let controller = self.controller().ok_or(SubmitError::NotAttached)?;
        controller.submit(context).await
    }

    pub async fn active_editor(&self) -> Option<FieldId> {
        *self.inner.editor.lock().await
    }

    pub(crate) fn shared_dom(&self) -> Arc<Mutex<FormDom>> {
        Arc::clone(&self.inner.dom)
    }

    pub(crate) fn event_sender(&self) -> broadcast::Sender<FormEvent> {
        self.inner.events.clone()
    }

    pub(crate) fn controller_cell(&self) -> &OnceCell<Arc<SubmissionController>> {
        &self.inner.controller
    }

    pub(crate) fn emit(&self, event: FormEvent) {
        let _ = self.inner.events.send(event);
    }

    pub(crate) fn next_field_id(&self) -> FieldId {
        FieldId(self.inner.next_field_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Programmatic write: no `change` event, no watch submission.
    pub(crate) async fn write_value(&self, name: &str, value: impl Into<String>) {
        self.inner.dom.lock().await.upsert_control(name, value);
    }

    /// Claims the single editor slot. Fails with the current holder.
    pub(crate) async fn claim_editor(&self, field: FieldId) -> Result<(), FieldId> {
        let mut editor = self.inner.editor.lock().await;
        match *editor {
            Some(active) => Err(active),
            None => {
                *editor = Some(field);
                Ok(())
            }
        }
    }

    pub(crate) async fn release_editor(&self, field: FieldId) {
        let mut editor = self.inner.editor.lock().await;
        if *editor == Some(field) {
            *editor = None;
        }
    }

    /// Releases the editor slot from a synchronous context such as `Drop`.
    pub(crate) fn release_editor_now(&self, field: FieldId) {
        if let Ok(mut editor) = self.inner.editor.try_lock() {
            if *editor == Some(field) {
                *editor = None;
            }
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let form = self.clone();
                runtime.spawn(async move { form.release_editor(field).await });
            }
            Err(_) => warn!(field = field.0, "form: editor slot left claimed, no runtime"),
        }
    }
}
