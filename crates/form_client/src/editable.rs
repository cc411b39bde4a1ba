use std::{
    collections::HashMap,
    sync::{Arc, Weak},
};

use serde_json::Value;
use shared::{
    domain::{FieldId, FieldMode, OptionsMap},
    protocol::{FormEvent, SubmitContext},
};
use tokio::{
    sync::{broadcast::error::RecvError, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    config::FormSettings,
    document::FormDocument,
    error::EditError,
    submission::{SubmissionController, SubmissionHandle},
};

pub const ATTR_NAME: &str = "data-name";
pub const ATTR_CLASS: &str = "data-class";
pub const ATTR_OPTIONS: &str = "data-options";

#[derive(Debug, Clone, Default)]
pub struct EditableElement {
    pub text: String,
    attributes: HashMap<String, String>,
}

impl EditableElement {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputWidget {
    Text { class: Option<String> },
    Select { class: Option<String>, options: OptionsMap },
}

impl InputWidget {
    pub fn options(&self) -> Option<&OptionsMap> {
        match self {
            InputWidget::Select { options, .. } => Some(options),
            InputWidget::Text { .. } => None,
        }
    }

    fn display_for(&self, value: &str) -> String {
        self.options()
            .and_then(|options| options.label_for(value))
            .unwrap_or(value)
            .to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSnapshot {
    pub mode: FieldMode,
    pub display_text: String,
    pub committed_value: String,
    pub display_visible: bool,
    pub input_visible: bool,
    pub buttons_visible: bool,
    pub loading: bool,
    pub errored: bool,
}

#[derive(Debug)]
struct FieldState {
    mode: FieldMode,
    display_text: String,
    committed_value: String,
    loading: bool,
    errored: bool,
}

pub struct EditableField {
    id: FieldId,
    name: String,
    widget: InputWidget,
    form: FormDocument,
    controller: Arc<SubmissionController>,
    state: Mutex<FieldState>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl EditableField {
    /// Builds a field from `element` inside `form`. The form gets a
    /// submission controller with default settings if it has none yet.
    pub async fn attach(
        form: &FormDocument,
        element: EditableElement,
    ) -> Result<Arc<Self>, EditError> {
        let controller = match form.controller() {
            Some(controller) => controller,
            None => SubmissionController::attach(form, FormSettings::default()).await?,
        };
        Self::attach_to(form, controller, element).await
    }

    async fn attach_to(
        form: &FormDocument,
        controller: Arc<SubmissionController>,
        element: EditableElement,
    ) -> Result<Arc<Self>, EditError> {
        let name = element
            .attribute(ATTR_NAME)
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .ok_or(EditError::MissingName)?
            .to_string();
        let class = element.attribute(ATTR_CLASS).map(str::to_string);
        let widget = match element.attribute(ATTR_OPTIONS) {
            Some(raw) if !raw.trim().is_empty() => InputWidget::Select {
                class,
                options: OptionsMap::parse(raw)?,
            },
            _ => InputWidget::Text { class },
        };

        let display_text = element.text.trim().to_string();
        let committed_value = widget
            .options()
            .and_then(|options| options.value_for_label(&display_text))
            .unwrap_or(&display_text)
            .to_string();
        form.write_value(&name, committed_value.clone()).await;

        let id = form.next_field_id();
        let field = Arc::new(Self {
            id,
            name,
            widget,
            form: form.clone(),
            controller,
            state: Mutex::new(FieldState {
                mode: FieldMode::View,
                display_text,
                committed_value,
                loading: false,
                errored: false,
            }),
            listener: Mutex::new(None),
        });
        let listener = field.spawn_outcome_listener();
        *field.listener.lock().await = Some(listener);
        debug!(field_id = id.0, field = %field.name, "form: editable field attached");
        Ok(field)
    }

    pub fn id(&self) -> FieldId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn widget(&self) -> &InputWidget {
        &self.widget
    }

    pub async fn mode(&self) -> FieldMode {
        self.state.lock().await.mode
    }

    pub async fn snapshot(&self) -> FieldSnapshot {
        let state = self.state.lock().await;
        let editing = state.mode == FieldMode::Edit;
        FieldSnapshot {
            mode: state.mode,
            display_text: state.display_text.clone(),
            committed_value: state.committed_value.clone(),
            display_visible: !editing,
            input_visible: editing,
            buttons_visible: editing,
            loading: state.loading,
            errored: state.errored,
        }
    }

    pub async fn input_value(&self) -> Option<String> {
        self.form.value(&self.name).await
    }

    /// Hidden for every field of the form while any of them is being edited.
    pub async fn edit_affordance_visible(&self) -> bool {
        self.form.active_editor().await.is_none()
    }

    /// View → Edit. Rejected without side effects while any field of the form,
    /// this one included, is in edit mode.
    pub async fn activate(&self) -> Result<(), EditError> {
        let mut state = self.state.lock().await;
        self.form
            .claim_editor(self.id)
            .await
            .map_err(|active| EditError::FormBusy { active })?;
        state.mode = FieldMode::Edit;
        drop(state);

        self.form.emit(FormEvent::ViewEnd { field: self.id });
        self.form.emit(FormEvent::EditStart { field: self.id });
        info!(field_id = self.id.0, field = %self.name, "form: edit started");
        Ok(())
    }

    pub async fn set_input(&self, value: impl Into<String>) -> Result<(), EditError> {
        let value = value.into();
        self.require_edit().await?;
        if let Some(options) = self.widget.options() {
            if options.label_for(&value).is_none() {
                return Err(EditError::UnknownOption {
                    field: self.id,
                    value,
                });
            }
        }
        self.form.set_value(&self.name, value).await;
        Ok(())
    }

    /// The "Update" button: submits the form on behalf of this field.
    pub async fn confirm(&self) -> Result<SubmissionHandle, EditError> {
        {
            let mut state = self.state.lock().await;
            if state.mode != FieldMode::Edit {
                return Err(EditError::NotEditing { field: self.id });
            }
            state.loading = true;
        }

        match self
            .controller
            .submit(SubmitContext::for_field(self.id))
            .await
        {
            Ok(handle) => Ok(handle),
            Err(err) => {
                self.state.lock().await.loading = false;
                Err(err.into())
            }
        }
    }

    pub async fn cancel(&self) -> Result<(), EditError> {
        if self.leave_edit().await {
            info!(field_id = self.id.0, field = %self.name, "form: edit cancelled");
            Ok(())
        } else {
            Err(EditError::NotEditing { field: self.id })
        }
    }

    /// Stops observing outcomes and abandons an edit in progress, freeing the
    /// form for other fields. Requests already in flight still complete.
    pub async fn detach(&self) {
        if let Some(listener) = self.listener.lock().await.take() {
            listener.abort();
        }
        if self.leave_edit().await {
            info!(field_id = self.id.0, field = %self.name, "form: edit abandoned on detach");
        }
    }

    async fn leave_edit(&self) -> bool {
        let mut state = self.state.lock().await;
        if state.mode != FieldMode::Edit {
            return false;
        }
        self.form
            .write_value(&self.name, state.committed_value.clone())
            .await;
        state.mode = FieldMode::View;
        state.loading = false;
        drop(state);

        self.form.release_editor(self.id).await;
        self.form.emit(FormEvent::ViewStart { field: self.id });
        true
    }

    async fn require_edit(&self) -> Result<(), EditError> {
        if self.state.lock().await.mode == FieldMode::Edit {
            Ok(())
        } else {
            Err(EditError::NotEditing { field: self.id })
        }
    }

    fn spawn_outcome_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let mut events = self.form.subscribe_events();
        let field: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let Some(field) = field.upgrade() else {
                            break;
                        };
                        field.handle_event(&event).await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "form: editable field missed events");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    async fn handle_event(&self, event: &FormEvent) {
        match event {
            FormEvent::Success { body, .. } => self.commit(body).await,
            FormEvent::Error { .. } => self.mark_errored().await,
            _ => {}
        }
    }

    async fn commit(&self, body: &Value) {
        let mut state = self.state.lock().await;
        if state.mode != FieldMode::Edit {
            return;
        }
        self.form.emit(FormEvent::EditEnd { field: self.id });

        let echoed = body.get(&self.name).and_then(value_text);
        let value = match echoed {
            Some(value) => value,
            None => self.input_value().await.unwrap_or_default(),
        };
        self.form.write_value(&self.name, value.clone()).await;
        state.display_text = self.widget.display_for(&value);
        state.committed_value = value;
        state.loading = false;
        state.errored = false;
        state.mode = FieldMode::View;
        let display_text = state.display_text.clone();
        drop(state);

        self.form.release_editor(self.id).await;
        self.form.emit(FormEvent::ViewStart { field: self.id });
        info!(field_id = self.id.0, field = %self.name, %display_text, "form: edit committed");
    }

    async fn mark_errored(&self) {
        let mut state = self.state.lock().await;
        if state.mode != FieldMode::Edit {
            return;
        }
        state.loading = false;
        state.errored = true;
        drop(state);

        self.form.emit(FormEvent::EditError { field: self.id });
        debug!(field_id = self.id.0, field = %self.name, "form: edit rejected by server");
    }
}

impl Drop for EditableField {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.get_mut().take() {
            listener.abort();
        }
        if self.state.get_mut().mode == FieldMode::Edit {
            self.form.release_editor_now(self.id);
        }
    }
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}
