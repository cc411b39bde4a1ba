use std::{
    collections::VecDeque,
    sync::{Arc, Mutex as StdMutex},
    time::Duration,
};

use async_trait::async_trait;
use serde_json::Value;
use shared::protocol::{ErrorReport, FormEvent, SubmitContext};
use tokio::sync::{broadcast, Mutex, Notify};

use crate::{
    behaviors::{FormBehaviors, Navigator},
    config::FormSettings,
    document::{FormDocument, FormDom},
    error::TransportError,
    submission::SubmissionController,
    transport::{FormRequest, FormTransport, TransportResponse},
};

pub(crate) const FORM_URL: &str = "http://form.test/user";

pub(crate) enum Scripted {
    Respond(TransportResponse),
    Fail(String),
}

pub(crate) fn json_reply(status: u16, body: Value) -> Scripted {
    Scripted::Respond(TransportResponse {
        status,
        content_type: Some("application/json".to_string()),
        body: body.to_string(),
    })
}

pub(crate) fn text_reply(status: u16, content_type: &str, body: &str) -> Scripted {
    Scripted::Respond(TransportResponse {
        status,
        content_type: Some(content_type.to_string()),
        body: body.to_string(),
    })
}

/// Replays canned responses in order and records every request it sees.
/// With a gate, each request waits for one `Notify` permit before answering.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    script: Mutex<VecDeque<Scripted>>,
    pub requests: Mutex<Vec<FormRequest>>,
    gate: Option<Arc<Notify>>,
}

impl ScriptedTransport {
    pub fn replying(replies: impl IntoIterator<Item = Scripted>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(replies.into_iter().collect()),
            ..Self::default()
        })
    }

    pub fn gated(replies: impl IntoIterator<Item = Scripted>) -> (Arc<Self>, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        let transport = Arc::new(Self {
            script: Mutex::new(replies.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
            gate: Some(Arc::clone(&gate)),
        });
        (transport, gate)
    }

    pub async fn recorded(&self) -> Vec<FormRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl FormTransport for ScriptedTransport {
    async fn send(&self, request: FormRequest) -> Result<TransportResponse, TransportError> {
        self.requests.lock().await.push(request);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        match self.script.lock().await.pop_front() {
            Some(Scripted::Respond(response)) => Ok(response),
            Some(Scripted::Fail(message)) => Err(TransportError::Unavailable(message)),
            None => Ok(TransportResponse {
                status: 204,
                content_type: None,
                body: String::new(),
            }),
        }
    }
}

#[derive(Clone, Default)]
pub(crate) struct Recorder {
    pub successes: Arc<StdMutex<Vec<(Value, SubmitContext)>>>,
    pub failures: Arc<StdMutex<Vec<(ErrorReport, SubmitContext)>>>,
    pub navigations: Arc<StdMutex<Vec<String>>>,
}

struct RecordingNavigator(Arc<StdMutex<Vec<String>>>);

impl Navigator for RecordingNavigator {
    fn navigate(&self, target: &str) {
        if let Ok(mut targets) = self.0.lock() {
            targets.push(target.to_string());
        }
    }
}

impl Recorder {
    pub fn behaviors(&self) -> FormBehaviors {
        let successes = Arc::clone(&self.successes);
        let failures = Arc::clone(&self.failures);
        FormBehaviors::default()
            .on_success(move |body: &Value, context: &SubmitContext| {
                successes
                    .lock()
                    .expect("successes")
                    .push((body.clone(), context.clone()));
            })
            .on_error(move |report: &ErrorReport, context: &SubmitContext| {
                failures
                    .lock()
                    .expect("failures")
                    .push((report.clone(), context.clone()));
            })
            .with_navigator(RecordingNavigator(Arc::clone(&self.navigations)))
    }

    pub fn successes(&self) -> Vec<(Value, SubmitContext)> {
        self.successes.lock().expect("successes").clone()
    }

    pub fn failures(&self) -> Vec<(ErrorReport, SubmitContext)> {
        self.failures.lock().expect("failures").clone()
    }

    pub fn navigations(&self) -> Vec<String> {
        self.navigations.lock().expect("navigations").clone()
    }
}

pub(crate) async fn attach_scripted(
    dom: FormDom,
    transport: Arc<ScriptedTransport>,
    recorder: &Recorder,
) -> (FormDocument, Arc<SubmissionController>) {
    let form = FormDocument::new(dom);
    let controller = SubmissionController::attach_with_dependencies(
        &form,
        FormSettings::default(),
        recorder.behaviors(),
        transport,
    )
    .await
    .expect("attach controller");
    (form, controller)
}

/// Receives until an event satisfies `wanted`, failing after two seconds.
pub(crate) async fn wait_for(
    events: &mut broadcast::Receiver<FormEvent>,
    wanted: impl Fn(&FormEvent) -> bool,
) -> FormEvent {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let event = events.recv().await.expect("event channel open");
            if wanted(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for form event")
}

/// Everything already queued on `events`, without waiting.
pub(crate) fn drain(events: &mut broadcast::Receiver<FormEvent>) -> Vec<FormEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}
