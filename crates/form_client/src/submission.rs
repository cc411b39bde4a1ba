use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use serde_json::Value;
use shared::{
    domain::{HttpMethod, RequestId},
    error::FailureKind,
    protocol::{FormEvent, SubmitContext},
};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    behaviors::FormBehaviors,
    config::{FormSettings, ResolvedSettings},
    document::{FormDocument, FormDom, RenderedErrors},
    error::{ConfigError, SubmitError},
    redirect::RedirectTemplate,
    transport::{FormRequest, FormTransport, ReqwestTransport, TransportResponse},
};

/// Per-call overrides of the attached target.
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    pub url: Option<Url>,
    pub method: Option<HttpMethod>,
}

pub struct SubmissionHandle {
    request_id: RequestId,
    task: JoinHandle<()>,
}

impl SubmissionHandle {
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Waits until the outcome has been dispatched, including any watched
    /// changes resubmitted after it.
    pub async fn completed(self) {
        if let Err(err) = self.task.await {
            warn!(request_id = self.request_id.0, "form: submission task ended abnormally: {err}");
        }
    }
}

#[derive(Debug)]
enum Outcome {
    Success(Value),
    Failure { raw: Value, kind: FailureKind },
}

pub struct SubmissionController {
    dom: Arc<Mutex<FormDom>>,
    events: broadcast::Sender<FormEvent>,
    settings: ResolvedSettings,
    redirect: Option<RedirectTemplate>,
    behaviors: FormBehaviors,
    transport: Arc<dyn FormTransport>,
    pending: Mutex<Option<RequestId>>,
    next_request_id: AtomicU64,
    watched_change_deferred: AtomicBool,
}

impl SubmissionController {
    pub async fn attach(
        form: &FormDocument,
        settings: FormSettings,
    ) -> Result<Arc<Self>, ConfigError> {
        Self::attach_with_dependencies(
            form,
            settings,
            FormBehaviors::default(),
            Arc::new(ReqwestTransport::new()),
        )
        .await
    }

    pub async fn attach_with_behaviors(
        form: &FormDocument,
        settings: FormSettings,
        behaviors: FormBehaviors,
    ) -> Result<Arc<Self>, ConfigError> {
        Self::attach_with_dependencies(form, settings, behaviors, Arc::new(ReqwestTransport::new()))
            .await
    }

    /// Attaches a controller to `form`. A form is attached at most once:
    /// later calls return the existing controller and ignore their arguments.
    pub async fn attach_with_dependencies(
        form: &FormDocument,
        settings: FormSettings,
        behaviors: FormBehaviors,
        transport: Arc<dyn FormTransport>,
    ) -> Result<Arc<Self>, ConfigError> {
        let controller = form
            .controller_cell()
            .get_or_try_init(|| async move {
                let dom = form.shared_dom();
                let declared = FormSettings::from_attributes(&*dom.lock().await)?;
                let resolved = FormSettings::layered(declared, settings).resolve()?;
                let redirect = resolved
                    .redirect
                    .as_deref()
                    .map(RedirectTemplate::parse)
                    .transpose()?;
                info!(
                    url = %resolved.url,
                    method = %resolved.method,
                    watch = resolved.watch,
                    redirect = resolved.redirect.as_deref().unwrap_or(""),
                    "form: submission controller attached"
                );
                Ok::<_, ConfigError>(Arc::new(Self {
                    dom,
                    events: form.event_sender(),
                    settings: resolved,
                    redirect,
                    behaviors,
                    transport,
                    pending: Mutex::new(None),
                    next_request_id: AtomicU64::new(1),
                    watched_change_deferred: AtomicBool::new(false),
                }))
            })
            .await?;
        Ok(Arc::clone(controller))
    }

    pub fn settings(&self) -> &ResolvedSettings {
        &self.settings
    }

    pub async fn pending_request(&self) -> Option<RequestId> {
        *self.pending.lock().await
    }

    pub async fn submit(
        self: &Arc<Self>,
        context: SubmitContext,
    ) -> Result<SubmissionHandle, SubmitError> {
        self.submit_with(context, SubmitOptions::default()).await
    }

    /// Serializes the form and sends it without waiting for the response.
    /// A submission while another one is pending is rejected.
    pub async fn submit_with(
        self: &Arc<Self>,
        context: SubmitContext,
        options: SubmitOptions,
    ) -> Result<SubmissionHandle, SubmitError> {
        let request_id = {
            let mut pending = self.pending.lock().await;
            if let Some(active) = *pending {
                warn!(active_request_id = active.0, "form: submit rejected, request in flight");
                return Err(SubmitError::InFlight { active });
            }
            self.claim(&mut pending)
        };
        Ok(self.spawn_request(request_id, context, options).await)
    }

    /// Submission triggered by a change on a watched form. While a request is
    /// pending the change is remembered and sent once that request settles.
    pub(crate) async fn submit_watched(self: &Arc<Self>) -> Option<SubmissionHandle> {
        let request_id = {
            let mut pending = self.pending.lock().await;
            if let Some(active) = *pending {
                self.watched_change_deferred.store(true, Ordering::Release);
                debug!(active_request_id = active.0, "form: watched change deferred");
                return None;
            }
            self.claim(&mut pending)
        };
        Some(
            self.spawn_request(request_id, SubmitContext::default(), SubmitOptions::default())
                .await,
        )
    }

    fn claim(&self, pending: &mut Option<RequestId>) -> RequestId {
        let request_id = RequestId(self.next_request_id.fetch_add(1, Ordering::Relaxed));
        *pending = Some(request_id);
        request_id
    }

    async fn build_request(&self, options: SubmitOptions) -> FormRequest {
        let pairs = self
            .dom
            .lock()
            .await
            .serialize_pairs(self.settings.send_empty_values);
        FormRequest {
            method: options.method.unwrap_or(self.settings.method),
            url: options.url.unwrap_or_else(|| self.settings.url.clone()),
            pairs,
            encoding: self.settings.encoding,
        }
    }

    async fn spawn_request(
        self: &Arc<Self>,
        request_id: RequestId,
        context: SubmitContext,
        options: SubmitOptions,
    ) -> SubmissionHandle {
        let request = self.build_request(options).await;
        info!(
            request_id = request_id.0,
            method = %request.method,
            url = %request.url,
            fields = request.pairs.len(),
            "form: submitting"
        );

        let controller = Arc::clone(self);
        let task = tokio::spawn(async move {
            controller.run(request_id, request, context).await;
            controller.flush_deferred_changes().await;
        });

        SubmissionHandle { request_id, task }
    }

    async fn flush_deferred_changes(&self) {
        loop {
            let request_id = {
                let mut pending = self.pending.lock().await;
                if !self.watched_change_deferred.swap(false, Ordering::AcqRel) {
                    return;
                }
                if pending.is_some() {
                    // The request now pending flushes when it settles.
                    self.watched_change_deferred.store(true, Ordering::Release);
                    return;
                }
                self.claim(&mut pending)
            };
            let request = self.build_request(SubmitOptions::default()).await;
            info!(
                request_id = request_id.0,
                fields = request.pairs.len(),
                "form: submitting watched changes made while a request was in flight"
            );
            self.run(request_id, request, SubmitContext::default()).await;
        }
    }

    async fn run(&self, request_id: RequestId, request: FormRequest, context: SubmitContext) {
        let outcome = match self.transport.send(request).await {
            Ok(response) => classify(response),
            Err(err) => {
                warn!(request_id = request_id.0, "form: transport failure: {err}");
                Outcome::Failure {
                    raw: Value::Null,
                    kind: FailureKind::Transport {
                        message: err.to_string(),
                    },
                }
            }
        };

        {
            let mut pending = self.pending.lock().await;
            if *pending == Some(request_id) {
                *pending = None;
            }
        }

        match outcome {
            Outcome::Success(body) => self.dispatch_success(request_id, body, context).await,
            Outcome::Failure { raw, kind } => {
                self.dispatch_failure(request_id, raw, kind, context).await
            }
        }
    }

    async fn dispatch_success(&self, request_id: RequestId, body: Value, context: SubmitContext) {
        if let Some(redirect) = &self.redirect {
            let target = redirect.render(&body);
            info!(request_id = request_id.0, %target, "form: redirecting");
            self.dom.lock().await.set_location(target.clone());
            self.behaviors.navigator.navigate(&target);
            return;
        }

        {
            let mut dom = self.dom.lock().await;
            self.behaviors
                .renderer
                .render(&mut dom, &RenderedErrors::default());
        }
        self.behaviors.on_success.on_success(&body, &context);
        debug!(request_id = request_id.0, "form: success dispatched");
        let _ = self.events.send(FormEvent::Success { context, body });
    }

    async fn dispatch_failure(
        &self,
        request_id: RequestId,
        raw: Value,
        kind: FailureKind,
        context: SubmitContext,
    ) {
        let report = self.behaviors.parser.parse(&raw);
        let rendered = self.behaviors.decorate(&report);
        {
            let mut dom = self.dom.lock().await;
            self.behaviors.renderer.render(&mut dom, &rendered);
        }
        self.behaviors.on_error.on_error(&report, &context);
        info!(
            request_id = request_id.0,
            status = kind.status(),
            transport = kind.is_transport(),
            fields = report.len(),
            "form: submission failed"
        );
        let _ = self.events.send(FormEvent::Error {
            context,
            report,
            kind,
        });
    }
}

fn classify(response: TransportResponse) -> Outcome {
    let status = response.status;
    let text = response.body.trim();

    if status >= 400 {
        let raw = serde_json::from_str(text).unwrap_or(Value::Null);
        return Outcome::Failure {
            raw,
            kind: FailureKind::Rejected { status },
        };
    }

    if text.is_empty() {
        return Outcome::Success(Value::Null);
    }
    match serde_json::from_str(text) {
        Ok(body) => Outcome::Success(body),
        Err(_) if response.declares_json() => Outcome::Failure {
            raw: Value::Null,
            kind: FailureKind::MalformedBody { status },
        },
        Err(_) => Outcome::Success(Value::String(response.body)),
    }
}
