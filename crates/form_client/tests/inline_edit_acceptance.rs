use std::{
    collections::HashMap,
    sync::{Arc, Mutex as StdMutex},
    time::Duration,
};

use axum::{
    extract::Query,
    http::StatusCode,
    routing::{get, post},
    Form, Json, Router,
};
use form_client::{
    config::{ATTR_ACTION, ATTR_REDIRECT},
    editable::{ATTR_NAME, ATTR_OPTIONS},
    BodyEncoding, EditableElement, EditableField, FormBehaviors, FormDocument, FormDom,
    FormSettings, SubmissionController,
};
use serde_json::{json, Map, Value};
use shared::{
    domain::{FieldMode, HttpMethod},
    error::FailureKind,
    protocol::{ErrorReport, FormEvent, SubmitContext},
};
use tokio::{net::TcpListener, sync::broadcast};

fn name_error(label: &str, value: Option<&String>) -> Option<String> {
    let value = value?;
    let length = value.chars().count();
    if (1..=10).contains(&length) {
        None
    } else {
        Some(format!("{label} must be between 1 and 10 characters."))
    }
}

fn looks_like_email(value: &str) -> bool {
    match value.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.ends_with('.')
        }
        None => false,
    }
}

async fn validate_user(
    Form(fields): Form<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    let mut errors = Map::new();
    if let Some(message) = name_error("First name", fields.get("first_name")) {
        errors.insert("first_name".into(), json!(message));
    }
    if let Some(message) = name_error("Last name", fields.get("last_name")) {
        errors.insert("last_name".into(), json!(message));
    }
    if let Some(email) = fields.get("email") {
        if !looks_like_email(email) {
            errors.insert("email".into(), json!("Email is invalid."));
        }
    }
    if !fields.contains_key("first_name") && !fields.contains_key("last_name") {
        errors.insert("form".into(), json!("You must have a first or last name."));
    }

    if errors.is_empty() {
        let echo: Map<String, Value> = fields
            .into_iter()
            .map(|(name, value)| (name, Value::String(value)))
            .collect();
        (StatusCode::OK, Json(Value::Object(echo)))
    } else {
        (StatusCode::BAD_REQUEST, Json(Value::Object(errors)))
    }
}

async fn create_user() -> Json<Value> {
    Json(json!({"id": 42}))
}

async fn echo_json(Json(body): Json<Value>) -> Json<Value> {
    Json(body)
}

async fn echo_query(Query(params): Query<HashMap<String, String>>) -> Json<Value> {
    Json(json!(params))
}

async fn crash() -> (StatusCode, &'static str) {
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
}

async fn spawn_user_server() -> String {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let app = Router::new()
        .route("/user", post(validate_user))
        .route("/users", post(create_user))
        .route("/json", post(echo_json))
        .route("/search", get(echo_query))
        .route("/crash", post(crash));
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

async fn wait_for(
    events: &mut broadcast::Receiver<FormEvent>,
    wanted: impl Fn(&FormEvent) -> bool,
) -> FormEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
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

fn field(name: &str, text: &str) -> EditableElement {
    EditableElement::new(text).with_attribute(ATTR_NAME, name)
}

#[tokio::test]
async fn invalid_email_renders_one_error_and_keeps_field_editing() {
    let server = spawn_user_server().await;
    let form = FormDocument::new(
        FormDom::new()
            .with_attribute(ATTR_ACTION, format!("{server}/user"))
            .with_control("first_name", "Ann"),
    );
    let email = EditableField::attach(&form, field("email", "ann@example.com"))
        .await
        .expect("attach email");
    let mut events = form.subscribe_events();

    email.activate().await.expect("activate");
    email.set_input("not-an-email").await.expect("type");
    email.confirm().await.expect("confirm").completed().await;

    let id = email.id();
    wait_for(&mut events, |event| *event == FormEvent::EditError { field: id }).await;

    let dom = form.dom().await;
    assert_eq!(dom.field_errors().len(), 1);
    assert_eq!(
        dom.field_error("email").map(|markup| markup.as_str()),
        Some("<div class=\"form-error\">Email is invalid.</div>")
    );
    let snapshot = email.snapshot().await;
    assert_eq!(snapshot.mode, FieldMode::Edit);
    assert!(snapshot.errored);
    assert!(!snapshot.loading);
}

#[tokio::test]
async fn accepted_edit_returns_field_to_view_with_echoed_value() {
    let server = spawn_user_server().await;
    let form = FormDocument::new(
        FormDom::new().with_attribute(ATTR_ACTION, format!("{server}/user")),
    );
    let first_name = EditableField::attach(&form, field("first_name", "Bob"))
        .await
        .expect("attach first_name");
    let mut events = form.subscribe_events();

    first_name.activate().await.expect("activate");
    first_name.set_input("Ann").await.expect("type");
    first_name.confirm().await.expect("confirm").completed().await;

    let id = first_name.id();
    wait_for(&mut events, |event| *event == FormEvent::ViewStart { field: id }).await;

    let snapshot = first_name.snapshot().await;
    assert_eq!(snapshot.mode, FieldMode::View);
    assert_eq!(snapshot.display_text, "Ann");
    assert!(first_name.edit_affordance_visible().await);
    assert!(form.dom().await.field_errors().is_empty());
}

#[tokio::test]
async fn closed_choice_field_round_trips_through_server() {
    let server = spawn_user_server().await;
    let form = FormDocument::new(
        FormDom::new()
            .with_attribute(ATTR_ACTION, format!("{server}/user"))
            .with_control("first_name", "Ann"),
    );
    let element = field("size", "Small").with_attribute(ATTR_OPTIONS, "s:Small;m:Medium;l:Large");
    let size = EditableField::attach(&form, element)
        .await
        .expect("attach size");
    let mut events = form.subscribe_events();

    size.activate().await.expect("activate");
    size.set_input("m").await.expect("pick medium");
    size.confirm().await.expect("confirm").completed().await;

    let id = size.id();
    wait_for(&mut events, |event| *event == FormEvent::ViewStart { field: id }).await;
    assert_eq!(size.snapshot().await.display_text, "Medium");
    assert_eq!(form.value("size").await.as_deref(), Some("m"));
}

#[tokio::test]
async fn redirect_substitutes_response_fields() {
    let server = spawn_user_server().await;
    let successes = Arc::new(StdMutex::new(0usize));
    let counter = Arc::clone(&successes);
    let behaviors = FormBehaviors::default().on_success(move |_: &Value, _: &SubmitContext| {
        *counter.lock().expect("counter") += 1;
    });
    let form = FormDocument::new(
        FormDom::new()
            .with_attribute(ATTR_ACTION, format!("{server}/users"))
            .with_attribute(ATTR_REDIRECT, "/users/:id")
            .with_control("first_name", "Ann"),
    );
    SubmissionController::attach_with_behaviors(&form, FormSettings::default(), behaviors)
        .await
        .expect("attach");

    form.request_submit(SubmitContext::default())
        .await
        .expect("submit")
        .completed()
        .await;

    assert_eq!(form.location().await.as_deref(), Some("/users/42"));
    assert_eq!(*successes.lock().expect("counter"), 0);
}

#[tokio::test]
async fn non_json_server_error_reports_empty_mapping() {
    let server = spawn_user_server().await;
    let reports: Arc<StdMutex<Vec<ErrorReport>>> = Arc::default();
    let sink = Arc::clone(&reports);
    let behaviors =
        FormBehaviors::default().on_error(move |report: &ErrorReport, _: &SubmitContext| {
            sink.lock().expect("reports").push(report.clone());
        });
    let form = FormDocument::new(
        FormDom::new()
            .with_attribute(ATTR_ACTION, format!("{server}/crash"))
            .with_control("first_name", "Ann"),
    );
    SubmissionController::attach_with_behaviors(&form, FormSettings::default(), behaviors)
        .await
        .expect("attach");
    let mut events = form.subscribe_events();

    form.request_submit(SubmitContext::default())
        .await
        .expect("submit")
        .completed()
        .await;

    let event = wait_for(&mut events, |event| matches!(event, FormEvent::Error { .. })).await;
    assert!(matches!(
        event,
        FormEvent::Error {
            kind: FailureKind::Rejected { status: 500 },
            ..
        }
    ));
    let reports = reports.lock().expect("reports");
    assert_eq!(reports.len(), 1);
    assert!(reports[0].is_empty());
}

#[tokio::test]
async fn unreachable_server_surfaces_transport_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");

    let form = FormDocument::new(
        FormDom::new()
            .with_attribute(ATTR_ACTION, format!("http://{addr}/user"))
            .with_control("first_name", "Ann"),
    );
    let controller = SubmissionController::attach(&form, FormSettings::default())
        .await
        .expect("attach");
    let mut events = form.subscribe_events();

    controller
        .submit(SubmitContext::default())
        .await
        .expect("submit")
        .completed()
        .await;

    let event = wait_for(&mut events, |event| matches!(event, FormEvent::Error { .. })).await;
    match event {
        FormEvent::Error { kind, report, .. } => {
            assert!(kind.is_transport());
            assert!(report.is_empty());
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(controller.pending_request().await, None);
}

#[tokio::test]
async fn json_encoding_posts_controls_as_object() {
    let server = spawn_user_server().await;
    let bodies: Arc<StdMutex<Vec<Value>>> = Arc::default();
    let sink = Arc::clone(&bodies);
    let behaviors = FormBehaviors::default().on_success(move |body: &Value, _: &SubmitContext| {
        sink.lock().expect("bodies").push(body.clone());
    });
    let form = FormDocument::new(
        FormDom::new()
            .with_control("first_name", "Ann")
            .with_control("last_name", ""),
    );
    let settings = FormSettings {
        url: Some(format!("{server}/json")),
        encoding: Some(BodyEncoding::Json),
        ..FormSettings::default()
    };
    SubmissionController::attach_with_behaviors(&form, settings, behaviors)
        .await
        .expect("attach");

    form.request_submit(SubmitContext::default())
        .await
        .expect("submit")
        .completed()
        .await;

    assert_eq!(
        *bodies.lock().expect("bodies"),
        vec![json!({"first_name": "Ann"})]
    );
}

#[tokio::test]
async fn get_form_sends_controls_as_query_string() {
    let server = spawn_user_server().await;
    let bodies: Arc<StdMutex<Vec<Value>>> = Arc::default();
    let sink = Arc::clone(&bodies);
    let behaviors = FormBehaviors::default().on_success(move |body: &Value, _: &SubmitContext| {
        sink.lock().expect("bodies").push(body.clone());
    });
    let form = FormDocument::new(
        FormDom::new()
            .with_control("q", "rust lang")
            .with_control("page", "2")
            .with_control("empty", ""),
    );
    let settings = FormSettings {
        url: Some(format!("{server}/search")),
        method: Some(HttpMethod::Get),
        ..FormSettings::default()
    };
    SubmissionController::attach_with_behaviors(&form, settings, behaviors)
        .await
        .expect("attach");

    form.request_submit(SubmitContext::default())
        .await
        .expect("submit")
        .completed()
        .await;

    assert_eq!(
        *bodies.lock().expect("bodies"),
        vec![json!({"q": "rust lang", "page": "2"})]
    );
}
