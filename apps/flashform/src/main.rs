mod config;

use std::{path::PathBuf, time::Duration};

use anyhow::{bail, Context, Result};
use clap::Parser;
use form_client::{
    editable::{ATTR_NAME, ATTR_OPTIONS},
    EditableElement, EditableField, FormDocument, FormDom, SubmissionController,
};
use shared::{
    domain::{HttpMethod, OptionsMap},
    protocol::{FormEvent, SubmitContext},
};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::info;
use tracing_subscriber::EnvFilter;

const OUTCOME_TIMEOUT: Duration = Duration::from_secs(30);

/// Submits a form to an HTTP endpoint, or performs one inline edit of a
/// single field, and prints every form event as a JSON line.
#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    #[arg(long)]
    url: Option<String>,
    #[arg(long)]
    method: Option<HttpMethod>,
    /// Redirect template such as `/users/:id`.
    #[arg(long)]
    redirect: Option<String>,
    #[arg(long, value_parser = config::parse_encoding)]
    encoding: Option<form_client::BodyEncoding>,
    #[arg(long)]
    send_empty_values: bool,
    /// Form control as `name=value`. Repeatable.
    #[arg(long = "field", value_parser = parse_pair)]
    fields: Vec<(String, String)>,
    /// Edit one field inline as `name=new value` instead of a plain submit.
    #[arg(long, value_parser = parse_pair)]
    edit: Option<(String, String)>,
    /// Options of the edited field, `value:label;...` or a JSON object.
    #[arg(long, requires = "edit")]
    options: Option<String>,
}

fn parse_pair(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(name, value)| (name.trim().to_string(), value.to_string()))
        .filter(|(name, _)| !name.is_empty())
        .ok_or_else(|| format!("expected name=value, got '{raw}'"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let mut settings = config::load_settings(&args.config)?;
    config::apply_env_overrides(&mut settings, |key| std::env::var(key).ok())?;
    if let Some(url) = args.url.clone() {
        settings.form.url = Some(url);
    }
    if let Some(method) = args.method {
        settings.form.method = Some(method);
    }
    if let Some(redirect) = args.redirect.clone() {
        settings.form.redirect = Some(redirect);
    }
    if let Some(encoding) = args.encoding {
        settings.form.encoding = Some(encoding);
    }
    if args.send_empty_values {
        settings.form.send_empty_values = Some(true);
    }
    settings.fields.extend(args.fields.iter().cloned());

    let mut dom = FormDom::new();
    for (name, value) in &settings.fields {
        dom = dom.with_control(name.clone(), value.clone());
    }
    let form = FormDocument::new(dom);
    let controller = SubmissionController::attach(&form, settings.form.clone())
        .await
        .context("failed to configure form")?;
    let mut events = form.subscribe_events();

    let succeeded = match &args.edit {
        Some((name, value)) => {
            let current = settings.fields.get(name).cloned().unwrap_or_default();
            edit_field(&form, &mut events, name, &current, value, args.options.as_deref()).await?
        }
        None => {
            controller
                .submit(SubmitContext::default())
                .await?
                .completed()
                .await;
            let outcome = drain_events(&mut events)?;
            outcome.unwrap_or(true)
        }
    };

    if let Some(location) = form.location().await {
        info!(%location, "redirected");
        let event = serde_json::json!({ "type": "redirect", "payload": { "location": location } });
        println!("{event}");
    }
    if !succeeded {
        bail!("submission was rejected");
    }
    Ok(())
}

async fn edit_field(
    form: &FormDocument,
    events: &mut broadcast::Receiver<FormEvent>,
    name: &str,
    current: &str,
    value: &str,
    options: Option<&str>,
) -> Result<bool> {
    let mut element = EditableElement::new(current).with_attribute(ATTR_NAME, name);
    if let Some(raw) = options {
        let label = OptionsMap::parse(raw)?
            .label_for(current)
            .map(str::to_string);
        if let Some(label) = label {
            element.text = label;
        }
        element = element.with_attribute(ATTR_OPTIONS, raw);
    }

    let field = EditableField::attach(form, element).await?;
    field.activate().await?;
    field.set_input(value).await?;
    field.confirm().await?.completed().await;

    if form.location().await.is_some() {
        drain_events(events)?;
        return Ok(true);
    }

    let id = field.id();
    let succeeded = tokio::time::timeout(OUTCOME_TIMEOUT, async {
        loop {
            let event = events.recv().await.context("form event channel closed")?;
            print_event(&event)?;
            match event {
                FormEvent::ViewStart { field } if field == id => {
                    return Ok::<_, anyhow::Error>(true)
                }
                FormEvent::EditError { field } if field == id => return Ok(false),
                _ => {}
            }
        }
    })
    .await
    .context("timed out waiting for the edit outcome")??;
    drain_events(events)?;

    let snapshot = field.snapshot().await;
    info!(
        field = name,
        display = %snapshot.display_text,
        mode = ?snapshot.mode,
        errored = snapshot.errored,
        "edit finished"
    );
    Ok(succeeded)
}

/// Prints queued events. Returns whether the last outcome was a success,
/// or `None` when no outcome event was queued.
fn drain_events(events: &mut broadcast::Receiver<FormEvent>) -> Result<Option<bool>> {
    let mut outcome = None;
    loop {
        match events.try_recv() {
            Ok(event) => {
                print_event(&event)?;
                match event {
                    FormEvent::Success { .. } => outcome = Some(true),
                    FormEvent::Error { .. } => outcome = Some(false),
                    _ => {}
                }
            }
            Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty | TryRecvError::Closed) => return Ok(outcome),
        }
    }
}

fn print_event(event: &FormEvent) -> Result<()> {
    println!("{}", serde_json::to_string(event)?);
    Ok(())
}
