use std::{collections::BTreeMap, fs, io, path::Path};

use anyhow::Context;
use form_client::{BodyEncoding, FormSettings};
use serde::Deserialize;
use shared::domain::HttpMethod;

pub const DEFAULT_CONFIG_PATH: &str = "flashform.toml";
const ENV_PREFIX: &str = "FLASHFORM__";

/// Everything the driver needs to build and submit one form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub form: FormSettings,
    /// Initial control values, in name order.
    pub fields: BTreeMap<String, String>,
}

/// Reads `path` when it exists. A missing file yields defaults.
pub fn load_settings(path: &Path) -> anyhow::Result<Settings> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Settings::default()),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read '{}'", path.display()))
        }
    };
    toml::from_str(&raw).with_context(|| format!("invalid settings file '{}'", path.display()))
}

/// Applies `FLASHFORM__*` overrides looked up through `var`.
pub fn apply_env_overrides(
    settings: &mut Settings,
    var: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<()> {
    let lookup = |key: &str| var(&format!("{ENV_PREFIX}{key}"));

    if let Some(v) = lookup("URL") {
        settings.form.url = Some(v);
    }
    if let Some(v) = lookup("BASE_URL") {
        settings.form.base_url = Some(v);
    }
    if let Some(v) = lookup("METHOD") {
        let method = v
            .parse::<HttpMethod>()
            .with_context(|| format!("{ENV_PREFIX}METHOD"))?;
        settings.form.method = Some(method);
    }
    if let Some(v) = lookup("REDIRECT") {
        settings.form.redirect = Some(v);
    }
    if let Some(v) = lookup("SEND_EMPTY_VALUES") {
        settings.form.send_empty_values = Some(parse_bool(&v)?);
    }
    if let Some(v) = lookup("ENCODING") {
        settings.form.encoding = Some(parse_encoding(&v)?);
    }
    Ok(())
}

fn parse_bool(raw: &str) -> anyhow::Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => anyhow::bail!("expected true or false, got '{other}'"),
    }
}

pub fn parse_encoding(raw: &str) -> anyhow::Result<BodyEncoding> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "urlencoded" | "form" => Ok(BodyEncoding::Urlencoded),
        "json" => Ok(BodyEncoding::Json),
        other => anyhow::bail!("unknown body encoding '{other}'"),
    }
}
