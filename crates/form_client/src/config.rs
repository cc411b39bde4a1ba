use serde::{Deserialize, Serialize};
use shared::domain::HttpMethod;
use url::Url;

use crate::{document::FormDom, error::ConfigError};

pub const ATTR_ACTION: &str = "action";
pub const ATTR_METHOD: &str = "method";
pub const ATTR_REDIRECT: &str = "data-redirect";
pub const ATTR_WATCH: &str = "data-watch";
pub const ATTR_SEND_EMPTY_VALUES: &str = "data-send-empty-values";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyEncoding {
    #[default]
    Urlencoded,
    Json,
}

/// Partial form configuration. Unset fields fall through to the layer below.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormSettings {
    pub url: Option<String>,
    pub base_url: Option<String>,
    pub method: Option<HttpMethod>,
    pub redirect: Option<String>,
    pub watch: Option<bool>,
    pub send_empty_values: Option<bool>,
    pub encoding: Option<BodyEncoding>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSettings {
    pub url: Url,
    pub method: HttpMethod,
    pub redirect: Option<String>,
    pub watch: bool,
    pub send_empty_values: bool,
    pub encoding: BodyEncoding,
}

impl FormSettings {
    /// Reads the declarative attributes of a form element.
    pub fn from_attributes(dom: &FormDom) -> Result<Self, ConfigError> {
        Ok(Self {
            url: non_empty(dom.attribute(ATTR_ACTION)),
            base_url: None,
            method: non_empty(dom.attribute(ATTR_METHOD))
                .map(|raw| raw.parse::<HttpMethod>())
                .transpose()?,
            redirect: non_empty(dom.attribute(ATTR_REDIRECT)),
            watch: parse_flag(dom, ATTR_WATCH)?,
            send_empty_values: parse_flag(dom, ATTR_SEND_EMPTY_VALUES)?,
            encoding: None,
        })
    }

    /// Layers `self` on top of `lower`; values set in `self` win.
    pub fn over(self, lower: FormSettings) -> FormSettings {
        FormSettings {
            url: self.url.or(lower.url),
            base_url: self.base_url.or(lower.base_url),
            method: self.method.or(lower.method),
            redirect: self.redirect.or(lower.redirect),
            watch: self.watch.or(lower.watch),
            send_empty_values: self.send_empty_values.or(lower.send_empty_values),
            encoding: self.encoding.or(lower.encoding),
        }
    }

    /// Library defaults, then `attributes`, then `explicit`.
    pub fn layered(attributes: FormSettings, explicit: FormSettings) -> FormSettings {
        explicit.over(attributes).over(FormSettings::defaults())
    }

    pub fn defaults() -> FormSettings {
        FormSettings {
            url: None,
            base_url: None,
            method: Some(HttpMethod::Post),
            redirect: None,
            watch: Some(false),
            send_empty_values: Some(false),
            encoding: Some(BodyEncoding::Urlencoded),
        }
    }

    pub fn resolve(self) -> Result<ResolvedSettings, ConfigError> {
        let raw_url = self.url.ok_or(ConfigError::MissingTargetUrl)?;
        let url = resolve_url(&raw_url, self.base_url.as_deref())?;
        Ok(ResolvedSettings {
            url,
            method: self.method.unwrap_or_default(),
            redirect: self.redirect,
            watch: self.watch.unwrap_or(false),
            send_empty_values: self.send_empty_values.unwrap_or(false),
            encoding: self.encoding.unwrap_or_default(),
        })
    }
}

fn resolve_url(raw: &str, base: Option<&str>) -> Result<Url, ConfigError> {
    match Url::parse(raw) {
        Ok(url) => Ok(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let base = base.ok_or_else(|| ConfigError::RelativeUrl {
                url: raw.to_string(),
            })?;
            Url::parse(base)
                .and_then(|base| base.join(raw))
                .map_err(|source| ConfigError::InvalidUrl {
                    url: raw.to_string(),
                    source,
                })
        }
        Err(source) => Err(ConfigError::InvalidUrl {
            url: raw.to_string(),
            source,
        }),
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn parse_flag(dom: &FormDom, attribute: &str) -> Result<Option<bool>, ConfigError> {
    let Some(raw) = dom.attribute(attribute) else {
        return Ok(None);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(Some(true)),
        "false" | "0" | "" => Ok(Some(false)),
        _ => Err(ConfigError::InvalidFlag {
            attribute: attribute.to_string(),
            value: raw.to_string(),
        }),
    }
}
