use regex::Regex;
use serde_json::Value;
use tracing::warn;

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Token(String),
}

/// A redirect target such as `/users/:id`, where each `:token` is filled from
/// the successful response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectTemplate {
    raw: String,
    segments: Vec<Segment>,
}

impl RedirectTemplate {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let token_pattern = Regex::new(r":([A-Za-z_]+)")?;
        let mut segments = Vec::new();
        let mut cursor = 0;
        for captures in token_pattern.captures_iter(raw) {
            let (Some(whole), Some(name)) = (captures.get(0), captures.get(1)) else {
                continue;
            };
            if whole.start() > cursor {
                segments.push(Segment::Literal(raw[cursor..whole.start()].to_string()));
            }
            segments.push(Segment::Token(name.as_str().to_string()));
            cursor = whole.end();
        }
        if cursor < raw.len() {
            segments.push(Segment::Literal(raw[cursor..].to_string()));
        }
        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Token(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Substitutes tokens from `body`. Tokens without a usable value in the
    /// body stay as written.
    pub fn render(&self, body: &Value) -> String {
        let mut target = String::with_capacity(self.raw.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => target.push_str(text),
                Segment::Token(name) => match body.get(name).and_then(token_text) {
                    Some(value) => target.push_str(&value),
                    None => {
                        warn!(
                            token = %name,
                            template = %self.raw,
                            "form: redirect token missing from response"
                        );
                        target.push(':');
                        target.push_str(name);
                    }
                },
            }
        }
        target
    }
}

fn token_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn substitutes_tokens_from_body() {
        let template = RedirectTemplate::parse("/users/:id/posts/:post_slug").expect("parse");
        assert_eq!(template.tokens().collect::<Vec<_>>(), ["id", "post_slug"]);
        assert_eq!(
            template.render(&json!({"id": 42, "post_slug": "hello"})),
            "/users/42/posts/hello"
        );
    }

    #[test]
    fn port_numbers_are_not_tokens() {
        let template = RedirectTemplate::parse("http://localhost:8080/users/:id").expect("parse");
        assert_eq!(
            template.render(&json!({"id": "ann"})),
            "http://localhost:8080/users/ann"
        );
    }

    #[test]
    fn missing_tokens_are_left_in_place() {
        let template = RedirectTemplate::parse("/users/:id").expect("parse");
        assert_eq!(template.render(&json!({})), "/users/:id");
        assert_eq!(template.render(&Value::Null), "/users/:id");
    }

    #[test]
    fn template_without_tokens_is_returned_verbatim() {
        let template = RedirectTemplate::parse("/done").expect("parse");
        assert_eq!(template.render(&json!({"id": 1})), "/done");
    }
}
