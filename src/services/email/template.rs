use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9_.]+)\s*\}\}").expect("placeholder pattern compiles"));

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("missing template variables: {}", .0.join(", "))]
    MissingVariables(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
    pub text: Option<String>,
}

/// Sorted, de-duplicated placeholder keys
pub fn placeholders(text: &str) -> Vec<String> {
    PLACEHOLDER
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Render subject, HTML and optional text bodies. Only the HTML body escapes values.
pub fn render(
    subject: &str,
    body_html: &str,
    body_text: Option<&str>,
    vars: &Map<String, Value>,
) -> Result<RenderedEmail, TemplateError> {
    let mut missing = BTreeSet::new();
    for key in placeholders(subject)
        .into_iter()
        .chain(placeholders(body_html))
        .chain(body_text.map(placeholders).unwrap_or_default())
    {
        if lookup(vars, &key).is_none() {
            missing.insert(key);
        }
    }
    if !missing.is_empty() {
        return Err(TemplateError::MissingVariables(missing.into_iter().collect()));
    }

    Ok(RenderedEmail {
        subject: substitute(subject, vars, false),
        html: substitute(body_html, vars, true),
        text: body_text.map(|t| substitute(t, vars, false)),
    })
}

fn substitute(text: &str, vars: &Map<String, Value>, escape: bool) -> String {
    PLACEHOLDER
        .replace_all(text, |caps: &Captures| {
            let value = lookup(vars, &caps[1]).unwrap_or_default();
            if escape {
                escape_html(&value)
            } else {
                value
            }
        })
        .into_owned()
}

/// Exact key first, then a dotted path into nested objects. Null counts as missing.
fn lookup(vars: &Map<String, Value>, key: &str) -> Option<String> {
    let value = match vars.get(key) {
        Some(v) => v,
        None => {
            let mut parts = key.split('.');
            let mut current = vars.get(parts.next()?)?;
            for part in parts {
                current = current.get(part)?;
            }
            current
        }
    };
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(v: Value) -> Map<String, Value> {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn placeholders_are_sorted_and_unique() {
        let keys = placeholders("{{ name }} at {{place.address}} - {{name}} {{ count}}");
        assert_eq!(keys, vec!["count", "name", "place.address"]);
    }

    #[test]
    fn html_body_escapes_but_subject_does_not() {
        let r = render(
            "Hi {{name}}",
            "<p>Hello {{ name }}</p>",
            Some("Hello {{name}}"),
            &vars(json!({"name": "Tom & <Jerry>"})),
        )
        .unwrap();
        assert_eq!(r.subject, "Hi Tom & <Jerry>");
        assert_eq!(r.html, "<p>Hello Tom &amp; &lt;Jerry&gt;</p>");
        assert_eq!(r.text.as_deref(), Some("Hello Tom & <Jerry>"));
    }

    #[test]
    fn missing_vars_are_reported_sorted() {
        let err = render("{{zeta}}", "{{alpha}} {{ok}}", None, &vars(json!({"ok": 1, "zeta": null}))).unwrap_err();
        assert_eq!(err, TemplateError::MissingVariables(vec!["alpha".into(), "zeta".into()]));
    }

    #[test]
    fn dotted_keys_reach_nested_values() {
        let r = render("{{place.city}}", "{{ cats }}", None, &vars(json!({"place": {"city": "Santa Rosa"}, "cats": 4})))
            .unwrap();
        assert_eq!(r.subject, "Santa Rosa");
        assert_eq!(r.html, "4");
    }
}
