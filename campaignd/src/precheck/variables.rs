//! Template placeholder extraction.
//!
//! Templates use the Graph API component shape:
//!
//! ```json
//! [
//!   {"type": "HEADER", "format": "TEXT", "text": "Hello {{1}}"},
//!   {"type": "BODY", "text": "Your order {{1}} ships {{2}}"},
//!   {"type": "BUTTONS", "buttons": [{"type": "URL", "url": "https://example.com/track/{{1}}"}]}
//! ]
//! ```
//!
//! Placeholders are either positional (`{{1}}`) or named (`{{first_name}}`). Each is identified
//! by a key: `header.1`, `body.2`, `body.first_name`, `button.0.1` (button index, then position).

use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Component {
    Header,
    Body,
    /// URL button at this index within the `BUTTONS` component
    Button(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Param {
    Positional(u32),
    Named(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Placeholder {
    pub component: Component,
    pub param: Param,
}

impl Placeholder {
    pub fn key(&self) -> String {
        let param = match &self.param {
            Param::Positional(n) => n.to_string(),
            Param::Named(name) => name.clone(),
        };
        match self.component {
            Component::Header => format!("header.{param}"),
            Component::Body => format!("body.{param}"),
            Component::Button(index) => format!("button.{index}.{param}"),
        }
    }
}

/// Every placeholder in the template, header first, then body, then buttons.
///
/// Positional parameters within a component are ordered by number; named ones keep their order
/// of first appearance. Repeats are reported once.
pub fn extract_placeholders(components: &Value) -> Vec<Placeholder> {
    let Some(components) = components.as_array() else {
        return vec![];
    };

    let mut header = vec![];
    let mut body = vec![];
    let mut buttons = vec![];

    for component in components {
        let kind = component.get("type").and_then(Value::as_str).unwrap_or_default();
        match kind.to_ascii_uppercase().as_str() {
            "HEADER" => {
                // Only text headers carry placeholders; media headers are handled by the component itself
                let format = component.get("format").and_then(Value::as_str).unwrap_or("TEXT");
                if format.eq_ignore_ascii_case("TEXT")
                    && let Some(text) = component.get("text").and_then(Value::as_str)
                {
                    header.extend(params_in(text).into_iter().map(|param| Placeholder {
                        component: Component::Header,
                        param,
                    }));
                }
            }
            "BODY" => {
                if let Some(text) = component.get("text").and_then(Value::as_str) {
                    body.extend(params_in(text).into_iter().map(|param| Placeholder {
                        component: Component::Body,
                        param,
                    }));
                }
            }
            "BUTTONS" => {
                let Some(list) = component.get("buttons").and_then(Value::as_array) else {
                    continue;
                };
                for (index, button) in list.iter().enumerate() {
                    let is_url = button
                        .get("type")
                        .and_then(Value::as_str)
                        .is_some_and(|t| t.eq_ignore_ascii_case("URL"));
                    if !is_url {
                        continue;
                    }
                    if let Some(url) = button.get("url").and_then(Value::as_str) {
                        buttons.extend(params_in(url).into_iter().map(|param| Placeholder {
                            component: Component::Button(index),
                            param,
                        }));
                    }
                }
            }
            _ => {}
        }
    }

    header.into_iter().chain(body).chain(buttons).collect()
}

/// Placeholder keys, in the order of [`extract_placeholders`].
pub fn placeholder_keys(components: &Value) -> Vec<String> {
    extract_placeholders(components).iter().map(Placeholder::key).collect()
}

/// Parameters referenced in one text, positional sorted numerically and placed first.
fn params_in(text: &str) -> Vec<Param> {
    let mut positional: Vec<u32> = vec![];
    let mut named: Vec<String> = vec![];

    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            break;
        };
        let inner = after[..end].trim();

        if let Ok(n) = inner.parse::<u32>() {
            if n > 0 && !positional.contains(&n) {
                positional.push(n);
            }
        } else if is_param_name(inner) && !named.iter().any(|existing| existing == inner) {
            named.push(inner.to_string());
        }

        rest = &after[end + 2..];
    }

    positional.sort_unstable();
    positional
        .into_iter()
        .map(Param::Positional)
        .chain(named.into_iter().map(Param::Named))
        .collect()
}

fn is_param_name(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}
