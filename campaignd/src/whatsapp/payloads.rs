//! Request bodies for the Cloud API `messages` endpoint.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::precheck::variables::{Component, Param, extract_placeholders};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemplateMessage {
    pub messaging_product: &'static str,
    pub recipient_type: &'static str,
    /// Recipient number, digits only
    pub to: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub template: TemplateBody,
    /// Echoed back on every status webhook for this message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub biz_opaque_callback_data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemplateBody {
    pub name: String,
    pub language: Language,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<ComponentParams>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Language {
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentParams {
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
    pub parameters: Vec<TextParam>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextParam {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub text: String,
    /// Set for named placeholders only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameter_name: Option<String>,
}

/// Build a template send.
///
/// `variables` maps placeholder keys (as produced by precheck) to resolved values. Placeholders
/// without a value are sent as empty strings; precheck is what keeps that from happening.
pub fn template_message(
    to_e164: &str,
    template_name: &str,
    language: &str,
    template_components: &Value,
    variables: &BTreeMap<String, String>,
    callback_data: Option<String>,
) -> TemplateMessage {
    let mut header = vec![];
    let mut body = vec![];
    let mut buttons: BTreeMap<usize, Vec<TextParam>> = BTreeMap::new();

    for placeholder in extract_placeholders(template_components) {
        let text = variables.get(&placeholder.key()).cloned().unwrap_or_default();
        let parameter_name = match &placeholder.param {
            Param::Named(name) => Some(name.clone()),
            Param::Positional(_) => None,
        };
        let param = TextParam {
            kind: "text",
            text,
            parameter_name,
        };
        match placeholder.component {
            Component::Header => header.push(param),
            Component::Body => body.push(param),
            Component::Button(index) => buttons.entry(index).or_default().push(param),
        }
    }

    let mut components = vec![];
    if !header.is_empty() {
        components.push(ComponentParams {
            kind: "header",
            sub_type: None,
            index: None,
            parameters: header,
        });
    }
    if !body.is_empty() {
        components.push(ComponentParams {
            kind: "body",
            sub_type: None,
            index: None,
            parameters: body,
        });
    }
    for (index, parameters) in buttons {
        components.push(ComponentParams {
            kind: "button",
            sub_type: Some("url"),
            index: Some(index.to_string()),
            parameters,
        });
    }

    TemplateMessage {
        messaging_product: "whatsapp",
        recipient_type: "individual",
        to: to_e164.trim_start_matches('+').to_string(),
        kind: "template",
        template: TemplateBody {
            name: template_name.to_string(),
            language: Language {
                code: language.to_string(),
            },
            components,
        },
        biz_opaque_callback_data: callback_data,
    }
}

/// Body for creating a template on the business account.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateTemplate<'a> {
    pub name: &'a str,
    pub language: &'a str,
    pub category: &'a str,
    pub components: &'a Value,
}
