//! WhatsApp Flow definitions: structural validation and submission routing.
//!
//! A definition is the Flow JSON Meta accepts:
//!
//! ```json
//! {"version": "6.0", "screens": [
//!   {"id": "SIGNUP", "terminal": false, "layout": {"type": "SingleColumnLayout", "children": [
//!     {"type": "TextInput", "name": "first_name", "label": "First name"},
//!     {"type": "Footer", "label": "Next", "on-click-action": {"name": "navigate", "next": {"type": "screen", "name": "DONE"}}}
//!   ]}},
//!   {"id": "DONE", "terminal": true, "layout": {"type": "SingleColumnLayout", "children": [
//!     {"type": "Footer", "label": "Submit", "on-click-action": {"name": "complete"}}
//!   ]}}
//! ]}
//! ```

use std::collections::HashSet;

use serde_json::Value;
use thiserror::Error;

use crate::types::FlowId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowDefinitionError {
    #[error("flow definition is malformed: {0}")]
    Malformed(String),
    #[error("flow must have at least one screen")]
    NoScreens,
    #[error("screen id '{0}' is used more than once")]
    DuplicateScreen(String),
    #[error("screen '{screen}' navigates to unknown screen '{target}'")]
    UnknownTarget { screen: String, target: String },
    #[error("flow must have at least one terminal screen")]
    NoTerminalScreen,
    #[error("screen '{screen}' has more than one field named '{field}'")]
    DuplicateField { screen: String, field: String },
}

/// Check screen ids, navigation targets, terminal screens and field names.
pub fn validate_definition(definition: &Value) -> Result<(), FlowDefinitionError> {
    let screens = definition
        .get("screens")
        .ok_or_else(|| FlowDefinitionError::Malformed("missing 'screens'".to_string()))?
        .as_array()
        .ok_or_else(|| FlowDefinitionError::Malformed("'screens' must be an array".to_string()))?;

    if screens.is_empty() {
        return Err(FlowDefinitionError::NoScreens);
    }

    let mut ids = HashSet::new();
    for (index, screen) in screens.iter().enumerate() {
        let id = screen
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| FlowDefinitionError::Malformed(format!("screen {index} has no id")))?;
        if !ids.insert(id) {
            return Err(FlowDefinitionError::DuplicateScreen(id.to_string()));
        }
    }

    let mut has_terminal = false;
    for screen in screens {
        // Ids were checked above
        let id = screen.get("id").and_then(Value::as_str).unwrap_or_default();
        has_terminal |= screen.get("terminal").and_then(Value::as_bool).unwrap_or(false);

        let mut fields = HashSet::new();
        let children = screen.pointer("/layout/children").and_then(Value::as_array);
        let mut stack: Vec<&Value> = children.map(|c| c.iter().collect()).unwrap_or_default();

        while let Some(node) = stack.pop() {
            if node.get("type").is_some()
                && let Some(name) = node.get("name").and_then(Value::as_str)
                && !fields.insert(name)
            {
                return Err(FlowDefinitionError::DuplicateField {
                    screen: id.to_string(),
                    field: name.to_string(),
                });
            }

            if let Some(target) = navigate_target(node)
                && !ids.contains(target)
            {
                return Err(FlowDefinitionError::UnknownTarget {
                    screen: id.to_string(),
                    target: target.to_string(),
                });
            }

            // Forms and other containers nest their own children
            if let Some(nested) = node.get("children").and_then(Value::as_array) {
                stack.extend(nested.iter());
            }
        }
    }

    if !has_terminal {
        return Err(FlowDefinitionError::NoTerminalScreen);
    }
    Ok(())
}

fn navigate_target(node: &Value) -> Option<&str> {
    let action = node.get("on-click-action")?;
    if action.get("name").and_then(Value::as_str) != Some("navigate") {
        return None;
    }
    action.pointer("/next/name").and_then(Value::as_str)
}

/// Flow tokens are issued as `<flow id>:<anything>`; the prefix routes a submission to its flow.
pub fn flow_id_from_token(token: &str) -> Option<FlowId> {
    let prefix = token.split(':').next()?;
    uuid::Uuid::parse_str(prefix.trim()).ok()
}
