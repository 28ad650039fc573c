//! `${key}` template substitution for data-driven runs

use serde_json::Value;

use testgrid_common::{DataRow, StepKind, TestStep};

/// Replace every `${key}` occurrence in `template` with the stringified
/// row value. Keys absent from the row are left verbatim.
pub fn parameterize_str(template: &str, row: &DataRow) -> String {
    let mut result = template.to_string();
    for (key, value) in row {
        let needle = format!("${{{}}}", key);
        if result.contains(&needle) {
            result = result.replace(&needle, &stringify(value));
        }
    }
    result
}

/// Recurse through nested maps and sequences, substituting into every
/// string leaf. Non-string leaves pass through unchanged.
pub fn parameterize_value(value: &Value, row: &DataRow) -> Value {
    match value {
        Value::String(s) => Value::String(parameterize_str(s, row)),
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| parameterize_value(v, row)).collect())
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), parameterize_value(v, row)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Instantiate a step template for one data row: the element selector, the
/// step value, and any drag target selector are substituted.
pub fn parameterize_step(step: &TestStep, row: &DataRow) -> TestStep {
    let mut out = step.clone();
    out.element.selector = parameterize_str(&step.element.selector, row);
    if let Some(value) = &step.value {
        out.value = Some(parameterize_str(value, row));
    }
    if let StepKind::DragAndDrop { target } = &mut out.kind {
        target.selector = parameterize_str(&target.selector, row);
    }
    out
}

pub(crate) fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
