//! Conditional replacement of a field with a literal or a `{placeholder}` template.

use std::sync::Arc;

use serde_json::Value;

use super::{PropertyTransformer, TransformError, TransformerContext};
use crate::template::TemplateRenderer;
use crate::{field_text, value_to_text, Record};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Condition {
    field: String,
    allowed: Vec<String>,
}

/// Replaces a field with a literal or a `{placeholder}` template when every configured
/// condition matches.
///
/// ```yaml
/// conditions:
///   status: [draft, review]
/// replace:
///   value: "{title} (staging)"
/// ```
pub struct ReplaceOnConditionTransformer {
    field: String,
    config: Value,
    renderer: Arc<dyn TemplateRenderer + Send + Sync>,
    conditions: Option<Vec<Condition>>,
    replacement: String,
}

impl ReplaceOnConditionTransformer {
    pub const NAME: &'static str = "replace_on_condition";

    #[must_use]
    pub fn new(context: TransformerContext) -> Self {
        Self {
            field: context.field,
            config: context.config,
            renderer: context.renderer,
            conditions: None,
            replacement: String::new(),
        }
    }

    #[must_use]
    pub fn boxed(context: TransformerContext) -> Box<dyn PropertyTransformer> {
        Box::new(Self::new(context))
    }

    fn conditions(&self) -> Result<&[Condition], TransformError> {
        self.conditions.as_deref().ok_or(TransformError::NotInitialized(Self::NAME))
    }
}

fn parse_conditions(config: &Value) -> Result<Vec<Condition>, TransformError> {
    let Some(raw) = config.get("conditions") else {
        return Err(TransformError::configuration(
            ReplaceOnConditionTransformer::NAME,
            "missing `conditions`",
        ));
    };
    let Some(map) = raw.as_object() else {
        return Err(TransformError::configuration(
            ReplaceOnConditionTransformer::NAME,
            "`conditions` must map field names to lists of values",
        ));
    };

    map.iter()
        .map(|(field, values)| {
            let Some(values) = values.as_array() else {
                return Err(TransformError::configuration(
                    ReplaceOnConditionTransformer::NAME,
                    format!("condition `{field}` must be a list of values"),
                ));
            };
            let allowed = values
                .iter()
                .map(|value| {
                    if value.is_array() || value.is_object() {
                        Err(TransformError::configuration(
                            ReplaceOnConditionTransformer::NAME,
                            format!("condition `{field}` may only list scalar values"),
                        ))
                    } else {
                        Ok(value_to_text(value))
                    }
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Condition { field: field.clone(), allowed })
        })
        .collect()
}

fn parse_replacement(config: &Value) -> Result<String, TransformError> {
    match config.get("replace").and_then(|replace| replace.get("value")) {
        None => Ok(String::new()),
        Some(value) if value.is_array() || value.is_object() => Err(TransformError::configuration(
            ReplaceOnConditionTransformer::NAME,
            "`replace.value` must be a string",
        )),
        Some(value) => Ok(value_to_text(value)),
    }
}

impl PropertyTransformer for ReplaceOnConditionTransformer {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn field(&self) -> &str {
        &self.field
    }

    fn initialize(&mut self) -> Result<(), TransformError> {
        self.conditions = Some(parse_conditions(&self.config)?);
        self.replacement = parse_replacement(&self.config)?;
        Ok(())
    }

    fn should_apply(&self, record: &Record) -> Result<bool, TransformError> {
        Ok(self.conditions()?.iter().all(|condition| {
            let current = field_text(record, &condition.field);
            condition.allowed.iter().any(|allowed| *allowed == current)
        }))
    }

    fn new_value(&self, record: &Record) -> Result<String, TransformError> {
        self.conditions()?;
        if self.replacement.contains('{') {
            return Ok(self.renderer.render(&self.replacement, record));
        }
        Ok(self.replacement.clone())
    }
}
