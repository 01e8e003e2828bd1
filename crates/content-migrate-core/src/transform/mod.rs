//! Pluggable field transformers applied to records while they move between environments.
//!
//! A transformer is built once per configured `(table, field)` rule, validates its
//! configuration in [`PropertyTransformer::initialize`], and is then asked per record
//! whether it applies and what the new value is.

mod receiver_email;
mod replace_on_condition;
mod runner;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::template::{PlaceholderRenderer, TemplateRenderer};
use crate::typoscript::{ConfigParser, TypoScriptParser};
use crate::{field_text, Record};

pub use receiver_email::{last_mail_recipient, ReceiverEmailTransformer};
pub use replace_on_condition::ReplaceOnConditionTransformer;
pub use runner::{run_rules, AppliedChange, RecordRepository, RuleRunError, TableTransformSummary};

/// Characters of the previous value kept in change logs.
pub const OLD_VALUE_PREVIEW_CHARS: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("configuration error in transformer {transformer}: {message}")]
    Configuration { transformer: String, message: String },
    #[error("unknown transformer: {0}")]
    UnknownTransformer(String),
    #[error("transformer {0} used before initialize")]
    NotInitialized(&'static str),
}

impl TransformError {
    pub(crate) fn configuration(transformer: &str, message: impl Into<String>) -> Self {
        Self::Configuration { transformer: transformer.to_string(), message: message.into() }
    }
}

/// Audit entry for one rewritten field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PropertyChange {
    pub transformer: String,
    pub field: String,
    pub old_preview: String,
    pub new_value: String,
}

pub trait PropertyTransformer {
    fn name(&self) -> &'static str;

    /// Field this transformer rewrites.
    fn field(&self) -> &str;

    /// Validate the configuration. Runs once, before any record is seen.
    ///
    /// # Errors
    /// Returns [`TransformError::Configuration`] for missing or malformed keys.
    fn initialize(&mut self) -> Result<(), TransformError>;

    /// # Errors
    /// Returns an error when the record cannot be inspected.
    fn should_apply(&self, record: &Record) -> Result<bool, TransformError>;

    /// # Errors
    /// Returns an error when the value cannot be computed.
    fn new_value(&self, record: &Record) -> Result<String, TransformError>;

    /// Write the new value into the field and log the change.
    ///
    /// # Errors
    /// Propagates [`PropertyTransformer::new_value`] failures.
    fn apply(&self, record: &mut Record) -> Result<PropertyChange, TransformError> {
        let new_value = self.new_value(record)?;
        let field = self.field().to_string();
        let old_preview =
            field_text(record, &field).chars().take(OLD_VALUE_PREVIEW_CHARS).collect::<String>();

        info!(
            transformer = self.name(),
            "{field} changed from {old_preview} to {new_value}"
        );
        record.insert(field.clone(), Value::String(new_value.clone()));

        Ok(PropertyChange {
            transformer: self.name().to_string(),
            field,
            old_preview,
            new_value,
        })
    }
}

/// What a transformer is built from: its target field, its private configuration block,
/// and the shared collaborators.
#[derive(Clone)]
pub struct TransformerContext {
    pub field: String,
    pub config: Value,
    pub renderer: Arc<dyn TemplateRenderer + Send + Sync>,
    pub parser: Arc<dyn ConfigParser + Send + Sync>,
}

pub type TransformerConstructor = fn(TransformerContext) -> Box<dyn PropertyTransformer>;

/// Maps configuration names to transformer constructors.
pub struct TransformerRegistry {
    constructors: BTreeMap<String, TransformerConstructor>,
    renderer: Arc<dyn TemplateRenderer + Send + Sync>,
    parser: Arc<dyn ConfigParser + Send + Sync>,
}

impl TransformerRegistry {
    #[must_use]
    pub fn new(
        renderer: Arc<dyn TemplateRenderer + Send + Sync>,
        parser: Arc<dyn ConfigParser + Send + Sync>,
    ) -> Self {
        Self { constructors: BTreeMap::new(), renderer, parser }
    }

    /// Registry with the built-in transformers, the placeholder renderer and the
    /// TypoScript parser.
    #[must_use]
    pub fn with_builtin() -> Self {
        let mut registry = Self::new(Arc::new(PlaceholderRenderer), Arc::new(TypoScriptParser));
        registry.register(ReplaceOnConditionTransformer::NAME, ReplaceOnConditionTransformer::boxed);
        registry.register(ReceiverEmailTransformer::NAME, ReceiverEmailTransformer::boxed);
        registry
    }

    pub fn register(&mut self, name: &str, constructor: TransformerConstructor) {
        self.constructors.insert(name.to_string(), constructor);
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }

    /// Build and initialize the transformer registered as `name` for `field`.
    ///
    /// # Errors
    /// Returns [`TransformError::UnknownTransformer`] or the initialization error.
    pub fn create(
        &self,
        name: &str,
        field: &str,
        config: Value,
    ) -> Result<Box<dyn PropertyTransformer>, TransformError> {
        let constructor = self
            .constructors
            .get(name)
            .ok_or_else(|| TransformError::UnknownTransformer(name.to_string()))?;
        let mut transformer = constructor(TransformerContext {
            field: field.to_string(),
            config,
            renderer: Arc::clone(&self.renderer),
            parser: Arc::clone(&self.parser),
        });
        transformer.initialize()?;
        Ok(transformer)
    }
}

/// One configured rewrite: which field, which transformer, and its configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PropertyRule {
    pub field: String,
    pub transformer: String,
    #[serde(default)]
    pub config: Value,
}

/// Rules per table, as loaded from a rule file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RuleSet {
    #[serde(default)]
    pub tables: BTreeMap<String, Vec<PropertyRule>>,
}

/// Ordered transformer chain for one table. Later steps see earlier rewrites.
pub struct PropertyPipeline {
    steps: Vec<Box<dyn PropertyTransformer>>,
}

impl PropertyPipeline {
    /// Build every transformer up front so configuration errors surface before any record
    /// is processed.
    ///
    /// # Errors
    /// Returns the first unknown-transformer or configuration error.
    pub fn compile(
        registry: &TransformerRegistry,
        rules: &[PropertyRule],
    ) -> Result<Self, TransformError> {
        let steps = rules
            .iter()
            .map(|rule| registry.create(&rule.transformer, &rule.field, rule.config.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { steps })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run every applicable step against `record`, returning the changes made.
    ///
    /// # Errors
    /// Stops at the first failing step.
    pub fn run(&self, record: &mut Record) -> Result<Vec<PropertyChange>, TransformError> {
        let mut changes = Vec::new();
        for step in &self.steps {
            if step.should_apply(record)? {
                changes.push(step.apply(record)?);
            }
        }
        Ok(changes)
    }
}

/// Outcome of a single-shot transformer evaluation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Evaluation {
    pub applies: bool,
    pub new_value: Option<String>,
}

/// Build `transformer` for `field` with `config` and evaluate it against `record` without
/// modifying it.
///
/// # Errors
/// Returns configuration errors from building the transformer and evaluation errors.
pub fn evaluate(
    registry: &TransformerRegistry,
    transformer: &str,
    field: &str,
    config: Value,
    record: &Record,
) -> Result<Evaluation, TransformError> {
    let transformer = registry.create(transformer, field, config)?;
    if !transformer.should_apply(record)? {
        return Ok(Evaluation { applies: false, new_value: None });
    }
    Ok(Evaluation { applies: true, new_value: Some(transformer.new_value(record)?) })
}
