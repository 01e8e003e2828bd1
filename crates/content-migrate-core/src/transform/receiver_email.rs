//! Notification recipient taken from a form's TypoScript definition.

use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use super::{PropertyTransformer, TransformError, TransformerContext};
use crate::typoscript::{ConfigParser, ConfigTree};
use crate::{field_id, field_text, Record, UID_FIELD};

const DEFAULT_SOURCE_FIELD: &str = "bodytext";
const DEFAULT_SECTION: &str = "postProcessor.";

/// Recipient address of the last `mail` entry in a form's post-processor section.
///
/// Only integer keys are considered, in the order the section lists them. An entry
/// counts when its value is `mail` and its `<key>.` block carries a non-empty
/// `recipientEmail`; a later entry replaces an earlier one.
#[must_use]
pub fn last_mail_recipient(section: &ConfigTree) -> Option<String> {
    let mut recipient = None;
    for (key, value) in section {
        if !is_integer_key(key) || value.as_str() != Some("mail") {
            continue;
        }
        let address = section
            .get(&format!("{key}."))
            .and_then(|options| options.get("recipientEmail"))
            .and_then(Value::as_str)
            .filter(|address| !address.is_empty());
        if let Some(address) = address {
            recipient = Some(address.to_string());
        }
    }
    recipient
}

fn is_integer_key(key: &str) -> bool {
    key.parse::<i64>().is_ok_and(|number| number.to_string() == key)
}

/// Writes the form's notification recipient into the target field.
///
/// The form definition is read as TypoScript from `source_field` (default `bodytext`);
/// `section` (default `postProcessor.`) selects the block holding the post processors.
/// Records whose definition names no recipient are left unchanged.
pub struct ReceiverEmailTransformer {
    field: String,
    config: Value,
    parser: Arc<dyn ConfigParser + Send + Sync>,
    source_field: String,
    section: String,
    initialized: bool,
}

impl ReceiverEmailTransformer {
    pub const NAME: &'static str = "receiver_email";

    #[must_use]
    pub fn new(context: TransformerContext) -> Self {
        Self {
            field: context.field,
            config: context.config,
            parser: context.parser,
            source_field: DEFAULT_SOURCE_FIELD.to_string(),
            section: DEFAULT_SECTION.to_string(),
            initialized: false,
        }
    }

    #[must_use]
    pub fn boxed(context: TransformerContext) -> Box<dyn PropertyTransformer> {
        Box::new(Self::new(context))
    }

    fn option(&self, key: &str, default: &str) -> Result<String, TransformError> {
        match self.config.get(key) {
            None | Some(Value::Null) => Ok(default.to_string()),
            Some(Value::String(value)) if !value.is_empty() => Ok(value.clone()),
            Some(_) => Err(TransformError::configuration(
                Self::NAME,
                format!("`{key}` must be a non-empty string"),
            )),
        }
    }

    fn recipient(&self, record: &Record) -> Result<Option<String>, TransformError> {
        if !self.initialized {
            return Err(TransformError::NotInitialized(Self::NAME));
        }
        let tree = match self.parser.parse(&field_text(record, &self.source_field)) {
            Ok(tree) => tree,
            Err(err) => {
                warn!(
                    uid = field_id(record, UID_FIELD),
                    field = %self.source_field,
                    error = %err,
                    "form definition is not valid TypoScript, no recipient taken"
                );
                return Ok(None);
            }
        };
        Ok(tree
            .get(&self.section)
            .and_then(Value::as_object)
            .and_then(last_mail_recipient))
    }
}

impl PropertyTransformer for ReceiverEmailTransformer {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn field(&self) -> &str {
        &self.field
    }

    fn initialize(&mut self) -> Result<(), TransformError> {
        if !(self.config.is_null() || self.config.is_object()) {
            return Err(TransformError::configuration(Self::NAME, "configuration must be a mapping"));
        }
        self.source_field = self.option("source_field", DEFAULT_SOURCE_FIELD)?;
        self.section = self.option("section", DEFAULT_SECTION)?;
        self.initialized = true;
        Ok(())
    }

    fn should_apply(&self, record: &Record) -> Result<bool, TransformError> {
        Ok(self.recipient(record)?.is_some())
    }

    fn new_value(&self, record: &Record) -> Result<String, TransformError> {
        Ok(self.recipient(record)?.unwrap_or_default())
    }
}
