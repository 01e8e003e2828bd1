//! `{placeholder}` substitution against a record's own fields.

use crate::{field_text, Record};

pub trait TemplateRenderer {
    fn render(&self, template: &str, values: &Record) -> String;
}

/// Replaces `{name}` with the string form of field `name`.
///
/// Unknown fields render empty. A `{` without a closing `}` is kept literally.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderRenderer;

impl TemplateRenderer for PlaceholderRenderer {
    fn render(&self, template: &str, values: &Record) -> String {
        let mut rendered = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(open) = rest.find('{') {
            rendered.push_str(&rest[..open]);
            let after_open = &rest[open + 1..];
            let Some(close) = after_open.find('}') else {
                rendered.push_str(&rest[open..]);
                return rendered;
            };

            let name = &after_open[..close];
            if name.contains('{') {
                // nested opener: emit this brace as text and rescan from the inner one
                rendered.push('{');
                rest = after_open;
                continue;
            }
            rendered.push_str(&field_text(values, name.trim()));
            rest = &after_open[close + 1..];
        }

        rendered.push_str(rest);
        rendered
    }
}
