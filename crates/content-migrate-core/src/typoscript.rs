//! Parser for the TypoScript subset stored in form and plugin configuration fields.
//!
//! The result follows the setup-array layout: a value assigned to `a` lives under key `a`,
//! the children of `a` under key `a.` as a nested mapping. Keys keep first-assignment order.

use serde_json::Value;
use tracing::debug;

/// Parsed configuration: string leaves plus `key.` sub-trees.
pub type ConfigTree = serde_json::Map<String, Value>;

pub trait ConfigParser {
    /// # Errors
    /// Returns an error when `text` is structurally broken.
    fn parse(&self, text: &str) -> Result<ConfigTree, ConfigParseError>;
}

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum ConfigParseError {
    #[error("line {line}: closing brace without an open block")]
    UnexpectedClosingBrace { line: usize },
    #[error("line {line}: multi-line value is never closed")]
    UnterminatedValue { line: usize },
    #[error("{open} block(s) still open at end of input")]
    UnclosedBlock { open: usize },
}

/// Handles `a.b = v`, `a { … }`, `a ( … )`, `a >`, `a < b`, and `#`, `//`, `/* */`
/// comments. Condition lines (`[…]`) and `:=` modifiers are ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct TypoScriptParser;

impl ConfigParser for TypoScriptParser {
    fn parse(&self, text: &str) -> Result<ConfigTree, ConfigParseError> {
        let mut tree = ConfigTree::new();
        let mut scopes: Vec<Vec<String>> = Vec::new();
        let mut in_comment = false;
        let mut lines = text.lines().enumerate();

        while let Some((index, raw)) = lines.next() {
            let line_no = index + 1;
            let line = raw.trim();

            if in_comment {
                in_comment = !line.contains("*/");
                continue;
            }
            if line.is_empty()
                || line.starts_with('#')
                || line.starts_with("//")
                || line.starts_with('[')
            {
                continue;
            }
            if line.starts_with("/*") {
                in_comment = !line.contains("*/");
                continue;
            }
            if line.starts_with('}') {
                if scopes.pop().is_none() {
                    return Err(ConfigParseError::UnexpectedClosingBrace { line: line_no });
                }
                continue;
            }

            let (key, rest) = split_key(line);
            if key.is_empty() {
                debug!(line = line_no, "ignoring line without object path");
                continue;
            }
            let path = scoped_path(scopes.last().map(Vec::as_slice), key);
            let rest = rest.trim_start();

            if let Some(value) = rest.strip_prefix('=') {
                insert_at(&mut tree, &path, "", Value::String(value.trim().to_string()));
            } else if rest.starts_with('{') {
                scopes.push(path);
            } else if rest.starts_with('(') {
                let mut collected = Vec::new();
                let mut closed = false;
                for (_, inner) in lines.by_ref() {
                    if inner.trim_start().starts_with(')') {
                        closed = true;
                        break;
                    }
                    collected.push(inner);
                }
                if !closed {
                    return Err(ConfigParseError::UnterminatedValue { line: line_no });
                }
                insert_at(&mut tree, &path, "", Value::String(collected.join("\n")));
            } else if rest.starts_with('>') {
                remove_at(&mut tree, &path);
            } else if let Some(source) = rest.strip_prefix('<') {
                let source = source.trim();
                let source_path = match source.strip_prefix('.') {
                    Some(relative) => scoped_path(scopes.last().map(Vec::as_slice), relative),
                    None => scoped_path(None, source),
                };
                copy_path(&mut tree, &source_path, &path);
            } else {
                debug!(line = line_no, key, "ignoring unsupported TypoScript operator");
            }
        }

        if scopes.is_empty() {
            Ok(tree)
        } else {
            Err(ConfigParseError::UnclosedBlock { open: scopes.len() })
        }
    }
}

fn split_key(line: &str) -> (&str, &str) {
    let end = line
        .find(|ch: char| ch.is_whitespace() || matches!(ch, '=' | '<' | '>' | '{' | '(' | ':'))
        .unwrap_or(line.len());
    line.split_at(end)
}

fn scoped_path(scope: Option<&[String]>, key: &str) -> Vec<String> {
    let mut path = scope.map(<[String]>::to_vec).unwrap_or_default();
    path.extend(key.split('.').filter(|segment| !segment.is_empty()).map(str::to_string));
    path
}

fn branch_mut<'t>(tree: &'t mut ConfigTree, parents: &[String]) -> Option<&'t mut ConfigTree> {
    let mut node = tree;
    for segment in parents {
        let key = format!("{segment}.");
        if !node.get(&key).is_some_and(Value::is_object) {
            node.insert(key.clone(), Value::Object(ConfigTree::new()));
        }
        node = node.get_mut(&key).and_then(Value::as_object_mut)?;
    }
    Some(node)
}

fn lookup<'t>(tree: &'t ConfigTree, parents: &[String]) -> Option<&'t ConfigTree> {
    let mut node = tree;
    for segment in parents {
        node = node.get(&format!("{segment}.")).and_then(Value::as_object)?;
    }
    Some(node)
}

/// Insert at `path`, with `suffix` appended to the last segment (`""` or `"."`).
fn insert_at(tree: &mut ConfigTree, path: &[String], suffix: &str, value: Value) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    if let Some(node) = branch_mut(tree, parents) {
        node.insert(format!("{last}{suffix}"), value);
    }
}

fn remove_at(tree: &mut ConfigTree, path: &[String]) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let branch_key = format!("{last}.");
    if let Some(node) = branch_mut(tree, parents) {
        node.retain(|key, _| key != last && *key != branch_key);
    }
}

fn copy_path(tree: &mut ConfigTree, from: &[String], to: &[String]) {
    let Some((last, parents)) = from.split_last() else {
        return;
    };
    let (value, children) = match lookup(tree, parents) {
        Some(node) => (node.get(last).cloned(), node.get(&format!("{last}.")).cloned()),
        None => (None, None),
    };

    remove_at(tree, to);
    if let Some(value) = value {
        insert_at(tree, to, "", value);
    }
    if let Some(children) = children {
        insert_at(tree, to, ".", children);
    }
}
