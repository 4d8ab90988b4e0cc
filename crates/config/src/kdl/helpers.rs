//! Typed accessors over KDL documents.
//!
//! A setting is a node whose first positional argument is the value:
//! `email "ops@example.com"`. Accessors return `Ok(None)` when the node is
//! absent and an error when it is present with the wrong type.

use anyhow::{anyhow, Result};
use kdl::{KdlDocument, KdlNode, KdlValue};

/// First positional argument of a node
pub fn first_arg(node: &KdlNode) -> Option<&KdlValue> {
    node.entries()
        .iter()
        .find(|entry| entry.name().is_none())
        .map(|entry| entry.value())
}

/// Named property of a node, e.g. `namespace="alice"`
pub fn property<'a>(node: &'a KdlNode, key: &str) -> Option<&'a KdlValue> {
    node.entries()
        .iter()
        .find(|entry| entry.name().map(|n| n.value()) == Some(key))
        .map(|entry| entry.value())
}

fn setting<'a>(doc: &'a KdlDocument, name: &str) -> Option<&'a KdlValue> {
    doc.nodes()
        .iter()
        .find(|node| node.name().value() == name)
        .and_then(first_arg)
}

pub fn get_string_entry(doc: &KdlDocument, name: &str) -> Result<Option<String>> {
    match setting(doc, name) {
        None => Ok(None),
        Some(value) => value
            .as_string()
            .map(|s| Some(s.to_string()))
            .ok_or_else(|| anyhow!("'{}' must be a string, got {}", name, value)),
    }
}

pub fn get_int_entry(doc: &KdlDocument, name: &str) -> Result<Option<u64>> {
    match setting(doc, name) {
        None => Ok(None),
        Some(value) => {
            let int = value
                .as_integer()
                .ok_or_else(|| anyhow!("'{}' must be an integer, got {}", name, value))?;
            u64::try_from(int)
                .map(Some)
                .map_err(|_| anyhow!("'{}' must be a non-negative integer, got {}", name, int))
        }
    }
}

pub fn get_bool_entry(doc: &KdlDocument, name: &str) -> Result<Option<bool>> {
    match setting(doc, name) {
        None => Ok(None),
        Some(value) => value
            .as_bool()
            .map(Some)
            .ok_or_else(|| anyhow!("'{}' must be #true or #false, got {}", name, value)),
    }
}
