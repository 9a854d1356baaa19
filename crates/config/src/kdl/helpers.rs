//! Small accessors over KDL nodes.
//!
//! Every setting is written as a child node with a single argument, e.g.
//! `email "admin@example.com"` inside an `acme { }` block.

use ::kdl::KdlNode;

/// Convert a byte offset to line and column numbers (1-indexed)
pub fn offset_to_line_col(content: &str, offset: usize) -> (usize, usize) {
    let mut line = 1;
    let mut col = 1;
    for (i, ch) in content.char_indices() {
        if i >= offset {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (line, col)
}

/// Helper to get a string entry from a KDL node
pub fn get_string_entry(node: &KdlNode, name: &str) -> Option<String> {
    node.children()
        .and_then(|children| children.get(name))
        .and_then(|n| n.entries().first())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

/// Helper to get an integer entry from a KDL node
pub fn get_int_entry(node: &KdlNode, name: &str) -> Option<i128> {
    node.children()
        .and_then(|children| children.get(name))
        .and_then(|n| n.entries().first())
        .and_then(|e| e.value().as_integer())
}

/// Helper to get a boolean entry from a KDL node
///
/// Accepts `#true`/`#false` as well as the quoted strings `"true"`/`"false"`.
pub fn get_bool_entry(node: &KdlNode, name: &str) -> Option<bool> {
    let value = node
        .children()
        .and_then(|children| children.get(name))
        .and_then(|n| n.entries().first())
        .map(|e| e.value())?;

    value.as_bool().or_else(|| match value.as_string() {
        Some("true") => Some(true),
        Some("false") => Some(false),
        _ => None,
    })
}
