// src/tree/newick.rs

//! Newick parsing and serialisation for [`GuideTree`].
//!
//! Supported: nested groups, quoted (`'a b'`, `''` escapes a quote) and
//! unquoted labels, optional internal labels, optional `:length` suffixes,
//! and `[...]` comments between tokens. The trailing `;` is required.
//! Groups may nest at most [`MAX_DEPTH`] levels deep.

use std::fmt::Write as _;

use crate::errors::{ProgressiveError, Result};
use crate::tree::{GuideTree, NodeId, TreeNode};

/// Deepest group nesting accepted by [`parse`].
pub const MAX_DEPTH: usize = 512;

/// Parse a Newick string into a [`GuideTree`].
pub fn parse(input: &str) -> Result<GuideTree> {
    let mut parser = Parser {
        chars: input.chars().collect(),
        pos: 0,
        nodes: Vec::new(),
    };

    let root = parser.subtree(None, 0)?;
    parser.skip_ws();
    parser.expect(';')?;
    parser.skip_ws();
    if parser.pos < parser.chars.len() {
        return Err(parser.error("unexpected trailing input after ';'"));
    }

    GuideTree::from_parts(parser.nodes, root)
}

/// Canonical Newick for `tree`: labels always quoted when needed, lengths
/// printed only when present.
pub fn write(tree: &GuideTree) -> String {
    let mut out = String::new();
    write_node(tree, tree.root(), &mut out);
    out.push(';');
    out
}

fn write_node(tree: &GuideTree, id: NodeId, out: &mut String) {
    let children = tree.children(id);
    if !children.is_empty() {
        out.push('(');
        for (i, child) in children.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            write_node(tree, *child, out);
        }
        out.push(')');
    }
    if let Some(name) = tree.name(id) {
        out.push_str(&quote_label(name));
    }
    if let Some(len) = tree.branch_length(id) {
        let _ = write!(out, ":{len}");
    }
}

fn quote_label(label: &str) -> String {
    let needs_quotes = label
        .chars()
        .any(|c| c.is_whitespace() || "(),:;[]'".contains(c));
    if needs_quotes {
        format!("'{}'", label.replace('\'', "''"))
    } else {
        label.to_string()
    }
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
    nodes: Vec<TreeNode>,
}

impl Parser {
    fn subtree(&mut self, parent: Option<NodeId>, depth: usize) -> Result<NodeId> {
        if depth > MAX_DEPTH {
            return Err(self.error(&format!("groups nested deeper than {MAX_DEPTH} levels")));
        }
        self.skip_ws();
        let id = NodeId(self.nodes.len());
        self.nodes.push(TreeNode {
            name: None,
            branch_length: None,
            parent,
            children: Vec::new(),
        });
        if let Some(p) = parent {
            self.nodes[p.0].children.push(id);
        }

        if self.peek() == Some('(') {
            self.pos += 1;
            loop {
                self.subtree(Some(id), depth + 1)?;
                self.skip_ws();
                match self.bump() {
                    Some(',') => continue,
                    Some(')') => break,
                    Some(c) => {
                        return Err(self.error(&format!("expected ',' or ')' but found '{c}'")));
                    }
                    None => return Err(self.error("unterminated group, expected ')'")),
                }
            }
        }

        self.skip_ws();
        self.nodes[id.0].name = self.label()?;

        self.skip_ws();
        if self.peek() == Some(':') {
            self.pos += 1;
            self.skip_ws();
            self.nodes[id.0].branch_length = Some(self.number()?);
        }

        Ok(id)
    }

    fn label(&mut self) -> Result<Option<String>> {
        match self.peek() {
            Some('\'') => {
                self.pos += 1;
                let mut label = String::new();
                loop {
                    match self.bump() {
                        Some('\'') if self.peek() == Some('\'') => {
                            self.pos += 1;
                            label.push('\'');
                        }
                        Some('\'') => break,
                        Some(c) => label.push(c),
                        None => return Err(self.error("unterminated quoted label")),
                    }
                }
                Ok(Some(label))
            }
            _ => {
                let start = self.pos;
                while let Some(c) = self.peek() {
                    if c.is_whitespace() || "(),:;[".contains(c) {
                        break;
                    }
                    self.pos += 1;
                }
                if self.pos == start {
                    Ok(None)
                } else {
                    Ok(Some(self.chars[start..self.pos].iter().collect()))
                }
            }
        }
    }

    fn number(&mut self) -> Result<f64> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || "+-.eE".contains(c) {
                self.pos += 1;
            } else {
                break;
            }
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        match text.parse::<f64>() {
            Ok(v) if v.is_finite() && v >= 0.0 => Ok(v),
            _ => Err(self.error(&format!("invalid branch length '{text}'"))),
        }
    }

    /// Skip whitespace and `[...]` comments.
    fn skip_ws(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => self.pos += 1,
                Some('[') => {
                    while let Some(c) = self.bump() {
                        if c == ']' {
                            break;
                        }
                    }
                }
                _ => return,
            }
        }
    }

    fn expect(&mut self, want: char) -> Result<()> {
        match self.bump() {
            Some(c) if c == want => Ok(()),
            Some(c) => Err(self.error(&format!("expected '{want}' but found '{c}'"))),
            None => Err(self.error(&format!("expected '{want}' but reached end of input"))),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn error(&self, msg: &str) -> ProgressiveError {
        ProgressiveError::config(format!(
            "malformed guide tree at offset {}: {msg}",
            self.pos
        ))
    }
}
