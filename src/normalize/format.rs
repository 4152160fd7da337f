//! Grouping-key template
//!
//! A template such as `#s:#q` compiles to literal text interleaved with
//! field selectors:
//!
//! | Selector | Field |
//! |----------|-------|
//! | `#s` | source endpoint (`host:port`) |
//! | `#i` | source IP |
//! | `#r` | route name from a `/* host:route */` comment |
//! | `#q` | normalized statement |
//!
//! `##` is a literal `#`; any other `#x` stays literal text.

use super::scanner::{extract_route, normalize_query};
use crate::error::NormalizeError;

pub const DEFAULT_KEY_FORMAT: &str = "#s:#q";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Source,
    SourceIp,
    Route,
    Query,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatItem {
    Literal(String),
    Field(Field),
}

/// Inputs available to a template
#[derive(Debug, Clone, Copy)]
pub struct KeyContext<'a> {
    pub source: &'a str,
    pub source_ip: &'a str,
    pub query: &'a [u8],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyFormat {
    items: Vec<FormatItem>,
}

impl KeyFormat {
    pub fn parse(template: &str) -> Self {
        let template = match template.trim() {
            "" => DEFAULT_KEY_FORMAT,
            t => t,
        };

        let mut items = Vec::new();
        let mut literal = String::new();
        let mut chars = template.chars();
        while let Some(c) = chars.next() {
            if c != '#' {
                literal.push(c);
                continue;
            }
            let field = match chars.next() {
                None => {
                    literal.push('#');
                    break;
                }
                Some('#') => {
                    literal.push('#');
                    continue;
                }
                Some(sel) => match sel.to_ascii_lowercase() {
                    's' => Field::Source,
                    'i' => Field::SourceIp,
                    'r' => Field::Route,
                    'q' => Field::Query,
                    _ => {
                        literal.push('#');
                        literal.push(sel);
                        continue;
                    }
                },
            };
            if !literal.is_empty() {
                items.push(FormatItem::Literal(std::mem::take(&mut literal)));
            }
            items.push(FormatItem::Field(field));
        }
        if !literal.is_empty() {
            items.push(FormatItem::Literal(literal));
        }
        KeyFormat { items }
    }

    pub fn items(&self) -> &[FormatItem] {
        &self.items
    }

    /// Build the grouping key for one statement
    pub fn render(&self, ctx: &KeyContext<'_>) -> Result<String, NormalizeError> {
        let mut key = String::new();
        for item in &self.items {
            match item {
                FormatItem::Literal(text) => key.push_str(text),
                FormatItem::Field(Field::Source) => key.push_str(ctx.source),
                FormatItem::Field(Field::SourceIp) => key.push_str(ctx.source_ip),
                FormatItem::Field(Field::Query) => key.push_str(&normalize_query(ctx.query)?),
                FormatItem::Field(Field::Route) => match extract_route(ctx.query) {
                    Some(route) => key.push_str(&route),
                    None => {
                        key.push_str("(unknown) ");
                        key.push_str(&normalize_query(ctx.query)?);
                    }
                },
            }
        }
        Ok(key)
    }
}

impl Default for KeyFormat {
    fn default() -> Self {
        KeyFormat::parse(DEFAULT_KEY_FORMAT)
    }
}
