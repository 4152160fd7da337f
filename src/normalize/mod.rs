//! Query normalization
//!
//! Turns raw SQL statements into literal-free grouping keys so that
//! `WHERE id=1` and `WHERE id=2` land in the same aggregate bucket.

mod format;
mod scanner;

pub use format::{Field, FormatItem, KeyContext, KeyFormat, DEFAULT_KEY_FORMAT};
pub use scanner::{extract_route, normalize_query, scan_token, TokenKind, PLACEHOLDER};
