//! SQL token scanner
//!
//! Splits a statement into word, quote, number, whitespace and single-byte
//! "other" tokens, and rewrites it into a literal-free grouping key.

use crate::error::NormalizeError;

/// Placeholder substituted for quoted and numeric literals
pub const PLACEHOLDER: &str = "?";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Word,
    Quote,
    Number,
    Whitespace,
    Other,
}

#[inline]
fn is_space(b: u8) -> bool {
    b == b' ' || (9..=13).contains(&b)
}

#[inline]
fn is_word_continue(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'$' || b == b'_'
}

/// Length and kind of the token at the start of `input`
pub fn scan_token(input: &[u8]) -> Result<(usize, TokenKind), NormalizeError> {
    let first = *input.first().ok_or(NormalizeError::EmptyQuery)?;

    let token = match first {
        b'\'' | b'"' => {
            let mut escaped = false;
            let mut end = input.len();
            for (i, &b) in input.iter().enumerate().skip(1) {
                if b == first && !escaped {
                    end = i + 1;
                    break;
                }
                escaped = b == b'\\' && !escaped;
            }
            (end, TokenKind::Quote)
        }
        b'0'..=b'9' => {
            let len = input.iter().take_while(|b| b.is_ascii_digit()).count();
            (len, TokenKind::Number)
        }
        b if is_space(b) => {
            let len = input.iter().take_while(|&&b| is_space(b)).count();
            (len, TokenKind::Whitespace)
        }
        b if b.is_ascii_alphabetic() => {
            let len = 1 + input[1..].iter().take_while(|&&b| is_word_continue(b)).count();
            (len, TokenKind::Word)
        }
        _ => (1, TokenKind::Other),
    };
    Ok(token)
}

/// Rewrite a statement into its grouping key.
///
/// Literals become `?`, whitespace runs collapse to one space, the host part
/// of a leading `/* host:route */` comment is dropped and literal lists
/// (`?, ?, ?`) collapse to a single `?`.
pub fn normalize_query(query: &[u8]) -> Result<String, NormalizeError> {
    debug_assert!(!query.is_empty(), "normalize_query called with empty statement");
    if query.is_empty() {
        return Err(NormalizeError::EmptyQuery);
    }

    let mut out = Vec::with_capacity(query.len());
    let mut i = 0;
    while i < query.len() {
        let (len, kind) = scan_token(&query[i..])?;
        match kind {
            TokenKind::Word | TokenKind::Other => out.extend_from_slice(&query[i..i + len]),
            TokenKind::Quote | TokenKind::Number => out.extend_from_slice(PLACEHOLDER.as_bytes()),
            TokenKind::Whitespace => out.push(b' '),
        }
        i += len;
    }

    let text = String::from_utf8_lossy(&out).into_owned();
    let text = strip_route_host(&text).unwrap_or(text);
    Ok(text.replace("?, ", ""))
}

/// `SELECT /* host:route */ ...` becomes `SELECT /* route */ ...`
fn strip_route_host(text: &str) -> Option<String> {
    let parts: Vec<&str> = text.splitn(5, ' ').collect();
    if parts.len() < 5 || parts[1] != "/*" || parts[3] != "*/" {
        return None;
    }
    let (_, route) = parts[2].split_once(':')?;
    Some(format!("{} /* {} */ {}", parts[0], route, parts[4]))
}

/// Route name from a raw `VERB /* host:route */ ...` statement
pub fn extract_route(query: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(query);
    let parts: Vec<&str> = text.splitn(5, ' ').collect();
    if parts.len() < 4 || parts[1] != "/*" || parts[3] != "*/" {
        return None;
    }
    let route = match parts[2].split_once(':') {
        Some((_, route)) => route,
        None => parts[2],
    };
    Some(route.to_string())
}
