//! Glob patterns in the dialect cache stores use for key matching.
//!
//! Supported syntax: `*` (any run of bytes, including none), `?` (exactly
//! one byte), `[abc]`, `[^abc]`, `[a-z]` and `\` to escape the next
//! character. This is the dialect of Redis `SCAN ... MATCH`, including its
//! byte-wise matching: `?` does not match a whole `é`, `??` does.

use regex::bytes::Regex;

use crate::ValidationError;

/// Characters with special meaning in a glob.
const GLOB_META: [char; 5] = ['*', '?', '[', ']', '\\'];

/// Escape every glob metacharacter in `literal` so it only matches itself.
pub fn escape(literal: &str) -> String {
    let mut out = String::with_capacity(literal.len());
    for c in literal.chars() {
        if GLOB_META.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Returns true if `pattern` contains an unescaped wildcard or class.
pub fn has_wildcards(pattern: &str) -> bool {
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                chars.next();
            }
            '*' | '?' | '[' => return true,
            _ => {}
        }
    }
    false
}

/// A compiled glob.
#[derive(Debug, Clone)]
pub struct GlobMatcher {
    source: String,
    /// `None` when the pattern contains an empty class and can never match.
    regex: Option<Regex>,
}

impl GlobMatcher {
    /// Compile `pattern`.
    ///
    /// # Errors
    ///
    /// Returns an error for an unterminated `[` class or a trailing `\`.
    pub fn new(pattern: &str) -> Result<Self, ValidationError> {
        let translated = translate(pattern)?;
        let regex = match translated {
            Some(body) => Some(Regex::new(&format!("(?s-u)^{body}$")).map_err(|e| {
                ValidationError::invalid("pattern", format!("{pattern:?}: {e}"))
            })?),
            None => None,
        };
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    /// The pattern this matcher was compiled from.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Test `key` against the pattern.
    pub fn is_match(&self, key: &str) -> bool {
        self.regex.as_ref().is_some_and(|re| re.is_match(key.as_bytes()))
    }
}

/// Translate a glob into a regex body. `Ok(None)` means "matches nothing".
///
/// Works on bytes, as Redis does: `?` and every class member stand for one
/// byte, so a multi-byte character needs one `?` per byte.
fn translate(pattern: &str) -> Result<Option<String>, ValidationError> {
    let trailing_escape =
        || ValidationError::invalid("pattern", format!("{pattern:?}: trailing escape"));

    let mut out = String::with_capacity(pattern.len() * 4);
    let mut bytes = pattern.bytes().peekable();
    let mut matches_nothing = false;

    while let Some(b) = bytes.next() {
        match b {
            b'*' => {
                // Collapse runs of stars.
                while bytes.peek() == Some(&b'*') {
                    bytes.next();
                }
                out.push_str(".*");
            }
            b'?' => out.push('.'),
            b'\\' => {
                let escaped = bytes.next().ok_or_else(trailing_escape)?;
                push_byte(&mut out, escaped);
            }
            b'[' => {
                let negated = bytes.peek() == Some(&b'^');
                if negated {
                    bytes.next();
                }

                let mut items: Vec<(u8, u8)> = Vec::new();
                let mut closed = false;
                while let Some(b) = bytes.next() {
                    let lo = match b {
                        b']' => {
                            closed = true;
                            break;
                        }
                        b'\\' => bytes.next().ok_or_else(trailing_escape)?,
                        other => other,
                    };

                    // A '-' followed by something other than ']' forms a range.
                    let mut lookahead = bytes.clone();
                    if lookahead.next() == Some(b'-') {
                        if let Some(hi) = lookahead.next().filter(|&h| h != b']') {
                            bytes.next();
                            bytes.next();
                            let hi = if hi == b'\\' {
                                bytes.next().ok_or_else(trailing_escape)?
                            } else {
                                hi
                            };
                            items.push((lo.min(hi), lo.max(hi)));
                            continue;
                        }
                    }
                    items.push((lo, lo));
                }

                if !closed {
                    return Err(ValidationError::invalid(
                        "pattern",
                        format!("{pattern:?}: unterminated character class"),
                    ));
                }

                match (items.is_empty(), negated) {
                    (true, false) => matches_nothing = true,
                    (true, true) => out.push('.'),
                    (false, _) => {
                        out.push('[');
                        if negated {
                            out.push('^');
                        }
                        for (lo, hi) in items {
                            push_hex(&mut out, lo);
                            if lo != hi {
                                out.push('-');
                                push_hex(&mut out, hi);
                            }
                        }
                        out.push(']');
                    }
                }
            }
            other => push_byte(&mut out, other),
        }
    }

    Ok((!matches_nothing).then_some(out))
}

fn push_byte(out: &mut String, b: u8) {
    if b.is_ascii_alphanumeric() || b == b'_' {
        out.push(char::from(b));
    } else {
        push_hex(out, b);
    }
}

fn push_hex(out: &mut String, b: u8) {
    out.push_str(&format!("\\x{b:02X}"));
}
