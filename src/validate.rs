// src/validate.rs

//! Unit-directive injection defense
//!
//! Manifest text fields (notably the description) are copied verbatim
//! into generated unit files. A multi-line field could therefore smuggle
//! extra directives into the unit, e.g.
//! `description = "fun webserver\nExecStartPre=/bin/evil"`. Every field
//! that ends up in unit text is screened here before rendering.

use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

/// Generic unit-directive shape: optional leading whitespace, a key
/// token of letters/digits/dashes, then `=`.
static DIRECTIVE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*[A-Za-z0-9-]+=").unwrap());

#[derive(Error, Debug)]
#[error("manifest field contains an embedded unit directive: {line:?}")]
pub struct ValidationError {
    /// The offending line
    pub line: String,
}

/// Check that no field can open a new unit directive.
///
/// Each field is split on newlines; any non-first line matching the
/// directive pattern fails validation. The first line is exempt: it is
/// the intended content and cannot start a new stanza without a
/// preceding newline, even if it itself looks like `Key=Value`.
pub fn verify_unit_safe<'a, I>(fields: I) -> Result<(), ValidationError>
where
    I: IntoIterator<Item = &'a str>,
{
    for field in fields {
        for line in field.lines().skip(1) {
            if DIRECTIVE_RE.is_match(line) {
                return Err(ValidationError {
                    line: line.to_string(),
                });
            }
        }
    }
    Ok(())
}
