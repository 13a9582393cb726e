//! Caller-supplied XnConvert option strings.
//!
//! Options travel to the converter as discrete argv entries, so there is no
//! shell to inject into. They are still checked against a flag allow-list:
//! a free-form string could otherwise redirect input or output, or hand the
//! converter flags that read or write arbitrary files.

use thiserror::Error;

/// Flags a caller may pass. `-input`, `-output` and `-overwrite` are
/// reserved for the server.
pub const ALLOWED_FLAGS: &[&str] = &[
    "-ratio", "-rtype", "-rflag", "-resize", "-canvas", "-ctype", "-bgcolor",
    "-out", "-q", "-quality", "-crop", "-rotate", "-hflip", "-vflip", "-dpi",
    "-grey", "-gray", "-colors", "-brightness", "-contrast", "-gamma", "-sharpen",
    "-blur", "-rmeta", "-keepdocsize", "-opthuff", "-dct", "-subsampling", "-clevel",
];

/// Punctuation allowed inside a value token besides ASCII alphanumerics.
const VALUE_PUNCTUATION: &[char] = &['.', '-', '_', '#', '%', ':'];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OptionsError {
    #[error("option '{0}' is reserved by the server")]
    Reserved(String),

    #[error("option '{0}' is not allowed")]
    UnknownFlag(String),

    #[error("invalid option value '{0}'")]
    InvalidValue(String),
}

/// A validated option list, one argv entry per token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionOptions(Vec<String>);

impl ConversionOptions {
    /// Split `raw` on whitespace and check every token.
    ///
    /// Tokens keep their original spelling and order; nothing is rewritten.
    pub fn parse(raw: &str) -> Result<Self, OptionsError> {
        let tokens = raw
            .split_whitespace()
            .map(|token| check_token(token).map(|()| token.to_owned()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self(tokens))
    }

    /// Tokenize a trusted option string (the server's own default) without
    /// applying the allow-list.
    pub fn trusted(raw: &str) -> Self {
        Self(raw.split_whitespace().map(str::to_owned).collect())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_args(&self) -> &[String] {
        &self.0
    }
}

fn check_token(token: &str) -> Result<(), OptionsError> {
    if matches!(token, "-input" | "-output" | "-overwrite" | "-o" | "-i") {
        return Err(OptionsError::Reserved(token.to_owned()));
    }
    if token.starts_with('-') && !is_negative_number(token) {
        if ALLOWED_FLAGS.contains(&token) {
            return Ok(());
        }
        return Err(OptionsError::UnknownFlag(token.to_owned()));
    }
    let valid = token
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || VALUE_PUNCTUATION.contains(&c));
    if valid {
        Ok(())
    } else {
        Err(OptionsError::InvalidValue(token.to_owned()))
    }
}

/// `-` followed by digits with at most one `.`, e.g. `-20` or `-90.5`.
fn is_negative_number(token: &str) -> bool {
    let Some(digits) = token.strip_prefix('-') else {
        return false;
    };
    let mut parts = digits.splitn(2, '.');
    let whole = parts.next().unwrap_or_default();
    let frac = parts.next();
    !whole.is_empty()
        && whole.bytes().all(|b| b.is_ascii_digit())
        && frac.is_none_or(|f| !f.is_empty() && f.bytes().all(|b| b.is_ascii_digit()))
}
