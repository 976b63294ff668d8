//! Write acknowledgements.
//!
//! The store acknowledges a put with an opaque token. By convention a token
//! beginning with [`ERROR_MARKER`] reports a failure; anything else
//! (including no token at all) is a success.

use std::fmt;

/// Prefix marking an acknowledgement as a failure.
pub const ERROR_MARKER: &str = "error";

/// Token sent by the relay for a successful put.
pub const OK_TOKEN: &str = "ok";

/// A classified write acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ack {
    /// The write was accepted. Carries the store's token, if any.
    Ok(Option<String>),
    /// The write was rejected. Carries the full ack string.
    Err(String),
}

impl Ack {
    /// Classify a raw acknowledgement token.
    pub fn from_raw(raw: Option<&str>) -> Self {
        match raw {
            Some(token) if token.starts_with(ERROR_MARKER) => Self::Err(token.to_string()),
            other => Self::Ok(other.map(str::to_string)),
        }
    }

    /// The acknowledgement the relay sends for an accepted put.
    pub fn ok() -> Self {
        Self::Ok(Some(OK_TOKEN.to_string()))
    }

    /// Build a failure acknowledgement, adding the error marker when missing.
    pub fn error(reason: &str) -> Self {
        if reason.starts_with(ERROR_MARKER) {
            Self::Err(reason.to_string())
        } else {
            Self::Err(format!("{ERROR_MARKER}: {reason}"))
        }
    }

    /// True for a failure acknowledgement.
    pub fn is_err(&self) -> bool {
        matches!(self, Self::Err(_))
    }

    /// The raw token as carried on the wire.
    pub fn as_raw(&self) -> Option<&str> {
        match self {
            Self::Ok(token) => token.as_deref(),
            Self::Err(message) => Some(message),
        }
    }
}

impl fmt::Display for Ack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok(Some(token)) => write!(f, "ok ({token})"),
            Self::Ok(None) => f.write_str("ok"),
            Self::Err(message) => f.write_str(message),
        }
    }
}
