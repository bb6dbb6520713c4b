//! Unified error type.

use std::time::Duration;

/// The error type returned by switchyard's fallible operations.
///
/// Routing outcomes (404, 403, 405) are not errors: routers express them as
/// error sessions. This type covers startup misconfiguration, protocol
/// violations between the dispatcher and a session, and failures captured
/// inside handler logic.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed or duplicate route binding, or registration after startup.
    #[error("registration: {0}")]
    Registration(String),

    /// A router tried to consume a prefix the request no longer carries.
    #[error("path `{prefix}` is not a prefix of the relative path `{relative}`")]
    PathDesync { prefix: String, relative: String },

    /// A session phase was invoked out of order or twice.
    #[error("protocol violation: {0}")]
    Protocol(&'static str),

    #[error("handler panicked: {0}")]
    Panicked(String),

    /// The other side of a bridge rendezvous went away.
    #[error("response aborted: {0}")]
    Aborted(&'static str),

    #[error("handler did not start responding within {0:?}")]
    Timeout(Duration),

    #[error("handler: {0}")]
    Handler(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("config: {0}")]
    Config(String),

    #[error("invalid request uri `{uri}`: {source}")]
    InvalidUri {
        uri: String,
        #[source]
        source: http::uri::InvalidUri,
    },

    #[error("no logger named `{0}`")]
    MissingLogger(String),

    #[error("request body of {len} bytes exceeds the {limit} byte limit")]
    BodyTooLarge { len: usize, limit: usize },

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Best-effort message from a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_message_reads_str_and_string_payloads() {
        let s: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(s.as_ref()), "boom");

        let owned: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(owned.as_ref()), "bang");

        let other: Box<dyn std::any::Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(other.as_ref()), "unknown panic");
    }
}
