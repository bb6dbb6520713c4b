//! Status codes the dispatch pipeline produces on its own.
//!
//! Sessions report plain [`http::StatusCode`] values. This module only adds
//! the redirect codes a [`RedirectSession`](crate::RedirectSession) may use
//! and the titles rendered into error pages.
//!
//! ```rust
//! use switchyard::{RedirectCode, status};
//! use http::StatusCode;
//!
//! assert_eq!(StatusCode::from(RedirectCode::Temporary), StatusCode::TEMPORARY_REDIRECT);
//! assert_eq!(status::error_title(StatusCode::NOT_FOUND), Some("Not Found"));
//! assert_eq!(status::error_title(StatusCode::OK), None);
//! ```

use http::StatusCode;

/// The redirect flavours a server-issued external redirect can use.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RedirectCode {
    MovedPermanently, // 301
    Found,            // 302
    Temporary,        // 307
    Permanent,        // 308
}

impl From<RedirectCode> for StatusCode {
    fn from(code: RedirectCode) -> Self {
        match code {
            RedirectCode::MovedPermanently => StatusCode::MOVED_PERMANENTLY,
            RedirectCode::Found            => StatusCode::FOUND,
            RedirectCode::Temporary        => StatusCode::TEMPORARY_REDIRECT,
            RedirectCode::Permanent        => StatusCode::PERMANENT_REDIRECT,
        }
    }
}

/// Title of a 4xx/5xx status as rendered in error pages.
///
/// Returns `None` for anything that is not a known client or server error;
/// an [`ErrorSession`](crate::ErrorSession) cannot be built for those.
pub fn error_title(code: StatusCode) -> Option<&'static str> {
    let title = match code.as_u16() {
        400 => "Bad Request",
        401 => "Unauthorized",
        402 => "Payment Required",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        407 => "Proxy Authentication Required",
        408 => "Request Timeout",
        409 => "Conflict",
        410 => "Gone",
        411 => "Length Required",
        412 => "Precondition Failed",
        413 => "Content Too Large",
        414 => "URI Too Long",
        415 => "Unsupported Media Type",
        416 => "Range Not Satisfiable",
        417 => "Expectation Failed",
        418 => "I'm a Teapot",
        421 => "Misdirected Request",
        422 => "Unprocessable Content",
        423 => "Locked",
        424 => "Failed Dependency",
        426 => "Upgrade Required",
        428 => "Precondition Required",
        429 => "Too Many Requests",
        431 => "Request Header Fields Too Large",
        451 => "Unavailable For Legal Reasons",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        505 => "HTTP Version Not Supported",
        506 => "Variant Also Negotiates",
        507 => "Insufficient Storage",
        508 => "Loop Detected",
        510 => "Not Extended",
        511 => "Network Authentication Required",
        _   => return None,
    };
    Some(title)
}
