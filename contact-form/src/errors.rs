use crate::delivery::negotiator::NegotiationExhausted;
use crate::delivery::smtp::MessageError;
use crate::submission::ValidationError;
use http::StatusCode;
use http_body_util::combinators::BoxBody;
use hyper::Response;
use hyper::body::Bytes;
use serde::Serialize;
use shared::http::make_json_response;
use thiserror::Error;

/// Result type alias for contact form operations
pub type Result<T, E = ContactError> = std::result::Result<T, E>;

const NOT_CONFIGURED_MESSAGE: &str = "El envío de correo no está configurado.";
const INTERNAL_MESSAGE: &str = "Error enviando el correo.";

/// Errors that can occur while handling a contact submission
#[derive(Error, Debug)]
pub enum ContactError {
    /// The visitor sent something we will not accept.
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// A credential or recipient the operator must provide is missing.
    #[error("Email delivery is not configured: {0}")]
    Configuration(String),

    #[error(transparent)]
    NegotiationExhausted(#[from] NegotiationExhausted),

    /// The HTTP provider rejected the message.
    #[error("{message}")]
    UpstreamProvider { status: StatusCode, message: String },

    /// The provider could not be reached at all.
    #[error("Email provider request failed: {0}")]
    UpstreamRequest(String),

    /// A verified SMTP transport failed while sending. Not retried.
    #[error("Failed to send email: {0}")]
    Send(String),

    #[error("Failed to read request body: {0}")]
    RequestBody(String),

    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Not found")]
    NotFound,

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<MessageError> for ContactError {
    /// The reply-to header carries the visitor's address, everything else
    /// comes from the operator's settings.
    fn from(err: MessageError) -> Self {
        match err {
            MessageError::ReplyTo { .. } => ValidationError::InvalidEmail.into(),
            other => ContactError::Configuration(other.to_string()),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<&'static str>,
    #[serde(rename = "providerStatus", skip_serializing_if = "Option::is_none")]
    provider_status: Option<u16>,
}

impl ContactError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ContactError::Validation(_) | ContactError::RequestBody(_) => StatusCode::BAD_REQUEST,
            ContactError::NegotiationExhausted(_)
            | ContactError::UpstreamRequest(_)
            | ContactError::Send(_) => StatusCode::BAD_GATEWAY,
            ContactError::UpstreamProvider { status, .. } => *status,
            ContactError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ContactError::NotFound => StatusCode::NOT_FOUND,
            ContactError::Configuration(_) | ContactError::Internal(_) | ContactError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Short label used to tag metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ContactError::Validation(_) => "validation",
            ContactError::Configuration(_) => "configuration",
            ContactError::NegotiationExhausted(_) => "negotiation_exhausted",
            ContactError::UpstreamProvider { .. } => "upstream_provider",
            ContactError::UpstreamRequest(_) => "upstream_request",
            ContactError::Send(_) => "send",
            ContactError::RequestBody(_) => "request_body",
            ContactError::MethodNotAllowed => "method_not_allowed",
            ContactError::NotFound => "not_found",
            ContactError::Internal(_) | ContactError::Io(_) => "internal",
        }
    }

    /// Renders the caller-facing JSON error.
    ///
    /// Configuration and internal failures get a fixed message and their
    /// details only go to the log. Delivery failures are passed through.
    pub fn into_response<E>(self) -> Response<BoxBody<Bytes, E>> {
        let status = self.status_code();
        let message = match &self {
            ContactError::Configuration(_) => NOT_CONFIGURED_MESSAGE.to_string(),
            ContactError::Internal(_) | ContactError::Io(_) => INTERNAL_MESSAGE.to_string(),
            other => other.to_string(),
        };

        let body = ErrorBody {
            error: &message,
            hint: match &self {
                ContactError::NegotiationExhausted(e) => Some(e.hint),
                _ => None,
            },
            provider_status: match &self {
                ContactError::UpstreamProvider { status, .. } => Some(status.as_u16()),
                _ => None,
            },
        };

        make_json_response(status, &body)
    }
}
