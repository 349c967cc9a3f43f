use crate::common::error::{Error, ErrorKind, InvalidRequest};
use actix_web::{
    body::BoxBody,
    error::JsonPayloadError,
    http::{header::ACCESS_CONTROL_ALLOW_ORIGIN, StatusCode},
    middleware, web, HttpRequest, HttpResponse, ResponseError,
};
use serde::Serialize;

/// Route handlers.
pub mod service;

pub use service::configure;

/// The body of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&Error> for ErrorBody {
    fn from(error: &Error) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

impl ErrorKind {
    /// The HTTP status which reports this kind of error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::MappingRequired => StatusCode::PRECONDITION_FAILED,
            Self::Conflict => StatusCode::CONFLICT,
            Self::Upstream => StatusCode::BAD_GATEWAY,
        }
    }
}

/// Implement ResponseError for Error.
impl ResponseError for Error {
    fn status_code(&self) -> StatusCode {
        self.kind().status_code()
    }

    fn error_response(&self) -> HttpResponse<BoxBody> {
        HttpResponse::build(self.status_code()).json(ErrorBody::from(self))
    }
}

/// Lets browser clients on any origin read responses. Preflight requests are answered by the
/// OPTIONS resource which configure registers.
pub fn cors() -> middleware::DefaultHeaders {
    middleware::DefaultHeaders::new().add((ACCESS_CONTROL_ALLOW_ORIGIN, "*"))
}

/// Reports malformed JSON bodies the same way as other validation errors.
pub(crate) fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|error: JsonPayloadError, _req: &HttpRequest| {
        InvalidRequest {
            reason: error.to_string(),
        }
        .build()
        .into()
    })
}
