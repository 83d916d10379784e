mod execute;
mod health;

pub use execute::*;
pub use health::*;

use actix_web::error::{InternalError, JsonPayloadError};
use actix_web::{HttpRequest, HttpResponse, web};
use serde::Serialize;

#[derive(Serialize, Debug)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

pub fn json_error_handler(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    log::debug!("Rejected request body: {err}");
    let response = match &err {
        // A body past the JSON limit can only be oversized code
        JsonPayloadError::Overflow { .. } | JsonPayloadError::OverflowKnownLength { .. } => {
            HttpResponse::PayloadTooLarge().json(ErrorResponse::new("Code too large"))
        }
        _ => HttpResponse::BadRequest().json(ErrorResponse::new("Invalid request body")),
    };
    InternalError::from_response(err, response).into()
}

/// Registers every route of the service
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(index).service(
        web::scope("/api/code")
            .service(execute_handler)
            .service(languages_handler),
    );
}
