use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Everything that can go wrong between receiving an upload and returning a
/// verdict. Validation errors are raised before any file I/O; decode and
/// inference errors carry enough context to diagnose from the logs.
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("unsupported file type {0:?}: upload a .jpg, .png or .bmp image")]
    UnsupportedMediaType(String),
    #[error("file too large: {size} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { size: usize, max: usize },
    #[error("cannot decode image: {0}")]
    ImageDecode(String),
    #[error("model load failed: {0}")]
    ModelLoad(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("scratch storage failure: {0}")]
    Storage(#[from] std::io::Error),
}

impl ResponseError for ClassifierError {
    fn status_code(&self) -> StatusCode {
        match self {
            ClassifierError::UnsupportedMediaType(_) | ClassifierError::ImageDecode(_) => {
                StatusCode::BAD_REQUEST
            }
            ClassifierError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ClassifierError::ModelLoad(_)
            | ClassifierError::Inference(_)
            | ClassifierError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorBody {
            error: self.to_string(),
        })
    }
}
