use actix_cors::Cors;
use actix_multipart::Multipart;
use actix_web::{http::StatusCode, web, HttpResponse};
use futures::TryStreamExt;
use log::{error, info, warn};
use shared::{ErrorResponse, HealthResponse, ServiceStatus};
use uuid::Uuid;

use crate::config::{LoadFailurePolicy, ServingConfig};
use crate::inference::{self, model::ModelHandle};

/// Multipart field carrying the image.
const FILE_FIELD: &str = "file";

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("malformed multipart body: {0}")]
    Multipart(#[from] actix_multipart::MultipartError),
    #[error("missing form field `file`")]
    MissingFile,
    #[error("upload exceeds the {0} byte limit")]
    TooLarge(usize),
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/predict/", web::post().to(predict))
        .route("/predict", web::post().to(predict))
        .route("/health", web::get().to(health));
}

/// Cross-origin policy: the listed origins, any method or header, with
/// credentials.
pub fn cors_policy(allowed_origins: &[String]) -> Cors {
    allowed_origins
        .iter()
        .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
        .allow_any_method()
        .allow_any_header()
        .supports_credentials()
        .max_age(3600)
}

fn bad_request(request_id: Uuid, detail: impl std::fmt::Display) -> HttpResponse {
    let body = ErrorResponse::processing(detail);
    warn!("[{}] {}", request_id, body.message);
    HttpResponse::BadRequest().json(body)
}

async fn read_upload(mut payload: Multipart, limit: usize) -> Result<Vec<u8>, UploadError> {
    while let Some(mut field) = payload.try_next().await? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let mut image_data = Vec::new();
        while let Some(chunk) = field.try_next().await? {
            if image_data.len() + chunk.len() > limit {
                return Err(UploadError::TooLarge(limit));
            }
            image_data.extend_from_slice(&chunk);
        }
        return Ok(image_data);
    }
    Err(UploadError::MissingFile)
}

async fn predict(
    model: web::Data<ModelHandle>,
    serving: web::Data<ServingConfig>,
    payload: Multipart,
) -> HttpResponse {
    let request_id = Uuid::new_v4();

    if serving.on_model_load_failure == LoadFailurePolicy::Reject && !model.is_loaded() {
        warn!("[{}] Rejecting request, model is {}", request_id, model.state());
        return HttpResponse::ServiceUnavailable().json(ErrorResponse {
            message: format!("Model unavailable: {}", model.state()),
        });
    }

    let image_data = match read_upload(payload, serving.max_upload_bytes).await {
        Ok(image_data) => image_data,
        Err(e) => return bad_request(request_id, e),
    };
    let upload_len = image_data.len();

    let model = model.into_inner();
    match web::block(move || inference::predict(&model, &image_data)).await {
        Ok(Ok(result)) => {
            info!(
                "[{}] {} bytes -> is_fake={} confidence={:.5}",
                request_id, upload_len, result.is_fake, result.confidence
            );
            HttpResponse::Ok().json(result)
        }
        Ok(Err(e)) => bad_request(request_id, e),
        Err(e) => {
            error!("[{}] Inference task aborted: {}", request_id, e);
            bad_request(request_id, "inference task aborted")
        }
    }
}

async fn health(model: web::Data<ModelHandle>) -> HttpResponse {
    let (status, code) = if model.is_loaded() {
        (ServiceStatus::Ok, StatusCode::OK)
    } else {
        (ServiceStatus::Degraded, StatusCode::SERVICE_UNAVAILABLE)
    };
    HttpResponse::build(code).json(HealthResponse {
        status,
        model: model.status(),
    })
}
