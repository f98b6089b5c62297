use actix_web::{web, Error, HttpResponse};
use actix_multipart::Multipart;
use serde_json::json;
use uuid::Uuid;
use log::{error, info};
use futures::{StreamExt, TryStreamExt};

use crate::classifier::service::PredictionService;
use crate::error::ClassifierError;

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/api/predict").route(web::post().to(handle_predict)))
        .service(web::resource("/api/health").route(web::get().to(health)));
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}

async fn handle_predict(
    service: web::Data<PredictionService>,
    mut payload: Multipart,
) -> Result<HttpResponse, Error> {
    let request_id = Uuid::new_v4();

    while let Ok(Some(mut field)) = payload.try_next().await {
        if field.name() != Some("file") {
            while let Some(chunk) = field.next().await {
                chunk?;
            }
            continue;
        }

        let content_type = field
            .content_type()
            .map(|mime| mime.to_string())
            .unwrap_or_default();
        service.validate_content_type(&content_type)?;

        let filename = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .unwrap_or("upload")
            .to_string();

        // Buffer the upload; a stream far past the limit is cut off early
        // instead of exhausting memory.
        let max = service.config().max_upload_bytes;
        let overflow_cap = max.saturating_mul(4);
        let mut file_bytes = Vec::new();
        while let Some(chunk) = field.next().await {
            let data = chunk?;
            file_bytes.extend_from_slice(&data);
            if file_bytes.len() > overflow_cap {
                return Err(ClassifierError::PayloadTooLarge {
                    size: file_bytes.len(),
                    max,
                }
                .into());
            }
        }
        service.validate_file_size(file_bytes.len())?;

        info!(
            "[{request_id}] classifying {filename} ({} bytes, {content_type})",
            file_bytes.len()
        );

        let service = service.clone();
        let response = web::block(move || service.predict(&file_bytes, &filename))
            .await
            .map_err(actix_web::error::ErrorInternalServerError)?
            .map_err(|e| {
                error!("[{request_id}] prediction failed: {e}");
                e
            })?;

        return Ok(HttpResponse::Ok().json(response));
    }

    Ok(HttpResponse::BadRequest().json(json!({ "error": "multipart field \"file\" is required" })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::config::ClassifierConfig;
    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use std::path::PathBuf;

    fn multipart_body(content_type: &str, filename: &str, bytes: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(b"--BOUNDARY\r\n");
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n--BOUNDARY--\r\n");
        body
    }

    async fn call(
        config: ClassifierConfig,
        body: Vec<u8>,
    ) -> actix_web::dev::ServiceResponse {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(PredictionService::new(config)))
                .configure(configure_routes),
        )
        .await;
        let req = test::TestRequest::post()
            .uri("/api/predict")
            .insert_header((
                "content-type",
                "multipart/form-data; boundary=BOUNDARY",
            ))
            .set_payload(body)
            .to_request();
        test::call_service(&app, req).await
    }

    #[actix_web::test]
    async fn health_endpoint_responds() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(PredictionService::new(
                    ClassifierConfig::default(),
                )))
                .configure(configure_routes),
        )
        .await;
        let req = test::TestRequest::get().uri("/api/health").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
    }

    #[actix_web::test]
    async fn unsupported_content_type_is_rejected_before_any_disk_write() {
        let scratch = tempfile::tempdir().unwrap();
        let config = ClassifierConfig {
            scratch_dir: Some(scratch.path().to_path_buf()),
            model_path: PathBuf::from("/no/such/model.tflite"),
            ..Default::default()
        };
        let resp = call(config, multipart_body("text/plain", "note.txt", b"hello")).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[actix_web::test]
    async fn oversize_upload_is_rejected_with_413() {
        let scratch = tempfile::tempdir().unwrap();
        let config = ClassifierConfig {
            scratch_dir: Some(scratch.path().to_path_buf()),
            model_path: PathBuf::from("/no/such/model.tflite"),
            max_upload_bytes: 16,
            ..Default::default()
        };
        let resp = call(
            config,
            multipart_body("image/png", "big.png", &[0u8; 17]),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[actix_web::test]
    async fn missing_file_field_is_a_bad_request() {
        let mut body = Vec::new();
        body.extend_from_slice(b"--BOUNDARY\r\n");
        body.extend_from_slice(
            b"Content-Disposition: form-data; name=\"other\"\r\n\r\nvalue\r\n",
        );
        body.extend_from_slice(b"--BOUNDARY--\r\n");
        let resp = call(ClassifierConfig::default(), body).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
