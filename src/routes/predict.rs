use crate::{detector::DetectorError, server::SharedState};
use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use thiserror::Error;
use tracing::instrument;

#[derive(Error, Debug)]
pub enum PredictError {
    #[error("No file provided")]
    MissingFile,
    #[error("Failed to read multipart field: {0}")]
    Multipart(String),
    #[error("Image decode failed: {0}")]
    ImageDecode(#[from] image::ImageError),
    #[error("Detection failed: {0}")]
    Detection(#[from] DetectorError),
}

#[derive(Serialize, Deserialize)]
pub struct PredictResponse {
    pub labels: Vec<String>,
}

#[derive(Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for PredictError {
    fn into_response(self) -> Response {
        let status = match self {
            PredictError::MissingFile => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        tracing::error!("Prediction request failed: {}", self);

        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

#[instrument(skip(state, multipart))]
pub async fn predict(
    State(state): State<SharedState>,
    mut multipart: Multipart,
) -> Result<Json<PredictResponse>, PredictError> {
    state.metrics.record_request("predict");

    let mut image_data: Option<Bytes> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| PredictError::Multipart(e.to_string()))?
    {
        if field.name() == Some("file") {
            image_data = Some(
                field
                    .bytes()
                    .await
                    .map_err(|e| PredictError::Multipart(e.to_string()))?,
            );
            break;
        }
    }

    let image_data = image_data.ok_or(PredictError::MissingFile)?;
    let image = image::load_from_memory(&image_data)?;

    let start = Instant::now();
    let detections = state.detector.detect(&image)?;
    state
        .metrics
        .record_inference_duration(start.elapsed().as_millis() as u64, "predict");

    let labels: Vec<String> = detections
        .iter()
        .map(|detection| match state.labels.name(detection.class_id) {
            Some(name) => name.to_string(),
            None => format!("Unknown class {}", detection.class_id),
        })
        .collect();

    tracing::info!("Prediction succeeded with {} labels", labels.len());

    Ok(Json(PredictResponse { labels }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LabelsConfig;
    use crate::detector::{Detection, DetectorService};
    use crate::labels::ClassLabels;
    use crate::server::HttpServer;
    use image::DynamicImage;
    use std::io::Write;
    use std::sync::Arc;
    use tokio::sync::broadcast;

    struct MockDetector {
        result: Result<Vec<Detection>, String>,
    }

    impl DetectorService for MockDetector {
        fn detect(&self, _image: &DynamicImage) -> Result<Vec<Detection>, DetectorError> {
            match &self.result {
                Ok(detections) => Ok(detections.clone()),
                Err(message) => Err(DetectorError::Output(message.clone())),
            }
        }
    }

    fn test_labels() -> ClassLabels {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join("labels.txt")).unwrap();
        writeln!(file, "person").unwrap();
        writeln!(file, "bicycle").unwrap();
        ClassLabels::load(&LabelsConfig {
            labels_dir: dir.path().to_path_buf(),
            labels_file: "labels.txt".to_string(),
        })
        .unwrap()
    }

    fn detection(class_id: usize) -> Detection {
        Detection {
            class_id,
            confidence: 0.9,
            x1: 0.0,
            y1: 0.0,
            x2: 10.0,
            y2: 10.0,
        }
    }

    fn png_bytes() -> Vec<u8> {
        let img =
            image::ImageBuffer::<image::Rgb<u8>, Vec<u8>>::from_pixel(32, 32, image::Rgb([0, 128, 255]));
        let mut bytes = Vec::new();
        img.write_to(
            &mut std::io::Cursor::new(&mut bytes),
            image::ImageFormat::Png,
        )
        .unwrap();
        bytes
    }

    async fn spawn_server(detector: MockDetector) -> (String, broadcast::Sender<()>) {
        let server = HttpServer::new(
            Arc::new(detector),
            Arc::new(test_labels()),
            "127.0.0.1:0",
        )
        .await
        .unwrap();
        let addr = server.local_addr().unwrap();

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        server.run(shutdown_rx).await.unwrap();

        (format!("http://{}", addr), shutdown_tx)
    }

    fn file_form(data: Vec<u8>) -> reqwest::multipart::Form {
        let part = reqwest::multipart::Part::bytes(data).file_name("image.png");
        reqwest::multipart::Form::new().part("file", part)
    }

    #[tokio::test]
    async fn test_upload_returns_one_label_per_detection() {
        let detector = MockDetector {
            result: Ok(vec![detection(0), detection(1), detection(7)]),
        };
        let (base_url, _shutdown_tx) = spawn_server(detector).await;

        let response = reqwest::Client::new()
            .post(format!("{}/predict", base_url))
            .multipart(file_form(png_bytes()))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(
            body["labels"],
            serde_json::json!(["person", "bicycle", "Unknown class 7"])
        );
    }

    #[tokio::test]
    async fn test_missing_file_field_is_bad_request() {
        let detector = MockDetector {
            result: Ok(vec![detection(0)]),
        };
        let (base_url, _shutdown_tx) = spawn_server(detector).await;

        let form = reqwest::multipart::Form::new().text("note", "no file here");
        let response = reqwest::Client::new()
            .post(format!("{}/predict", base_url))
            .multipart(form)
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
        let body: serde_json::Value = response.json().await.unwrap();
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_unparsable_file_is_internal_error() {
        let detector = MockDetector {
            result: Ok(vec![detection(0)]),
        };
        let (base_url, _shutdown_tx) = spawn_server(detector).await;

        let response = reqwest::Client::new()
            .post(format!("{}/predict", base_url))
            .multipart(file_form(b"definitely not an image".to_vec()))
            .send()
            .await
            .unwrap();

        assert_eq!(
            response.status(),
            reqwest::StatusCode::INTERNAL_SERVER_ERROR
        );
        let body: serde_json::Value = response.json().await.unwrap();
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_detector_failure_is_internal_error() {
        let detector = MockDetector {
            result: Err("model output missing".to_string()),
        };
        let (base_url, _shutdown_tx) = spawn_server(detector).await;

        let response = reqwest::Client::new()
            .post(format!("{}/predict", base_url))
            .multipart(file_form(png_bytes()))
            .send()
            .await
            .unwrap();

        assert_eq!(
            response.status(),
            reqwest::StatusCode::INTERNAL_SERVER_ERROR
        );
        let body: serde_json::Value = response.json().await.unwrap();
        assert!(body["error"]
            .as_str()
            .unwrap()
            .contains("model output missing"));
    }

    #[tokio::test]
    async fn test_no_detections_yields_empty_label_list() {
        let detector = MockDetector { result: Ok(vec![]) };
        let (base_url, _shutdown_tx) = spawn_server(detector).await;

        let response = reqwest::Client::new()
            .post(format!("{}/predict", base_url))
            .multipart(file_form(png_bytes()))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let body: PredictResponse = response.json().await.unwrap();
        assert!(body.labels.is_empty());
    }
}
