//! Inference adapter: one image in, a set of detected regions out.
//!
//! The remote detector is reached through the [`Predictor`] trait.
//! [`LandingAiPredictor`] talks to a LandingAI-style predict endpoint; tests
//! plug in scripted predictors.
//!
//! ## Initialisation is a value, not a global
//!
//! The client is built once at startup. Whether that worked is captured in
//! an [`InferenceBackend`]: either `Ready` with a predictor, or
//! `Unavailable` with the reason. An unavailable backend fails every call
//! immediately, without touching the network.
//!
//! One call per image, no retries. A failure becomes that image's
//! `_error.png` fallback upstream.

use crate::config::ServiceConfig;
use crate::error::{PredictError, PredictorInitError};
use crate::pipeline::encode::encode_png;
use async_trait::async_trait;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Pixel box of one detection, in the coordinates of the submitted image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub xmin: i64,
    pub ymin: i64,
    pub xmax: i64,
    pub ymax: i64,
}

/// One detected region.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Region {
    pub id: String,
    pub label: String,
    pub score: f32,
    pub bbox: BoundingBox,
}

/// Everything the detector found in one image.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Prediction {
    pub regions: Vec<Region>,
}

impl Prediction {
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

/// Collaborator contract: "accepts one decoded image, returns a prediction set".
#[async_trait]
pub trait Predictor: Send + Sync {
    async fn predict(&self, image: &DynamicImage) -> Result<Prediction, PredictError>;
}

/// Outcome of building the inference client at startup.
#[derive(Clone)]
pub enum InferenceBackend {
    Ready(Arc<dyn Predictor>),
    Unavailable(String),
}

impl std::fmt::Debug for InferenceBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InferenceBackend::Ready(_) => f.write_str("Ready(<dyn Predictor>)"),
            InferenceBackend::Unavailable(reason) => {
                f.debug_tuple("Unavailable").field(reason).finish()
            }
        }
    }
}

impl InferenceBackend {
    /// Wrap an already-built predictor.
    pub fn ready(predictor: Arc<dyn Predictor>) -> Self {
        InferenceBackend::Ready(predictor)
    }

    /// Build the LandingAI client from configuration, logging the outcome.
    pub fn from_config(config: &ServiceConfig) -> Self {
        match LandingAiPredictor::from_config(config) {
            Ok(p) => {
                info!("Inference predictor initialized successfully");
                InferenceBackend::Ready(Arc::new(p))
            }
            Err(e) => {
                error!("Error initializing inference predictor: {}", e);
                InferenceBackend::Unavailable(e.to_string())
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, InferenceBackend::Ready(_))
    }

    /// Why the backend is unavailable, if it is.
    pub fn unavailable_reason(&self) -> Option<&str> {
        match self {
            InferenceBackend::Ready(_) => None,
            InferenceBackend::Unavailable(reason) => Some(reason),
        }
    }

    pub async fn predict(&self, image: &DynamicImage) -> Result<Prediction, PredictError> {
        match self {
            InferenceBackend::Ready(p) => p.predict(image).await,
            InferenceBackend::Unavailable(reason) => Err(PredictError::Unavailable(reason.clone())),
        }
    }
}

/// Client for a LandingAI-style cloud predict endpoint.
///
/// `POST {url}?endpoint_id={id}` with an `apikey` header and the PNG image
/// as multipart field `file`.
#[derive(Debug, Clone)]
pub struct LandingAiPredictor {
    client: reqwest::Client,
    url: String,
    endpoint_id: String,
    api_key: String,
}

impl LandingAiPredictor {
    pub fn from_config(config: &ServiceConfig) -> Result<Self, PredictorInitError> {
        let endpoint_id = non_empty(config.endpoint_id.as_deref())
            .ok_or(PredictorInitError::MissingEndpoint)?;
        let api_key =
            non_empty(config.api_key.as_deref()).ok_or(PredictorInitError::MissingApiKey)?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| PredictorInitError::Client(e.to_string()))?;

        Ok(Self {
            client,
            url: config.predict_url.clone(),
            endpoint_id: endpoint_id.to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl Predictor for LandingAiPredictor {
    async fn predict(&self, image: &DynamicImage) -> Result<Prediction, PredictError> {
        let start = Instant::now();
        let png = encode_png(image)?;

        let part = reqwest::multipart::Part::bytes(png)
            .file_name("image.png")
            .mime_str("image/png")?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(&self.url)
            .query(&[("endpoint_id", self.endpoint_id.as_str())])
            .header("apikey", &self.api_key)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PredictError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: serde_json::Value = response.json().await?;
        let prediction = parse_prediction(&body)?;
        debug!(
            "Prediction: {} regions in {:?}",
            prediction.regions.len(),
            start.elapsed()
        );
        Ok(prediction)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRegion {
    score: f32,
    #[serde(default)]
    label_name: String,
    coordinates: BoundingBox,
}

/// Parse an object-detection response body.
///
/// Regions are ordered by descending score, ties broken by region id, so the
/// same response always yields the same crop numbering.
pub fn parse_prediction(body: &serde_json::Value) -> Result<Prediction, PredictError> {
    let raw = match body.get("backbonepredictions") {
        None => {
            return Err(PredictError::Response(
                "missing 'backbonepredictions'".into(),
            ))
        }
        Some(serde_json::Value::Null) => return Ok(Prediction::default()),
        Some(v) => v,
    };

    let map = raw.as_object().ok_or_else(|| {
        PredictError::Response("'backbonepredictions' is not an object".into())
    })?;

    let mut regions = Vec::with_capacity(map.len());
    for (id, value) in map {
        let r: RawRegion = serde_json::from_value(value.clone())
            .map_err(|e| PredictError::Response(format!("region '{id}': {e}")))?;
        regions.push(Region {
            id: id.clone(),
            label: r.label_name,
            score: r.score,
            bbox: r.coordinates,
        });
    }

    regions.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.id.cmp(&b.id))
    });

    Ok(Prediction { regions })
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}
