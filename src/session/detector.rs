use std::time::Duration;

use serde::Deserialize;

use crate::mot::Detection;
use crate::session::{DetectorError, Frame};
use crate::utils::BBox;

/// Turns a decoded frame into object detections. One instance per session.
pub trait DetectionAdapter: Send {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, DetectorError>;
}

/// Builds a fresh adapter for every new session
pub trait DetectorFactory: Send + Sync {
    fn create(&self, device_id: &str) -> Box<dyn DetectionAdapter>;
}

impl<F> DetectorFactory for F
where
    F: Fn(&str) -> Box<dyn DetectionAdapter> + Send + Sync,
{
    fn create(&self, device_id: &str) -> Box<dyn DetectionAdapter> {
        self(device_id)
    }
}

/// Detects nothing. Used when no inference endpoint is configured.
pub struct NullDetector;

impl DetectionAdapter for NullDetector {
    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
        Ok(vec![])
    }
}

#[derive(Debug, Deserialize)]
struct WireDetection {
    bbox: [f32; 4],
    label: String,
    confidence: f32,
}

/// Parses an inference service response body
pub(crate) fn parse_detections(body: &str) -> Result<Vec<Detection>, DetectorError> {
    let wire: Vec<WireDetection> =
        serde_json::from_str(body).map_err(|e| DetectorError::Response(e.to_string()))?;
    Ok(wire
        .into_iter()
        .map(|d| Detection::new(BBox::from(d.bbox), d.label, d.confidence))
        .collect())
}

/// Posts each encoded frame to an inference service.
///
/// The service answers with a JSON array of `{"bbox": [x1, y1, x2, y2], "label": .., "confidence": ..}`
/// in pixel coordinates of the posted frame.
pub struct HttpDetector {
    agent: ureq::Agent,
    endpoint: String,
    device_id: String,
}

impl HttpDetector {
    pub fn new(endpoint: impl Into<String>, device_id: impl Into<String>, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        HttpDetector {
            agent,
            endpoint: endpoint.into(),
            device_id: device_id.into(),
        }
    }
}

impl DetectionAdapter for HttpDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
        let response = self
            .agent
            .post(&self.endpoint)
            .set("Content-Type", "application/octet-stream")
            .set("X-Device-Id", &self.device_id)
            .send_bytes(&frame.encoded)
            .map_err(|e| DetectorError::Request(e.to_string()))?;
        let body = response
            .into_string()
            .map_err(|e| DetectorError::Response(e.to_string()))?;
        parse_detections(&body)
    }
}

/// Factory used by the server binary
pub struct HttpDetectorFactory {
    pub endpoint: Option<String>,
    pub timeout: Duration,
}

impl DetectorFactory for HttpDetectorFactory {
    fn create(&self, device_id: &str) -> Box<dyn DetectionAdapter> {
        match &self.endpoint {
            Some(endpoint) => Box::new(HttpDetector::new(endpoint.clone(), device_id, self.timeout)),
            None => Box::new(NullDetector),
        }
    }
}
