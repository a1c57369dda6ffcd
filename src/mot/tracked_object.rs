use serde::{Deserialize, Serialize};

use crate::mot::Detection;
use crate::utils::{BBox, Point};

/// Persistent identity of a detected object across frames
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedObject {
    id: u64,
    centroid: Point,
    bbox: BBox,
    label: String,
    confidence: f32,
    // Number of consecutive frames this object went unmatched
    disappeared: usize,
}

impl TrackedObject {
    pub fn new(id: u64, detection: &Detection) -> Self {
        TrackedObject {
            id,
            centroid: detection.centroid(),
            bbox: detection.bbox,
            label: detection.label.clone(),
            confidence: detection.confidence,
            disappeared: 0,
        }
    }
    pub fn get_id(&self) -> u64 {
        self.id
    }
    pub fn get_centroid(&self) -> Point {
        self.centroid
    }
    pub fn get_bbox(&self) -> BBox {
        self.bbox
    }
    pub fn get_label(&self) -> &str {
        &self.label
    }
    pub fn get_confidence(&self) -> f32 {
        self.confidence
    }
    pub fn get_disappeared(&self) -> usize {
        self.disappeared
    }
    pub fn inc_disappeared(&mut self) {
        self.disappeared += 1
    }
    /// Takes position and label of the matched detection and resets the disappeared counter
    pub fn update(&mut self, detection: &Detection) {
        self.centroid = detection.centroid();
        self.bbox = detection.bbox;
        if self.label != detection.label {
            self.label.clone_from(&detection.label);
        }
        self.confidence = detection.confidence;
        self.disappeared = 0;
    }
}
