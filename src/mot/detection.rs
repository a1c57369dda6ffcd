use serde::{Deserialize, Serialize};

use crate::utils::{BBox, Point};

/// One object found in one frame by the detection model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BBox,
    pub label: String,
    pub confidence: f32,
}

impl Detection {
    pub fn new(bbox: BBox, label: impl Into<String>, confidence: f32) -> Self {
        Detection {
            bbox,
            label: label.into(),
            confidence,
        }
    }
    pub fn centroid(&self) -> Point {
        self.bbox.centroid()
    }
}

/// Keeps detections strictly above the confidence threshold
pub fn filter_by_confidence(detections: Vec<Detection>, threshold: f32) -> Vec<Detection> {
    detections
        .into_iter()
        .filter(|d| d.confidence > threshold)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_by_confidence() {
        let detections = vec![
            Detection::new(BBox::new(0.0, 0.0, 10.0, 10.0), "bottle", 0.95),
            Detection::new(BBox::new(0.0, 0.0, 10.0, 10.0), "can", 0.8),
            Detection::new(BBox::new(0.0, 0.0, 10.0, 10.0), "cup", 0.3),
        ];
        let kept = filter_by_confidence(detections, 0.8);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].label, "bottle");
    }
}
