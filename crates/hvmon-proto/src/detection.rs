use serde::{Deserialize, Serialize};

use crate::{Category, Rect, Rotation};

/// One detector hit. `bounding_box` is in detector-input pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub score: f32,
    pub bounding_box: Rect,
}

impl Detection {
    pub fn new(label: impl Into<String>, score: f32, bounding_box: Rect) -> Self {
        Self { label: label.into(), score, bounding_box }
    }

    pub fn category(&self) -> Category {
        Category::classify(&self.label)
    }
}

/// Outcome of one completed detection pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultBundle {
    pub detections: Vec<Detection>,
    pub inference_time_ms: u64,
    /// Upright (post-rotation) input size.
    pub input_width: u32,
    pub input_height: u32,
    pub source_rotation: Rotation,
}

impl ResultBundle {
    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }
}
