//! Post-processing for SSD-style detection models (boxes, classes, scores,
//! count output tensors), kept free of FFI so it can be tested anywhere.

use std::path::Path;

use anyhow::{Context, Result};
use hvmon_proto::{Detection, Rect};

/// Labels the model marks as unused.
const PLACEHOLDER_LABEL: &str = "???";

/// Raw output tensors of one SSD invocation.
///
/// `boxes` holds `[ymin, xmin, ymax, xmax]` per detection in normalized
/// coordinates; `classes` holds class ids as floats.
#[derive(Debug, Clone, Copy)]
pub struct SsdOutputs<'a> {
    pub boxes: &'a [f32],
    pub classes: &'a [f32],
    pub scores: &'a [f32],
    pub count: usize,
}

/// Read a label map: one label per line, line index = class id.
pub fn load_labels(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).with_context(|| format!("read labels {}", path.display()))?;
    Ok(parse_labels(&text))
}

pub fn parse_labels(text: &str) -> Vec<String> {
    text.lines().map(|l| l.trim().to_string()).collect()
}

/// Turn raw outputs into detections in `img_w`x`img_h` pixel space, keeping
/// those scoring at least `threshold`, best first, at most `max_results`.
pub fn decode_ssd_outputs(
    out: SsdOutputs<'_>,
    labels: &[String],
    threshold: f32,
    max_results: usize,
    img_w: u32,
    img_h: u32,
) -> Vec<Detection> {
    let n = out
        .count
        .min(out.scores.len())
        .min(out.classes.len())
        .min(out.boxes.len() / 4);
    let (w, h) = (img_w as f32, img_h as f32);

    let mut dets = Vec::new();
    for i in 0..n {
        let score = out.scores[i];
        if score.is_nan() || score < threshold {
            continue;
        }
        let class = out.classes[i];
        if !class.is_finite() || class < 0.0 {
            continue;
        }
        let label = match labels.get(class as usize) {
            Some(l) if l.is_empty() || l == PLACEHOLDER_LABEL => continue,
            Some(l) => l.clone(),
            None => format!("class{}", class as usize),
        };
        let b = &out.boxes[i * 4..i * 4 + 4];
        if b.iter().any(|v| !v.is_finite()) {
            continue;
        }
        let (ymin, xmin, ymax, xmax) = (b[0].clamp(0.0, 1.0), b[1].clamp(0.0, 1.0), b[2].clamp(0.0, 1.0), b[3].clamp(0.0, 1.0));
        dets.push(Detection::new(label, score, Rect::new(xmin * w, ymin * h, xmax * w, ymax * h)));
    }

    dets.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    dets.truncate(max_results);
    dets
}
