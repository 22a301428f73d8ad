//! Mapping detector boxes onto the preview canvas.
//!
//! Boxes come back in the coordinate frame of the upright detector input.
//! Drawing them over the preview takes three steps:
//!
//! 1. undo the clockwise rotation applied while preparing the input, which
//!    yields sensor-native coordinates;
//! 2. scale into the fitted (letterboxed or pillarboxed) content area of the
//!    canvas;
//! 3. turn the whole scene by 180° about the canvas centre when the display
//!    is upside down relative to its natural orientation.

use hvmon_proto::{Category, Detection, Rect, ResultBundle, Rotation};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Sensor-native size of an input that was rotated by `rotation`.
pub fn sensor_dims(input_w: f32, input_h: f32, rotation: Rotation) -> (f32, f32) {
    if rotation.swaps_axes() {
        (input_h, input_w)
    } else {
        (input_w, input_h)
    }
}

/// Inverse of a clockwise rotation: input-space box to sensor space.
pub fn unrotate(b: Rect, input_w: f32, input_h: f32, rotation: Rotation) -> Rect {
    let (sw, sh) = sensor_dims(input_w, input_h, rotation);
    match rotation {
        Rotation::Deg0 => b,
        Rotation::Deg90 => Rect::new(b.top, sh - b.right, b.bottom, sh - b.left),
        Rotation::Deg180 => Rect::new(sw - b.right, sh - b.bottom, sw - b.left, sh - b.top),
        Rotation::Deg270 => Rect::new(sw - b.bottom, b.left, sw - b.top, b.right),
    }
}

/// Clockwise rotation of a sensor-space box into input space.
pub fn rotate(b: Rect, sensor_w: f32, sensor_h: f32, rotation: Rotation) -> Rect {
    match rotation {
        Rotation::Deg0 => b,
        Rotation::Deg90 => Rect::new(sensor_h - b.bottom, b.left, sensor_h - b.top, b.right),
        Rotation::Deg180 => Rect::new(sensor_w - b.right, sensor_h - b.bottom, sensor_w - b.left, sensor_h - b.top),
        Rotation::Deg270 => Rect::new(b.top, sensor_w - b.right, b.bottom, sensor_w - b.left),
    }
}

/// Half-turn about the canvas centre.
pub fn flip_180(r: Rect, canvas_w: f32, canvas_h: f32) -> Rect {
    Rect::new(canvas_w - r.right, canvas_h - r.bottom, canvas_w - r.left, canvas_h - r.top)
}

/// Aspect ratio of the picture shown inside the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentAspect {
    /// Width over height of the sensor-native frame.
    #[default]
    Sensor,
    /// Known capture ratio, e.g. 4:3.
    Fixed(f32),
}

/// Area of the canvas actually covered by the preview picture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContentArea {
    pub width: f32,
    pub height: f32,
    pub offset_x: f32,
    pub offset_y: f32,
}

impl ContentArea {
    /// Pillarbox when the canvas is relatively wider than the content,
    /// letterbox otherwise.
    pub fn fit(aspect: f32, canvas_w: f32, canvas_h: f32) -> Self {
        if canvas_w / canvas_h > aspect {
            let height = canvas_h;
            let width = height * aspect;
            Self { width, height, offset_x: (canvas_w - width) / 2.0, offset_y: 0.0 }
        } else {
            let width = canvas_w;
            let height = width / aspect;
            Self { width, height, offset_x: 0.0, offset_y: (canvas_h - height) / 2.0 }
        }
    }

    pub fn center(&self) -> (f32, f32) {
        (self.offset_x + self.width / 2.0, self.offset_y + self.height / 2.0)
    }
}

/// Render target description, sampled at draw time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub canvas_w: f32,
    pub canvas_h: f32,
    pub display_rotation: Rotation,
    #[serde(default)]
    pub aspect: ContentAspect,
}

impl Viewport {
    pub fn new(canvas_w: f32, canvas_h: f32, display_rotation: Rotation) -> Self {
        Self { canvas_w, canvas_h, display_rotation, aspect: ContentAspect::Sensor }
    }

    pub fn with_aspect(mut self, aspect: ContentAspect) -> Self {
        self.aspect = aspect;
        self
    }

    /// Device held upside down relative to its natural orientation.
    pub fn is_flipped(&self) -> bool {
        matches!(self.display_rotation, Rotation::Deg180 | Rotation::Deg270)
    }
}

/// Everything needed to map boxes of one result bundle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxMapper {
    input_w: f32,
    input_h: f32,
    rotation: Rotation,
    sensor_w: f32,
    sensor_h: f32,
    content: ContentArea,
    viewport: Viewport,
}

impl BoxMapper {
    /// `None` when the sensor or canvas size is degenerate.
    pub fn new(input_w: u32, input_h: u32, rotation: Rotation, viewport: Viewport) -> Option<Self> {
        let (input_w, input_h) = (input_w as f32, input_h as f32);
        let (sensor_w, sensor_h) = sensor_dims(input_w, input_h, rotation);
        if sensor_w <= 0.0 || sensor_h <= 0.0 || viewport.canvas_w <= 0.0 || viewport.canvas_h <= 0.0 {
            return None;
        }
        let aspect = match viewport.aspect {
            ContentAspect::Sensor => sensor_w / sensor_h,
            ContentAspect::Fixed(r) if r > 0.0 && r.is_finite() => r,
            ContentAspect::Fixed(_) => return None,
        };
        let content = ContentArea::fit(aspect, viewport.canvas_w, viewport.canvas_h);
        Some(Self { input_w, input_h, rotation, sensor_w, sensor_h, content, viewport })
    }

    pub fn for_bundle(bundle: &ResultBundle, viewport: Viewport) -> Option<Self> {
        Self::new(bundle.input_width, bundle.input_height, bundle.source_rotation, viewport)
    }

    pub fn content(&self) -> ContentArea {
        self.content
    }

    /// Canvas rect before any display flip.
    pub fn to_content(&self, b: Rect) -> Rect {
        let s = unrotate(b, self.input_w, self.input_h, self.rotation);
        let sx = self.content.width / self.sensor_w;
        let sy = self.content.height / self.sensor_h;
        Rect::new(
            s.left * sx + self.content.offset_x,
            s.top * sy + self.content.offset_y,
            s.right * sx + self.content.offset_x,
            s.bottom * sy + self.content.offset_y,
        )
    }

    /// Apply the display flip, if any.
    pub fn orient(&self, r: Rect) -> Rect {
        if self.viewport.is_flipped() {
            flip_180(r, self.viewport.canvas_w, self.viewport.canvas_h)
        } else {
            r
        }
    }

    /// Final on-screen rect, or `None` when it has no area.
    pub fn map(&self, b: Rect) -> Option<Rect> {
        let r = self.to_content(b);
        if !r.is_drawable() {
            return None;
        }
        Some(self.orient(r))
    }
}

/// Fixed text metrics used to size labels. The painter scales its font
/// to roughly this advance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LabelStyle {
    pub char_width: f32,
    pub line_height: f32,
    pub padding: f32,
}

impl Default for LabelStyle {
    fn default() -> Self {
        Self { char_width: 7.0, line_height: 16.0, padding: 2.0 }
    }
}

impl LabelStyle {
    /// Text size, wrapped to `max_width` the way a measured text block
    /// would be.
    pub fn measure(&self, text: &str, max_width: f32) -> (f32, f32) {
        let natural = text.chars().count() as f32 * self.char_width;
        if max_width <= 0.0 {
            return (0.0, self.line_height);
        }
        if natural <= max_width {
            return (natural, self.line_height);
        }
        let per_line = (max_width / self.char_width).floor().max(1.0);
        let lines = (text.chars().count() as f32 / per_line).ceil();
        ((per_line * self.char_width).min(max_width), lines * self.line_height)
    }
}

/// Top-left of a `w`×`h` label anchored inside `r`: first pushed left/up
/// when it would overflow the right/bottom edge, then never past the
/// left/top padding.
pub fn place_label(r: Rect, w: f32, h: f32, padding: f32) -> (f32, f32) {
    let mut x = r.left + padding;
    let mut y = r.top + padding;
    if x + w > r.right - padding {
        x = r.right - w - padding;
    }
    if y + h > r.bottom - padding {
        y = r.bottom - h - padding;
    }
    (x.max(r.left + padding), y.max(r.top + padding))
}

pub fn label_text(d: &Detection) -> String {
    format!("{} ({:.1}%)", d.label, d.score * 100.0)
}

/// One box ready to draw, in final canvas coordinates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverlayItem {
    pub category: Category,
    pub rect: Rect,
    pub label: String,
    /// Label background; the text itself is always drawn upright.
    pub label_rect: Rect,
}

#[derive(Debug, Clone, Default)]
pub struct OverlayRenderer {
    pub style: LabelStyle,
}

impl OverlayRenderer {
    pub fn new(style: LabelStyle) -> Self {
        Self { style }
    }

    /// Lay out the person and vehicle boxes of `bundle`. Anything else,
    /// and boxes that collapse to nothing, are left out.
    pub fn layout(&self, bundle: &ResultBundle, viewport: Viewport) -> Vec<OverlayItem> {
        let Some(mapper) = BoxMapper::for_bundle(bundle, viewport) else {
            debug!(
                "overlay: nothing to draw (input {}x{}, canvas {}x{})",
                bundle.input_width, bundle.input_height, viewport.canvas_w, viewport.canvas_h
            );
            return Vec::new();
        };

        let mut items = Vec::new();
        for d in &bundle.detections {
            let category = d.category();
            if !category.is_target() {
                continue;
            }
            let r = mapper.to_content(d.bounding_box);
            if !r.is_drawable() {
                trace!("overlay: skipped degenerate box for {}", d.label);
                continue;
            }
            let label = label_text(d);
            let pad = self.style.padding;
            let (tw, th) = self.style.measure(&label, r.width() - 2.0 * pad);
            let (tx, ty) = place_label(r, tw, th, pad);
            items.push(OverlayItem {
                category,
                rect: mapper.orient(r),
                label,
                label_rect: mapper.orient(Rect::new(tx, ty, tx + tw, ty + th)),
            });
        }
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-3;

    fn assert_rect(a: Rect, b: Rect) {
        assert!(a.approx_eq(&b, EPS), "{:?} != {:?}", a, b);
    }

    fn bundle(dets: Vec<Detection>, w: u32, h: u32, rot: Rotation) -> ResultBundle {
        ResultBundle { detections: dets, inference_time_ms: 5, input_width: w, input_height: h, source_rotation: rot }
    }

    #[test]
    fn unrotate_then_rotate_is_identity() {
        // Input is 480x640 for 90/270 (sensor 640x480), 640x480 otherwise.
        let b = Rect::new(12.0, 34.0, 156.0, 278.0);
        for rot in Rotation::ALL {
            let (iw, ih) = if rot.swaps_axes() { (480.0, 640.0) } else { (640.0, 480.0) };
            let (sw, sh) = sensor_dims(iw, ih, rot);
            assert_eq!((sw, sh), (640.0, 480.0));
            let s = unrotate(b, iw, ih, rot);
            assert!(s.is_drawable(), "{:?} at {}", s, rot);
            assert_rect(rotate(s, sw, sh, rot), b);
        }
    }

    #[test]
    fn unrotate_matches_pixel_rotation() {
        // Sensor 4x2; the sensor pixel box (0,0)-(1,1) ends up at the
        // top-right of a 2x4 input after a clockwise quarter turn.
        let sensor_box = Rect::new(0.0, 0.0, 1.0, 1.0);
        let input_box = rotate(sensor_box, 4.0, 2.0, Rotation::Deg90);
        assert_rect(input_box, Rect::new(1.0, 0.0, 2.0, 1.0));
        assert_rect(unrotate(input_box, 2.0, 4.0, Rotation::Deg90), sensor_box);

        let input_box = rotate(sensor_box, 4.0, 2.0, Rotation::Deg270);
        assert_rect(input_box, Rect::new(0.0, 3.0, 1.0, 4.0));
    }

    #[test]
    fn identity_for_unrotated_unflipped() {
        let vp = Viewport::new(640.0, 480.0, Rotation::Deg0);
        let m = BoxMapper::new(640, 480, Rotation::Deg0, vp).unwrap();
        let b = Rect::new(10.0, 20.0, 110.0, 220.0);
        assert_rect(m.map(b).unwrap(), b);
    }

    #[test]
    fn centered_box_lands_at_content_center() {
        for rot in Rotation::ALL {
            let (iw, ih) = if rot.swaps_axes() { (300, 400) } else { (400, 300) };
            let vp = Viewport::new(1000.0, 500.0, Rotation::Deg0);
            let m = BoxMapper::new(iw, ih, rot, vp).unwrap();
            let (cx, cy) = (iw as f32 / 2.0, ih as f32 / 2.0);
            let r = m.map(Rect::new(cx - 20.0, cy - 10.0, cx + 20.0, cy + 10.0)).unwrap();
            let (rx, ry) = r.center();
            let (ex, ey) = m.content().center();
            assert!((rx - ex).abs() < EPS && (ry - ey).abs() < EPS, "{} -> {:?}", rot, r);
        }
    }

    #[test]
    fn letterbox_scenario() {
        let area = ContentArea::fit(4.0 / 3.0, 800.0, 400.0);
        assert!((area.width - 533.333).abs() < 0.01);
        assert_eq!(area.height, 400.0);
        assert!((area.offset_x - 133.333).abs() < 0.01);
        assert_eq!(area.offset_y, 0.0);

        let vp = Viewport::new(800.0, 400.0, Rotation::Deg0);
        let m = BoxMapper::new(640, 480, Rotation::Deg0, vp).unwrap();
        let r = m.map(Rect::new(0.0, 0.0, 640.0, 480.0)).unwrap();
        assert!((r.left - 133.333).abs() < 0.01);
        assert_eq!(r.top, 0.0);
        assert!((r.width() - 533.333).abs() < 0.01);
        assert!((r.height() - 400.0).abs() < EPS);
    }

    #[test]
    fn tall_canvas_letterboxes_vertically() {
        let area = ContentArea::fit(4.0 / 3.0, 300.0, 600.0);
        assert_eq!(area.width, 300.0);
        assert!((area.height - 225.0).abs() < EPS);
        assert_eq!(area.offset_x, 0.0);
        assert!((area.offset_y - 187.5).abs() < EPS);
    }

    #[test]
    fn fixed_aspect_overrides_sensor() {
        let vp = Viewport::new(800.0, 400.0, Rotation::Deg0).with_aspect(ContentAspect::Fixed(2.0));
        let m = BoxMapper::new(640, 480, Rotation::Deg0, vp).unwrap();
        assert_eq!(m.content(), ContentArea { width: 800.0, height: 400.0, offset_x: 0.0, offset_y: 0.0 });
        assert!(BoxMapper::new(640, 480, Rotation::Deg0, vp.with_aspect(ContentAspect::Fixed(0.0))).is_none());
    }

    #[test]
    fn flip_scenario() {
        assert_eq!(flip_180(Rect::new(10.0, 10.0, 50.0, 50.0), 800.0, 400.0), Rect::new(750.0, 350.0, 790.0, 390.0));
    }

    #[test]
    fn flipped_display_rotates_mapped_box() {
        let b = Rect::new(10.0, 10.0, 50.0, 50.0);
        for (rot, flipped) in [(Rotation::Deg90, false), (Rotation::Deg180, true), (Rotation::Deg270, true)] {
            let vp = Viewport::new(800.0, 600.0, rot);
            let m = BoxMapper::new(800, 600, Rotation::Deg0, vp).unwrap();
            let want = if flipped { Rect::new(750.0, 550.0, 790.0, 590.0) } else { b };
            assert_rect(m.map(b).unwrap(), want);
        }
    }

    #[test]
    fn degenerate_inputs_draw_nothing() {
        let vp = Viewport::new(800.0, 400.0, Rotation::Deg0);
        assert!(BoxMapper::new(0, 480, Rotation::Deg0, vp).is_none());
        assert!(BoxMapper::new(640, 0, Rotation::Deg90, vp).is_none());
        assert!(BoxMapper::new(640, 480, Rotation::Deg0, Viewport::new(0.0, 400.0, Rotation::Deg0)).is_none());

        let m = BoxMapper::new(640, 480, Rotation::Deg0, vp).unwrap();
        assert!(m.map(Rect::new(50.0, 50.0, 50.0, 90.0)).is_none());
        assert!(m.map(Rect::new(50.0, 90.0, 60.0, 40.0)).is_none());
    }

    #[test]
    fn label_is_clamped_inside_box() {
        let r = Rect::new(100.0, 100.0, 160.0, 130.0);
        assert_eq!(place_label(r, 20.0, 10.0, 2.0), (102.0, 102.0));
        // Too wide: pushed left, then held at the left padding.
        assert_eq!(place_label(r, 80.0, 10.0, 2.0), (102.0, 102.0));
        // Overflowing the bottom-right corner of a small box.
        assert_eq!(place_label(Rect::new(0.0, 0.0, 30.0, 12.0), 27.0, 10.0, 2.0), (2.0, 2.0));
    }

    #[test]
    fn measure_wraps_long_labels() {
        let s = LabelStyle { char_width: 10.0, line_height: 12.0, padding: 2.0 };
        assert_eq!(s.measure("abcd", 100.0), (40.0, 12.0));
        assert_eq!(s.measure("abcdefghij", 45.0), (40.0, 36.0));
        assert_eq!(s.measure("abc", 0.0), (0.0, 12.0));
    }

    #[test]
    fn layout_filters_and_formats() {
        let dets = vec![
            Detection::new("person", 0.876, Rect::new(0.0, 0.0, 320.0, 240.0)),
            Detection::new("Truck", 0.5, Rect::new(320.0, 240.0, 640.0, 480.0)),
            Detection::new("dog", 0.99, Rect::new(0.0, 0.0, 640.0, 480.0)),
            Detection::new("car", 0.9, Rect::new(10.0, 10.0, 10.0, 100.0)),
        ];
        let items = OverlayRenderer::default().layout(&bundle(dets, 640, 480, Rotation::Deg0), Viewport::new(640.0, 480.0, Rotation::Deg0));
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].category, Category::Person);
        assert_eq!(items[0].label, "person (87.6%)");
        assert_eq!(items[1].category, Category::Vehicle);
        assert_eq!(items[1].label, "Truck (50.0%)");
        let lr = items[0].label_rect;
        assert!(lr.left >= items[0].rect.left && lr.top >= items[0].rect.top);
    }

    #[test]
    fn layout_flips_label_with_box() {
        let dets = vec![Detection::new("person", 0.9, Rect::new(0.0, 0.0, 200.0, 100.0))];
        let b = bundle(dets, 640, 480, Rotation::Deg0);
        let up = OverlayRenderer::default().layout(&b, Viewport::new(640.0, 480.0, Rotation::Deg0));
        let down = OverlayRenderer::default().layout(&b, Viewport::new(640.0, 480.0, Rotation::Deg180));
        assert_rect(down[0].rect, flip_180(up[0].rect, 640.0, 480.0));
        assert_rect(down[0].label_rect, flip_180(up[0].label_rect, 640.0, 480.0));
    }

    #[test]
    fn layout_of_empty_input_is_empty() {
        let dets = vec![Detection::new("person", 0.9, Rect::new(0.0, 0.0, 10.0, 10.0))];
        assert!(OverlayRenderer::default()
            .layout(&bundle(dets, 0, 0, Rotation::Deg0), Viewport::new(640.0, 480.0, Rotation::Deg0))
            .is_empty());
    }
}
