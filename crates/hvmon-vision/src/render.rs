use std::path::Path;

use ab_glyph::FontArc;
use hvmon_proto::{Category, Rect};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect as PixelRect;

use crate::overlay::{LabelStyle, OverlayItem};

pub const PERSON_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const VEHICLE_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
pub const LABEL_BACKGROUND: Rgb<u8> = Rgb([40, 40, 40]);
pub const LABEL_TEXT: Rgb<u8> = Rgb([255, 255, 255]);

/// Glyph height relative to the label line height; keeps the average
/// DejaVu Sans advance close to `LabelStyle::char_width`.
const GLYPH_SCALE: f32 = 0.8;

static EMBEDDED_FONT: &[u8] = include_bytes!("../assets/DejaVuSans.ttf");

pub fn category_color(category: &Category) -> Rgb<u8> {
    match category {
        Category::Person => PERSON_COLOR,
        _ => VEHICLE_COLOR,
    }
}

/// The bundled DejaVu Sans.
pub fn embedded_font() -> anyhow::Result<FontArc> {
    FontArc::try_from_slice(EMBEDDED_FONT).map_err(|e| anyhow::anyhow!("parse bundled font: {}", e))
}

pub fn load_font(path: impl AsRef<Path>) -> anyhow::Result<FontArc> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|e| anyhow::anyhow!("read font {}: {}", path.display(), e))?;
    FontArc::try_from_vec(bytes).map_err(|e| anyhow::anyhow!("parse font {}: {}", path.display(), e))
}

/// Integer pixel rect clipped to the canvas; `None` when nothing is left.
fn to_pixels(r: Rect, canvas_w: u32, canvas_h: u32) -> Option<PixelRect> {
    let l = r.left.round().max(0.0) as i64;
    let t = r.top.round().max(0.0) as i64;
    let rr = (r.right.round() as i64).min(canvas_w as i64);
    let b = (r.bottom.round() as i64).min(canvas_h as i64);
    if rr <= l || b <= t {
        return None;
    }
    Some(PixelRect::at(l as i32, t as i32).of_size((rr - l) as u32, (b - t) as u32))
}

/// Split `text` into the lines `LabelStyle::measure` sized the label for.
fn wrap(text: &str, label_width: f32, char_width: f32) -> Vec<String> {
    let per_line = ((label_width / char_width) + 1e-3).floor().max(1.0) as usize;
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(per_line).map(|c| c.iter().collect()).collect()
}

/// Rasterises laid-out overlay items: box outlines in the category colour,
/// then the label text upright on a filled background.
pub struct OverlayPainter {
    font: FontArc,
    style: LabelStyle,
    stroke: u32,
}

impl OverlayPainter {
    pub fn new(font: FontArc, style: LabelStyle, stroke: u32) -> Self {
        Self { font, style, stroke }
    }

    pub fn draw(&self, canvas: &mut RgbImage, items: &[OverlayItem]) {
        let (w, h) = canvas.dimensions();
        for item in items {
            let color = category_color(&item.category);
            for i in 0..self.stroke.max(1) {
                let inset = i as f32;
                let r = Rect::new(item.rect.left + inset, item.rect.top + inset, item.rect.right - inset, item.rect.bottom - inset);
                if let Some(px) = to_pixels(r, w, h) {
                    draw_hollow_rect_mut(canvas, px, color);
                }
            }
            let Some(px) = to_pixels(item.label_rect, w, h) else { continue };
            draw_filled_rect_mut(canvas, px, LABEL_BACKGROUND);
            let scale = self.style.line_height * GLYPH_SCALE;
            let pad = (self.style.line_height - scale) / 2.0;
            for (n, line) in wrap(&item.label, item.label_rect.width(), self.style.char_width).iter().enumerate() {
                let y = item.label_rect.top + pad + n as f32 * self.style.line_height;
                draw_text_mut(canvas, LABEL_TEXT, item.label_rect.left.round() as i32, y.round() as i32, scale, &self.font, line);
            }
        }
    }
}
