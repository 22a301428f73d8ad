use hvmon_proto::Rotation;
use image::{imageops, RgbImage};

use crate::error::VisionError;
use crate::frame::Frame;

/// Detector input: cropped, rotated upright.
#[derive(Debug, Clone)]
pub struct UprightImage {
    pub image: RgbImage,
    /// Rotation that was applied; needed to map boxes back.
    pub rotation: Rotation,
}

impl UprightImage {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Unpack the strided plane, crop it, and rotate clockwise by the frame's
/// rotation. Row padding never reaches the output.
pub fn prepare_upright(frame: &Frame) -> Result<UprightImage, VisionError> {
    let plane = frame.plane();
    let ps = plane.pixel_stride;
    if ps != 3 && ps != 4 {
        return Err(VisionError::PixelStride(ps));
    }
    if plane.row_stride < ps * frame.width as usize {
        return Err(VisionError::RowStride { row_stride: plane.row_stride, width: frame.width, pixel_stride: ps });
    }
    if frame.height > 0 {
        let need = plane.row_stride * (frame.height as usize - 1) + ps * frame.width as usize;
        if plane.data.len() < need {
            return Err(VisionError::ShortBuffer { need, have: plane.data.len() });
        }
    }

    let crop = frame.crop;
    if crop.width == 0 || crop.height == 0 || crop.right() > frame.width || crop.bottom() > frame.height {
        return Err(VisionError::CropOutOfBounds {
            left: crop.left,
            top: crop.top,
            width: crop.width,
            height: crop.height,
            frame_w: frame.width,
            frame_h: frame.height,
        });
    }

    let mut cropped = RgbImage::new(crop.width, crop.height);
    for (y, row) in cropped.rows_mut().enumerate() {
        let src_row = (crop.top as usize + y) * plane.row_stride;
        for (x, px) in row.enumerate() {
            let i = src_row + (crop.left as usize + x) * ps;
            px.0 = [plane.data[i], plane.data[i + 1], plane.data[i + 2]];
        }
    }

    let image = match frame.rotation {
        Rotation::Deg0 => cropped,
        Rotation::Deg90 => imageops::rotate90(&cropped),
        Rotation::Deg180 => imageops::rotate180(&cropped),
        Rotation::Deg270 => imageops::rotate270(&cropped),
    };

    Ok(UprightImage { image, rotation: frame.rotation })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{CropRect, PixelPlane};

    /// 3x2 RGBA plane with 8 bytes of row padding; red channel encodes x+10*y.
    fn padded_frame(rotation: Rotation) -> Frame {
        let (w, h, stride) = (3u32, 2u32, 3 * 4 + 8);
        let mut data = vec![0xEEu8; stride * h as usize];
        for y in 0..h as usize {
            for x in 0..w as usize {
                let i = y * stride + x * 4;
                data[i] = (x + 10 * y) as u8;
                data[i + 3] = 255;
            }
        }
        Frame::new(PixelPlane { data, row_stride: stride, pixel_stride: 4 }, w, h, rotation)
    }

    fn red(img: &RgbImage, x: u32, y: u32) -> u8 {
        img.get_pixel(x, y).0[0]
    }

    #[test]
    fn padding_is_dropped() {
        let up = prepare_upright(&padded_frame(Rotation::Deg0)).unwrap();
        assert_eq!((up.width(), up.height()), (3, 2));
        assert_eq!(red(&up.image, 2, 0), 2);
        assert_eq!(red(&up.image, 0, 1), 10);
        assert!(up.image.pixels().all(|p| p.0[0] != 0xEE));
    }

    #[test]
    fn rotation_90_swaps_dimensions_clockwise() {
        let up = prepare_upright(&padded_frame(Rotation::Deg90)).unwrap();
        assert_eq!((up.width(), up.height()), (2, 3));
        // Clockwise: bottom-left source pixel lands top-left.
        assert_eq!(red(&up.image, 0, 0), 10);
        assert_eq!(red(&up.image, 1, 0), 0);
        assert_eq!(up.rotation, Rotation::Deg90);
    }

    #[test]
    fn rotation_270_and_180() {
        let up = prepare_upright(&padded_frame(Rotation::Deg270)).unwrap();
        assert_eq!((up.width(), up.height()), (2, 3));
        assert_eq!(red(&up.image, 0, 0), 2);

        let up = prepare_upright(&padded_frame(Rotation::Deg180)).unwrap();
        assert_eq!(red(&up.image, 0, 0), 12);
    }

    #[test]
    fn crop_selects_subregion() {
        let f = padded_frame(Rotation::Deg0).with_crop(CropRect { left: 1, top: 1, width: 2, height: 1 });
        let up = prepare_upright(&f).unwrap();
        assert_eq!((up.width(), up.height()), (2, 1));
        assert_eq!(red(&up.image, 0, 0), 11);
    }

    #[test]
    fn crop_outside_frame_is_an_error() {
        let f = padded_frame(Rotation::Deg0).with_crop(CropRect { left: 2, top: 0, width: 2, height: 2 });
        assert!(matches!(prepare_upright(&f), Err(VisionError::CropOutOfBounds { .. })));
    }

    #[test]
    fn short_buffer_is_an_error() {
        let plane = PixelPlane { data: vec![0; 10], row_stride: 16, pixel_stride: 4 };
        let f = Frame::new(plane, 4, 2, Rotation::Deg0);
        assert!(matches!(prepare_upright(&f), Err(VisionError::ShortBuffer { need: 32, have: 10 })));
    }
}
