//! Camera frames as delivered by a frame source.
//!
//! A [`Frame`] owns its pixel plane plus an optional release hook supplied by
//! the source (returning a buffer to a pool, closing a device handle, ...).
//! The hook runs from `Drop`, so every path that lets go of a frame, whether
//! throttled, rejected by a busy worker, processed or failed, releases it
//! exactly once.

use hvmon_proto::Rotation;
use image::RgbaImage;

/// Region of the plane holding valid pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRect {
    pub fn full(width: u32, height: u32) -> Self {
        Self { left: 0, top: 0, width, height }
    }

    pub fn right(&self) -> u32 {
        self.left.saturating_add(self.width)
    }

    pub fn bottom(&self) -> u32 {
        self.top.saturating_add(self.height)
    }
}

/// Single interleaved plane (RGBA_8888 or RGB_888).
#[derive(Debug, Clone)]
pub struct PixelPlane {
    pub data: Vec<u8>,
    /// Bytes per row, including padding.
    pub row_stride: usize,
    /// Bytes per pixel.
    pub pixel_stride: usize,
}

type ReleaseHook = Box<dyn FnOnce() + Send + 'static>;

pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub crop: CropRect,
    pub rotation: Rotation,
    plane: PixelPlane,
    release: Option<ReleaseHook>,
}

impl Frame {
    pub fn new(plane: PixelPlane, width: u32, height: u32, rotation: Rotation) -> Self {
        Self {
            width,
            height,
            crop: CropRect::full(width, height),
            rotation,
            plane,
            release: None,
        }
    }

    /// Tightly packed RGBA frame.
    pub fn from_rgba(img: RgbaImage, rotation: Rotation) -> Self {
        let (w, h) = img.dimensions();
        let plane = PixelPlane {
            data: img.into_raw(),
            row_stride: w as usize * 4,
            pixel_stride: 4,
        };
        Self::new(plane, w, h, rotation)
    }

    pub fn with_crop(mut self, crop: CropRect) -> Self {
        self.crop = crop;
        self
    }

    /// Register the source's release hook. Replaces any previous hook
    /// without running it.
    pub fn on_release<F>(mut self, hook: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.release = Some(Box::new(hook));
        self
    }

    pub fn plane(&self) -> &PixelPlane {
        &self.plane
    }

    /// Release now. Equivalent to dropping the frame.
    pub fn close(self) {}
}

impl Drop for Frame {
    fn drop(&mut self) {
        if let Some(hook) = self.release.take() {
            hook();
        }
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("crop", &self.crop)
            .field("rotation", &self.rotation)
            .field("row_stride", &self.plane.row_stride)
            .field("pixel_stride", &self.plane.pixel_stride)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Counts release-hook invocations across frames.
    #[derive(Clone, Default)]
    pub struct ReleaseCounter(pub Arc<AtomicUsize>);

    impl ReleaseCounter {
        pub fn count(&self) -> usize {
            self.0.load(Ordering::SeqCst)
        }

        pub fn frame(&self, w: u32, h: u32, rotation: Rotation) -> Frame {
            let c = self.0.clone();
            Frame::from_rgba(RgbaImage::new(w, h), rotation).on_release(move || {
                c.fetch_add(1, Ordering::SeqCst);
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::ReleaseCounter;
    use super::*;

    #[test]
    fn drop_releases_once() {
        let counter = ReleaseCounter::default();
        let f = counter.frame(4, 4, Rotation::Deg0);
        drop(f);
        assert_eq!(counter.count(), 1);
    }

    #[test]
    fn close_releases_once() {
        let counter = ReleaseCounter::default();
        counter.frame(2, 2, Rotation::Deg90).close();
        assert_eq!(counter.count(), 1);
    }

    #[test]
    fn frame_without_hook_drops_quietly() {
        let f = Frame::from_rgba(RgbaImage::new(1, 1), Rotation::Deg0);
        assert_eq!(f.crop, CropRect::full(1, 1));
        drop(f);
    }
}
