#[derive(Debug, thiserror::Error)]
pub enum VisionError {
    #[error("invalid detector config: {0}")]
    InvalidConfig(String),

    #[error("unsupported pixel stride {0} (expected 3 or 4)")]
    PixelStride(usize),

    #[error("row stride {row_stride} too small for {width}px at {pixel_stride} bytes/px")]
    RowStride { row_stride: usize, width: u32, pixel_stride: usize },

    #[error("pixel buffer too short: need {need} bytes, have {have}")]
    ShortBuffer { need: usize, have: usize },

    #[error("crop {left},{top} {width}x{height} outside {frame_w}x{frame_h} frame")]
    CropOutOfBounds {
        left: u32,
        top: u32,
        width: u32,
        height: u32,
        frame_w: u32,
        frame_h: u32,
    },

    #[error("detection worker is not running")]
    WorkerStopped,

    #[error("spawn detection worker: {0}")]
    Spawn(#[from] std::io::Error),
}
