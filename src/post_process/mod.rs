pub mod compressor;
pub mod probe;

pub use compressor::{CompressorConfig, VideoCompressor, compute_video_bitrate};

// 默认大小上限 49.5 MB
pub const DEFAULT_CEILING_BYTES: u64 = (49.5 * 1024.0 * 1024.0) as u64;

pub fn ceiling_from_mb(mb: f64) -> u64 {
    (mb * 1024.0 * 1024.0) as u64
}
