use thiserror::Error;

use crate::format::TextureFormat;
use crate::layout::TextureDimension;

/// Precondition violations in layout/address math.
///
/// These are test-authoring errors: they are detected before any engine work is issued and are
/// never coerced into a "nearby" valid value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    #[error("{axis} value {value} is not a multiple of the {format} block size {block}")]
    NotBlockAligned {
        format: TextureFormat,
        axis: &'static str,
        value: u64,
        block: u32,
    },
    #[error("texel {axis}={texel} lies before region origin {axis}={origin}")]
    TexelBeforeOrigin {
        axis: &'static str,
        texel: u32,
        origin: u32,
    },
    #[error("bytes_per_row must be non-zero")]
    ZeroBytesPerRow,
    #[error("bytes_per_row {bytes_per_row} smaller than one complete block row ({row_bytes} bytes)")]
    BytesPerRowTooSmall { bytes_per_row: u32, row_bytes: u64 },
    #[error("rows_per_image {rows_per_image} smaller than copy height {height}")]
    RowsPerImageTooSmall { rows_per_image: u32, height: u32 },
    #[error("1D surfaces must have height 1 and depth 1, got {height}x{depth}")]
    InvalidDimension { height: u32, depth: u32 },
    #[error("layout arithmetic overflowed u64")]
    Overflow,
}

/// Failures reported by a transfer engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("unknown surface {0}")]
    UnknownSurface(u32),
    #[error("unknown buffer {0}")]
    UnknownBuffer(u32),
    #[error("format {0} is not supported by this engine")]
    UnsupportedFormat(TextureFormat),
    #[error("{0:?} surfaces are not supported by this engine")]
    UnsupportedDimension(TextureDimension),
    #[error("copy rejected: {0}")]
    Validation(String),
    #[error("no suitable adapter found")]
    AdapterNotFound,
    #[error("request_device failed: {0}")]
    RequestDevice(String),
    #[error("map_async callback dropped unexpectedly")]
    MapAsyncDropped,
    #[error("map_async failed: {0}")]
    MapAsync(String),
    #[error(transparent)]
    Layout(#[from] LayoutError),
}

/// Errors that abort a single run. Verification mismatches are not errors; they are recorded in
/// the run's [`crate::verify::CheckReport`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunError {
    #[error("precondition violated: {0}")]
    Precondition(#[from] LayoutError),
    #[error("{format} cannot be used with {init:?}/{check:?} (copy_src={copy_src}, copy_dst={copy_dst})")]
    UnsupportedCopy {
        format: TextureFormat,
        init: crate::run::InitMethod,
        check: crate::run::CheckMethod,
        copy_src: bool,
        copy_dst: bool,
    },
    #[error("mip level {mip_level} out of range (mip_level_count={mip_level_count})")]
    MipLevelOutOfRange { mip_level: u32, mip_level_count: u32 },
    #[error("copy region {axis} end {end} exceeds mip size {size}")]
    RegionOutOfBounds {
        axis: &'static str,
        end: u64,
        size: u32,
    },
    #[error("transfer engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("read-back returned {actual} bytes, expected {expected}")]
    ShortReadback { expected: u64, actual: u64 },
}
