//! Transfer engines: the device-side half of every copy.
//!
//! An engine owns surfaces and linear buffers behind opaque handles and executes three kinds of
//! transfer (data -> surface, buffer -> surface, surface -> buffer) plus asynchronous host
//! read-back. Commands execute in submission order; a read-back requested after a copy observes
//! that copy.

mod soft;
#[cfg(test)]
pub(crate) mod testing;
mod wgpu_backend;

use std::collections::HashMap;

use futures::future::LocalBoxFuture;

use crate::error::EngineError;
use crate::format::TextureFormat;
use crate::layout::{
    block_extent, check_aligned, max_mip_level_count, physical_mip_size, required_data_len,
    Extent3d, LinearLayout, Origin3d, TextureDimension,
};

pub use soft::SoftEngine;
pub use wgpu_backend::WgpuEngine;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SurfaceId(pub(crate) u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferId(pub(crate) u32);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SurfaceDesc {
    pub label: Option<String>,
    pub size: Extent3d,
    pub mip_level_count: u32,
    pub dimension: TextureDimension,
    pub format: TextureFormat,
}

/// A subresource position: `origin` within mip `mip_level` of `surface`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfaceCopy {
    pub surface: SurfaceId,
    pub mip_level: u32,
    pub origin: Origin3d,
}

/// Engine restrictions on caller-supplied layouts used with buffer copies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CopyLimits {
    /// `bytes_per_row` of buffer <-> surface copies must be a multiple of this.
    pub bytes_per_row_alignment: u32,
    /// Buffer <-> surface copy offsets must be a multiple of the format's block size.
    pub block_aligned_buffer_offset: bool,
}

impl CopyLimits {
    pub const UNRESTRICTED: Self = Self {
        bytes_per_row_alignment: 1,
        block_aligned_buffer_offset: false,
    };

    /// Whether a buffer copy with `layout` is accepted for `format`.
    pub fn allows_buffer_layout(&self, layout: &LinearLayout, format: TextureFormat) -> bool {
        if layout.bytes_per_row % self.bytes_per_row_alignment != 0 {
            return false;
        }
        !self.block_aligned_buffer_offset
            || layout.offset % u64::from(format.info().bytes_per_block) == 0
    }
}

/// Resolves to the buffer contents once the device has finished every command submitted before
/// the read-back was requested.
pub type ReadbackFuture = LocalBoxFuture<'static, Result<Vec<u8>, EngineError>>;

pub trait TransferEngine {
    fn name(&self) -> &'static str;

    fn limits(&self) -> CopyLimits;

    fn supports_format(&self, format: TextureFormat) -> bool;

    /// Whether surfaces of `dimension` round-trip through this engine's copies.
    fn supports_dimension(&self, _dimension: TextureDimension) -> bool {
        true
    }

    fn create_surface(&mut self, desc: &SurfaceDesc) -> Result<SurfaceId, EngineError>;

    fn destroy_surface(&mut self, surface: SurfaceId) -> Result<(), EngineError>;

    /// Writes `data` (laid out as `layout`) into the `size` region at `dst`.
    fn write_linear_into_surface(
        &mut self,
        dst: &SurfaceCopy,
        layout: &LinearLayout,
        size: Extent3d,
        data: &[u8],
    ) -> Result<(), EngineError>;

    /// Uploads `data` into a new linear buffer usable as a copy source.
    fn stage_buffer(&mut self, data: &[u8]) -> Result<BufferId, EngineError>;

    fn copy_buffer_into_surface(
        &mut self,
        src: BufferId,
        layout: &LinearLayout,
        dst: &SurfaceCopy,
        size: Extent3d,
    ) -> Result<(), EngineError>;

    /// Copies the `size` region at `src` into a new `buffer_len`-byte buffer laid out as `layout`.
    fn copy_surface_into_linear(
        &mut self,
        src: &SurfaceCopy,
        layout: &LinearLayout,
        size: Extent3d,
        buffer_len: u64,
    ) -> Result<BufferId, EngineError>;

    fn request_readback(&mut self, buffer: BufferId) -> Result<ReadbackFuture, EngineError>;

    /// Releases the handle. An in-flight read-back keeps the underlying storage alive until it
    /// resolves.
    fn destroy_buffer(&mut self, buffer: BufferId) -> Result<(), EngineError>;
}

pub(crate) struct ResourceRegistry<T> {
    next_id: u32,
    entries: HashMap<u32, T>,
}

impl<T> Default for ResourceRegistry<T> {
    fn default() -> Self {
        Self {
            next_id: 1,
            entries: HashMap::new(),
        }
    }
}

impl<T> ResourceRegistry<T> {
    pub(crate) fn insert(&mut self, value: T) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert(id, value);
        id
    }

    pub(crate) fn get(&self, id: u32) -> Option<&T> {
        self.entries.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: u32) -> Option<&mut T> {
        self.entries.get_mut(&id)
    }

    pub(crate) fn remove(&mut self, id: u32) -> Option<T> {
        self.entries.remove(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

pub(crate) fn validate_surface_desc(desc: &SurfaceDesc) -> Result<(), EngineError> {
    let info = desc.format.info();
    if desc.size.is_empty() {
        return Err(EngineError::Validation(format!(
            "surface size {:?} must be non-zero",
            desc.size
        )));
    }
    crate::layout::check_base_size(desc.format, desc.dimension, desc.size)?;
    if info.compressed && desc.dimension != TextureDimension::D2 {
        return Err(EngineError::Validation(format!(
            "{} surfaces must be 2D",
            desc.format
        )));
    }
    let max = max_mip_level_count(desc.dimension, desc.size);
    if desc.mip_level_count == 0 || desc.mip_level_count > max {
        return Err(EngineError::Validation(format!(
            "mip_level_count {} out of range 1..={max}",
            desc.mip_level_count
        )));
    }
    Ok(())
}

/// WebGPU-style validation of one surface <-> linear transfer against a linear source or
/// destination of `buffer_len` bytes.
pub(crate) fn validate_texture_copy(
    desc: &SurfaceDesc,
    copy: &SurfaceCopy,
    layout: &LinearLayout,
    size: Extent3d,
    buffer_len: u64,
) -> Result<(), EngineError> {
    let format = desc.format;
    let info = format.info();
    if copy.mip_level >= desc.mip_level_count {
        return Err(EngineError::Validation(format!(
            "mip_level {} out of range (mip_level_count={})",
            copy.mip_level, desc.mip_level_count
        )));
    }
    check_aligned(format, "origin x", copy.origin.x.into(), info.block_width)?;
    check_aligned(format, "origin y", copy.origin.y.into(), info.block_height)?;
    block_extent(format, size)?;

    let mip = physical_mip_size(format, desc.dimension, desc.size, copy.mip_level);
    let ends = [
        ("x", u64::from(copy.origin.x) + u64::from(size.width), mip.width),
        ("y", u64::from(copy.origin.y) + u64::from(size.height), mip.height),
        ("z", u64::from(copy.origin.z) + u64::from(size.depth), mip.depth),
    ];
    for (axis, end, limit) in ends {
        if end > u64::from(limit) {
            return Err(EngineError::Validation(format!(
                "copy {axis} range ends at {end}, past mip {} size {limit}",
                copy.mip_level
            )));
        }
    }

    layout.validate(format, size)?;
    let required = required_data_len(layout, format, size)?;
    if buffer_len < required {
        return Err(EngineError::Validation(format!(
            "linear data too small: need {required} bytes (including offset {}), got {buffer_len}",
            layout.offset
        )));
    }
    Ok(())
}
