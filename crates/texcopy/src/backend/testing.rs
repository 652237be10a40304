//! Fault injection around [`SoftEngine`] for unit tests.

use futures::FutureExt;

use super::{
    BufferId, CopyLimits, ReadbackFuture, SoftEngine, SurfaceCopy, SurfaceDesc, SurfaceId,
    TransferEngine,
};
use crate::error::EngineError;
use crate::format::TextureFormat;
use crate::layout::{Extent3d, LinearLayout, TextureDimension};

pub(crate) struct FaultyEngine {
    pub inner: SoftEngine,
    pub limits: CopyLimits,
    /// Read-back byte indices to invert.
    pub corrupt_at: Vec<usize>,
    /// Fail every buffer -> surface copy after validation.
    pub reject_buffer_copies: bool,
    /// Fail every read-back request.
    pub reject_readbacks: bool,
    /// Report block-compressed formats as unsupported.
    pub no_compressed: bool,
    pub unsupported_dimensions: Vec<TextureDimension>,
}

impl FaultyEngine {
    pub fn new() -> Self {
        Self {
            inner: SoftEngine::new(),
            limits: CopyLimits::UNRESTRICTED,
            corrupt_at: Vec::new(),
            reject_buffer_copies: false,
            reject_readbacks: false,
            no_compressed: false,
            unsupported_dimensions: Vec::new(),
        }
    }
}

impl TransferEngine for FaultyEngine {
    fn name(&self) -> &'static str {
        "faulty"
    }

    fn limits(&self) -> CopyLimits {
        self.limits
    }

    fn supports_format(&self, format: TextureFormat) -> bool {
        !(self.no_compressed && format.info().compressed) && self.inner.supports_format(format)
    }

    fn supports_dimension(&self, dimension: TextureDimension) -> bool {
        !self.unsupported_dimensions.contains(&dimension)
    }

    fn create_surface(&mut self, desc: &SurfaceDesc) -> Result<SurfaceId, EngineError> {
        self.inner.create_surface(desc)
    }

    fn destroy_surface(&mut self, surface: SurfaceId) -> Result<(), EngineError> {
        self.inner.destroy_surface(surface)
    }

    fn write_linear_into_surface(
        &mut self,
        dst: &SurfaceCopy,
        layout: &LinearLayout,
        size: Extent3d,
        data: &[u8],
    ) -> Result<(), EngineError> {
        self.inner.write_linear_into_surface(dst, layout, size, data)
    }

    fn stage_buffer(&mut self, data: &[u8]) -> Result<BufferId, EngineError> {
        self.inner.stage_buffer(data)
    }

    fn copy_buffer_into_surface(
        &mut self,
        src: BufferId,
        layout: &LinearLayout,
        dst: &SurfaceCopy,
        size: Extent3d,
    ) -> Result<(), EngineError> {
        if self.reject_buffer_copies {
            return Err(EngineError::Validation("buffer copies disabled".into()));
        }
        self.inner.copy_buffer_into_surface(src, layout, dst, size)
    }

    fn copy_surface_into_linear(
        &mut self,
        src: &SurfaceCopy,
        layout: &LinearLayout,
        size: Extent3d,
        buffer_len: u64,
    ) -> Result<BufferId, EngineError> {
        self.inner
            .copy_surface_into_linear(src, layout, size, buffer_len)
    }

    fn request_readback(&mut self, buffer: BufferId) -> Result<ReadbackFuture, EngineError> {
        if self.reject_readbacks {
            return Err(EngineError::MapAsync("read-backs disabled".into()));
        }
        let pending = self.inner.request_readback(buffer)?;
        let corrupt_at = self.corrupt_at.clone();
        Ok(async move {
            let mut bytes = pending.await?;
            for at in corrupt_at {
                if let Some(b) = bytes.get_mut(at) {
                    *b ^= 0xff;
                }
            }
            Ok(bytes)
        }
        .boxed_local())
    }

    fn destroy_buffer(&mut self, buffer: BufferId) -> Result<(), EngineError> {
        self.inner.destroy_buffer(buffer)
    }
}
