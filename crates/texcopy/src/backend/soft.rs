use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use futures_intrusive::channel::shared::{oneshot_channel, OneshotSender};

use super::{
    validate_surface_desc, validate_texture_copy, BufferId, CopyLimits, ReadbackFuture,
    ResourceRegistry, SurfaceCopy, SurfaceDesc, SurfaceId, TransferEngine,
};
use crate::address::byte_offset_of;
use crate::error::EngineError;
use crate::format::TextureFormat;
use crate::layout::{block_extent, physical_mip_size, Extent3d, LinearLayout, Origin3d};

/// Edge length, in blocks, of the square tiles surfaces are stored in.
const TILE_BLOCKS: u32 = 8;

type SharedBytes = Arc<Mutex<Vec<u8>>>;

/// One mip level (all layers) stored as row-major 8x8-block tiles.
struct TiledLevel {
    blocks_wide: u32,
    blocks_high: u32,
    depth: u32,
    bytes_per_block: usize,
    bytes: Vec<u8>,
}

impl TiledLevel {
    fn new(format: TextureFormat, size: Extent3d) -> Self {
        let info = format.info();
        let blocks_wide = size.width / info.block_width;
        let blocks_high = size.height / info.block_height;
        let tiles = blocks_wide.div_ceil(TILE_BLOCKS) as usize
            * blocks_high.div_ceil(TILE_BLOCKS) as usize
            * size.depth as usize;
        let bytes_per_block = info.bytes_per_block as usize;
        let tile_bytes = (TILE_BLOCKS * TILE_BLOCKS) as usize * bytes_per_block;
        Self {
            blocks_wide,
            blocks_high,
            depth: size.depth,
            bytes_per_block,
            bytes: vec![0; tiles * tile_bytes],
        }
    }

    fn block_offset(&self, bx: u32, by: u32, z: u32) -> usize {
        debug_assert!(bx < self.blocks_wide && by < self.blocks_high && z < self.depth);
        let tiles_wide = self.blocks_wide.div_ceil(TILE_BLOCKS) as usize;
        let tiles_per_layer = tiles_wide * self.blocks_high.div_ceil(TILE_BLOCKS) as usize;
        let tile = z as usize * tiles_per_layer
            + (by / TILE_BLOCKS) as usize * tiles_wide
            + (bx / TILE_BLOCKS) as usize;
        let within = ((by % TILE_BLOCKS) * TILE_BLOCKS + bx % TILE_BLOCKS) as usize;
        (tile * (TILE_BLOCKS * TILE_BLOCKS) as usize + within) * self.bytes_per_block
    }
}

struct SoftSurface {
    desc: SurfaceDesc,
    levels: Vec<TiledLevel>,
}

struct SoftBuffer {
    bytes: SharedBytes,
}

enum Command {
    WriteTexture {
        dst: SurfaceCopy,
        layout: LinearLayout,
        size: Extent3d,
        data: Vec<u8>,
    },
    CopyBufferToTexture {
        src: SharedBytes,
        layout: LinearLayout,
        dst: SurfaceCopy,
        size: Extent3d,
    },
    CopyTextureToBuffer {
        src: SurfaceCopy,
        layout: LinearLayout,
        size: Extent3d,
        dst: SharedBytes,
    },
    MapRead {
        buffer: SharedBytes,
        sender: OneshotSender<Vec<u8>>,
    },
}

/// CPU implementation of [`TransferEngine`].
///
/// Surfaces are zero-initialized and stored block-tiled, so their internal addressing shares
/// nothing with the linear layouts under test. Copies are validated when recorded and executed
/// in order when the queue is drained; draining happens when a read-back is requested or a
/// surface is destroyed.
#[derive(Default)]
pub struct SoftEngine {
    surfaces: ResourceRegistry<SoftSurface>,
    buffers: ResourceRegistry<SoftBuffer>,
    queue: VecDeque<Command>,
}

impl SoftEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live surfaces and buffers; useful for asserting runs release what they create.
    pub fn live_resources(&self) -> usize {
        self.surfaces.len() + self.buffers.len()
    }

    fn surface(&self, id: SurfaceId) -> Result<&SoftSurface, EngineError> {
        self.surfaces
            .get(id.0)
            .ok_or(EngineError::UnknownSurface(id.0))
    }

    fn buffer(&self, id: BufferId) -> Result<&SoftBuffer, EngineError> {
        self.buffers.get(id.0).ok_or(EngineError::UnknownBuffer(id.0))
    }

    fn flush(&mut self) -> Result<(), EngineError> {
        while let Some(command) = self.queue.pop_front() {
            self.execute(command)?;
        }
        Ok(())
    }

    fn execute(&mut self, command: Command) -> Result<(), EngineError> {
        match command {
            Command::WriteTexture {
                dst,
                layout,
                size,
                data,
            } => self.linear_to_surface(&dst, &layout, size, &data),
            Command::CopyBufferToTexture {
                src,
                layout,
                dst,
                size,
            } => {
                let bytes = lock(&src).clone();
                self.linear_to_surface(&dst, &layout, size, &bytes)
            }
            Command::CopyTextureToBuffer {
                src,
                layout,
                size,
                dst,
            } => {
                let mut bytes = lock(&dst);
                self.surface_to_linear(&src, &layout, size, &mut bytes)
            }
            Command::MapRead { buffer, sender } => {
                let bytes = lock(&buffer).clone();
                if sender.send(bytes).is_err() {
                    tracing::debug!("read-back receiver dropped before completion");
                }
                Ok(())
            }
        }
    }

    /// Visits every block of a copy region as (linear byte offset, level block coordinate).
    fn for_each_block(
        format: TextureFormat,
        copy: &SurfaceCopy,
        layout: &LinearLayout,
        size: Extent3d,
        mut f: impl FnMut(usize, (u32, u32, u32)),
    ) -> Result<(), EngineError> {
        let info = format.info();
        let blocks = block_extent(format, size)?;
        for z in 0..blocks.depth {
            for by in 0..blocks.blocks_high {
                for bx in 0..blocks.blocks_wide {
                    let texel = Origin3d::new(
                        copy.origin.x + bx * info.block_width,
                        copy.origin.y + by * info.block_height,
                        copy.origin.z + z,
                    );
                    let linear = byte_offset_of(layout, format, texel, copy.origin)?;
                    let surface_block = (
                        texel.x / info.block_width,
                        texel.y / info.block_height,
                        texel.z,
                    );
                    f(linear as usize, surface_block);
                }
            }
        }
        Ok(())
    }

    fn linear_to_surface(
        &mut self,
        dst: &SurfaceCopy,
        layout: &LinearLayout,
        size: Extent3d,
        data: &[u8],
    ) -> Result<(), EngineError> {
        let surface = self
            .surfaces
            .get_mut(dst.surface.0)
            .ok_or(EngineError::UnknownSurface(dst.surface.0))?;
        let format = surface.desc.format;
        let level = &mut surface.levels[dst.mip_level as usize];
        let block_bytes = level.bytes_per_block;
        Self::for_each_block(format, dst, layout, size, |linear, (bx, by, z)| {
            let at = level.block_offset(bx, by, z);
            level.bytes[at..at + block_bytes].copy_from_slice(&data[linear..linear + block_bytes]);
        })
    }

    fn surface_to_linear(
        &self,
        src: &SurfaceCopy,
        layout: &LinearLayout,
        size: Extent3d,
        out: &mut [u8],
    ) -> Result<(), EngineError> {
        let surface = self.surface(src.surface)?;
        let level = &surface.levels[src.mip_level as usize];
        let block_bytes = level.bytes_per_block;
        Self::for_each_block(surface.desc.format, src, layout, size, |linear, (bx, by, z)| {
            let at = level.block_offset(bx, by, z);
            out[linear..linear + block_bytes].copy_from_slice(&level.bytes[at..at + block_bytes]);
        })
    }
}

fn lock(bytes: &SharedBytes) -> std::sync::MutexGuard<'_, Vec<u8>> {
    bytes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl TransferEngine for SoftEngine {
    fn name(&self) -> &'static str {
        "soft"
    }

    fn limits(&self) -> CopyLimits {
        CopyLimits::UNRESTRICTED
    }

    fn supports_format(&self, _format: TextureFormat) -> bool {
        true
    }

    fn create_surface(&mut self, desc: &SurfaceDesc) -> Result<SurfaceId, EngineError> {
        validate_surface_desc(desc)?;
        let levels = (0..desc.mip_level_count)
            .map(|mip| {
                TiledLevel::new(
                    desc.format,
                    physical_mip_size(desc.format, desc.dimension, desc.size, mip),
                )
            })
            .collect();
        let id = SurfaceId(self.surfaces.insert(SoftSurface {
            desc: desc.clone(),
            levels,
        }));
        tracing::debug!(surface = id.0, ?desc, "soft: create surface");
        Ok(id)
    }

    fn destroy_surface(&mut self, surface: SurfaceId) -> Result<(), EngineError> {
        // Commands already recorded against the surface still run first.
        self.flush()?;
        self.surfaces
            .remove(surface.0)
            .map(|_| ())
            .ok_or(EngineError::UnknownSurface(surface.0))
    }

    fn write_linear_into_surface(
        &mut self,
        dst: &SurfaceCopy,
        layout: &LinearLayout,
        size: Extent3d,
        data: &[u8],
    ) -> Result<(), EngineError> {
        let desc = &self.surface(dst.surface)?.desc;
        validate_texture_copy(desc, dst, layout, size, data.len() as u64)?;
        tracing::debug!(surface = dst.surface.0, ?layout, ?size, "soft: write_texture");
        self.queue.push_back(Command::WriteTexture {
            dst: *dst,
            layout: *layout,
            size,
            data: data.to_vec(),
        });
        Ok(())
    }

    fn stage_buffer(&mut self, data: &[u8]) -> Result<BufferId, EngineError> {
        Ok(BufferId(self.buffers.insert(SoftBuffer {
            bytes: Arc::new(Mutex::new(data.to_vec())),
        })))
    }

    fn copy_buffer_into_surface(
        &mut self,
        src: BufferId,
        layout: &LinearLayout,
        dst: &SurfaceCopy,
        size: Extent3d,
    ) -> Result<(), EngineError> {
        let bytes = self.buffer(src)?.bytes.clone();
        let len = lock(&bytes).len() as u64;
        let desc = &self.surface(dst.surface)?.desc;
        validate_texture_copy(desc, dst, layout, size, len)?;
        tracing::debug!(
            buffer = src.0,
            surface = dst.surface.0,
            ?layout,
            ?size,
            "soft: copy_buffer_to_texture"
        );
        self.queue.push_back(Command::CopyBufferToTexture {
            src: bytes,
            layout: *layout,
            dst: *dst,
            size,
        });
        Ok(())
    }

    fn copy_surface_into_linear(
        &mut self,
        src: &SurfaceCopy,
        layout: &LinearLayout,
        size: Extent3d,
        buffer_len: u64,
    ) -> Result<BufferId, EngineError> {
        let desc = &self.surface(src.surface)?.desc;
        validate_texture_copy(desc, src, layout, size, buffer_len)?;
        let len = usize::try_from(buffer_len)
            .map_err(|_| EngineError::Validation(format!("buffer length {buffer_len} too large")))?;
        let bytes = Arc::new(Mutex::new(vec![0u8; len]));
        let id = BufferId(self.buffers.insert(SoftBuffer {
            bytes: bytes.clone(),
        }));
        tracing::debug!(
            buffer = id.0,
            surface = src.surface.0,
            ?layout,
            ?size,
            "soft: copy_texture_to_buffer"
        );
        self.queue.push_back(Command::CopyTextureToBuffer {
            src: *src,
            layout: *layout,
            size,
            dst: bytes,
        });
        Ok(id)
    }

    fn request_readback(&mut self, buffer: BufferId) -> Result<ReadbackFuture, EngineError> {
        let bytes = self.buffer(buffer)?.bytes.clone();
        let (sender, receiver) = oneshot_channel();
        self.queue.push_back(Command::MapRead {
            buffer: bytes,
            sender,
        });
        // The "device" completes everything queued so far, including the map request.
        self.flush()?;
        Ok(async move {
            receiver
                .receive()
                .await
                .ok_or(EngineError::MapAsyncDropped)
        }
        .boxed_local())
    }

    fn destroy_buffer(&mut self, buffer: BufferId) -> Result<(), EngineError> {
        self.buffers
            .remove(buffer.0)
            .map(|_| ())
            .ok_or(EngineError::UnknownBuffer(buffer.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::TextureDimension;
    use pretty_assertions::assert_eq;

    fn surface_desc(format: TextureFormat, size: Extent3d) -> SurfaceDesc {
        SurfaceDesc {
            label: Some("soft test".into()),
            size,
            mip_level_count: 1,
            dimension: TextureDimension::D2,
            format,
        }
    }

    fn read(engine: &mut SoftEngine, buffer: BufferId) -> Vec<u8> {
        let fut = engine.request_readback(buffer).unwrap();
        pollster::block_on(fut).unwrap()
    }

    #[test]
    fn tiles_do_not_alias() {
        let level = TiledLevel::new(TextureFormat::R8Unorm, Extent3d::new(20, 11, 2));
        let mut seen = std::collections::HashSet::new();
        for z in 0..2 {
            for y in 0..11 {
                for x in 0..20 {
                    let at = level.block_offset(x, y, z);
                    assert!(at < level.bytes.len());
                    assert!(seen.insert(at), "({x},{y},{z})");
                }
            }
        }
    }

    #[test]
    fn write_then_read_back_region() {
        let mut engine = SoftEngine::new();
        let format = TextureFormat::R8Unorm;
        let surface = engine
            .create_surface(&surface_desc(format, Extent3d::new(4, 4, 1)))
            .unwrap();
        let dst = SurfaceCopy {
            surface,
            mip_level: 0,
            origin: Origin3d::new(1, 1, 0),
        };
        let layout = LinearLayout::new(0, 2, 2);
        let size = Extent3d::new(2, 2, 1);
        engine
            .write_linear_into_surface(&dst, &layout, size, &[7, 9, 11, 13])
            .unwrap();

        let whole = SurfaceCopy {
            origin: Origin3d::ZERO,
            ..dst
        };
        let buffer = engine
            .copy_surface_into_linear(&whole, &LinearLayout::new(0, 4, 4), Extent3d::new(4, 4, 1), 16)
            .unwrap();
        assert_eq!(
            read(&mut engine, buffer),
            vec![0, 0, 0, 0, 0, 7, 9, 0, 0, 11, 13, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn readback_observes_commands_in_submission_order() {
        let mut engine = SoftEngine::new();
        let format = TextureFormat::R8Unorm;
        let surface = engine
            .create_surface(&surface_desc(format, Extent3d::new(2, 1, 1)))
            .unwrap();
        let copy = SurfaceCopy {
            surface,
            mip_level: 0,
            origin: Origin3d::ZERO,
        };
        let layout = LinearLayout::new(0, 2, 1);
        let size = Extent3d::new(2, 1, 1);
        engine.write_linear_into_surface(&copy, &layout, size, &[1, 2]).unwrap();
        let first = engine.copy_surface_into_linear(&copy, &layout, size, 2).unwrap();
        let staged = engine.stage_buffer(&[3, 4]).unwrap();
        engine.copy_buffer_into_surface(staged, &layout, &copy, size).unwrap();
        let second = engine.copy_surface_into_linear(&copy, &layout, size, 2).unwrap();

        assert_eq!(read(&mut engine, first), vec![1, 2]);
        assert_eq!(read(&mut engine, second), vec![3, 4]);
    }

    #[test]
    fn readback_outlives_destroyed_buffer() {
        let mut engine = SoftEngine::new();
        let buffer = engine.stage_buffer(&[5, 6, 7]).unwrap();
        let fut = engine.request_readback(buffer).unwrap();
        engine.destroy_buffer(buffer).unwrap();
        assert_eq!(pollster::block_on(fut), Ok(vec![5, 6, 7]));
        assert_eq!(engine.live_resources(), 0);
    }

    #[test]
    fn rejects_short_source_data() {
        let mut engine = SoftEngine::new();
        let surface = engine
            .create_surface(&surface_desc(TextureFormat::Rgba8Unorm, Extent3d::new(4, 4, 1)))
            .unwrap();
        let dst = SurfaceCopy {
            surface,
            mip_level: 0,
            origin: Origin3d::ZERO,
        };
        let err = engine
            .write_linear_into_surface(
                &dst,
                &LinearLayout::new(4, 16, 4),
                Extent3d::new(4, 4, 1),
                &[0; 4 + 16 * 4 - 1],
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(ref msg) if msg.contains("too small")));
    }

    #[test]
    fn compressed_blocks_move_whole() {
        let mut engine = SoftEngine::new();
        let format = TextureFormat::Bc1RgbaUnorm;
        let surface = engine
            .create_surface(&surface_desc(format, Extent3d::new(8, 8, 1)))
            .unwrap();
        let dst = SurfaceCopy {
            surface,
            mip_level: 0,
            origin: Origin3d::new(4, 4, 0),
        };
        let block: Vec<u8> = (1..=8).collect();
        engine
            .write_linear_into_surface(&dst, &LinearLayout::new(0, 8, 4), Extent3d::new(4, 4, 1), &block)
            .unwrap();
        let whole = SurfaceCopy {
            origin: Origin3d::ZERO,
            ..dst
        };
        let buffer = engine
            .copy_surface_into_linear(&whole, &LinearLayout::new(0, 16, 8), Extent3d::new(8, 8, 1), 32)
            .unwrap();
        let bytes = read(&mut engine, buffer);
        assert_eq!(&bytes[..24], &[0u8; 24][..]);
        assert_eq!(&bytes[24..], &block[..]);
    }
}
