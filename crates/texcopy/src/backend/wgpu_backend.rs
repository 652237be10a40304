use std::sync::Arc;

use futures::FutureExt;
use futures_intrusive::channel::shared::oneshot_channel;

use super::{
    validate_surface_desc, validate_texture_copy, BufferId, CopyLimits, ReadbackFuture,
    ResourceRegistry, SurfaceCopy, SurfaceDesc, SurfaceId, TransferEngine,
};
use crate::error::EngineError;
use crate::format::TextureFormat;
use crate::layout::{Extent3d, LinearLayout, TextureDimension};

struct StoredSurface {
    texture: wgpu::Texture,
    desc: SurfaceDesc,
}

struct StoredBuffer {
    buffer: Arc<wgpu::Buffer>,
    /// Requested length; the wgpu buffer itself is padded to `COPY_BUFFER_ALIGNMENT`.
    len: u64,
}

/// [`TransferEngine`] backed by a headless `wgpu` device.
pub struct WgpuEngine {
    device: wgpu::Device,
    queue: wgpu::Queue,
    backend: wgpu::Backend,
    bc_enabled: bool,
    surfaces: ResourceRegistry<StoredSurface>,
    buffers: ResourceRegistry<StoredBuffer>,
}

fn ensure_xdg_runtime_dir() {
    // GL/WAYLAND stacks refuse to initialize when `XDG_RUNTIME_DIR` is unset or world-readable,
    // which is common in minimal CI containers.
    #[cfg(unix)]
    {
        static ONCE: std::sync::OnceLock<()> = std::sync::OnceLock::new();
        ONCE.get_or_init(|| {
            use std::os::unix::fs::PermissionsExt;

            let needs_runtime_dir = match std::env::var("XDG_RUNTIME_DIR") {
                Ok(dir) if !dir.is_empty() => match std::fs::metadata(&dir) {
                    Ok(meta) => !meta.is_dir() || (meta.permissions().mode() & 0o077) != 0,
                    Err(_) => true,
                },
                _ => true,
            };
            if needs_runtime_dir {
                let dir = std::env::temp_dir()
                    .join(format!("texcopy-xdg-runtime-{}", std::process::id()));
                let _ = std::fs::create_dir_all(&dir);
                let _ = std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700));
                std::env::set_var("XDG_RUNTIME_DIR", &dir);
            }
        });
    }
}

async fn request_adapter(backends: wgpu::Backends) -> Option<wgpu::Adapter> {
    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
        backends,
        ..Default::default()
    });
    // Software adapters are the most predictable in CI; fall back to whatever is available.
    for force_fallback_adapter in [true, false] {
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::LowPower,
                compatible_surface: None,
                force_fallback_adapter,
            })
            .await;
        if adapter.is_some() {
            return adapter;
        }
    }
    None
}

fn map_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::R8Unorm => wgpu::TextureFormat::R8Unorm,
        TextureFormat::R8Uint => wgpu::TextureFormat::R8Uint,
        TextureFormat::Rg8Unorm => wgpu::TextureFormat::Rg8Unorm,
        TextureFormat::R16Float => wgpu::TextureFormat::R16Float,
        TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
        TextureFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
        TextureFormat::R32Float => wgpu::TextureFormat::R32Float,
        TextureFormat::Rg32Float => wgpu::TextureFormat::Rg32Float,
        TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        TextureFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        TextureFormat::Depth24Plus => wgpu::TextureFormat::Depth24Plus,
        TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
        TextureFormat::Bc1RgbaUnorm => wgpu::TextureFormat::Bc1RgbaUnorm,
        TextureFormat::Bc2RgbaUnorm => wgpu::TextureFormat::Bc2RgbaUnorm,
        TextureFormat::Bc3RgbaUnorm => wgpu::TextureFormat::Bc3RgbaUnorm,
        TextureFormat::Bc7RgbaUnorm => wgpu::TextureFormat::Bc7RgbaUnorm,
    }
}

fn map_dimension(dimension: TextureDimension) -> wgpu::TextureDimension {
    match dimension {
        TextureDimension::D1 => wgpu::TextureDimension::D1,
        TextureDimension::D2 => wgpu::TextureDimension::D2,
        TextureDimension::D3 => wgpu::TextureDimension::D3,
    }
}

fn map_extent(size: Extent3d) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: size.width,
        height: size.height,
        depth_or_array_layers: size.depth,
    }
}

/// `LinearLayout::rows_per_image` counts texel rows; wgpu counts block rows.
fn map_layout(layout: &LinearLayout, format: TextureFormat) -> wgpu::ImageDataLayout {
    wgpu::ImageDataLayout {
        offset: layout.offset,
        bytes_per_row: Some(layout.bytes_per_row),
        rows_per_image: Some(layout.rows_per_image / format.info().block_height),
    }
}

/// The GL backend accepts BC uploads but reads them back as zeros.
fn round_trips_format(backend: wgpu::Backend, bc_enabled: bool, format: TextureFormat) -> bool {
    !format.info().compressed || (bc_enabled && backend != wgpu::Backend::Gl)
}

/// The GL backend reads every slice of a 3D texture back as zeros.
fn round_trips_dimension(backend: wgpu::Backend, dimension: TextureDimension) -> bool {
    backend != wgpu::Backend::Gl || dimension != TextureDimension::D3
}

fn padded_len(len: u64) -> u64 {
    let align = wgpu::COPY_BUFFER_ALIGNMENT;
    len.div_ceil(align).max(1) * align
}

impl WgpuEngine {
    /// Creates an engine on a headless device.
    ///
    /// On Linux the GL backend is tried first to avoid crashes seen with some Vulkan software
    /// adapters (lavapipe/llvmpipe); the primary backends are used if no GL adapter exists.
    pub async fn new_headless() -> Result<Self, EngineError> {
        ensure_xdg_runtime_dir();

        let adapter = if cfg!(target_os = "linux") {
            match request_adapter(wgpu::Backends::GL).await {
                Some(adapter) => Some(adapter),
                None => request_adapter(wgpu::Backends::PRIMARY).await,
            }
        } else {
            request_adapter(wgpu::Backends::PRIMARY).await
        }
        .ok_or(EngineError::AdapterNotFound)?;

        let bc_enabled = adapter
            .features()
            .contains(wgpu::Features::TEXTURE_COMPRESSION_BC);
        let required_features = if bc_enabled {
            wgpu::Features::TEXTURE_COMPRESSION_BC
        } else {
            wgpu::Features::empty()
        };

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("texcopy device"),
                    required_features,
                    required_limits: wgpu::Limits::downlevel_defaults(),
                },
                None,
            )
            .await
            .map_err(|e| EngineError::RequestDevice(format!("{e:?}")))?;

        let info = adapter.get_info();
        tracing::info!(
            adapter = %info.name,
            backend = ?info.backend,
            bc_enabled,
            "wgpu: device ready"
        );

        Ok(Self {
            device,
            queue,
            backend: info.backend,
            bc_enabled,
            surfaces: ResourceRegistry::default(),
            buffers: ResourceRegistry::default(),
        })
    }

    /// Runs `f` inside a validation error scope and converts a captured error into
    /// [`EngineError::Validation`].
    fn scoped<T>(&self, what: &str, f: impl FnOnce(&Self) -> T) -> Result<T, EngineError> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let out = f(self);
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(err) => Err(EngineError::Validation(format!("{what}: {err}"))),
            None => Ok(out),
        }
    }

    fn surface(&self, id: SurfaceId) -> Result<&StoredSurface, EngineError> {
        self.surfaces
            .get(id.0)
            .ok_or(EngineError::UnknownSurface(id.0))
    }

    fn buffer(&self, id: BufferId) -> Result<&StoredBuffer, EngineError> {
        self.buffers.get(id.0).ok_or(EngineError::UnknownBuffer(id.0))
    }

    fn image_copy_texture<'a>(
        stored: &'a StoredSurface,
        copy: &SurfaceCopy,
    ) -> wgpu::ImageCopyTexture<'a> {
        wgpu::ImageCopyTexture {
            texture: &stored.texture,
            mip_level: copy.mip_level,
            origin: wgpu::Origin3d {
                x: copy.origin.x,
                y: copy.origin.y,
                z: copy.origin.z,
            },
            aspect: wgpu::TextureAspect::All,
        }
    }
}

impl TransferEngine for WgpuEngine {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn limits(&self) -> CopyLimits {
        CopyLimits {
            bytes_per_row_alignment: wgpu::COPY_BYTES_PER_ROW_ALIGNMENT,
            block_aligned_buffer_offset: true,
        }
    }

    fn supports_format(&self, format: TextureFormat) -> bool {
        round_trips_format(self.backend, self.bc_enabled, format)
    }

    fn supports_dimension(&self, dimension: TextureDimension) -> bool {
        round_trips_dimension(self.backend, dimension)
    }

    fn create_surface(&mut self, desc: &SurfaceDesc) -> Result<SurfaceId, EngineError> {
        if !self.supports_format(desc.format) {
            return Err(EngineError::UnsupportedFormat(desc.format));
        }
        if !self.supports_dimension(desc.dimension) {
            return Err(EngineError::UnsupportedDimension(desc.dimension));
        }
        validate_surface_desc(desc)?;
        let texture = self.scoped("create_texture", |this| {
            this.device.create_texture(&wgpu::TextureDescriptor {
                label: desc.label.as_deref(),
                size: map_extent(desc.size),
                mip_level_count: desc.mip_level_count,
                sample_count: 1,
                dimension: map_dimension(desc.dimension),
                format: map_format(desc.format),
                usage: wgpu::TextureUsages::COPY_SRC | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            })
        })?;
        let id = SurfaceId(self.surfaces.insert(StoredSurface {
            texture,
            desc: desc.clone(),
        }));
        tracing::debug!(surface = id.0, ?desc, "wgpu: create surface");
        Ok(id)
    }

    fn destroy_surface(&mut self, surface: SurfaceId) -> Result<(), EngineError> {
        let stored = self
            .surfaces
            .remove(surface.0)
            .ok_or(EngineError::UnknownSurface(surface.0))?;
        stored.texture.destroy();
        Ok(())
    }

    fn write_linear_into_surface(
        &mut self,
        dst: &SurfaceCopy,
        layout: &LinearLayout,
        size: Extent3d,
        data: &[u8],
    ) -> Result<(), EngineError> {
        let stored = self.surface(dst.surface)?;
        validate_texture_copy(&stored.desc, dst, layout, size, data.len() as u64)?;
        // Empty copies touch nothing; skip them rather than depend on backend handling of
        // zero-sized extents.
        if size.is_empty() {
            return Ok(());
        }
        self.scoped("write_texture", |this| {
            this.queue.write_texture(
                Self::image_copy_texture(stored, dst),
                data,
                map_layout(layout, stored.desc.format),
                map_extent(size),
            );
        })
    }

    fn stage_buffer(&mut self, data: &[u8]) -> Result<BufferId, EngineError> {
        let len = data.len() as u64;
        let buffer = self.scoped("create staging buffer", |this| {
            let buffer = this.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("texcopy staging buffer"),
                size: padded_len(len),
                usage: wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: true,
            });
            buffer.slice(..).get_mapped_range_mut()[..data.len()].copy_from_slice(data);
            buffer.unmap();
            buffer
        })?;
        Ok(BufferId(self.buffers.insert(StoredBuffer {
            buffer: Arc::new(buffer),
            len,
        })))
    }

    fn copy_buffer_into_surface(
        &mut self,
        src: BufferId,
        layout: &LinearLayout,
        dst: &SurfaceCopy,
        size: Extent3d,
    ) -> Result<(), EngineError> {
        let staged = self.buffer(src)?;
        let stored = self.surface(dst.surface)?;
        validate_texture_copy(&stored.desc, dst, layout, size, staged.len)?;
        if size.is_empty() {
            return Ok(());
        }
        self.scoped("copy_buffer_to_texture", |this| {
            let mut encoder = this
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("texcopy copy_buffer_to_texture"),
                });
            encoder.copy_buffer_to_texture(
                wgpu::ImageCopyBuffer {
                    buffer: &staged.buffer,
                    layout: map_layout(layout, stored.desc.format),
                },
                Self::image_copy_texture(stored, dst),
                map_extent(size),
            );
            this.queue.submit([encoder.finish()]);
        })
    }

    fn copy_surface_into_linear(
        &mut self,
        src: &SurfaceCopy,
        layout: &LinearLayout,
        size: Extent3d,
        buffer_len: u64,
    ) -> Result<BufferId, EngineError> {
        let stored = self.surface(src.surface)?;
        validate_texture_copy(&stored.desc, src, layout, size, buffer_len)?;
        let buffer = self.scoped("copy_texture_to_buffer", |this| {
            let buffer = this.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("texcopy readback buffer"),
                size: padded_len(buffer_len),
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            if !size.is_empty() {
                let mut encoder =
                    this.device
                        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                            label: Some("texcopy copy_texture_to_buffer"),
                        });
                encoder.copy_texture_to_buffer(
                    Self::image_copy_texture(stored, src),
                    wgpu::ImageCopyBuffer {
                        buffer: &buffer,
                        layout: map_layout(layout, stored.desc.format),
                    },
                    map_extent(size),
                );
                this.queue.submit([encoder.finish()]);
            }
            buffer
        })?;
        Ok(BufferId(self.buffers.insert(StoredBuffer {
            buffer: Arc::new(buffer),
            len: buffer_len,
        })))
    }

    fn request_readback(&mut self, buffer: BufferId) -> Result<ReadbackFuture, EngineError> {
        let stored = self.buffer(buffer)?;
        let gpu = stored.buffer.clone();
        let len = usize::try_from(stored.len)
            .map_err(|_| EngineError::Validation(format!("buffer length {} too large", stored.len)))?;

        let (sender, receiver) = oneshot_channel();
        gpu.slice(..).map_async(wgpu::MapMode::Read, move |res| {
            sender.send(res).ok();
        });

        #[cfg(not(target_arch = "wasm32"))]
        self.device.poll(wgpu::Maintain::Wait);
        #[cfg(target_arch = "wasm32")]
        self.device.poll(wgpu::Maintain::Poll);

        Ok(async move {
            receiver
                .receive()
                .await
                .ok_or(EngineError::MapAsyncDropped)?
                .map_err(|err| EngineError::MapAsync(format!("{err:?}")))?;

            let slice = gpu.slice(..);
            let mapped = slice.get_mapped_range();
            let out = mapped[..len].to_vec();
            drop(mapped);
            gpu.unmap();
            Ok(out)
        }
        .boxed_local())
    }

    fn destroy_buffer(&mut self, buffer: BufferId) -> Result<(), EngineError> {
        // Dropping our handle is enough: a pending read-back holds its own reference.
        self.buffers
            .remove(buffer.0)
            .map(|_| ())
            .ok_or(EngineError::UnknownBuffer(buffer.0))
    }
}
