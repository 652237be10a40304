//! Read-back verification of surface contents.
//!
//! Both checks compare block row by block row: bytes between the end of a row and the next
//! `bytes_per_row` boundary are padding with no defined content, so they are never compared.

use serde::Serialize;

use crate::address::{byte_offset_of, BlockCoord};
use crate::backend::{BufferId, SurfaceCopy, SurfaceId, TransferEngine};
use crate::error::RunError;
use crate::format::TextureFormat;
use crate::layout::{
    block_extent, bytes_in_complete_row, Extent3d, LinearLayout, Origin3d, TextureCopyLayout,
};
use crate::run::CheckMethod;

/// Mismatches beyond this count are still recorded but not logged individually.
const MAX_LOGGED_MISMATCHES: usize = 8;

/// One block row whose read-back bytes differ from the expected bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Mismatch {
    /// Surface texel at the start of the row.
    pub texel: Origin3d,
    pub block: BlockCoord,
    /// Offset of the row in the read-back buffer.
    pub row_offset: u64,
    /// Offset of the first differing byte in the read-back buffer.
    pub byte_offset: u64,
    pub expected: u8,
    pub actual: u8,
    pub differing_bytes: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CheckReport {
    pub method: CheckMethod,
    pub rows_compared: u64,
    pub bytes_compared: u64,
    pub mismatches: Vec<Mismatch>,
}

impl CheckReport {
    fn new(method: CheckMethod) -> Self {
        Self {
            method,
            rows_compared: 0,
            bytes_compared: 0,
            mismatches: Vec::new(),
        }
    }

    pub fn passed(&self) -> bool {
        self.mismatches.is_empty()
    }
}

fn slice_at(bytes: &[u8], offset: u64, len: u64) -> Result<&[u8], RunError> {
    let end = offset + len;
    if end > bytes.len() as u64 {
        return Err(RunError::ShortReadback {
            expected: end,
            actual: bytes.len() as u64,
        });
    }
    Ok(&bytes[offset as usize..end as usize])
}

/// Two buffers holding the same region under (possibly) different layouts.
struct RowSource<'a> {
    bytes: &'a [u8],
    layout: &'a LinearLayout,
    /// Surface texel that the buffer's first block corresponds to.
    origin: Origin3d,
}

/// Compares every block row of the `size` region at `region_origin`.
///
/// Rows are visited y-major with the slices of each block row inner, matching the order the
/// shadow update copies them in.
fn compare_rows(
    report: &mut CheckReport,
    format: TextureFormat,
    region_origin: Origin3d,
    size: Extent3d,
    actual: &RowSource<'_>,
    expected: &RowSource<'_>,
) -> Result<(), RunError> {
    let info = format.info();
    let row_bytes = bytes_in_complete_row(size.width, format)?;
    let blocks_high = block_extent(format, size)?.blocks_high;
    if size.is_empty() {
        return Ok(());
    }

    for y in 0..blocks_high {
        for z in 0..size.depth {
            let texel = Origin3d::new(
                region_origin.x,
                region_origin.y + y * info.block_height,
                region_origin.z + z,
            );
            let actual_offset = byte_offset_of(actual.layout, format, texel, actual.origin)?;
            let expected_offset = byte_offset_of(expected.layout, format, texel, expected.origin)?;
            let got = slice_at(actual.bytes, actual_offset, row_bytes)?;
            let want = slice_at(expected.bytes, expected_offset, row_bytes)?;

            report.rows_compared += 1;
            report.bytes_compared += row_bytes;
            if got == want {
                continue;
            }

            let mut differing = got.iter().zip(want).enumerate().filter(|(_, (a, e))| a != e);
            let Some((first, (&a, &e))) = differing.next() else {
                continue;
            };
            let mismatch = Mismatch {
                texel,
                block: BlockCoord::of_texel(format, texel),
                row_offset: actual_offset,
                byte_offset: actual_offset + first as u64,
                expected: e,
                actual: a,
                differing_bytes: 1 + differing.count(),
            };
            if report.mismatches.len() < MAX_LOGGED_MISMATCHES {
                tracing::warn!(
                    method = ?report.method,
                    ?texel,
                    byte_offset = mismatch.byte_offset,
                    expected = e,
                    actual = a,
                    differing_bytes = mismatch.differing_bytes,
                    "read-back mismatch"
                );
            }
            report.mismatches.push(mismatch);
        }
    }
    Ok(())
}

/// Requests a read-back of `buffer`, waits for it, then releases the buffer.
async fn read_back<E: TransferEngine + ?Sized>(
    engine: &mut E,
    buffer: BufferId,
    expected_len: u64,
) -> Result<Vec<u8>, RunError> {
    let pending = match engine.request_readback(buffer) {
        Ok(pending) => pending,
        Err(err) => {
            engine.destroy_buffer(buffer)?;
            return Err(err.into());
        }
    };
    let bytes = pending.await;
    engine.destroy_buffer(buffer)?;
    let bytes = bytes?;
    if (bytes.len() as u64) < expected_len {
        return Err(RunError::ShortReadback {
            expected: expected_len,
            actual: bytes.len() as u64,
        });
    }
    Ok(bytes)
}

/// Copies the region back out with the same layout it was written with and compares each block
/// row against `reference`.
pub async fn partial_check<E: TransferEngine + ?Sized>(
    engine: &mut E,
    format: TextureFormat,
    copy: &SurfaceCopy,
    layout: &LinearLayout,
    size: Extent3d,
    reference: &[u8],
) -> Result<CheckReport, RunError> {
    let len = reference.len() as u64;
    let buffer = engine.copy_surface_into_linear(copy, layout, size, len)?;
    let actual = read_back(engine, buffer, len).await?;

    let mut report = CheckReport::new(CheckMethod::PartialCheck);
    compare_rows(
        &mut report,
        format,
        copy.origin,
        size,
        &RowSource {
            bytes: &actual,
            layout,
            origin: copy.origin,
        },
        &RowSource {
            bytes: reference,
            layout,
            origin: copy.origin,
        },
    )?;
    Ok(report)
}

/// Host-side expected content of one whole subresource.
#[derive(Clone, Debug)]
pub struct ShadowSurface {
    format: TextureFormat,
    surface: SurfaceId,
    mip_level: u32,
    layout: TextureCopyLayout,
    bytes: Vec<u8>,
}

impl ShadowSurface {
    fn whole(&self) -> SurfaceCopy {
        SurfaceCopy {
            surface: self.surface,
            mip_level: self.mip_level,
            origin: Origin3d::ZERO,
        }
    }

    /// Expected content of the whole subresource, in the canonical layout.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Reads the current content of `mip_level` of `surface` using the canonical `layout`.
    pub async fn capture<E: TransferEngine + ?Sized>(
        engine: &mut E,
        format: TextureFormat,
        surface: SurfaceId,
        mip_level: u32,
        layout: TextureCopyLayout,
    ) -> Result<Self, RunError> {
        let mut shadow = Self {
            format,
            surface,
            mip_level,
            layout,
            bytes: Vec::new(),
        };
        let buffer = engine.copy_surface_into_linear(
            &shadow.whole(),
            &layout.as_linear(),
            layout.mip_size,
            layout.byte_length,
        )?;
        shadow.bytes = read_back(engine, buffer, layout.byte_length).await?;
        Ok(shadow)
    }

    /// Applies a region write (as issued to the engine) to the expected content.
    pub fn apply_region(
        &mut self,
        layout: &LinearLayout,
        origin: Origin3d,
        size: Extent3d,
        data: &[u8],
    ) -> Result<(), RunError> {
        let format = self.format;
        let info = format.info();
        let row_bytes = bytes_in_complete_row(size.width, format)?;
        let blocks_high = block_extent(format, size)?.blocks_high;
        if size.is_empty() {
            return Ok(());
        }
        let full = self.layout.as_linear();

        for y in 0..blocks_high {
            for z in 0..size.depth {
                let texel = Origin3d::new(origin.x, origin.y + y * info.block_height, origin.z + z);
                let src = byte_offset_of(layout, format, texel, origin)?;
                let dst = byte_offset_of(&full, format, texel, Origin3d::ZERO)?;
                let row = slice_at(data, src, row_bytes)?;
                let shadow_len = self.bytes.len() as u64;
                if dst + row_bytes > shadow_len {
                    return Err(RunError::ShortReadback {
                        expected: dst + row_bytes,
                        actual: shadow_len,
                    });
                }
                self.bytes[dst as usize..(dst + row_bytes) as usize].copy_from_slice(row);
            }
        }
        Ok(())
    }

    /// Reads the whole subresource back and compares it against the expected content.
    pub async fn full_check<E: TransferEngine + ?Sized>(
        &self,
        engine: &mut E,
    ) -> Result<CheckReport, RunError> {
        let layout = self.layout.as_linear();
        let buffer = engine.copy_surface_into_linear(
            &self.whole(),
            &layout,
            self.layout.mip_size,
            self.layout.byte_length,
        )?;
        let actual = read_back(engine, buffer, self.layout.byte_length).await?;

        let mut report = CheckReport::new(CheckMethod::FullCheck);
        compare_rows(
            &mut report,
            self.format,
            Origin3d::ZERO,
            self.layout.mip_size,
            &RowSource {
                bytes: &actual,
                layout: &layout,
                origin: Origin3d::ZERO,
            },
            &RowSource {
                bytes: &self.bytes,
                layout: &layout,
                origin: Origin3d::ZERO,
            },
        )?;
        Ok(report)
    }
}
