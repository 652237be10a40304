//! Maps a block position inside a copy region to its byte offset in a linear layout.
//!
//! The same resolver serves the partial-copy buffer (caller layout, region origin) and the
//! whole-subresource shadow buffer (canonical layout, zero origin); only the `layout`/`origin`
//! arguments differ between the two uses.

use serde::Serialize;

use crate::error::LayoutError;
use crate::format::TextureFormat;
use crate::layout::{add, bytes_per_image, check_aligned, mul, LinearLayout, Origin3d};

/// Block coordinate of a texel (x/y divided by the block size, z unchanged).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct BlockCoord {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl BlockCoord {
    pub fn of_texel(format: TextureFormat, texel: Origin3d) -> Self {
        let info = format.info();
        Self {
            x: texel.x / info.block_width,
            y: texel.y / info.block_height,
            z: texel.z,
        }
    }
}

fn relative(axis: &'static str, texel: u32, origin: u32) -> Result<u32, LayoutError> {
    texel
        .checked_sub(origin)
        .ok_or(LayoutError::TexelBeforeOrigin {
            axis,
            texel,
            origin,
        })
}

/// Byte offset of the block starting at `texel` in a buffer laid out as `layout`, where the
/// buffer's first block corresponds to `origin`.
///
/// `texel` must not precede `origin` on any axis and its distance from `origin` must be whole
/// blocks on x and y.
pub fn byte_offset_of(
    layout: &LinearLayout,
    format: TextureFormat,
    texel: Origin3d,
    origin: Origin3d,
) -> Result<u64, LayoutError> {
    let info = format.info();
    let dx = relative("x", texel.x, origin.x)?;
    let dy = relative("y", texel.y, origin.y)?;
    let dz = relative("z", texel.z, origin.z)?;
    check_aligned(format, "texel x - origin x", dx.into(), info.block_width)?;
    check_aligned(format, "texel y - origin y", dy.into(), info.block_height)?;

    let image = mul(u64::from(dz), bytes_per_image(layout, format)?)?;
    let row = mul(
        u64::from(dy / info.block_height),
        u64::from(layout.bytes_per_row),
    )?;
    let column = mul(
        u64::from(dx / info.block_width),
        u64::from(info.bytes_per_block),
    )?;
    add(add(add(layout.offset, image)?, row)?, column)
}
