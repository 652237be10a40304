//! Linear-layout math: canonical full-subresource layouts and minimum buffer sizes.

use serde::Serialize;

use crate::error::LayoutError;
use crate::format::TextureFormat;

/// Size of a copy region or surface, in texels (`depth` is layers for 2D arrays).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub struct Extent3d {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl Extent3d {
    pub const fn new(width: u32, height: u32, depth: u32) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.depth == 0
    }
}

/// First texel of a region within a surface subresource.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub struct Origin3d {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl Origin3d {
    pub const ZERO: Self = Self { x: 0, y: 0, z: 0 };

    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TextureDimension {
    D1,
    #[default]
    D2,
    D3,
}

/// How a flat byte buffer encodes the rows and images of a region.
///
/// `rows_per_image` counts texel rows and must be a multiple of the format's block height; the
/// image stride is `(rows_per_image / block_height) * bytes_per_row`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub struct LinearLayout {
    pub offset: u64,
    pub bytes_per_row: u32,
    pub rows_per_image: u32,
}

/// Region size expressed in whole blocks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockExtent {
    pub blocks_wide: u32,
    pub blocks_high: u32,
    pub depth: u32,
}

/// Canonical layout holding an entire mip level, computed once per subresource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct TextureCopyLayout {
    pub bytes_per_row: u32,
    pub rows_per_image: u32,
    pub byte_length: u64,
    /// Block-aligned size of the mip level; this is the extent of a whole-subresource copy.
    pub mip_size: Extent3d,
}

impl TextureCopyLayout {
    pub fn as_linear(&self) -> LinearLayout {
        LinearLayout {
            offset: 0,
            bytes_per_row: self.bytes_per_row,
            rows_per_image: self.rows_per_image,
        }
    }
}

pub(crate) fn check_aligned(
    format: TextureFormat,
    axis: &'static str,
    value: u64,
    block: u32,
) -> Result<(), LayoutError> {
    if value % u64::from(block) != 0 {
        return Err(LayoutError::NotBlockAligned {
            format,
            axis,
            value,
            block,
        });
    }
    Ok(())
}

pub(crate) fn mul(a: u64, b: u64) -> Result<u64, LayoutError> {
    a.checked_mul(b).ok_or(LayoutError::Overflow)
}

pub(crate) fn add(a: u64, b: u64) -> Result<u64, LayoutError> {
    a.checked_add(b).ok_or(LayoutError::Overflow)
}

/// Divides a texel extent into blocks. Width and height must be exact block multiples.
pub fn block_extent(format: TextureFormat, extent: Extent3d) -> Result<BlockExtent, LayoutError> {
    let info = format.info();
    check_aligned(format, "width", extent.width.into(), info.block_width)?;
    check_aligned(format, "height", extent.height.into(), info.block_height)?;
    Ok(BlockExtent {
        blocks_wide: extent.width / info.block_width,
        blocks_high: extent.height / info.block_height,
        depth: extent.depth,
    })
}

/// Number of meaningful bytes in one block row of a region `width` texels wide.
pub fn bytes_in_complete_row(width: u32, format: TextureFormat) -> Result<u64, LayoutError> {
    let info = format.info();
    check_aligned(format, "width", width.into(), info.block_width)?;
    mul(
        u64::from(width / info.block_width),
        u64::from(info.bytes_per_block),
    )
}

/// Image stride of `layout` in bytes.
pub fn bytes_per_image(layout: &LinearLayout, format: TextureFormat) -> Result<u64, LayoutError> {
    let info = format.info();
    check_aligned(
        format,
        "rows_per_image",
        layout.rows_per_image.into(),
        info.block_height,
    )?;
    mul(
        u64::from(layout.rows_per_image / info.block_height),
        u64::from(layout.bytes_per_row),
    )
}

fn mip_dim(base: u32, mip_level: u32) -> u32 {
    base.checked_shr(mip_level).unwrap_or(0).max(1)
}

/// Texel size of `mip_level`, before block alignment.
pub fn mip_size(dimension: TextureDimension, base: Extent3d, mip_level: u32) -> Extent3d {
    Extent3d {
        width: mip_dim(base.width, mip_level),
        height: mip_dim(base.height, mip_level),
        depth: match dimension {
            TextureDimension::D1 | TextureDimension::D2 => base.depth,
            TextureDimension::D3 => mip_dim(base.depth, mip_level),
        },
    }
}

/// Mip size rounded up to whole blocks (at least one block in each direction).
pub fn physical_mip_size(
    format: TextureFormat,
    dimension: TextureDimension,
    base: Extent3d,
    mip_level: u32,
) -> Extent3d {
    let info = format.info();
    let size = mip_size(dimension, base, mip_level);
    Extent3d {
        width: size.width.div_ceil(info.block_width) * info.block_width,
        height: size.height.div_ceil(info.block_height) * info.block_height,
        depth: size.depth,
    }
}

/// Maximum mip chain length for a surface of the given base size. 1D surfaces have no mips.
pub fn max_mip_level_count(dimension: TextureDimension, base: Extent3d) -> u32 {
    let max_dim = match dimension {
        TextureDimension::D1 => return 1,
        TextureDimension::D2 => base.width.max(base.height),
        TextureDimension::D3 => base.width.max(base.height).max(base.depth),
    };
    32u32.saturating_sub(max_dim.leading_zeros()).max(1)
}

pub(crate) fn check_base_size(
    format: TextureFormat,
    dimension: TextureDimension,
    base_size: Extent3d,
) -> Result<(), LayoutError> {
    let info = format.info();
    check_aligned(format, "base width", base_size.width.into(), info.block_width)?;
    check_aligned(format, "base height", base_size.height.into(), info.block_height)?;
    if dimension == TextureDimension::D1 && (base_size.height != 1 || base_size.depth != 1) {
        return Err(LayoutError::InvalidDimension {
            height: base_size.height,
            depth: base_size.depth,
        });
    }
    Ok(())
}

/// Canonical layout for an entire mip level.
///
/// `bytes_per_row` is the tight block-row size rounded up to `bytes_per_row_alignment` (pass 1 for
/// the unpadded form), and `rows_per_image` is the block-aligned mip height.
pub fn compute_full_layout(
    format: TextureFormat,
    dimension: TextureDimension,
    base_size: Extent3d,
    mip_level: u32,
    bytes_per_row_alignment: u32,
) -> Result<TextureCopyLayout, LayoutError> {
    debug_assert!(bytes_per_row_alignment > 0);
    check_base_size(format, dimension, base_size)?;

    let info = format.info();
    let mip_size = physical_mip_size(format, dimension, base_size, mip_level);
    let tight_row = bytes_in_complete_row(mip_size.width, format)?;
    let alignment = u64::from(bytes_per_row_alignment);
    let bytes_per_row = u32::try_from(mul(tight_row.div_ceil(alignment), alignment)?)
        .map_err(|_| LayoutError::Overflow)?;
    let rows_per_image = mip_size.height;
    let block_rows = u64::from(rows_per_image / info.block_height);
    let byte_length = mul(
        mul(u64::from(bytes_per_row), block_rows)?,
        u64::from(mip_size.depth),
    )?;

    Ok(TextureCopyLayout {
        bytes_per_row,
        rows_per_image,
        byte_length,
        mip_size,
    })
}

/// Minimum number of bytes (excluding `layout.offset`) needed to stage `copy_extent` under
/// `layout`.
///
/// Only the rows actually copied in the last image are counted: the final image is never
/// assumed to be padded out to `rows_per_image`. Empty copies need no bytes at all.
pub fn required_bytes(
    layout: &LinearLayout,
    format: TextureFormat,
    copy_extent: Extent3d,
) -> Result<u64, LayoutError> {
    let info = format.info();
    check_aligned(
        format,
        "rows_per_image",
        layout.rows_per_image.into(),
        info.block_height,
    )?;
    let blocks = block_extent(format, copy_extent)?;
    if copy_extent.is_empty() {
        return Ok(0);
    }

    let bytes_per_row = u64::from(layout.bytes_per_row);
    let image_stride = bytes_per_image(layout, format)?;
    let bytes_in_last_slice = add(
        mul(bytes_per_row, u64::from(blocks.blocks_high - 1))?,
        mul(
            u64::from(blocks.blocks_wide),
            u64::from(info.bytes_per_block),
        )?,
    )?;
    add(
        mul(image_stride, u64::from(copy_extent.depth - 1))?,
        bytes_in_last_slice,
    )
}

/// Length of a reference buffer for a copy: the leading `offset` bytes plus [`required_bytes`].
pub fn required_data_len(
    layout: &LinearLayout,
    format: TextureFormat,
    copy_extent: Extent3d,
) -> Result<u64, LayoutError> {
    add(layout.offset, required_bytes(layout, format, copy_extent)?)
}

impl LinearLayout {
    pub const fn new(offset: u64, bytes_per_row: u32, rows_per_image: u32) -> Self {
        Self {
            offset,
            bytes_per_row,
            rows_per_image,
        }
    }

    /// Checks that this layout can describe a copy of `copy_extent`.
    pub fn validate(&self, format: TextureFormat, copy_extent: Extent3d) -> Result<(), LayoutError> {
        let info = format.info();
        check_aligned(
            format,
            "rows_per_image",
            self.rows_per_image.into(),
            info.block_height,
        )?;
        let blocks = block_extent(format, copy_extent)?;
        let row_bytes = bytes_in_complete_row(copy_extent.width, format)?;

        let multi_row = blocks.blocks_high > 1 || copy_extent.depth > 1;
        if multi_row {
            if self.bytes_per_row == 0 {
                return Err(LayoutError::ZeroBytesPerRow);
            }
            if u64::from(self.bytes_per_row) < row_bytes {
                return Err(LayoutError::BytesPerRowTooSmall {
                    bytes_per_row: self.bytes_per_row,
                    row_bytes,
                });
            }
        }
        if copy_extent.depth > 1 && self.rows_per_image < copy_extent.height {
            return Err(LayoutError::RowsPerImageTooSmall {
                rows_per_image: self.rows_per_image,
                height: copy_extent.height,
            });
        }
        Ok(())
    }
}
