//! Block geometry for the texture formats exercised by the copy tests.
//!
//! Uncompressed formats are modelled as 1x1 blocks so that every layout computation treats them
//! exactly like the block-compressed ones.

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::run::{CheckMethod, InitMethod};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    R8Unorm,
    R8Uint,
    Rg8Unorm,
    R16Float,
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    R32Float,
    Rg32Float,
    Rgba16Float,
    Rgba32Float,
    Depth24Plus,
    Depth32Float,
    Bc1RgbaUnorm,
    Bc2RgbaUnorm,
    Bc3RgbaUnorm,
    Bc7RgbaUnorm,
}

/// Read-only per-format geometry and copy capabilities.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FormatInfo {
    pub block_width: u32,
    pub block_height: u32,
    pub bytes_per_block: u32,
    /// Usable as the source of a surface -> buffer copy.
    pub copy_src: bool,
    /// Usable as the destination of a buffer/data -> surface copy.
    pub copy_dst: bool,
    pub compressed: bool,
}

impl FormatInfo {
    const fn uncompressed(bytes_per_texel: u32) -> Self {
        Self {
            block_width: 1,
            block_height: 1,
            bytes_per_block: bytes_per_texel,
            copy_src: true,
            copy_dst: true,
            compressed: false,
        }
    }

    const fn bc(bytes_per_block: u32) -> Self {
        Self {
            block_width: 4,
            block_height: 4,
            bytes_per_block,
            copy_src: true,
            copy_dst: true,
            compressed: true,
        }
    }

    /// Capability predicate used to filter cases before they are constructed.
    ///
    /// Every init method writes into the surface and every check method reads the surface back,
    /// so a format needs both directions regardless of the chosen pair.
    pub fn supports(&self, _init: InitMethod, _check: CheckMethod) -> bool {
        self.copy_dst && self.copy_src
    }
}

impl TextureFormat {
    pub const ALL: [TextureFormat; 17] = [
        TextureFormat::R8Unorm,
        TextureFormat::R8Uint,
        TextureFormat::Rg8Unorm,
        TextureFormat::R16Float,
        TextureFormat::Rgba8Unorm,
        TextureFormat::Rgba8UnormSrgb,
        TextureFormat::Bgra8Unorm,
        TextureFormat::R32Float,
        TextureFormat::Rg32Float,
        TextureFormat::Rgba16Float,
        TextureFormat::Rgba32Float,
        TextureFormat::Depth24Plus,
        TextureFormat::Depth32Float,
        TextureFormat::Bc1RgbaUnorm,
        TextureFormat::Bc2RgbaUnorm,
        TextureFormat::Bc3RgbaUnorm,
        TextureFormat::Bc7RgbaUnorm,
    ];

    pub fn info(self) -> FormatInfo {
        match self {
            TextureFormat::R8Unorm | TextureFormat::R8Uint => FormatInfo::uncompressed(1),
            TextureFormat::Rg8Unorm | TextureFormat::R16Float => FormatInfo::uncompressed(2),
            TextureFormat::Rgba8Unorm
            | TextureFormat::Rgba8UnormSrgb
            | TextureFormat::Bgra8Unorm
            | TextureFormat::R32Float => FormatInfo::uncompressed(4),
            TextureFormat::Rg32Float | TextureFormat::Rgba16Float => FormatInfo::uncompressed(8),
            TextureFormat::Rgba32Float => FormatInfo::uncompressed(16),
            // Depth24Plus has no defined byte representation, so it can't be copied at all.
            TextureFormat::Depth24Plus => FormatInfo {
                copy_src: false,
                copy_dst: false,
                ..FormatInfo::uncompressed(4)
            },
            TextureFormat::Depth32Float => FormatInfo {
                copy_dst: false,
                ..FormatInfo::uncompressed(4)
            },
            TextureFormat::Bc1RgbaUnorm => FormatInfo::bc(8),
            TextureFormat::Bc2RgbaUnorm
            | TextureFormat::Bc3RgbaUnorm
            | TextureFormat::Bc7RgbaUnorm => FormatInfo::bc(16),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TextureFormat::R8Unorm => "r8unorm",
            TextureFormat::R8Uint => "r8uint",
            TextureFormat::Rg8Unorm => "rg8unorm",
            TextureFormat::R16Float => "r16float",
            TextureFormat::Rgba8Unorm => "rgba8unorm",
            TextureFormat::Rgba8UnormSrgb => "rgba8unorm-srgb",
            TextureFormat::Bgra8Unorm => "bgra8unorm",
            TextureFormat::R32Float => "r32float",
            TextureFormat::Rg32Float => "rg32float",
            TextureFormat::Rgba16Float => "rgba16float",
            TextureFormat::Rgba32Float => "rgba32float",
            TextureFormat::Depth24Plus => "depth24plus",
            TextureFormat::Depth32Float => "depth32float",
            TextureFormat::Bc1RgbaUnorm => "bc1-rgba-unorm",
            TextureFormat::Bc2RgbaUnorm => "bc2-rgba-unorm",
            TextureFormat::Bc3RgbaUnorm => "bc3-rgba-unorm",
            TextureFormat::Bc7RgbaUnorm => "bc7-rgba-unorm",
        }
    }
}

impl fmt::Display for TextureFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown texture format {0:?}")]
pub struct UnknownFormat(pub String);

impl FromStr for TextureFormat {
    type Err = UnknownFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        Self::ALL
            .into_iter()
            .find(|format| format.name().eq_ignore_ascii_case(needle))
            .ok_or_else(|| UnknownFormat(s.to_string()))
    }
}

impl Serialize for TextureFormat {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_geometry_is_positive_for_every_format() {
        for format in TextureFormat::ALL {
            let info = format.info();
            assert!(info.block_width > 0, "{format}");
            assert!(info.block_height > 0, "{format}");
            assert!(info.bytes_per_block > 0, "{format}");
            assert_eq!(info.compressed, info.block_width > 1, "{format}");
        }
    }

    #[test]
    fn names_round_trip_through_from_str() {
        for format in TextureFormat::ALL {
            assert_eq!(format.name().parse::<TextureFormat>(), Ok(format));
        }
        assert_eq!("RGBA8Unorm".parse::<TextureFormat>(), Ok(TextureFormat::Rgba8Unorm));
        assert!("rgb9e5ufloat".parse::<TextureFormat>().is_err());
    }

    #[test]
    fn depth_formats_are_not_copyable_both_ways() {
        for init in InitMethod::ALL {
            for check in CheckMethod::ALL {
                assert!(!TextureFormat::Depth24Plus.info().supports(init, check));
                assert!(TextureFormat::Bc1RgbaUnorm.info().supports(init, check));
            }
        }
        assert!(!TextureFormat::Depth32Float
            .info()
            .supports(InitMethod::DirectWrite, CheckMethod::PartialCheck));
    }

    #[test]
    fn bc_block_sizes() {
        assert_eq!(TextureFormat::Bc1RgbaUnorm.info().bytes_per_block, 8);
        assert_eq!(TextureFormat::Bc7RgbaUnorm.info().bytes_per_block, 16);
        assert_eq!(TextureFormat::Bc3RgbaUnorm.info().block_height, 4);
    }
}
