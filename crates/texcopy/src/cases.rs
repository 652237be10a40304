//! Parameter suites: the copy cases the runner enumerates.
//!
//! Every suite crosses each copy geometry with all init and check methods. Cases an engine
//! cannot execute are skipped through [`RunCase::is_supported_by`] rather than failed.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::backend::TransferEngine;
use crate::error::LayoutError;
use crate::format::TextureFormat;
use crate::layout::{compute_full_layout, Extent3d, LinearLayout, Origin3d, TextureDimension};
use crate::run::{CheckMethod, InitMethod, RunCase};

/// Row alignment used by layouts that should also be runnable on the GPU engine.
const GPU_ROW_ALIGNMENT: u32 = 256;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Suite {
    CopyWholeTexture,
    CopyRegionWithOrigin,
    CopyWithPadding,
    CopyMipLevels,
    CopyEmptyExtent,
    AllFormats,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown suite {0:?}")]
pub struct UnknownSuite(pub String);

/// Copy geometry shared by the cases of one suite entry; methods are filled in per case.
#[derive(Clone, Copy)]
struct Geometry {
    format: TextureFormat,
    dimension: TextureDimension,
    base_size: Extent3d,
    mip_level: u32,
    origin: Origin3d,
    copy_extent: Extent3d,
    layout: LinearLayout,
}

impl Geometry {
    fn d2(format: TextureFormat, base_size: Extent3d) -> Self {
        Self {
            format,
            dimension: TextureDimension::D2,
            base_size,
            mip_level: 0,
            origin: Origin3d::ZERO,
            copy_extent: base_size,
            layout: LinearLayout::new(0, GPU_ROW_ALIGNMENT, base_size.height),
        }
    }

    fn region(self, origin: Origin3d, copy_extent: Extent3d, layout: LinearLayout) -> Self {
        Self {
            origin,
            copy_extent,
            layout,
            ..self
        }
    }
}

fn with_every_method(geometries: impl IntoIterator<Item = Geometry>) -> Vec<RunCase> {
    let mut cases = Vec::new();
    for g in geometries {
        for init in InitMethod::ALL {
            for check in CheckMethod::ALL {
                cases.push(RunCase {
                    format: g.format,
                    dimension: g.dimension,
                    base_size: g.base_size,
                    mip_level: g.mip_level,
                    origin: g.origin,
                    copy_extent: g.copy_extent,
                    layout: g.layout,
                    init,
                    check,
                });
            }
        }
    }
    cases
}

fn copy_whole_texture() -> Vec<Geometry> {
    let mut out = Vec::new();
    for width in [1, 15, 16] {
        for height in [1, 7, 8] {
            for depth in [1, 3, 4] {
                out.push(Geometry::d2(
                    TextureFormat::Rgba8Unorm,
                    Extent3d::new(width, height, depth),
                ));
            }
        }
    }
    out
}

fn copy_region_with_origin() -> Vec<Geometry> {
    let rgba = Geometry::d2(TextureFormat::Rgba8Unorm, Extent3d::new(16, 16, 4));
    let bc1 = Geometry::d2(TextureFormat::Bc1RgbaUnorm, Extent3d::new(32, 32, 2));
    let bc7 = Geometry::d2(TextureFormat::Bc7RgbaUnorm, Extent3d::new(32, 32, 1));
    let line = Geometry {
        dimension: TextureDimension::D1,
        ..Geometry::d2(TextureFormat::R8Unorm, Extent3d::new(64, 1, 1))
    };
    let volume = Geometry {
        dimension: TextureDimension::D3,
        mip_level: 1,
        ..Geometry::d2(TextureFormat::Rgba8Unorm, Extent3d::new(16, 16, 8))
    };
    vec![
        rgba.region(
            Origin3d::new(3, 5, 1),
            Extent3d::new(7, 6, 2),
            LinearLayout::new(0, 256, 8),
        ),
        // Region touching the far corner of the surface.
        rgba.region(
            Origin3d::new(9, 10, 2),
            Extent3d::new(7, 6, 2),
            LinearLayout::new(0, 256, 6),
        ),
        line.region(
            Origin3d::new(17, 0, 0),
            Extent3d::new(30, 1, 1),
            LinearLayout::new(0, 256, 1),
        ),
        volume.region(
            Origin3d::new(2, 2, 1),
            Extent3d::new(4, 4, 2),
            LinearLayout::new(0, 256, 4),
        ),
        bc1.region(
            Origin3d::new(4, 8, 1),
            Extent3d::new(8, 12, 1),
            LinearLayout::new(0, 256, 12),
        ),
        bc7.region(
            Origin3d::new(16, 4, 0),
            Extent3d::new(16, 28, 1),
            LinearLayout::new(0, 256, 28),
        ),
    ]
}

fn copy_with_padding() -> Vec<Geometry> {
    let rgba = Geometry::d2(TextureFormat::Rgba8Unorm, Extent3d::new(32, 16, 3));
    let origin = Origin3d::new(2, 3, 0);
    let extent = Extent3d::new(13, 5, 2);
    let bc3 = Geometry::d2(TextureFormat::Bc3RgbaUnorm, Extent3d::new(32, 32, 1));
    let bc_origin = Origin3d::new(8, 4, 0);
    let bc_extent = Extent3d::new(12, 8, 1);

    let mut out: Vec<Geometry> = [
        // Tight rows: only valid where rows need no alignment.
        LinearLayout::new(0, 13 * 4, 5),
        LinearLayout::new(3, 13 * 4, 5),
        LinearLayout::new(0, 256, 5),
        LinearLayout::new(0, 512, 5),
        LinearLayout::new(0, 256, 9),
        LinearLayout::new(4, 256, 5),
        LinearLayout::new(516, 256, 8),
    ]
    .into_iter()
    .map(|layout| rgba.region(origin, extent, layout))
    .collect();
    out.push(bc3.region(bc_origin, bc_extent, LinearLayout::new(0, 3 * 16, 8)));
    out.push(bc3.region(bc_origin, bc_extent, LinearLayout::new(16, 256, 12)));
    out
}

fn copy_mip_levels() -> Result<Vec<Geometry>, LayoutError> {
    let chains = [
        (TextureFormat::Rgba8Unorm, TextureDimension::D2, Extent3d::new(37, 23, 3), 4),
        (TextureFormat::Bc7RgbaUnorm, TextureDimension::D2, Extent3d::new(64, 32, 1), 5),
        (TextureFormat::Rgba8Unorm, TextureDimension::D3, Extent3d::new(16, 16, 8), 4),
    ];
    let mut out = Vec::new();
    for (format, dimension, base_size, levels) in chains {
        for mip_level in 0..levels {
            let full =
                compute_full_layout(format, dimension, base_size, mip_level, GPU_ROW_ALIGNMENT)?;
            out.push(Geometry {
                format,
                dimension,
                base_size,
                mip_level,
                origin: Origin3d::ZERO,
                copy_extent: full.mip_size,
                layout: full.as_linear(),
            });
        }
    }
    Ok(out)
}

fn copy_empty_extent() -> Vec<Geometry> {
    let rgba = Geometry::d2(TextureFormat::Rgba8Unorm, Extent3d::new(8, 8, 2));
    let bc1 = Geometry::d2(TextureFormat::Bc1RgbaUnorm, Extent3d::new(16, 16, 1));
    let layout = LinearLayout::new(0, 256, 4);
    let mut out: Vec<Geometry> = [
        Extent3d::new(0, 4, 1),
        Extent3d::new(4, 0, 1),
        Extent3d::new(4, 4, 0),
        Extent3d::new(0, 0, 0),
    ]
    .into_iter()
    .map(|extent| rgba.region(Origin3d::new(2, 2, 0), extent, layout))
    .collect();
    out.push(bc1.region(Origin3d::new(4, 4, 0), Extent3d::new(0, 4, 1), layout));
    out
}

fn all_formats() -> Vec<Geometry> {
    TextureFormat::ALL
        .into_iter()
        .map(|format| Geometry::d2(format, Extent3d::new(8, 8, 2)))
        .collect()
}

impl Suite {
    pub const ALL: [Suite; 6] = [
        Suite::CopyWholeTexture,
        Suite::CopyRegionWithOrigin,
        Suite::CopyWithPadding,
        Suite::CopyMipLevels,
        Suite::CopyEmptyExtent,
        Suite::AllFormats,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Suite::CopyWholeTexture => "copy_whole_texture",
            Suite::CopyRegionWithOrigin => "copy_region_with_origin",
            Suite::CopyWithPadding => "copy_with_padding",
            Suite::CopyMipLevels => "copy_mip_levels",
            Suite::CopyEmptyExtent => "copy_empty_extent",
            Suite::AllFormats => "all_formats",
        }
    }

    /// Every case of the suite, before capability filtering.
    pub fn cases(self) -> Result<Vec<RunCase>, LayoutError> {
        let geometries = match self {
            Suite::CopyWholeTexture => copy_whole_texture(),
            Suite::CopyRegionWithOrigin => copy_region_with_origin(),
            Suite::CopyWithPadding => copy_with_padding(),
            Suite::CopyMipLevels => copy_mip_levels()?,
            Suite::CopyEmptyExtent => copy_empty_extent(),
            Suite::AllFormats => all_formats(),
        };
        Ok(with_every_method(geometries))
    }
}

impl fmt::Display for Suite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Suite {
    type Err = UnknownSuite;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|suite| suite.name().eq_ignore_ascii_case(&needle))
            .ok_or_else(|| UnknownSuite(s.to_string()))
    }
}

/// A suite split into the cases `engine` can run and the ones it cannot.
#[derive(Clone, Debug)]
pub struct SuitePlan {
    pub suite: Suite,
    pub runnable: Vec<RunCase>,
    pub skipped: Vec<RunCase>,
}

pub fn plan<E: TransferEngine + ?Sized>(suite: Suite, engine: &E) -> Result<SuitePlan, LayoutError> {
    let (runnable, skipped): (Vec<_>, Vec<_>) = suite
        .cases()?
        .into_iter()
        .partition(|case| case.is_supported_by(engine));
    for case in &skipped {
        tracing::debug!(engine = engine.name(), %case, "unsupported, skipping");
    }
    if !skipped.is_empty() {
        tracing::warn!(
            engine = engine.name(),
            %suite,
            skipped = skipped.len(),
            "skipping cases the engine cannot execute"
        );
    }
    Ok(SuitePlan {
        suite,
        runnable,
        skipped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::FaultyEngine;
    use crate::backend::{CopyLimits, SoftEngine};

    #[test]
    fn every_suite_case_satisfies_its_preconditions() {
        for suite in Suite::ALL {
            for case in suite.cases().unwrap() {
                if case.format.info().copy_src && case.format.info().copy_dst {
                    case.check_preconditions()
                        .unwrap_or_else(|err| panic!("{suite}: {case}: {err}"));
                }
            }
        }
    }

    #[test]
    fn suites_cross_all_method_pairs() {
        let cases = Suite::CopyWholeTexture.cases().unwrap();
        assert_eq!(cases.len(), 27 * 4);
        for init in InitMethod::ALL {
            for check in CheckMethod::ALL {
                let n = cases
                    .iter()
                    .filter(|c| c.init == init && c.check == check)
                    .count();
                assert_eq!(n, 27);
            }
        }
        assert!(cases
            .iter()
            .all(|c| c.layout.bytes_per_row == 256 && c.layout.rows_per_image == c.base_size.height));
    }

    #[test]
    fn soft_engine_skips_only_uncopyable_formats() {
        let engine = SoftEngine::new();
        for suite in Suite::ALL {
            let plan = plan(suite, &engine).unwrap();
            for case in &plan.skipped {
                let info = case.format.info();
                assert!(!(info.copy_src && info.copy_dst), "{case}");
            }
        }
        let formats = plan(Suite::AllFormats, &engine).unwrap();
        assert_eq!(formats.skipped.len(), 2 * 4);
        assert_eq!(formats.runnable.len(), 15 * 4);
    }

    #[test]
    fn aligned_engines_skip_tight_buffer_layouts() {
        let engine = FaultyEngine {
            limits: CopyLimits {
                bytes_per_row_alignment: 256,
                block_aligned_buffer_offset: true,
            },
            ..FaultyEngine::new()
        };
        let plan = plan(Suite::CopyWithPadding, &engine).unwrap();
        // Tight rgba8, odd-offset rgba8 and tight bc3 run only as direct-write + full check.
        assert_eq!(plan.skipped.len(), 3 * 3);
        assert!(plan
            .skipped
            .iter()
            .all(|c| !(c.init == InitMethod::DirectWrite && c.check == CheckMethod::FullCheck)));
    }

    #[test]
    fn engines_without_bc_or_volumes_skip_those_cases() {
        let engine = FaultyEngine {
            no_compressed: true,
            unsupported_dimensions: vec![TextureDimension::D3],
            ..FaultyEngine::new()
        };
        for suite in Suite::ALL {
            let plan = plan(suite, &engine).unwrap();
            for case in &plan.runnable {
                assert!(!case.format.info().compressed, "{case}");
                assert_ne!(case.dimension, TextureDimension::D3, "{case}");
            }
            for case in &plan.skipped {
                let info = case.format.info();
                assert!(
                    info.compressed
                        || case.dimension == TextureDimension::D3
                        || !(info.copy_src && info.copy_dst),
                    "{case}"
                );
            }
        }
        let formats = plan(Suite::AllFormats, &engine).unwrap();
        assert_eq!(formats.runnable.len(), 11 * 4);
    }

    #[test]
    fn suite_names_parse() {
        assert_eq!("copy_mip_levels".parse(), Ok(Suite::CopyMipLevels));
        assert_eq!("All-Formats".parse(), Ok(Suite::AllFormats));
        assert_eq!(
            "nope".parse::<Suite>(),
            Err(UnknownSuite("nope".to_string()))
        );
    }
}
