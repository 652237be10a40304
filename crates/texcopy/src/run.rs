//! Runs one copy case: create a surface, write a reference region into it, verify, destroy.

use std::fmt;

use serde::Serialize;

use crate::backend::{SurfaceCopy, SurfaceDesc, SurfaceId, TransferEngine};
use crate::data;
use crate::error::{LayoutError, RunError};
use crate::format::TextureFormat;
use crate::layout::{
    block_extent, check_aligned, check_base_size, compute_full_layout, max_mip_level_count,
    physical_mip_size, required_data_len, Extent3d, LinearLayout, Origin3d, TextureDimension,
};
use crate::verify::{partial_check, CheckReport, ShadowSurface};

/// How the reference region reaches the surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum InitMethod {
    /// Queue-level write straight from host memory.
    DirectWrite,
    /// Upload into a linear buffer, then a buffer -> surface copy.
    StagedBufferCopy,
}

impl InitMethod {
    pub const ALL: [InitMethod; 2] = [InitMethod::DirectWrite, InitMethod::StagedBufferCopy];

    pub fn name(self) -> &'static str {
        match self {
            InitMethod::DirectWrite => "direct-write",
            InitMethod::StagedBufferCopy => "staged-buffer-copy",
        }
    }
}

impl fmt::Display for InitMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How the surface content is verified after the write.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum CheckMethod {
    /// Copy the written region back out and compare it with the reference data.
    PartialCheck,
    /// Compare the whole subresource against a host-side shadow of its expected content.
    FullCheck,
}

impl CheckMethod {
    pub const ALL: [CheckMethod; 2] = [CheckMethod::PartialCheck, CheckMethod::FullCheck];

    pub fn name(self) -> &'static str {
        match self {
            CheckMethod::PartialCheck => "partial",
            CheckMethod::FullCheck => "full",
        }
    }
}

impl fmt::Display for CheckMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct RunCase {
    pub format: TextureFormat,
    pub dimension: TextureDimension,
    pub base_size: Extent3d,
    pub mip_level: u32,
    pub origin: Origin3d,
    pub copy_extent: Extent3d,
    pub layout: LinearLayout,
    pub init: InitMethod,
    pub check: CheckMethod,
}

impl RunCase {
    /// Whole-subresource copy of mip 0 with `layout`.
    pub fn whole(
        format: TextureFormat,
        size: Extent3d,
        layout: LinearLayout,
        init: InitMethod,
        check: CheckMethod,
    ) -> Self {
        Self {
            format,
            dimension: TextureDimension::D2,
            base_size: size,
            mip_level: 0,
            origin: Origin3d::ZERO,
            copy_extent: size,
            layout,
            init,
            check,
        }
    }

    fn surface_desc(&self) -> SurfaceDesc {
        SurfaceDesc {
            label: Some(self.to_string()),
            size: self.base_size,
            mip_level_count: self.mip_level + 1,
            dimension: self.dimension,
            format: self.format,
        }
    }

    /// Checks every precondition that does not depend on the engine.
    pub fn check_preconditions(&self) -> Result<(), RunError> {
        let format = self.format;
        let info = format.info();
        if !info.supports(self.init, self.check) {
            return Err(RunError::UnsupportedCopy {
                format,
                init: self.init,
                check: self.check,
                copy_src: info.copy_src,
                copy_dst: info.copy_dst,
            });
        }

        check_base_size(format, self.dimension, self.base_size)?;
        let mip_level_count = max_mip_level_count(self.dimension, self.base_size);
        if self.mip_level >= mip_level_count {
            return Err(RunError::MipLevelOutOfRange {
                mip_level: self.mip_level,
                mip_level_count,
            });
        }

        check_aligned(format, "origin x", self.origin.x.into(), info.block_width)?;
        check_aligned(format, "origin y", self.origin.y.into(), info.block_height)?;
        block_extent(format, self.copy_extent)?;

        let mip = physical_mip_size(format, self.dimension, self.base_size, self.mip_level);
        let ends = [
            ("x", self.origin.x, self.copy_extent.width, mip.width),
            ("y", self.origin.y, self.copy_extent.height, mip.height),
            ("z", self.origin.z, self.copy_extent.depth, mip.depth),
        ];
        for (axis, start, len, size) in ends {
            let end = u64::from(start) + u64::from(len);
            if end > u64::from(size) {
                return Err(RunError::RegionOutOfBounds { axis, end, size });
            }
        }

        self.layout.validate(format, self.copy_extent)?;
        Ok(())
    }

    /// Capability predicate: whether `engine` can execute this case at all.
    ///
    /// Cases failing this are skipped rather than run.
    pub fn is_supported_by<E: TransferEngine + ?Sized>(&self, engine: &E) -> bool {
        let info = self.format.info();
        if !info.supports(self.init, self.check)
            || !engine.supports_format(self.format)
            || !engine.supports_dimension(self.dimension)
        {
            return false;
        }
        if info.compressed && self.dimension != TextureDimension::D2 {
            return false;
        }
        // The caller's layout reaches a buffer copy when staging or when reading the region back.
        let buffer_copy_uses_layout =
            self.init == InitMethod::StagedBufferCopy || self.check == CheckMethod::PartialCheck;
        !buffer_copy_uses_layout || engine.limits().allows_buffer_layout(&self.layout, self.format)
    }
}

impl fmt::Display for RunCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self {
            format,
            base_size: b,
            mip_level,
            origin: o,
            copy_extent: e,
            layout: l,
            ..
        } = self;
        write!(
            f,
            "{format} {dim:?} {}x{}x{} mip {mip_level} origin ({},{},{}) extent {}x{}x{} \
             layout (offset {}, bpr {}, rpi {}) {}/{}",
            b.width,
            b.height,
            b.depth,
            o.x,
            o.y,
            o.z,
            e.width,
            e.height,
            e.depth,
            l.offset,
            l.bytes_per_row,
            l.rows_per_image,
            self.init,
            self.check,
            dim = self.dimension,
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CaseOutcome {
    pub case: RunCase,
    pub report: CheckReport,
}

impl CaseOutcome {
    pub fn passed(&self) -> bool {
        self.report.passed()
    }
}

/// Runs `case` on `engine`.
///
/// Preconditions are checked before any engine work. The surface created for the case is
/// destroyed before returning, whether or not the case succeeded.
pub async fn run_case<E: TransferEngine + ?Sized>(
    engine: &mut E,
    case: &RunCase,
) -> Result<CaseOutcome, RunError> {
    case.check_preconditions()?;
    let data_len = required_data_len(&case.layout, case.format, case.copy_extent)?;
    let data_len = usize::try_from(data_len).map_err(|_| LayoutError::Overflow)?;

    let surface = engine.create_surface(&case.surface_desc())?;
    let result = write_and_check(engine, case, surface, &data::generate(data_len)).await;
    let destroyed = engine.destroy_surface(surface);
    let report = result?;
    destroyed?;

    if report.passed() {
        tracing::info!(engine = engine.name(), %case, rows = report.rows_compared, "pass");
    } else {
        tracing::warn!(
            engine = engine.name(),
            %case,
            mismatches = report.mismatches.len(),
            "FAIL"
        );
    }
    Ok(CaseOutcome {
        case: *case,
        report,
    })
}

async fn write_and_check<E: TransferEngine + ?Sized>(
    engine: &mut E,
    case: &RunCase,
    surface: SurfaceId,
    reference: &[u8],
) -> Result<CheckReport, RunError> {
    let copy = SurfaceCopy {
        surface,
        mip_level: case.mip_level,
        origin: case.origin,
    };

    // The shadow must be captured before the write it is meant to predict.
    let shadow = match case.check {
        CheckMethod::PartialCheck => None,
        CheckMethod::FullCheck => {
            let full = compute_full_layout(
                case.format,
                case.dimension,
                case.base_size,
                case.mip_level,
                engine.limits().bytes_per_row_alignment,
            )?;
            Some(ShadowSurface::capture(engine, case.format, surface, case.mip_level, full).await?)
        }
    };

    match case.init {
        InitMethod::DirectWrite => {
            engine.write_linear_into_surface(&copy, &case.layout, case.copy_extent, reference)?;
        }
        InitMethod::StagedBufferCopy => {
            let staging = engine.stage_buffer(reference)?;
            let copied =
                engine.copy_buffer_into_surface(staging, &case.layout, &copy, case.copy_extent);
            engine.destroy_buffer(staging)?;
            copied?;
        }
    }

    match shadow {
        Some(mut shadow) => {
            shadow.apply_region(&case.layout, case.origin, case.copy_extent, reference)?;
            shadow.full_check(engine).await
        }
        None => {
            partial_check(
                engine,
                case.format,
                &copy,
                &case.layout,
                case.copy_extent,
                reference,
            )
            .await
        }
    }
}
