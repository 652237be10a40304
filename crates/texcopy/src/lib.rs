//! Verification of linear-data <-> texture copies.
//!
//! A [`RunCase`] describes one copy: a region of one mip level of a surface, the [`LinearLayout`]
//! the region's bytes are laid out in, how the bytes reach the surface ([`InitMethod`]) and how
//! the result is checked ([`CheckMethod`]). [`run_case`] drives a [`TransferEngine`] through the
//! case and returns a [`CheckReport`] listing every mismatching block row.
//!
//! The layout math lives in [`layout`] and [`address`]; everything that touches a device goes
//! through the [`TransferEngine`] trait, implemented by a CPU reference engine ([`SoftEngine`])
//! and a `wgpu` engine ([`WgpuEngine`]).

pub mod address;
pub mod backend;
pub mod cases;
pub mod data;
mod error;
pub mod format;
pub mod layout;
pub mod run;
pub mod verify;

pub use backend::{
    BufferId, CopyLimits, ReadbackFuture, SoftEngine, SurfaceCopy, SurfaceDesc, SurfaceId,
    TransferEngine, WgpuEngine,
};
pub use cases::{plan, Suite, SuitePlan, UnknownSuite};
pub use error::{EngineError, LayoutError, RunError};
pub use format::{FormatInfo, TextureFormat, UnknownFormat};
pub use layout::{
    compute_full_layout, required_bytes, Extent3d, LinearLayout, Origin3d, TextureCopyLayout,
    TextureDimension,
};
pub use run::{run_case, CaseOutcome, CheckMethod, InitMethod, RunCase};
pub use verify::{CheckReport, Mismatch};
