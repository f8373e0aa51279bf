//! `fc-common` — Shared types for the fastcomp compositing kernel engine.
//!
//! This crate is the vocabulary that the engine crate and its host share:
//!
//! - **Color**: `PixelFormat`, `ColorSpace` (with rule wildcards)
//! - **Filter**: `FilterDescription`, `LayerFilter` and their attribute enums
//! - **Procamp**: `Procamp` adjustment parameters
//! - **Kernel**: `KernelId` (component-kernel KUID newtype)
//! - **Config**: `KdllConfig` cache/linker limits

pub mod color;
pub mod config;
pub mod filter;
pub mod kernel;
pub mod procamp;

// Re-export commonly used items at crate root
pub use color::{ColorSpace, PixelFormat};
pub use config::{KdllConfig, MAX_COMBINED_KERNELS, MAX_KERNEL_SIZE};
pub use filter::{
    CoeffId, FilterDescription, FilterError, LayerFilter, LayerRole, Processing, RenderMethod,
    Rotation, RuleFlag, Sampling, SetCoeffMethod, TileType, MAX_FILTER_SIZE,
};
pub use kernel::KernelId;
pub use procamp::Procamp;
