//! `fc-kdll` — Rule-driven dynamic linking of compositing kernels.
//!
//! A host describes one compositing operation as a [`FilterDescription`]
//! (layers bottom-up, render target last) and asks the [`KdllEngine`] for
//! a combined kernel. The engine walks a rule table to select component
//! kernels from the [`KernelCatalog`], resolves color-space conversion
//! coefficients, links the fragments with relative-offset patching, and
//! caches the result in a capacity-bounded, hash-indexed pool.
//!
//! ```no_run
//! use fc_common::{ColorSpace, FilterDescription, LayerFilter, LayerRole, PixelFormat};
//! use fc_kdll::{KdllEngine, KernelCatalog};
//!
//! # fn demo(catalog: KernelCatalog) -> Result<(), fc_kdll::KdllError> {
//! let engine = KdllEngine::with_defaults(catalog);
//! let filter = FilterDescription::new(vec![
//!     LayerFilter::new(LayerRole::MainVideo, PixelFormat::Nv12, ColorSpace::Bt601),
//!     LayerFilter::new(LayerRole::RenderTarget, PixelFormat::Argb, ColorSpace::Srgb),
//! ])?;
//! let handle = engine.get_kernel(&filter)?;
//! let bytes = engine.kernel_bytes(handle)?;
//! # Ok(())
//! # }
//! ```
//!
//! [`FilterDescription`]: fc_common::FilterDescription

pub mod cache;
pub mod catalog;
pub mod csc;
pub mod engine;
pub mod error;
pub mod link;
pub mod rules;
pub mod rules_default;
pub mod search;
pub mod state;

pub use cache::{filter_hash, KernelCache, KernelHandle};
pub use catalog::{ComponentKernel, KernelCatalog, LinkSymbol};
pub use csc::{CscMat, CscParams, CscResolver, CscType};
pub use engine::{GenDefault, KdllEngine, KdllStrategy};
pub use error::KdllError;
pub use link::{build_kernel, LinkedKernel};
pub use rules::{RuleAction, RuleCond, RuleEntrySet, RuleGroup, RuleTable};
pub use rules_default::default_rules;
pub use search::search_kernel;
pub use state::{ParserState, PatchBlock, PatchData, PatchKind, SearchState};
