//! The miniature linker: concatenates selected fragments and resolves
//! their import symbols against exports by relative word distance.

use fc_common::FilterDescription;
use tracing::debug;

use crate::catalog::KernelCatalog;
use crate::csc::CscParams;
use crate::error::KdllError;
use crate::state::{PatchData, SearchState};

/// A fully linked combined kernel, ready to cache and dispatch.
#[derive(Clone, Debug)]
pub struct LinkedKernel {
    /// Linked instruction bytes.
    pub bytes: Vec<u8>,
    /// The filter this kernel was built for (cache comparison key).
    pub filter: FilterDescription,
    /// Resolved CSC parameters.
    pub csc: CscParams,
    /// Patches the dispatcher applies at bind time.
    pub patches: Vec<PatchData>,
}

struct Placement<'a> {
    kernel: &'a crate::catalog::ComponentKernel,
    base_words: u32,
}

/// Link the fragments selected by a completed search into one kernel.
///
/// Fragments are placed in selection order; every import symbol must find
/// an export with the same `(kuid, label)` among the placed fragments, and
/// receives the signed word distance from the import site to the export.
/// The result never exceeds `max_size` bytes.
pub fn build_kernel(
    catalog: &KernelCatalog,
    search: &SearchState,
    filter: FilterDescription,
    max_size: usize,
) -> Result<LinkedKernel, KdllError> {
    // Place every fragment, tracking word offsets.
    let mut placements = Vec::with_capacity(search.kernels.len());
    let mut total_bytes = 0usize;
    for &kuid in &search.kernels {
        let kernel = catalog.get(kuid).ok_or(KdllError::KernelNotFound { kuid })?;
        total_bytes += kernel.bytes.len();
        if total_bytes > max_size {
            return Err(KdllError::TooLarge {
                size: total_bytes,
                max: max_size,
            });
        }
        placements.push(Placement {
            kernel,
            base_words: 0,
        });
    }
    let mut offset_words = 0u32;
    for p in &mut placements {
        p.base_words = offset_words;
        offset_words += p.kernel.size_words();
    }

    let mut bytes = Vec::with_capacity(total_bytes);
    for p in &placements {
        bytes.extend_from_slice(&p.kernel.bytes);
    }

    // Resolve imports. Exports are looked up across all placed fragments;
    // the first placement of a (kuid, label) export wins.
    let find_export = |kuid, label| {
        placements.iter().find_map(|p| {
            p.kernel
                .symbols
                .iter()
                .find(|s| s.export && s.kuid == kuid && s.label == label)
                .map(|s| p.base_words + s.offset_words)
        })
    };
    for p in &placements {
        for sym in p.kernel.symbols.iter().filter(|s| !s.export) {
            let target_words =
                find_export(sym.kuid, sym.label).ok_or(KdllError::UnresolvedImport {
                    kuid: sym.kuid,
                    label: sym.label,
                })?;
            let import_words = p.base_words + sym.offset_words;
            let distance = target_words as i32 - import_words as i32;
            let at = import_words as usize * 4;
            bytes[at..at + 4].copy_from_slice(&distance.to_le_bytes());
        }
    }

    debug!(
        kernels = search.kernels.len(),
        size = bytes.len(),
        "linked combined kernel"
    );
    Ok(LinkedKernel {
        bytes,
        filter,
        csc: search.csc.clone(),
        patches: search.patches.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ComponentKernel, LinkSymbol};
    use fc_common::{ColorSpace, KernelId, LayerFilter, LayerRole, PixelFormat};

    fn filter() -> FilterDescription {
        FilterDescription::new(vec![LayerFilter::new(
            LayerRole::RenderTarget,
            PixelFormat::Nv12,
            ColorSpace::Bt601,
        )])
        .unwrap()
    }

    fn search_with(kernels: &[KernelId]) -> SearchState {
        let mut s = SearchState::new(filter());
        for &k in kernels {
            s.push_kernel(k).unwrap();
        }
        s
    }

    #[test]
    fn concatenates_in_selection_order() {
        let mut catalog = KernelCatalog::new();
        catalog.register(ComponentKernel::new(KernelId::SETUP, "setup", vec![0xAA; 8])).unwrap();
        catalog.register(ComponentKernel::new(
            KernelId::SAVE_NV12,
            "save_nv12",
            vec![0xBB; 4],
        )).unwrap();
        let s = search_with(&[KernelId::SETUP, KernelId::SAVE_NV12]);
        let linked = build_kernel(&catalog, &s, filter(), 1 << 16).unwrap();
        assert_eq!(&linked.bytes[..8], &[0xAA; 8]);
        assert_eq!(&linked.bytes[8..], &[0xBB; 4]);
    }

    #[test]
    fn import_is_patched_with_word_distance() {
        let mut catalog = KernelCatalog::new();
        // Word 1 of the first fragment jumps to word 1 of the second.
        catalog.register(
            ComponentKernel::new(KernelId::SETUP, "setup", vec![0; 12]).with_symbols(vec![
                LinkSymbol::import(KernelId::SAVE_NV12, 7, 1),
            ]),
        ).unwrap();
        catalog.register(
            ComponentKernel::new(KernelId::SAVE_NV12, "save_nv12", vec![0; 8]).with_symbols(
                vec![LinkSymbol::export(KernelId::SAVE_NV12, 7, 1)],
            ),
        ).unwrap();
        let s = search_with(&[KernelId::SETUP, KernelId::SAVE_NV12]);
        let linked = build_kernel(&catalog, &s, filter(), 1 << 16).unwrap();

        // Import at word 1, export at word 3 + 1 = 4, distance 3.
        let patched = i32::from_le_bytes(linked.bytes[4..8].try_into().unwrap());
        assert_eq!(patched, 3);
    }

    #[test]
    fn backward_distance_is_negative() {
        let mut catalog = KernelCatalog::new();
        catalog.register(
            ComponentKernel::new(KernelId::SETUP, "setup", vec![0; 8]).with_symbols(vec![
                LinkSymbol::export(KernelId::SETUP, 1, 0),
            ]),
        ).unwrap();
        catalog.register(
            ComponentKernel::new(KernelId::SAVE_NV12, "save_nv12", vec![0; 8]).with_symbols(
                vec![LinkSymbol::import(KernelId::SETUP, 1, 1)],
            ),
        ).unwrap();
        let s = search_with(&[KernelId::SETUP, KernelId::SAVE_NV12]);
        let linked = build_kernel(&catalog, &s, filter(), 1 << 16).unwrap();

        // Import at word 3, export at word 0, distance -3.
        let patched = i32::from_le_bytes(linked.bytes[12..16].try_into().unwrap());
        assert_eq!(patched, -3);
    }

    #[test]
    fn unresolved_import_names_the_symbol() {
        let mut catalog = KernelCatalog::new();
        catalog.register(
            ComponentKernel::new(KernelId::SETUP, "setup", vec![0; 8]).with_symbols(vec![
                LinkSymbol::import(KernelId::SAVE_NV12, 42, 0),
            ]),
        ).unwrap();
        let s = search_with(&[KernelId::SETUP]);
        let err = build_kernel(&catalog, &s, filter(), 1 << 16).unwrap_err();
        assert!(matches!(
            err,
            KdllError::UnresolvedImport { kuid: KernelId::SAVE_NV12, label: 42 }
        ));
    }

    #[test]
    fn missing_fragment_is_an_error() {
        let catalog = KernelCatalog::new();
        let s = search_with(&[KernelId::SETUP]);
        assert!(matches!(
            build_kernel(&catalog, &s, filter(), 1 << 16),
            Err(KdllError::KernelNotFound { .. })
        ));
    }

    #[test]
    fn size_bound_is_enforced() {
        let mut catalog = KernelCatalog::new();
        catalog.register(ComponentKernel::new(KernelId::SETUP, "setup", vec![0; 64])).unwrap();
        let s = search_with(&[KernelId::SETUP]);
        assert!(matches!(
            build_kernel(&catalog, &s, filter(), 32),
            Err(KdllError::TooLarge { size: 64, max: 32 })
        ));
    }
}
