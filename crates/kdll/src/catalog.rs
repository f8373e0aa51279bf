//! Component-kernel catalog: the registry of linkable fragments.

use std::collections::HashMap;

use fc_common::KernelId;
use tracing::debug;

use crate::error::KdllError;

/// A link symbol attached to a component kernel.
///
/// Exports mark a labeled position within the owning fragment; imports
/// mark an instruction word that must be patched with the relative
/// distance to the matching export. Imports and exports pair up on
/// `(kuid, label)`, where `kuid` names the exporting kernel.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LinkSymbol {
    /// Kernel the symbol refers to.
    pub kuid: KernelId,
    /// Label within that kernel.
    pub label: u16,
    /// Export (true) or import (false).
    pub export: bool,
    /// Instruction-word offset within the owning fragment.
    pub offset_words: u32,
}

impl LinkSymbol {
    pub fn export(kuid: KernelId, label: u16, offset_words: u32) -> Self {
        Self {
            kuid,
            label,
            export: true,
            offset_words,
        }
    }

    pub fn import(kuid: KernelId, label: u16, offset_words: u32) -> Self {
        Self {
            kuid,
            label,
            export: false,
            offset_words,
        }
    }
}

/// One linkable fragment: instruction bytes plus its link symbols.
#[derive(Clone, Debug)]
pub struct ComponentKernel {
    pub id: KernelId,
    pub name: String,
    pub bytes: Vec<u8>,
    pub symbols: Vec<LinkSymbol>,
}

impl ComponentKernel {
    pub fn new(id: KernelId, name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            id,
            name: name.into(),
            bytes,
            symbols: Vec::new(),
        }
    }

    pub fn with_symbols(mut self, symbols: Vec<LinkSymbol>) -> Self {
        self.symbols = symbols;
        self
    }

    /// Size in instruction words.
    pub fn size_words(&self) -> u32 {
        (self.bytes.len() / 4) as u32
    }
}

/// Registry of component kernels, keyed by KUID.
#[derive(Default)]
pub struct KernelCatalog {
    kernels: HashMap<KernelId, ComponentKernel>,
}

impl KernelCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fragment, replacing any previous one with the same id.
    ///
    /// Catalog contents come from the host at engine construction and the
    /// linker trusts them, so a fragment is rejected here unless its byte
    /// length is word aligned and every symbol offset lies inside it.
    pub fn register(&mut self, kernel: ComponentKernel) -> Result<(), KdllError> {
        if kernel.bytes.len() % 4 != 0 {
            return Err(KdllError::MisalignedKernel {
                kuid: kernel.id,
                size: kernel.bytes.len(),
            });
        }
        let size_words = kernel.size_words();
        if let Some(sym) = kernel.symbols.iter().find(|s| s.offset_words >= size_words) {
            return Err(KdllError::SymbolOutOfBounds {
                kuid: kernel.id,
                label: sym.label,
                offset_words: sym.offset_words,
                size_words,
            });
        }
        debug!(kuid = %kernel.id, name = %kernel.name, size = kernel.bytes.len(), "registered component kernel");
        self.kernels.insert(kernel.id, kernel);
        Ok(())
    }

    pub fn get(&self, id: KernelId) -> Option<&ComponentKernel> {
        self.kernels.get(&id)
    }

    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }
}
