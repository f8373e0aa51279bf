//! Engine configuration.

use serde::{Deserialize, Serialize};

/// Maximum combined kernel size in bytes (one cache block).
pub const MAX_KERNEL_SIZE: usize = 160 * 1024;

/// Hash-entry pool size: maximum resident combined kernels.
pub const MAX_COMBINED_KERNELS: usize = 64;

/// Configuration of the kernel cache and linker limits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdllConfig {
    /// Maximum size of a linked combined kernel in bytes.
    pub max_kernel_size: usize,
    /// Maximum resident combined kernels (hash-entry pool size, <= 64).
    pub max_combined_kernels: usize,
    /// Arena blocks allocated at construction.
    pub initial_blocks: usize,
    /// Arena blocks added per growth event.
    pub growth_blocks: usize,
    /// Hard ceiling on arena blocks; growth beyond this fails the build.
    pub max_blocks: usize,
}

impl Default for KdllConfig {
    fn default() -> Self {
        Self {
            max_kernel_size: MAX_KERNEL_SIZE,
            max_combined_kernels: MAX_COMBINED_KERNELS,
            initial_blocks: 4,
            growth_blocks: 4,
            max_blocks: MAX_COMBINED_KERNELS,
        }
    }
}

impl KdllConfig {
    /// Clamp out-of-range fields to their hard limits.
    pub fn sanitized(mut self) -> Self {
        self.max_combined_kernels = self.max_combined_kernels.clamp(1, MAX_COMBINED_KERNELS);
        self.max_kernel_size = self.max_kernel_size.clamp(1, MAX_KERNEL_SIZE);
        self.initial_blocks = self.initial_blocks.max(1);
        self.growth_blocks = self.growth_blocks.max(1);
        self.max_blocks = self.max_blocks.max(self.initial_blocks);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_within_limits() {
        let cfg = KdllConfig::default();
        assert_eq!(cfg, cfg.clone().sanitized());
    }

    #[test]
    fn sanitize_clamps_pool_size() {
        let cfg = KdllConfig {
            max_combined_kernels: 1000,
            ..KdllConfig::default()
        };
        assert_eq!(cfg.sanitized().max_combined_kernels, MAX_COMBINED_KERNELS);
    }
}
