//! Combined-kernel cache: a bucketed hash table over a pool of fixed-size
//! arena blocks.
//!
//! Entries chain through 1-based `u16` slot indices (0 is the null link),
//! keyed by the FNV-1a hash of the filter's canonical bytes; a hit always
//! confirms the full filter before returning. Every cached kernel owns one
//! arena block, so eviction and release reclaim storage without
//! fragmentation. Handles are generational: releasing or rebuilding an
//! entry invalidates all outstanding handles to it.

use std::sync::atomic::{AtomicU64, Ordering};

use fc_common::{FilterDescription, KdllConfig};
use tracing::{debug, info, trace};

use crate::csc::CscParams;
use crate::error::KdllError;
use crate::link::LinkedKernel;
use crate::state::PatchData;

/// Number of hash buckets.
pub const HASH_BUCKETS: usize = 256;

/// FNV-1a over the filter's canonical bytes.
pub fn filter_hash(bytes: &[u8]) -> u32 {
    let mut h: u32 = 0x811c9dc5;
    for &b in bytes {
        h ^= b as u32;
        h = h.wrapping_mul(0x0100_0193);
    }
    h
}

/// Generational reference to a cached combined kernel.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct KernelHandle {
    index: u16,
    generation: u32,
}

struct CacheEntry {
    hash: u32,
    filter: FilterDescription,
    csc: CscParams,
    patches: Vec<PatchData>,
    block: usize,
    size: usize,
    /// Stamp of the last lookup hit (or the insert), for eviction order.
    refresh: AtomicU64,
}

struct CacheSlot {
    entry: Option<CacheEntry>,
    /// Next slot in the bucket chain, 1-based, 0 = end.
    next: u16,
    generation: u32,
}

/// Pool of fixed-size kernel storage blocks.
///
/// One block per cached kernel; the pool grows in bursts up to a hard
/// ceiling and recycles released blocks through a free list.
struct KernelArena {
    block_size: usize,
    blocks: Vec<Box<[u8]>>,
    free: Vec<usize>,
    growth_blocks: usize,
    max_blocks: usize,
}

impl KernelArena {
    fn new(config: &KdllConfig) -> Self {
        let mut arena = Self {
            block_size: config.max_kernel_size,
            blocks: Vec::new(),
            free: Vec::new(),
            growth_blocks: config.growth_blocks,
            max_blocks: config.max_blocks,
        };
        arena.grow(config.initial_blocks);
        arena
    }

    fn grow(&mut self, count: usize) {
        let count = count.min(self.max_blocks - self.blocks.len());
        for _ in 0..count {
            self.free.push(self.blocks.len());
            self.blocks.push(vec![0u8; self.block_size].into_boxed_slice());
        }
        if count > 0 {
            info!(blocks = self.blocks.len(), "kernel arena grew");
        }
    }

    fn alloc(&mut self) -> Result<usize, KdllError> {
        if self.free.is_empty() {
            self.grow(self.growth_blocks);
        }
        self.free.pop().ok_or(KdllError::CacheFull)
    }

    fn release(&mut self, block: usize) {
        self.free.push(block);
    }

    fn write(&mut self, block: usize, bytes: &[u8]) {
        self.blocks[block][..bytes.len()].copy_from_slice(bytes);
    }

    fn bytes(&self, block: usize, size: usize) -> &[u8] {
        &self.blocks[block][..size]
    }
}

/// The combined-kernel cache.
///
/// Interior refresh stamps are atomic so lookups work through a shared
/// reference; all structural mutation needs exclusive access.
pub struct KernelCache {
    buckets: [u16; HASH_BUCKETS],
    slots: Vec<CacheSlot>,
    free_slots: Vec<u16>,
    arena: KernelArena,
    stamp: AtomicU64,
    capacity: usize,
}

impl KernelCache {
    pub fn new(config: &KdllConfig) -> Self {
        Self {
            buckets: [0; HASH_BUCKETS],
            slots: Vec::new(),
            free_slots: Vec::new(),
            arena: KernelArena::new(config),
            stamp: AtomicU64::new(0),
            capacity: config.max_combined_kernels,
        }
    }

    fn bucket_of(hash: u32) -> usize {
        (hash & 0xff) as usize
    }

    fn slot(&self, index: u16) -> &CacheSlot {
        &self.slots[index as usize - 1]
    }

    fn slot_mut(&mut self, index: u16) -> &mut CacheSlot {
        &mut self.slots[index as usize - 1]
    }

    /// Number of resident combined kernels.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.entry.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Find a cached kernel for `filter` and refresh its eviction stamp.
    ///
    /// The hash narrows the bucket; the canonical filter bytes decide, so
    /// hash collisions can never alias two different filters.
    pub fn lookup(&self, filter: &FilterDescription) -> Option<KernelHandle> {
        let key = filter.canonical_bytes();
        let hash = filter_hash(&key);
        let mut index = self.buckets[Self::bucket_of(hash)];
        while index != 0 {
            let slot = self.slot(index);
            if let Some(entry) = &slot.entry {
                if entry.hash == hash && entry.filter.canonical_bytes() == key {
                    let stamp = self.stamp.fetch_add(1, Ordering::Relaxed) + 1;
                    entry.refresh.store(stamp, Ordering::Relaxed);
                    trace!(hash, index, "kernel cache hit");
                    return Some(KernelHandle {
                        index,
                        generation: slot.generation,
                    });
                }
            }
            index = slot.next;
        }
        None
    }

    /// Insert a linked kernel, evicting the stalest entry when the pool is
    /// exhausted.
    pub fn insert(&mut self, linked: LinkedKernel) -> Result<KernelHandle, KdllError> {
        if linked.bytes.len() > self.arena.block_size {
            return Err(KdllError::TooLarge {
                size: linked.bytes.len(),
                max: self.arena.block_size,
            });
        }
        let index = self.take_slot()?;
        let block = match self.arena.alloc() {
            Ok(block) => block,
            Err(e) => {
                self.free_slots.push(index);
                return Err(e);
            }
        };
        self.arena.write(block, &linked.bytes);

        let key = linked.filter.canonical_bytes();
        let hash = filter_hash(&key);
        let stamp = self.stamp.fetch_add(1, Ordering::Relaxed) + 1;

        let bucket = Self::bucket_of(hash);
        let head = self.buckets[bucket];
        let size = linked.bytes.len();
        {
            let slot = self.slot_mut(index);
            slot.entry = Some(CacheEntry {
                hash,
                filter: linked.filter,
                csc: linked.csc,
                patches: linked.patches,
                block,
                size,
                refresh: AtomicU64::new(stamp),
            });
            slot.next = head;
        }
        self.buckets[bucket] = index;

        debug!(hash, index, size, "cached combined kernel");
        Ok(KernelHandle {
            index,
            generation: self.slot(index).generation,
        })
    }

    /// Drop a cached kernel, invalidating all handles to it.
    pub fn release(&mut self, handle: KernelHandle) -> Result<(), KdllError> {
        self.check(handle)?;
        let entry = {
            let slot = self.slot_mut(handle.index);
            slot.generation = slot.generation.wrapping_add(1);
            slot.entry.take()
        };
        let entry = entry.ok_or(KdllError::StaleHandle)?;
        self.unlink(handle.index, entry.hash);
        self.arena.release(entry.block);
        self.free_slots.push(handle.index);
        debug!(index = handle.index, "released combined kernel");
        Ok(())
    }

    /// Linked kernel bytes for a handle.
    pub fn kernel_bytes(&self, handle: KernelHandle) -> Result<&[u8], KdllError> {
        let entry = self.entry(handle)?;
        Ok(self.arena.bytes(entry.block, entry.size))
    }

    /// CSC parameters of a cached kernel.
    pub fn csc_params(&self, handle: KernelHandle) -> Result<&CscParams, KdllError> {
        Ok(&self.entry(handle)?.csc)
    }

    /// Patch list of a cached kernel.
    pub fn patches(&self, handle: KernelHandle) -> Result<&[PatchData], KdllError> {
        Ok(&self.entry(handle)?.patches)
    }

    fn check(&self, handle: KernelHandle) -> Result<(), KdllError> {
        let idx = handle.index as usize;
        if idx == 0 || idx > self.slots.len() || self.slot(handle.index).generation != handle.generation
        {
            return Err(KdllError::StaleHandle);
        }
        Ok(())
    }

    fn entry(&self, handle: KernelHandle) -> Result<&CacheEntry, KdllError> {
        self.check(handle)?;
        self.slot(handle.index)
            .entry
            .as_ref()
            .ok_or(KdllError::StaleHandle)
    }

    fn take_slot(&mut self) -> Result<u16, KdllError> {
        if let Some(index) = self.free_slots.pop() {
            return Ok(index);
        }
        if self.slots.len() < self.capacity {
            self.slots.push(CacheSlot {
                entry: None,
                next: 0,
                generation: 0,
            });
            return Ok(self.slots.len() as u16);
        }
        self.evict()
    }

    /// Reclaim the occupied slot with the oldest refresh stamp.
    fn evict(&mut self) -> Result<u16, KdllError> {
        let victim = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| {
                s.entry
                    .as_ref()
                    .map(|e| (i as u16 + 1, e.refresh.load(Ordering::Relaxed)))
            })
            .min_by_key(|&(_, refresh)| refresh)
            .map(|(index, _)| index)
            .ok_or(KdllError::CacheFull)?;

        debug!(index = victim, "evicting stalest combined kernel");
        let entry = {
            let slot = self.slot_mut(victim);
            slot.generation = slot.generation.wrapping_add(1);
            slot.entry.take().ok_or(KdllError::CacheFull)?
        };
        self.unlink(victim, entry.hash);
        self.arena.release(entry.block);
        Ok(victim)
    }

    fn unlink(&mut self, index: u16, hash: u32) {
        let bucket = Self::bucket_of(hash);
        let next = self.slot(index).next;
        if self.buckets[bucket] == index {
            self.buckets[bucket] = next;
        } else {
            let mut cur = self.buckets[bucket];
            while cur != 0 {
                if self.slot(cur).next == index {
                    self.slot_mut(cur).next = next;
                    break;
                }
                cur = self.slot(cur).next;
            }
        }
        self.slot_mut(index).next = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fc_common::{ColorSpace, LayerFilter, LayerRole, PixelFormat};

    fn filter(format: PixelFormat, n: usize) -> FilterDescription {
        let mut entries: Vec<LayerFilter> = (0..n)
            .map(|_| LayerFilter::new(LayerRole::MainVideo, format, ColorSpace::Bt601))
            .collect();
        entries.push(LayerFilter::new(
            LayerRole::RenderTarget,
            PixelFormat::Nv12,
            ColorSpace::Bt601,
        ));
        FilterDescription::new(entries).unwrap()
    }

    fn linked(filter: FilterDescription, bytes: Vec<u8>) -> LinkedKernel {
        LinkedKernel {
            bytes,
            filter,
            csc: CscParams::default(),
            patches: Vec::new(),
        }
    }

    fn small_config(capacity: usize) -> KdllConfig {
        KdllConfig {
            max_kernel_size: 256,
            max_combined_kernels: capacity,
            initial_blocks: 1,
            growth_blocks: 1,
            max_blocks: capacity,
        }
    }

    #[test]
    fn insert_then_lookup_round_trip() {
        let mut cache = KernelCache::new(&small_config(4));
        let f = filter(PixelFormat::Nv12, 1);
        let handle = cache.insert(linked(f.clone(), vec![1, 2, 3, 4])).unwrap();
        let found = cache.lookup(&f).unwrap();
        assert_eq!(found, handle);
        assert_eq!(cache.kernel_bytes(handle).unwrap(), &[1, 2, 3, 4]);
    }

    #[test]
    fn lookup_misses_other_filters() {
        let mut cache = KernelCache::new(&small_config(4));
        cache
            .insert(linked(filter(PixelFormat::Nv12, 1), vec![0; 4]))
            .unwrap();
        assert!(cache.lookup(&filter(PixelFormat::Argb, 1)).is_none());
    }

    #[test]
    fn full_pool_evicts_the_stalest_entry() {
        let mut cache = KernelCache::new(&small_config(2));
        let f1 = filter(PixelFormat::Nv12, 1);
        let f2 = filter(PixelFormat::Argb, 1);
        let f3 = filter(PixelFormat::Yuy2, 1);
        cache.insert(linked(f1.clone(), vec![0; 4])).unwrap();
        cache.insert(linked(f2.clone(), vec![0; 4])).unwrap();

        // Touch f1 so f2 is the stalest.
        cache.lookup(&f1).unwrap();
        cache.insert(linked(f3.clone(), vec![0; 4])).unwrap();

        assert!(cache.lookup(&f1).is_some());
        assert!(cache.lookup(&f2).is_none());
        assert!(cache.lookup(&f3).is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn eviction_invalidates_handles() {
        let mut cache = KernelCache::new(&small_config(1));
        let h1 = cache
            .insert(linked(filter(PixelFormat::Nv12, 1), vec![0; 4]))
            .unwrap();
        cache
            .insert(linked(filter(PixelFormat::Argb, 1), vec![0; 4]))
            .unwrap();
        assert!(matches!(
            cache.kernel_bytes(h1),
            Err(KdllError::StaleHandle)
        ));
    }

    #[test]
    fn release_recycles_slot_and_block() {
        let mut cache = KernelCache::new(&small_config(1));
        let f = filter(PixelFormat::Nv12, 1);
        let h = cache.insert(linked(f.clone(), vec![0; 4])).unwrap();
        cache.release(h).unwrap();
        assert!(cache.lookup(&f).is_none());
        assert!(matches!(cache.release(h), Err(KdllError::StaleHandle)));

        // The freed slot and block are reusable.
        let h2 = cache.insert(linked(f.clone(), vec![0; 8])).unwrap();
        assert_eq!(cache.kernel_bytes(h2).unwrap().len(), 8);
    }

    #[test]
    fn same_bucket_filters_stay_distinct() {
        // These two filters land in bucket 0x01 (their FNV-1a hashes share
        // the low byte), so the lookup must fall back to the full filter
        // comparison to tell them apart.
        let a = FilterDescription::new(vec![
            LayerFilter::new(LayerRole::MainVideo, PixelFormat::Yv12, ColorSpace::Bt601),
            LayerFilter::new(LayerRole::RenderTarget, PixelFormat::Nv12, ColorSpace::Bt601),
        ])
        .unwrap();
        let b = FilterDescription::new(vec![
            LayerFilter::new(
                LayerRole::MainVideo,
                PixelFormat::Yuy2,
                ColorSpace::Bt709FullRange,
            ),
            LayerFilter::new(LayerRole::RenderTarget, PixelFormat::Nv12, ColorSpace::Bt601),
        ])
        .unwrap();
        let ha = filter_hash(&a.canonical_bytes());
        let hb = filter_hash(&b.canonical_bytes());
        assert_ne!(ha, hb);
        assert_eq!(ha & 0xff, hb & 0xff, "filters must share a bucket");

        let mut cache = KernelCache::new(&small_config(4));
        cache.insert(linked(a.clone(), vec![0xAA; 4])).unwrap();
        cache.insert(linked(b.clone(), vec![0xBB; 4])).unwrap();
        let la = cache.lookup(&a).unwrap();
        let lb = cache.lookup(&b).unwrap();
        assert_eq!(cache.kernel_bytes(la).unwrap(), &[0xAA; 4]);
        assert_eq!(cache.kernel_bytes(lb).unwrap(), &[0xBB; 4]);
    }

    #[test]
    fn oversized_kernel_is_rejected() {
        let mut cache = KernelCache::new(&small_config(1));
        let err = cache
            .insert(linked(filter(PixelFormat::Nv12, 1), vec![0; 512]))
            .unwrap_err();
        assert!(matches!(err, KdllError::TooLarge { size: 512, max: 256 }));
    }

    #[test]
    fn arena_ceiling_fails_insert() {
        // Two slots but only one block allowed.
        let config = KdllConfig {
            max_kernel_size: 256,
            max_combined_kernels: 2,
            initial_blocks: 1,
            growth_blocks: 1,
            max_blocks: 1,
        };
        let mut cache = KernelCache::new(&config);
        cache
            .insert(linked(filter(PixelFormat::Nv12, 1), vec![0; 4]))
            .unwrap();
        assert!(matches!(
            cache.insert(linked(filter(PixelFormat::Argb, 1), vec![0; 4])),
            Err(KdllError::CacheFull)
        ));
    }
}
