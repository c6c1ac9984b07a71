//! Pool Registry (spec §4.A): deduplicates shared-memory regions
//! referenced by a model/request and assigns dense indices.
//!
//! Grounded on `original_source/nn/runtime/Memory.{h,cpp}`: a pool is
//! either owned storage created for a given size, or an imported region
//! (what the original calls a file-descriptor-backed `ashmem` region).

use std::sync::Arc;

use crate::error::{Error, Result};

/// Backing storage for one registered pool.
#[derive(Clone, Debug)]
pub enum PoolHandle {
    /// Storage the registry allocated and owns.
    Owned(Arc<Vec<u8>>),
    /// Storage imported from elsewhere (e.g. a caller's shared region).
    External(Arc<[u8]>),
}

impl PoolHandle {
    pub fn len(&self) -> usize {
        match self {
            PoolHandle::Owned(v) => v.len(),
            PoolHandle::External(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bytes(&self) -> &[u8] {
        match self {
            PoolHandle::Owned(v) => v,
            PoolHandle::External(s) => s,
        }
    }
}

/// Dense, stable-within-owner pool index.
pub type PoolIndex = u32;

/// Maps pool handles to dense `[0, N)` indices, each handle mapped exactly
/// once (spec §4.A: `register` is idempotent on equal handles — equality
/// here is pointer identity of the backing `Arc`, since two distinct
/// allocations are never the "same" region even if byte-equal).
#[derive(Clone, Default)]
pub struct PoolRegistry {
    pools: Vec<PoolHandle>,
}

impl PoolRegistry {
    pub fn new() -> Self {
        Self { pools: Vec::new() }
    }

    /// Allocate and register a fresh owned pool of `size` bytes.
    pub fn create(&mut self, size: usize) -> PoolIndex {
        self.register(PoolHandle::Owned(Arc::new(vec![0u8; size])))
    }

    /// Import and register an externally-owned region.
    pub fn import(&mut self, bytes: Arc<[u8]>) -> PoolIndex {
        self.register(PoolHandle::External(bytes))
    }

    /// Register a handle, returning its dense index. Idempotent when the
    /// same `Arc` allocation is registered twice.
    pub fn register(&mut self, handle: PoolHandle) -> PoolIndex {
        if let Some(existing) = self.pools.iter().position(|p| same_allocation(p, &handle)) {
            return existing as PoolIndex;
        }
        self.pools.push(handle);
        (self.pools.len() - 1) as PoolIndex
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// A read-only byte view into pool `index`.
    pub fn view(&self, index: PoolIndex) -> Result<&[u8]> {
        self.pools
            .get(index as usize)
            .map(|p| p.bytes())
            .ok_or_else(|| Error::bad_data(format!("pool index {index} out of range")))
    }

    /// A mutable byte view into pool `index`; fails if the pool is an
    /// imported external region (read-only for the runtime's lifetime).
    pub fn view_mut(&mut self, index: PoolIndex) -> Result<&mut [u8]> {
        match self.pools.get_mut(index as usize) {
            Some(PoolHandle::Owned(v)) => Ok(Arc::get_mut(v)
                .ok_or_else(|| Error::bad_state("pool is aliased"))?
                .as_mut_slice()),
            Some(PoolHandle::External(_)) => {
                Err(Error::bad_state("external pool is read-only"))
            }
            None => Err(Error::bad_data(format!("pool index {index} out of range"))),
        }
    }

    pub fn slice(&self, index: PoolIndex, offset: u32, length: u32) -> Result<&[u8]> {
        let bytes = self.view(index)?;
        let start = offset as usize;
        let end = start
            .checked_add(length as usize)
            .ok_or_else(|| Error::bad_data("pool slice overflow"))?;
        bytes
            .get(start..end)
            .ok_or_else(|| Error::bad_data("pool slice out of range"))
    }
}

fn same_allocation(a: &PoolHandle, b: &PoolHandle) -> bool {
    match (a, b) {
        (PoolHandle::Owned(x), PoolHandle::Owned(y)) => Arc::ptr_eq(x, y),
        (PoolHandle::External(x), PoolHandle::External(y)) => Arc::ptr_eq(x, y),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_is_idempotent_on_same_allocation() {
        let mut reg = PoolRegistry::new();
        let shared = Arc::new(vec![1u8, 2, 3]);
        let a = reg.register(PoolHandle::Owned(shared.clone()));
        let b = reg.register(PoolHandle::Owned(shared));
        assert_eq!(a, b);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn indices_are_dense() {
        let mut reg = PoolRegistry::new();
        let a = reg.create(4);
        let b = reg.create(8);
        assert_eq!(a, 0);
        assert_eq!(b, 1);
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn slice_out_of_range_is_bad_data() {
        let mut reg = PoolRegistry::new();
        let idx = reg.create(4);
        assert!(reg.slice(idx, 2, 4).is_err());
    }
}
