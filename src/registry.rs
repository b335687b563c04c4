//! The process-wide table of registered datatype descriptors (engine
//! spec, Type Registry). Registration, lookup and release are serialized
//! behind a single reader-writer lock; descriptors themselves are
//! immutable once registered and may be read without synchronization
//! once an `Arc` clone is in hand.

use crate::{
    callback::{CallbackSet, RawPtr},
    error::DatatypeError,
    handle::DatatypeHandle,
};
use core::ffi::c_void;
use core::sync::atomic::{AtomicU32, Ordering};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Which of the three transport strategies a descriptor drives.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Strategy {
    /// User-driven streaming pack/unpack (§4.2.1).
    StreamCallbacks,
    /// Gather/scatter of non-contiguous memory regions (§4.2.2).
    MemoryRegions,
    /// Fixed-width byte runs served by `memcpy` (§4.2.3).
    Primitive { width: usize },
}

/// An immutable registration record: callbacks, context, strategy.
pub struct Descriptor {
    handle: DatatypeHandle,
    strategy: Strategy,
    callbacks: CallbackSet,
    context: RawPtr,
    in_order: bool,
}

impl Descriptor {
    #[inline]
    pub fn handle(&self) -> DatatypeHandle {
        self.handle
    }

    #[inline]
    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    #[inline]
    pub(crate) fn callbacks(&self) -> &CallbackSet {
        &self.callbacks
    }

    #[inline]
    pub(crate) fn context(&self) -> *mut c_void {
        self.context.0
    }

    #[inline]
    pub fn in_order(&self) -> bool {
        self.in_order
    }
}

impl core::fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Descriptor")
            .field("handle", &self.handle)
            .field("strategy", &self.strategy)
            .field("callbacks", &self.callbacks)
            .field("in_order", &self.in_order)
            .finish()
    }
}

/// Sizing knobs for a [`TypeRegistry`]. The only configuration the engine
/// itself owns; everything else (facade plumbing, transport wiring)
/// belongs to layers outside this crate's scope.
#[derive(Clone, Copy, Debug)]
pub struct RegistryConfig {
    /// Capacity hint for the underlying descriptor table.
    pub initial_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 64,
        }
    }
}

struct Inner {
    descriptors: HashMap<DatatypeHandle, Arc<Descriptor>>,
}

/// Process-wide table of registered datatype descriptors.
pub struct TypeRegistry {
    inner: RwLock<Inner>,
    next_handle: AtomicU32,
}

impl TypeRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            inner: RwLock::new(Inner {
                descriptors: HashMap::with_capacity(config.initial_capacity),
            }),
            next_handle: AtomicU32::new(DatatypeHandle::FIRST_USER_HANDLE),
        }
    }

    /// Registers a `StreamCallbacks` or `MemoryRegions` type, inferring the
    /// strategy from which callbacks are populated (engine spec §4.1).
    pub fn register(
        &self,
        callbacks: CallbackSet,
        context: *mut c_void,
        in_order: bool,
    ) -> Result<DatatypeHandle, DatatypeError> {
        let strategy = infer_strategy(&callbacks)?;

        #[cfg(feature = "tracing")]
        tracing::debug!(?strategy, in_order, "registering datatype");

        let handle = DatatypeHandle::new(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let descriptor = Arc::new(Descriptor {
            handle,
            strategy,
            callbacks,
            context: RawPtr(context),
            in_order,
        });

        self.inner
            .write()
            .expect("registry lock poisoned")
            .descriptors
            .insert(handle, descriptor);

        Ok(handle)
    }

    /// Registers a built-in `Primitive` type with a fixed element `width`.
    pub fn register_primitive(&self, width: usize) -> Result<DatatypeHandle, DatatypeError> {
        if width == 0 {
            return Err(DatatypeError::InvalidArgument(
                "primitive width must be non-zero",
            ));
        }

        let handle = DatatypeHandle::new(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let descriptor = Arc::new(Descriptor {
            handle,
            strategy: Strategy::Primitive { width },
            callbacks: CallbackSet::default(),
            context: RawPtr::null(),
            in_order: false,
        });

        self.inner
            .write()
            .expect("registry lock poisoned")
            .descriptors
            .insert(handle, descriptor);

        Ok(handle)
    }

    /// Returns a borrowed (reference-counted) handle to the descriptor,
    /// valid independent of the registry's own lifetime.
    pub fn lookup(&self, handle: DatatypeHandle) -> Option<Arc<Descriptor>> {
        if handle.is_raw_bytes() {
            return Some(Arc::new(Descriptor {
                handle,
                strategy: Strategy::Primitive { width: 1 },
                callbacks: CallbackSet::default(),
                context: RawPtr::null(),
                in_order: false,
            }));
        }

        self.inner
            .read()
            .expect("registry lock poisoned")
            .descriptors
            .get(&handle)
            .cloned()
    }

    /// Removes a descriptor from the table. Fails with [`DatatypeError::InUse`]
    /// if any transfer still holds a clone of its `Arc`.
    pub fn release(&self, handle: DatatypeHandle) -> Result<(), DatatypeError> {
        if handle.is_raw_bytes() {
            return Ok(());
        }

        let mut inner = self.inner.write().expect("registry lock poisoned");
        let Some(descriptor) = inner.descriptors.get(&handle) else {
            return Err(DatatypeError::InvalidArgument("unknown datatype handle"));
        };

        // The table's own clone is the "+1" every live descriptor carries;
        // anything above that means a transfer still references it.
        if Arc::strong_count(descriptor) > 1 {
            return Err(DatatypeError::InUse);
        }

        inner.descriptors.remove(&handle);

        #[cfg(feature = "tracing")]
        tracing::debug!(?handle, "released datatype");

        Ok(())
    }
}

fn infer_strategy(callbacks: &CallbackSet) -> Result<Strategy, DatatypeError> {
    let has_stream = callbacks.query.is_some()
        || callbacks.pack_step.is_some()
        || callbacks.unpack_step.is_some();
    let has_region = callbacks.region_count.is_some() || callbacks.region_list.is_some();

    match (has_stream, has_region) {
        (true, true) => Err(DatatypeError::InvalidArgument(
            "callback set mixes StreamCallbacks and MemoryRegions slots",
        )),
        (true, false) => {
            if callbacks.query.is_some()
                && callbacks.pack_step.is_some()
                && callbacks.unpack_step.is_some()
            {
                Ok(Strategy::StreamCallbacks)
            } else {
                Err(DatatypeError::InvalidArgument(
                    "StreamCallbacks requires query, pack-step and unpack-step",
                ))
            }
        }
        (false, true) => {
            if callbacks.region_count.is_some() && callbacks.region_list.is_some() {
                Ok(Strategy::MemoryRegions)
            } else {
                Err(DatatypeError::InvalidArgument(
                    "MemoryRegions requires region-count and region-list",
                ))
            }
        }
        (false, false) => Err(DatatypeError::InvalidArgument(
            "no strategy-selecting callbacks were supplied; use register_primitive for Primitive",
        )),
    }
}
