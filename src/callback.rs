//! The C-ABI callback signatures from the external interface (engine
//! spec, External Interfaces) and a thin, typed wrapper ([`CallbackSet`])
//! the registry and drivers use instead of passing the seven raw pointers
//! around individually.

use crate::{error::DatatypeError, handle::DatatypeHandle};
use core::ffi::c_void;

/// Element/iteration count, always in units of the user-facing element
/// type (never bytes) per the engine's fixed unit convention.
pub type Count = usize;

/// A raw pointer smuggled across an `await`-free, single-threaded call
/// path. The engine never dereferences these itself outside of invoking
/// the user callback that owns the memory they point to; `Send`/`Sync`
/// are asserted because a transfer's raw pointers never outlive the
/// thread that drives `progress`, but may be *handed off* between threads
/// between progress calls (the same way a socket fd is).
#[derive(Clone, Copy)]
pub(crate) struct RawPtr(pub *mut c_void);

unsafe impl Send for RawPtr {}
unsafe impl Sync for RawPtr {}

impl RawPtr {
    #[inline]
    pub(crate) const fn null() -> Self {
        Self(core::ptr::null_mut())
    }

    #[inline]
    pub(crate) fn is_null(self) -> bool {
        self.0.is_null()
    }
}

impl core::fmt::Debug for RawPtr {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:p}", self.0)
    }
}

pub type StateInitFn =
    unsafe extern "C" fn(context: *mut c_void, buf: *mut c_void, count: Count, state_out: *mut *mut c_void) -> i32;

pub type StateFreeFn = unsafe extern "C" fn(state: *mut c_void) -> i32;

pub type QueryFn = unsafe extern "C" fn(
    state: *mut c_void,
    buf: *mut c_void,
    count: Count,
    packed_size_out: *mut Count,
) -> i32;

pub type PackStepFn = unsafe extern "C" fn(
    state: *mut c_void,
    buf: *mut c_void,
    count: Count,
    offset: Count,
    dst: *mut c_void,
    dst_capacity: Count,
    used_out: *mut Count,
) -> i32;

pub type UnpackStepFn = unsafe extern "C" fn(
    state: *mut c_void,
    buf: *mut c_void,
    count: Count,
    offset: Count,
    src: *const c_void,
    src_len: Count,
) -> i32;

pub type RegionCountFn =
    unsafe extern "C" fn(state: *mut c_void, buf: *mut c_void, count: Count, n_out: *mut Count) -> i32;

pub type RegionListFn = unsafe extern "C" fn(
    state: *mut c_void,
    buf: *mut c_void,
    count: Count,
    n: Count,
    lens: *mut Count,
    bases: *mut *mut c_void,
    types: *mut u32,
) -> i32;

/// The seven optional callback slots from a registration call, in the
/// order the external interface declares them.
#[derive(Clone, Copy, Default)]
pub struct CallbackSet {
    pub state_init: Option<StateInitFn>,
    pub state_free: Option<StateFreeFn>,
    pub query: Option<QueryFn>,
    pub pack_step: Option<PackStepFn>,
    pub unpack_step: Option<UnpackStepFn>,
    pub region_count: Option<RegionCountFn>,
    pub region_list: Option<RegionListFn>,
}

impl core::fmt::Debug for CallbackSet {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CallbackSet")
            .field("state_init", &self.state_init.is_some())
            .field("state_free", &self.state_free.is_some())
            .field("query", &self.query.is_some())
            .field("pack_step", &self.pack_step.is_some())
            .field("unpack_step", &self.unpack_step.is_some())
            .field("region_count", &self.region_count.is_some())
            .field("region_list", &self.region_list.is_some())
            .finish()
    }
}

#[inline]
fn check(status: i32) -> Result<(), DatatypeError> {
    if status == 0 {
        Ok(())
    } else {
        Err(DatatypeError::UserCallback)
    }
}

impl CallbackSet {
    /// Invokes `state_init` if present; returns the opaque state pointer
    /// the engine must hand to every later callback, or `context` unchanged
    /// if no init callback was registered (per the descriptor contract).
    ///
    /// # Safety
    /// `context` and `buf` must be valid for the lifetime of the call and
    /// must match the pointers the caller will keep passing for this
    /// transfer.
    #[inline]
    pub(crate) unsafe fn state_init(
        &self,
        context: *mut c_void,
        buf: *mut c_void,
        count: Count,
    ) -> Result<*mut c_void, DatatypeError> {
        match self.state_init {
            Some(f) => {
                let mut state_out = core::ptr::null_mut();
                check((f)(context, buf, count, &mut state_out))?;
                Ok(state_out)
            }
            None => Ok(context),
        }
    }

    /// # Safety
    /// `state` must be the pointer last produced by `state_init` for this
    /// transfer (or the context pointer, if there was no init callback).
    #[inline]
    pub(crate) unsafe fn state_free(&self, state: *mut c_void) -> Result<(), DatatypeError> {
        match self.state_free {
            Some(f) => check((f)(state)),
            None => Ok(()),
        }
    }

    /// # Safety
    /// See [`Self::state_init`].
    #[inline]
    pub(crate) unsafe fn query(
        &self,
        state: *mut c_void,
        buf: *mut c_void,
        count: Count,
    ) -> Result<Option<Count>, DatatypeError> {
        match self.query {
            Some(f) => {
                let mut size_out: Count = 0;
                check((f)(state, buf, count, &mut size_out))?;
                Ok(Some(size_out))
            }
            None => Ok(None),
        }
    }

    /// # Safety
    /// `dst` must be valid for writes of `dst_capacity` bytes.
    #[inline]
    pub(crate) unsafe fn pack_step(
        &self,
        state: *mut c_void,
        buf: *mut c_void,
        count: Count,
        offset: Count,
        dst: *mut c_void,
        dst_capacity: Count,
    ) -> Result<Count, DatatypeError> {
        let f = self
            .pack_step
            .expect("pack_step invoked on a descriptor without one");
        let mut used_out: Count = 0;
        check((f)(state, buf, count, offset, dst, dst_capacity, &mut used_out))?;
        Ok(used_out)
    }

    /// # Safety
    /// `src` must be valid for reads of `src_len` bytes.
    #[inline]
    pub(crate) unsafe fn unpack_step(
        &self,
        state: *mut c_void,
        buf: *mut c_void,
        count: Count,
        offset: Count,
        src: *const c_void,
        src_len: Count,
    ) -> Result<(), DatatypeError> {
        let f = self
            .unpack_step
            .expect("unpack_step invoked on a descriptor without one");
        check((f)(state, buf, count, offset, src, src_len))
    }

    /// # Safety
    /// See [`Self::state_init`].
    #[inline]
    pub(crate) unsafe fn region_count(
        &self,
        state: *mut c_void,
        buf: *mut c_void,
        count: Count,
    ) -> Result<Count, DatatypeError> {
        let f = self
            .region_count
            .expect("region_count invoked on a descriptor without one");
        let mut n_out: Count = 0;
        check((f)(state, buf, count, &mut n_out))?;
        Ok(n_out)
    }

    /// # Safety
    /// `lens`, `bases` and `types` must each point to `n` writable
    /// elements.
    #[inline]
    pub(crate) unsafe fn region_list(
        &self,
        state: *mut c_void,
        buf: *mut c_void,
        count: Count,
        n: Count,
        lens: *mut Count,
        bases: *mut *mut c_void,
        types: *mut u32,
    ) -> Result<(), DatatypeError> {
        let f = self
            .region_list
            .expect("region_list invoked on a descriptor without one");
        check((f)(state, buf, count, n, lens, bases, types))
    }
}

/// Converts a raw callback-reported type handle into a [`DatatypeHandle`].
#[inline]
pub(crate) fn region_type_handle(raw: u32) -> DatatypeHandle {
    DatatypeHandle::from(raw)
}
