//! The C-ABI-style registration surface (engine spec §6). This is the one
//! place the typed internal `Result<_, DatatypeError>` flattens down to a
//! plain integer status code so callers in any language can register
//! types without linking against Rust's panic/unwind machinery.

use crate::{
    callback::{
        CallbackSet, PackStepFn, QueryFn, RegionCountFn, RegionListFn, StateFreeFn, StateInitFn,
        UnpackStepFn,
    },
    error::ErrorCode,
    handle::DatatypeHandle,
    registry::{RegistryConfig, TypeRegistry},
};
use core::ffi::c_void;
use std::sync::OnceLock;

static REGISTRY: OnceLock<TypeRegistry> = OnceLock::new();

fn registry() -> &'static TypeRegistry {
    REGISTRY.get_or_init(|| TypeRegistry::new(RegistryConfig::default()))
}

/// Registers a `StreamCallbacks` or `MemoryRegions` type.
///
/// Inputs are the seven optional callback pointers in the order the
/// external interface declares them, an opaque `context` pointer, an
/// `in_order` flag (`0` or `1`), and an out-pointer for the resulting
/// handle. Returns `0` on success and a non-zero [`ErrorCode`] otherwise.
///
/// # Safety
/// Every non-null callback pointer must be safely callable with the
/// signatures declared in [`crate::callback`] for as long as any transfer
/// referencing the returned handle is live. `handle_out` must be valid for
/// a single `u32` write.
#[no_mangle]
pub unsafe extern "C" fn mpicd_type_create_custom(
    state_init: Option<StateInitFn>,
    state_free: Option<StateFreeFn>,
    query: Option<QueryFn>,
    pack_step: Option<PackStepFn>,
    unpack_step: Option<UnpackStepFn>,
    region_count: Option<RegionCountFn>,
    region_list: Option<RegionListFn>,
    context: *mut c_void,
    in_order: i32,
    handle_out: *mut u32,
) -> i32 {
    let callbacks = CallbackSet {
        state_init,
        state_free,
        query,
        pack_step,
        unpack_step,
        region_count,
        region_list,
    };

    match registry().register(callbacks, context, in_order != 0) {
        Ok(handle) => {
            *handle_out = handle.as_raw();
            ErrorCode::Success.as_raw()
        }
        Err(e) => ErrorCode::from(e).as_raw(),
    }
}

/// Registers the degenerate `Primitive` strategy: fixed-width byte runs
/// served by `memcpy` (engine spec §4.2.3). `width` is the element size in
/// bytes.
///
/// # Safety
/// `handle_out` must be valid for a single `u32` write.
#[no_mangle]
pub unsafe extern "C" fn mpicd_type_create_primitive(width: usize, handle_out: *mut u32) -> i32 {
    match registry().register_primitive(width) {
        Ok(handle) => {
            *handle_out = handle.as_raw();
            ErrorCode::Success.as_raw()
        }
        Err(e) => ErrorCode::from(e).as_raw(),
    }
}

/// Releases a previously registered handle. Fails with
/// [`ErrorCode::InUse`] if any transfer still references it.
#[no_mangle]
pub extern "C" fn mpicd_type_free(handle: u32) -> i32 {
    match registry().release(DatatypeHandle::from(handle)) {
        Ok(()) => ErrorCode::Success.as_raw(),
        Err(e) => ErrorCode::from(e).as_raw(),
    }
}

/// Returns a reference to the process-wide registry the C-ABI functions
/// above share, for Rust callers that want to drive transfers directly
/// instead of going through the flattened integer-status surface.
pub fn shared_registry() -> &'static TypeRegistry {
    registry()
}
