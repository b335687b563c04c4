//! Per-transfer pack/unpack state machines: one driver variant per
//! strategy, all exposing the same `step` contract to the
//! [`crate::transfer::TransferController`] (engine spec §4.2).

pub(crate) mod primitive;
pub(crate) mod region;
pub(crate) mod stream;

use crate::{
    callback::{Count, RawPtr},
    error::DatatypeError,
    handle::DatatypeHandle,
    registry::{Descriptor, TypeRegistry},
    slot::{PackSlot, RegionKey, RegionRegistrar, UnpackSlot},
};
use core::ffi::c_void;

/// Outcome of a single driver step. The `Fail` variant from the engine
/// spec is represented as `Err(DatatypeError)` at this boundary instead of
/// a fourth enum case, matching how the rest of the crate threads errors.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StepResult {
    /// Produced or consumed `n` bytes; the controller advances the cursor
    /// by `n`.
    Consumed(usize),
    /// Nothing left to do; the controller marks the transfer complete.
    Done,
    /// Memory-region driver only: the transport must be handed region
    /// `idx` directly. Use [`crate::transfer::TransferController::region`]
    /// to read its `(base, len, type)`.
    NeedRegion(usize),
}

/// The user-state pointer modeled as a tagged variant instead of a bare
/// raw pointer threaded through every call site (per the engine's design
/// notes on opaque user state).
#[derive(Clone, Copy, Debug)]
pub(crate) enum UserState {
    /// No `state-init` callback was supplied; callbacks receive the
    /// registration context pointer directly in its place.
    Context(RawPtr),
    /// The pointer returned by `state-init`.
    Owned(RawPtr),
}

impl UserState {
    #[inline]
    pub(crate) fn as_ptr(&self) -> *mut c_void {
        match self {
            Self::Context(p) | Self::Owned(p) => p.0,
        }
    }

    #[inline]
    pub(crate) fn was_init_called(&self) -> bool {
        matches!(self, Self::Owned(_))
    }
}

/// Bundles the fields every driver needs out of the transfer and registry
/// without repeating them across every method signature.
pub(crate) struct TransferCtx<'a> {
    pub descriptor: &'a Descriptor,
    pub registry: &'a TypeRegistry,
    pub buf: *mut c_void,
    pub count: Count,
}

pub(crate) trait Driver: core::fmt::Debug {
    /// Runs on the `Fresh -> Active` transition: performs state-init (if
    /// present) and any strategy-specific setup (region planning), and
    /// returns the transfer's declared total packed size in bytes.
    fn init(
        &mut self,
        ctx: &TransferCtx<'_>,
        user_state: &mut Option<UserState>,
    ) -> Result<Count, DatatypeError>;

    fn pack_step(
        &mut self,
        ctx: &TransferCtx<'_>,
        cursor: Count,
        total: Count,
        user_state: &UserState,
        slot: &mut dyn PackSlot,
    ) -> Result<StepResult, DatatypeError>;

    fn unpack_step(
        &mut self,
        ctx: &TransferCtx<'_>,
        cursor: Count,
        total: Count,
        user_state: &UserState,
        slot: &mut dyn UnpackSlot,
    ) -> Result<StepResult, DatatypeError>;

    /// Memory-region driver only: returns the `(base, len, type)` triple
    /// for a region index previously surfaced via `StepResult::NeedRegion`.
    fn region(&self, _idx: usize) -> Option<(*const c_void, usize, DatatypeHandle)> {
        None
    }

    /// Eagerly registers this driver's memory regions with the transport
    /// (engine spec §4.3: the resolver may need to register regions with
    /// the NIC before any slots exist). A no-op for strategies that don't
    /// deal in regions.
    fn register_regions(
        &mut self,
        _registrar: &mut dyn RegionRegistrar,
    ) -> Result<(), DatatypeError> {
        Ok(())
    }

    /// Memory-region driver only: the key `register_regions` stored for
    /// region `idx`, if it has run.
    fn region_key(&self, _idx: usize) -> Option<RegionKey> {
        None
    }

    /// Runs on any terminal transition, after `state-free`. Lets the
    /// memory-region driver release its plan (engine spec §4.2.2: "The
    /// region vector is released when the transfer completes").
    fn finish(&mut self) {}
}
