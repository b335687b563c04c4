//! Owns one in-flight pack or unpack operation: its driver, its callback
//! state, its cursor, and the state machine that governs when callbacks
//! run and when `state-free` fires (engine spec §4.4).

use crate::{
    callback::{Count, RawPtr},
    driver::{
        primitive::PrimitiveDriver, region::RegionDriver, stream::StreamDriver, Driver,
        StepResult, TransferCtx, UserState,
    },
    error::DatatypeError,
    handle::DatatypeHandle,
    registry::{Descriptor, Strategy, TypeRegistry},
    slot::{PackSlot, RegionKey, RegionRegistrar, UnpackSlot},
};
use core::ffi::c_void;
use std::sync::Arc;

/// Whether a transfer is packing the user buffer into the transport or
/// unpacking the transport's bytes into the user buffer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Direction {
    Pack,
    Unpack,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    Fresh,
    Active,
    Complete,
    Failed,
    Cancelled,
}

impl State {
    crate::state::event!(
        activate(Fresh => Active);
        complete(Active => Complete);
        fail(Fresh | Active => Failed);
        cancel(Fresh | Active => Cancelled);
    );
}

fn build_ctx<'a>(
    descriptor: &'a Descriptor,
    registry: &'a TypeRegistry,
    buf: *mut c_void,
    count: Count,
) -> TransferCtx<'a> {
    TransferCtx {
        descriptor,
        registry,
        buf,
        count,
    }
}

fn driver_for(strategy: Strategy) -> Box<dyn Driver> {
    match strategy {
        Strategy::StreamCallbacks => Box::<StreamDriver>::default(),
        Strategy::MemoryRegions => Box::<RegionDriver>::default(),
        Strategy::Primitive { .. } => Box::<PrimitiveDriver>::default(),
    }
}

/// One in-flight pack or unpack operation.
pub struct TransferController {
    registry: Arc<TypeRegistry>,
    descriptor: Arc<Descriptor>,
    direction: Direction,
    buf: RawPtr,
    count: Count,
    state: State,
    cursor: Count,
    total: Option<Count>,
    user_state: Option<UserState>,
    state_free_called: bool,
    driver: Box<dyn Driver>,
}

impl TransferController {
    /// Begins tracking a new transfer. Does no work yet: state-init and
    /// region planning are deferred to the first `progress` call (`Fresh
    /// -> Active`).
    pub fn new(
        registry: Arc<TypeRegistry>,
        handle: DatatypeHandle,
        direction: Direction,
        buf: *mut c_void,
        count: Count,
    ) -> Result<Self, DatatypeError> {
        let descriptor = registry
            .lookup(handle)
            .ok_or(DatatypeError::InvalidArgument("unknown datatype handle"))?;
        let driver = driver_for(descriptor.strategy());

        Ok(Self {
            registry,
            descriptor,
            direction,
            buf: RawPtr(buf),
            count,
            state: State::Fresh,
            cursor: 0,
            total: None,
            user_state: None,
            state_free_called: false,
            driver,
        })
    }

    #[inline]
    pub fn handle(&self) -> DatatypeHandle {
        self.descriptor.handle()
    }

    #[inline]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    #[inline]
    pub fn cursor(&self) -> Count {
        self.cursor
    }

    /// Returns the transfer's declared total packed size. Valid once
    /// state-init has run, or immediately for `Primitive` (engine spec
    /// §4.4).
    pub fn packed_size(&mut self) -> Result<Count, DatatypeError> {
        if let Some(total) = self.total {
            return Ok(total);
        }
        if let Strategy::Primitive { width } = self.descriptor.strategy() {
            let total = self.count * width;
            self.total = Some(total);
            return Ok(total);
        }
        Err(DatatypeError::Internal(
            "packed_size queried before state-init has run",
        ))
    }

    /// Returns the `(base, len, type)` triple for a region index surfaced
    /// via `StepResult::NeedRegion`. Only meaningful for `MemoryRegions`
    /// transfers.
    pub fn region(&self, idx: usize) -> Option<(*const c_void, usize, DatatypeHandle)> {
        self.driver.region(idx)
    }

    /// Eagerly registers a `MemoryRegions` transfer's regions with the
    /// transport (engine spec §4.3), e.g. to pin memory with a NIC before
    /// any slots are available to fill. Runs state-init first if this is
    /// the transfer's first call of any kind. A no-op for strategies that
    /// don't deal in regions.
    pub fn plan_regions(
        &mut self,
        registrar: &mut dyn RegionRegistrar,
    ) -> Result<(), DatatypeError> {
        match self.state {
            State::Failed | State::Cancelled | State::Complete => {
                return Err(DatatypeError::Internal(
                    "plan_regions called on a terminated transfer",
                ));
            }
            State::Fresh => self.activate()?,
            State::Active => {}
        }
        self.driver.register_regions(registrar)
    }

    /// Returns the registrar key stored for region `idx` by a prior
    /// [`Self::plan_regions`] call. Only meaningful for `MemoryRegions`
    /// transfers.
    pub fn region_key(&self, idx: usize) -> Option<RegionKey> {
        self.driver.region_key(idx)
    }

    /// Advances a pack transfer by one fragment.
    pub fn progress_pack(&mut self, slot: &mut dyn PackSlot) -> Result<StepResult, DatatypeError> {
        self.assert_direction(Direction::Pack)?;
        if let Some(early) = self.handle_pre_active(slot.capacity())? {
            return Ok(early);
        }

        let total = self.total.expect("active transfer always knows its total");
        if self.cursor == total {
            self.terminate_complete();
            return Ok(StepResult::Done);
        }
        if slot.capacity() == 0 {
            return Ok(StepResult::Consumed(0));
        }

        let ctx = build_ctx(
            self.descriptor.as_ref(),
            self.registry.as_ref(),
            self.buf.0,
            self.count,
        );
        let user_state = self
            .user_state
            .expect("active transfer always has user_state");
        let result = self.driver.pack_step(&ctx, self.cursor, total, &user_state, slot);
        self.apply_step(total, result)
    }

    /// Advances an unpack transfer by one fragment.
    pub fn progress_unpack(
        &mut self,
        slot: &mut dyn UnpackSlot,
    ) -> Result<StepResult, DatatypeError> {
        self.assert_direction(Direction::Unpack)?;
        if let Some(early) = self.handle_pre_active(slot.len())? {
            return Ok(early);
        }

        let total = self.total.expect("active transfer always knows its total");
        if self.cursor == total {
            self.terminate_complete();
            return Ok(StepResult::Done);
        }
        if slot.len() == 0 {
            return Ok(StepResult::Consumed(0));
        }

        let ctx = build_ctx(
            self.descriptor.as_ref(),
            self.registry.as_ref(),
            self.buf.0,
            self.count,
        );
        let user_state = self
            .user_state
            .expect("active transfer always has user_state");
        let result = self
            .driver
            .unpack_step(&ctx, self.cursor, total, &user_state, slot);
        self.apply_step(total, result)
    }

    /// Idempotent terminal-side-effect runner (engine spec §8: "`finish()`
    /// and `cancel()` are idempotent").
    pub fn finish(&mut self) {
        if matches!(self.state, State::Complete | State::Failed | State::Cancelled) {
            self.run_finalizers();
        }
    }

    /// Forces the transfer to `Cancelled` and releases resources. The
    /// user buffer is left untouched.
    pub fn cancel(&mut self) {
        if self.state.cancel().is_ok() {
            self.run_finalizers();
        }
    }

    fn assert_direction(&self, expected: Direction) -> Result<(), DatatypeError> {
        if self.direction == expected {
            Ok(())
        } else {
            Err(DatatypeError::Internal(
                "progress called with a slot kind that doesn't match this transfer's direction",
            ))
        }
    }

    /// Handles the `Fresh -> Active` transition and the boundary cases
    /// that don't require a driver step at all. Returns `Some(result)`
    /// when the caller should return immediately without stepping the
    /// driver.
    fn handle_pre_active(&mut self, slot_size: usize) -> Result<Option<StepResult>, DatatypeError> {
        match self.state {
            State::Complete => {
                return Ok(Some(if slot_size == 0 {
                    StepResult::Consumed(0)
                } else {
                    StepResult::Done
                }));
            }
            State::Failed | State::Cancelled => {
                return Err(DatatypeError::Internal(
                    "progress called on a terminated transfer",
                ));
            }
            State::Fresh => {
                self.activate()?;
            }
            State::Active => {}
        }
        Ok(None)
    }

    /// Runs the `Fresh -> Active` transition: state-init, then whatever
    /// strategy-specific setup the driver needs (region planning for
    /// `MemoryRegions`). Shared by `handle_pre_active` and
    /// [`Self::plan_regions`], which may need to activate a transfer before
    /// any slot has been offered.
    fn activate(&mut self) -> Result<(), DatatypeError> {
        let ctx = build_ctx(
            self.descriptor.as_ref(),
            self.registry.as_ref(),
            self.buf.0,
            self.count,
        );
        match self.driver.init(&ctx, &mut self.user_state) {
            Ok(total) => {
                self.total = Some(total);
                self.state
                    .activate()
                    .expect("Fresh -> Active is always a valid transition");
                #[cfg(feature = "tracing")]
                tracing::debug!(
                    handle = ?self.descriptor.handle(),
                    total,
                    "datatype transfer active"
                );
                Ok(())
            }
            Err(e) => {
                self.terminate_failed();
                Err(e)
            }
        }
    }

    fn apply_step(
        &mut self,
        total: Count,
        result: Result<StepResult, DatatypeError>,
    ) -> Result<StepResult, DatatypeError> {
        let step = match result {
            Ok(step) => step,
            Err(e) => {
                self.terminate_failed();
                return Err(e);
            }
        };

        match step {
            StepResult::Consumed(n) => {
                if self.advance_cursor(total, n).is_err() {
                    return Err(DatatypeError::SizeMismatch);
                }
                if self.cursor == total {
                    self.terminate_complete();
                }
                Ok(StepResult::Consumed(n))
            }
            StepResult::NeedRegion(idx) => {
                let (_, len, _) = self.driver.region(idx).ok_or_else(|| {
                    self.terminate_failed();
                    DatatypeError::Internal("NeedRegion index missing from region plan")
                })?;
                if self.advance_cursor(total, len).is_err() {
                    return Err(DatatypeError::SizeMismatch);
                }
                if self.cursor == total {
                    self.terminate_complete();
                }
                Ok(StepResult::NeedRegion(idx))
            }
            StepResult::Done => {
                if self.cursor != total {
                    self.terminate_failed();
                    return Err(DatatypeError::SizeMismatch);
                }
                self.terminate_complete();
                Ok(StepResult::Done)
            }
        }
    }

    fn advance_cursor(&mut self, total: Count, n: Count) -> Result<(), ()> {
        let new_cursor = self.cursor + n;
        if new_cursor > total {
            self.terminate_failed();
            return Err(());
        }
        self.cursor = new_cursor;
        Ok(())
    }

    fn terminate_complete(&mut self) {
        if self.state.complete().is_ok() {
            #[cfg(feature = "tracing")]
            tracing::debug!(handle = ?self.descriptor.handle(), "datatype transfer complete");
            self.run_finalizers();
        }
    }

    fn terminate_failed(&mut self) {
        if self.state.fail().is_ok() {
            #[cfg(feature = "tracing")]
            tracing::warn!(handle = ?self.descriptor.handle(), "datatype transfer failed");
            self.run_finalizers();
        }
    }

    /// Finalizer ordering is fixed (engine spec §7): release any
    /// outstanding region plan, then run `state-free` exactly once, then
    /// drop the reference to the user buffer.
    fn run_finalizers(&mut self) {
        self.driver.finish();

        if !self.state_free_called {
            if let Some(user_state) = self.user_state {
                if user_state.was_init_called() {
                    let callbacks = self.descriptor.callbacks();
                    // Safety: `user_state` was produced by this transfer's
                    // own `state-init` call and has not been freed before.
                    let _ = unsafe { callbacks.state_free(user_state.as_ptr()) };
                }
            }
            self.state_free_called = true;
        }

        self.buf = RawPtr::null();
    }
}

impl Drop for TransferController {
    fn drop(&mut self) {
        // A dropped transfer that never reached a terminal state is
        // treated the same as an explicit cancel: state-free must still
        // run exactly once (invariant I5).
        if !matches!(self.state, State::Complete | State::Failed | State::Cancelled) {
            self.cancel();
        }
    }
}
