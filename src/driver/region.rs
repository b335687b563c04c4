use super::{Driver, StepResult, TransferCtx, UserState};
use crate::{
    callback::{Count, RawPtr},
    error::DatatypeError,
    handle::DatatypeHandle,
    registry::Strategy,
    slot::{PackSlot, RegionKey, RegionRegistrar, UnpackSlot},
};
use core::ffi::c_void;

/// One (base, length, element-type) triple in a [`RegionPlan`].
#[derive(Clone, Copy, Debug)]
struct RegionEntry {
    base: RawPtr,
    len: usize,
    element_type: DatatypeHandle,
    key: Option<RegionKey>,
}

/// The Region Descriptor Resolver (engine spec §4.3): the ordered list of
/// memory regions a `MemoryRegions` transfer scatters its message across,
/// built once and memoized for the life of the transfer.
#[derive(Debug)]
pub(crate) struct RegionPlan {
    regions: Vec<RegionEntry>,
    total: usize,
}

impl RegionPlan {
    /// Builds the plan by calling `region-count` then `region-list`
    /// exactly once each (engine spec: "Region count must be stable for
    /// the life of the transfer" — the resolver only ever asks once, so
    /// stability only matters if the transport later wants to re-derive
    /// it, which this engine never does).
    fn build(ctx: &TransferCtx<'_>, state: *mut c_void) -> Result<Self, DatatypeError> {
        let callbacks = ctx.descriptor.callbacks();

        // Safety: `state`/`ctx.buf` come from the already-validated
        // transfer init path.
        let n = unsafe { callbacks.region_count(state, ctx.buf, ctx.count)? };

        let mut lens = vec![0usize; n];
        let mut bases: Vec<*mut c_void> = vec![core::ptr::null_mut(); n];
        let mut types = vec![0u32; n];

        // Safety: the three output slices each have `n` elements, matching
        // what `region-list` is told via its `n` parameter.
        unsafe {
            callbacks.region_list(
                state,
                ctx.buf,
                ctx.count,
                n,
                lens.as_mut_ptr(),
                bases.as_mut_ptr(),
                types.as_mut_ptr(),
            )?;
        }

        let mut regions = Vec::with_capacity(n);
        let mut total = 0usize;

        for i in 0..n {
            let element_type = crate::callback::region_type_handle(types[i]);
            if !element_type.is_raw_bytes() {
                let nested = ctx
                    .registry
                    .lookup(element_type)
                    .ok_or(DatatypeError::RegionPlanFailed)?;
                if !matches!(nested.strategy(), Strategy::Primitive { .. }) {
                    return Err(DatatypeError::RegionPlanFailed);
                }
            }

            total += lens[i];
            regions.push(RegionEntry {
                base: RawPtr(bases[i]),
                len: lens[i],
                element_type,
                key: None,
            });
        }

        if let Some(declared) = unsafe { callbacks.query(state, ctx.buf, ctx.count)? } {
            if declared != total {
                return Err(DatatypeError::SizeMismatch);
            }
        }

        Ok(Self { regions, total })
    }

    fn len(&self) -> usize {
        self.regions.len()
    }

    fn get(&self, idx: usize) -> Option<(*const c_void, usize, DatatypeHandle)> {
        self.regions
            .get(idx)
            .map(|r| (r.base.0 as *const c_void, r.len, r.element_type))
    }

    /// Registers every region that hasn't been registered yet (engine spec
    /// §4.3). Safe to call more than once: already-keyed entries are left
    /// alone.
    fn register_with(&mut self, registrar: &mut dyn RegionRegistrar) {
        for region in &mut self.regions {
            if region.key.is_none() {
                region.key = Some(registrar.register_region(region.base.0 as *const c_void, region.len));
            }
        }
    }

    fn key(&self, idx: usize) -> Option<RegionKey> {
        self.regions.get(idx).and_then(|r| r.key)
    }
}

/// Gather/scatter driver for the `MemoryRegions` strategy (engine spec
/// §4.2.2). Ignores the slot entirely: regions are hand-delivered to the
/// transport by base pointer and length, not copied through a fragment
/// buffer.
#[derive(Debug, Default)]
pub(crate) struct RegionDriver {
    plan: Option<RegionPlan>,
    next_index: usize,
}

impl Driver for RegionDriver {
    fn init(
        &mut self,
        ctx: &TransferCtx<'_>,
        user_state: &mut Option<UserState>,
    ) -> Result<Count, DatatypeError> {
        let callbacks = ctx.descriptor.callbacks();
        let state_ptr = unsafe { callbacks.state_init(ctx.descriptor.context(), ctx.buf, ctx.count)? };
        *user_state = Some(if callbacks.state_init.is_some() {
            UserState::Owned(RawPtr(state_ptr))
        } else {
            UserState::Context(RawPtr(state_ptr))
        });

        let plan = RegionPlan::build(ctx, state_ptr)?;
        let total = plan.total;
        self.plan = Some(plan);
        self.next_index = 0;
        Ok(total)
    }

    fn pack_step(
        &mut self,
        _ctx: &TransferCtx<'_>,
        _cursor: Count,
        _total: Count,
        _user_state: &UserState,
        _slot: &mut dyn PackSlot,
    ) -> Result<StepResult, DatatypeError> {
        self.next_region()
    }

    fn unpack_step(
        &mut self,
        _ctx: &TransferCtx<'_>,
        _cursor: Count,
        _total: Count,
        _user_state: &UserState,
        _slot: &mut dyn UnpackSlot,
    ) -> Result<StepResult, DatatypeError> {
        self.next_region()
    }

    fn region(&self, idx: usize) -> Option<(*const c_void, usize, DatatypeHandle)> {
        self.plan.as_ref().and_then(|plan| plan.get(idx))
    }

    fn register_regions(
        &mut self,
        registrar: &mut dyn RegionRegistrar,
    ) -> Result<(), DatatypeError> {
        let plan = self
            .plan
            .as_mut()
            .ok_or(DatatypeError::Internal("region plan missing after init"))?;
        plan.register_with(registrar);
        Ok(())
    }

    fn region_key(&self, idx: usize) -> Option<RegionKey> {
        self.plan.as_ref().and_then(|plan| plan.key(idx))
    }

    fn finish(&mut self) {
        self.plan = None;
    }
}

impl RegionDriver {
    fn next_region(&mut self) -> Result<StepResult, DatatypeError> {
        let plan = self
            .plan
            .as_ref()
            .ok_or(DatatypeError::Internal("region plan missing after init"))?;

        if self.next_index >= plan.len() {
            return Ok(StepResult::Done);
        }

        let idx = self.next_index;
        self.next_index += 1;
        Ok(StepResult::NeedRegion(idx))
    }
}
