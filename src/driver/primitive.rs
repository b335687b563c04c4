use super::{Driver, StepResult, TransferCtx, UserState};
use crate::{
    callback::{Count, RawPtr},
    error::DatatypeError,
    registry::Strategy,
    slot::{PackSlot, UnpackSlot},
};

/// Trivial `memcpy` driver for the `Primitive` strategy (engine spec
/// §4.2.3). Stateless: there is no user callback to drive, so it carries
/// no per-transfer fields beyond what the controller already tracks.
#[derive(Debug, Default)]
pub(crate) struct PrimitiveDriver;

impl PrimitiveDriver {
    fn width(descriptor: &crate::registry::Descriptor) -> usize {
        match descriptor.strategy() {
            Strategy::Primitive { width } => width,
            other => unreachable!("PrimitiveDriver used with strategy {other:?}"),
        }
    }
}

impl Driver for PrimitiveDriver {
    fn init(
        &mut self,
        ctx: &TransferCtx<'_>,
        user_state: &mut Option<UserState>,
    ) -> Result<Count, DatatypeError> {
        *user_state = Some(UserState::Context(RawPtr::null()));
        Ok(ctx.count * Self::width(ctx.descriptor))
    }

    fn pack_step(
        &mut self,
        ctx: &TransferCtx<'_>,
        cursor: Count,
        total: Count,
        _user_state: &UserState,
        slot: &mut dyn PackSlot,
    ) -> Result<StepResult, DatatypeError> {
        if cursor == total {
            return Ok(StepResult::Done);
        }

        let n = (total - cursor).min(slot.capacity());
        if n == 0 {
            return Ok(StepResult::Consumed(0));
        }

        let src = unsafe { (ctx.buf as *const u8).add(cursor) };
        unsafe { slot.write_from(src, n) };
        Ok(StepResult::Consumed(n))
    }

    fn unpack_step(
        &mut self,
        ctx: &TransferCtx<'_>,
        cursor: Count,
        total: Count,
        _user_state: &UserState,
        slot: &mut dyn UnpackSlot,
    ) -> Result<StepResult, DatatypeError> {
        if cursor == total {
            return Ok(StepResult::Done);
        }

        let n = (total - cursor).min(slot.len());
        if n == 0 {
            return Ok(StepResult::Consumed(0));
        }

        let dst = unsafe { (ctx.buf as *mut u8).add(cursor) };
        unsafe { slot.read_into(dst, n) };
        Ok(StepResult::Consumed(n))
    }
}
