use super::{Driver, StepResult, TransferCtx, UserState};
use crate::{
    callback::{Count, RawPtr},
    error::DatatypeError,
    slot::{PackSlot, UnpackSlot},
};

/// User-driven streaming pack/unpack (engine spec §4.2.1). Stateless on
/// the Rust side beyond what the controller already tracks: every call
/// gets `buf`/`count` fresh from `ctx` and the opaque state pointer from
/// `user_state`, exactly as the callback contract promises the user.
#[derive(Debug, Default)]
pub(crate) struct StreamDriver;

impl Driver for StreamDriver {
    fn init(
        &mut self,
        ctx: &TransferCtx<'_>,
        user_state: &mut Option<UserState>,
    ) -> Result<Count, DatatypeError> {
        let callbacks = ctx.descriptor.callbacks();
        // Safety: `ctx.buf` is the caller-supplied transfer buffer, valid
        // for the lifetime of the transfer; `ctx.descriptor` guarantees
        // `state_init` and `query` share that contract.
        let state_ptr = unsafe { callbacks.state_init(ctx.descriptor.context(), ctx.buf, ctx.count)? };
        *user_state = Some(if callbacks.state_init.is_some() {
            UserState::Owned(RawPtr(state_ptr))
        } else {
            UserState::Context(RawPtr(state_ptr))
        });

        let total = unsafe { callbacks.query(state_ptr, ctx.buf, ctx.count)? }.ok_or(
            DatatypeError::Internal("StreamCallbacks descriptor is missing its query callback"),
        )?;
        Ok(total)
    }

    fn pack_step(
        &mut self,
        ctx: &TransferCtx<'_>,
        cursor: Count,
        total: Count,
        user_state: &UserState,
        slot: &mut dyn PackSlot,
    ) -> Result<StepResult, DatatypeError> {
        if cursor == total {
            return Ok(StepResult::Done);
        }

        let capacity = slot.capacity();
        if capacity == 0 {
            return Ok(StepResult::Consumed(0));
        }

        let callbacks = ctx.descriptor.callbacks();
        let dst = slot.as_mut_ptr();
        // Safety: `dst` is valid for writes of `capacity` bytes by the
        // `PackSlot` contract; `state` was produced by `init` above.
        let used = unsafe {
            callbacks.pack_step(
                user_state.as_ptr(),
                ctx.buf,
                ctx.count,
                cursor,
                dst,
                capacity,
            )?
        };

        if used > capacity {
            return Err(DatatypeError::Internal(
                "pack-step reported used greater than dst_capacity",
            ));
        }
        if used == 0 && cursor + used != total {
            return Err(DatatypeError::StalledCallback);
        }

        Ok(StepResult::Consumed(used))
    }

    fn unpack_step(
        &mut self,
        ctx: &TransferCtx<'_>,
        cursor: Count,
        total: Count,
        user_state: &UserState,
        slot: &mut dyn UnpackSlot,
    ) -> Result<StepResult, DatatypeError> {
        if cursor == total {
            return Ok(StepResult::Done);
        }

        let len = slot.len();
        if len == 0 {
            return Ok(StepResult::Consumed(0));
        }
        if cursor + len > total {
            return Err(DatatypeError::SizeMismatch);
        }

        let callbacks = ctx.descriptor.callbacks();
        let src = slot.as_ptr();
        // Safety: `src` is valid for reads of `len` bytes by the
        // `UnpackSlot` contract. Unpack has no `used` out-param: the
        // engine always hands the callback the full incoming fragment and
        // expects it to consume all of it.
        unsafe {
            callbacks.unpack_step(user_state.as_ptr(), ctx.buf, ctx.count, cursor, src, len)?;
        }

        Ok(StepResult::Consumed(len))
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        callback::CallbackSet,
        driver::StepResult,
        error::DatatypeError,
        registry::{RegistryConfig, TypeRegistry},
        slot::{SliceSlot, SliceUnpackSlot},
        transfer::{Direction, TransferController},
    };
    use core::ffi::c_void;
    use std::cell::Cell;
    use std::sync::Arc;

    #[repr(C)]
    struct Elem {
        a: i32,
        b: [f64; 2],
    }

    const ELEM_BYTES: usize = 20;

    fn elem_byte(e: &Elem, idx: usize) -> u8 {
        if idx < 4 {
            e.a.to_le_bytes()[idx]
        } else if idx < 12 {
            e.b[0].to_le_bytes()[idx - 4]
        } else {
            e.b[1].to_le_bytes()[idx - 12]
        }
    }

    fn set_elem_byte(e: &mut Elem, idx: usize, byte: u8) {
        if idx < 4 {
            let mut a = e.a.to_le_bytes();
            a[idx] = byte;
            e.a = i32::from_le_bytes(a);
        } else if idx < 12 {
            let mut b0 = e.b[0].to_le_bytes();
            b0[idx - 4] = byte;
            e.b[0] = f64::from_le_bytes(b0);
        } else {
            let mut b1 = e.b[1].to_le_bytes();
            b1[idx - 12] = byte;
            e.b[1] = f64::from_le_bytes(b1);
        }
    }

    extern "C" fn struct_query(
        _state: *mut c_void,
        _buf: *mut c_void,
        count: usize,
        out: *mut usize,
    ) -> i32 {
        unsafe { *out = count * ELEM_BYTES };
        0
    }

    extern "C" fn struct_pack_step(
        _state: *mut c_void,
        buf: *mut c_void,
        count: usize,
        offset: usize,
        dst: *mut c_void,
        dst_capacity: usize,
        used_out: *mut usize,
    ) -> i32 {
        let elems = unsafe { core::slice::from_raw_parts(buf as *const Elem, count) };
        let total = count * ELEM_BYTES;
        let n = (total - offset).min(dst_capacity);
        let dst_slice = unsafe { core::slice::from_raw_parts_mut(dst as *mut u8, n) };
        for (i, byte) in dst_slice.iter_mut().enumerate() {
            let byte_offset = offset + i;
            *byte = elem_byte(&elems[byte_offset / ELEM_BYTES], byte_offset % ELEM_BYTES);
        }
        unsafe { *used_out = n };
        0
    }

    extern "C" fn struct_unpack_step(
        _state: *mut c_void,
        buf: *mut c_void,
        count: usize,
        offset: usize,
        src: *const c_void,
        src_len: usize,
    ) -> i32 {
        let elems = unsafe { core::slice::from_raw_parts_mut(buf as *mut Elem, count) };
        let src_slice = unsafe { core::slice::from_raw_parts(src as *const u8, src_len) };
        for (i, &byte) in src_slice.iter().enumerate() {
            let byte_offset = offset + i;
            set_elem_byte(
                &mut elems[byte_offset / ELEM_BYTES],
                byte_offset % ELEM_BYTES,
                byte,
            );
        }
        0
    }

    fn struct_callbacks() -> CallbackSet {
        CallbackSet {
            state_init: None,
            state_free: None,
            query: Some(struct_query),
            pack_step: Some(struct_pack_step),
            unpack_step: Some(struct_unpack_step),
            region_count: None,
            region_list: None,
        }
    }

    fn struct_roundtrip(elems: Vec<Elem>, slot_sizes: &[usize]) -> Vec<Elem> {
        let registry = Arc::new(TypeRegistry::new(RegistryConfig::default()));
        let handle = registry
            .register(struct_callbacks(), core::ptr::null_mut(), false)
            .unwrap();

        let mut src = elems;
        let total = src.len() * ELEM_BYTES;
        let mut packed = vec![0u8; total];

        let mut pack_ctrl = TransferController::new(
            registry.clone(),
            handle,
            Direction::Pack,
            src.as_mut_ptr() as *mut _,
            src.len(),
        )
        .unwrap();

        let mut offset = 0;
        for &size in slot_sizes {
            if offset >= total {
                break;
            }
            let end = (offset + size).min(total);
            let mut slot = SliceSlot::new(&mut packed[offset..end]);
            match pack_ctrl.progress_pack(&mut slot).unwrap() {
                StepResult::Consumed(n) => offset += n,
                StepResult::Done => break,
                StepResult::NeedRegion(_) => unreachable!(),
            }
        }
        assert_eq!(offset, total);

        let mut dst: Vec<Elem> = (0..src.len())
            .map(|_| Elem { a: 0, b: [0.0, 0.0] })
            .collect();
        let mut unpack_ctrl = TransferController::new(
            registry,
            handle,
            Direction::Unpack,
            dst.as_mut_ptr() as *mut _,
            dst.len(),
        )
        .unwrap();

        let mut offset = 0;
        for &size in slot_sizes {
            if offset >= total {
                break;
            }
            let end = (offset + size).min(total);
            let mut slot = SliceUnpackSlot::new(&packed[offset..end]);
            match unpack_ctrl.progress_unpack(&mut slot).unwrap() {
                StepResult::Consumed(n) => offset += n,
                StepResult::Done => break,
                StepResult::NeedRegion(_) => unreachable!(),
            }
        }

        dst
    }

    fn make_elems(n: usize) -> Vec<Elem> {
        (0..n)
            .map(|i| Elem {
                a: i as i32,
                b: [0.1 * i as f64, 0.2 * i as f64],
            })
            .collect()
    }

    fn assert_elems_eq(a: &[Elem], b: &[Elem]) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b) {
            assert_eq!(x.a, y.a);
            assert_eq!(x.b, y.b);
        }
    }

    #[test]
    fn struct_of_int_and_two_doubles_even_schedule() {
        let src = make_elems(100);
        let expected = make_elems(100);
        let schedule = [500usize; 4];
        let result = struct_roundtrip(src, &schedule);
        assert_elems_eq(&result, &expected);
    }

    #[test]
    fn struct_of_int_and_two_doubles_uneven_schedule() {
        let src = make_elems(100);
        let expected = make_elems(100);
        let schedule = [37usize; 60];
        let result = struct_roundtrip(src, &schedule);
        assert_elems_eq(&result, &expected);
    }

    const MAX_ELEMS_PER_CALL: usize = 16;

    extern "C" fn throttled_pack_step(
        _state: *mut c_void,
        buf: *mut c_void,
        count: usize,
        offset: usize,
        dst: *mut c_void,
        dst_capacity: usize,
        used_out: *mut usize,
    ) -> i32 {
        let elems = unsafe { core::slice::from_raw_parts(buf as *const Elem, count) };
        let total = count * ELEM_BYTES;
        let max_by_elems = MAX_ELEMS_PER_CALL * ELEM_BYTES;
        let n = (total - offset).min(dst_capacity).min(max_by_elems);
        let dst_slice = unsafe { core::slice::from_raw_parts_mut(dst as *mut u8, n) };
        for (i, byte) in dst_slice.iter_mut().enumerate() {
            let byte_offset = offset + i;
            *byte = elem_byte(&elems[byte_offset / ELEM_BYTES], byte_offset % ELEM_BYTES);
        }
        unsafe { *used_out = n };
        0
    }

    fn throttled_struct_roundtrip(elems: Vec<Elem>, slot_sizes: &[usize]) -> Vec<Elem> {
        let registry = Arc::new(TypeRegistry::new(RegistryConfig::default()));
        let callbacks = CallbackSet {
            pack_step: Some(throttled_pack_step),
            ..struct_callbacks()
        };
        let handle = registry
            .register(callbacks, core::ptr::null_mut(), false)
            .unwrap();

        let mut src = elems;
        let total = src.len() * ELEM_BYTES;
        let mut packed = Vec::new();

        let mut pack_ctrl = TransferController::new(
            registry.clone(),
            handle,
            Direction::Pack,
            src.as_mut_ptr() as *mut _,
            src.len(),
        )
        .unwrap();

        let mut cursor = 0;
        let mut schedule = slot_sizes.iter().cycle();
        while cursor < total {
            let size = *schedule.next().unwrap();
            let mut fragment = vec![0u8; size];
            let mut slot = SliceSlot::new(&mut fragment);
            match pack_ctrl.progress_pack(&mut slot).unwrap() {
                StepResult::Consumed(n) => {
                    packed.extend_from_slice(&fragment[..n]);
                    cursor += n;
                }
                StepResult::Done => break,
                StepResult::NeedRegion(_) => unreachable!(),
            }
        }
        assert_eq!(packed.len(), total);

        let mut dst: Vec<Elem> = (0..src.len())
            .map(|_| Elem { a: 0, b: [0.0, 0.0] })
            .collect();
        let mut unpack_ctrl = TransferController::new(
            registry,
            handle,
            Direction::Unpack,
            dst.as_mut_ptr() as *mut _,
            dst.len(),
        )
        .unwrap();

        let mut offset = 0;
        let mut schedule = slot_sizes.iter().cycle();
        while offset < total {
            let size = (*schedule.next().unwrap()).min(total - offset);
            let end = offset + size;
            let mut slot = SliceUnpackSlot::new(&packed[offset..end]);
            match unpack_ctrl.progress_unpack(&mut slot).unwrap() {
                StepResult::Consumed(n) => offset += n,
                StepResult::Done => break,
                StepResult::NeedRegion(_) => unreachable!(),
            }
        }

        dst
    }

    #[test]
    fn incremental_streaming_random_slot_sizes() {
        bolero::check!().with_type().for_each(|raw_sizes: &Vec<u16>| {
            let sizes: Vec<usize> = raw_sizes
                .iter()
                .map(|&s| 1 + (s as usize % 4096))
                .collect();
            let sizes = if sizes.is_empty() { vec![4096] } else { sizes };

            let src = make_elems(40);
            let expected = make_elems(40);
            let result = throttled_struct_roundtrip(src, &sizes);
            assert_elems_eq(&result, &expected);
            Some(())
        });
    }

    #[repr(C)]
    struct ErrorHarness {
        pack_calls: Cell<u32>,
        free_calls: Cell<u32>,
    }

    extern "C" fn error_query(
        _state: *mut c_void,
        _buf: *mut c_void,
        _count: usize,
        out: *mut usize,
    ) -> i32 {
        unsafe { *out = 10 };
        0
    }

    extern "C" fn error_pack_step(
        state: *mut c_void,
        _buf: *mut c_void,
        _count: usize,
        _offset: usize,
        _dst: *mut c_void,
        _dst_capacity: usize,
        used_out: *mut usize,
    ) -> i32 {
        let harness = unsafe { &*(state as *const ErrorHarness) };
        let calls = harness.pack_calls.get() + 1;
        harness.pack_calls.set(calls);
        if calls == 3 {
            return 1;
        }
        unsafe { *used_out = 1 };
        0
    }

    extern "C" fn error_unpack_step(
        _state: *mut c_void,
        _buf: *mut c_void,
        _count: usize,
        _offset: usize,
        _src: *const c_void,
        _src_len: usize,
    ) -> i32 {
        0
    }

    extern "C" fn error_state_free(state: *mut c_void) -> i32 {
        let harness = unsafe { &*(state as *const ErrorHarness) };
        harness.free_calls.set(harness.free_calls.get() + 1);
        0
    }

    #[test]
    fn pack_step_failure_runs_state_free_exactly_once() {
        let registry = Arc::new(TypeRegistry::new(RegistryConfig::default()));
        let harness = ErrorHarness {
            pack_calls: Cell::new(0),
            free_calls: Cell::new(0),
        };
        let callbacks = CallbackSet {
            state_init: None,
            state_free: Some(error_state_free),
            query: Some(error_query),
            pack_step: Some(error_pack_step),
            unpack_step: Some(error_unpack_step),
            region_count: None,
            region_list: None,
        };
        let handle = registry
            .register(callbacks, &harness as *const _ as *mut c_void, false)
            .unwrap();

        let mut buf = [0u8; 10];
        let mut ctrl = TransferController::new(
            registry,
            handle,
            Direction::Pack,
            buf.as_mut_ptr() as *mut _,
            10,
        )
        .unwrap();

        let mut fragment = [0u8; 1];
        assert_eq!(
            ctrl.progress_pack(&mut SliceSlot::new(&mut fragment)).unwrap(),
            StepResult::Consumed(1)
        );
        assert_eq!(
            ctrl.progress_pack(&mut SliceSlot::new(&mut fragment)).unwrap(),
            StepResult::Consumed(1)
        );
        let err = ctrl
            .progress_pack(&mut SliceSlot::new(&mut fragment))
            .unwrap_err();
        assert_eq!(err, DatatypeError::UserCallback);
        assert_eq!(harness.pack_calls.get(), 3);
        assert_eq!(harness.free_calls.get(), 1);

        assert!(ctrl.progress_pack(&mut SliceSlot::new(&mut fragment)).is_err());
        assert_eq!(harness.pack_calls.get(), 3);
        assert_eq!(harness.free_calls.get(), 1);
    }
}
