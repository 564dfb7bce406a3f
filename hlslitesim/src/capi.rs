// capi.rs — C ABI runtime entry points
//
// The symbols instrumented kernels call when they are compiled natively and
// linked against this crate's staticlib. A native kernel has no handle to
// pass around, so these shims share one process-wide `SimContext` whose sink
// is opened from `HLSLITESIM_TRACE_FD` on first use.
//
// Protocol violations print the error and abort, like a failed assertion in
// the hardware model.

#![allow(non_snake_case)]

use std::borrow::Cow;
use std::ffi::{c_char, c_void, CStr};
use std::sync::LazyLock;

use parking_lot::Mutex;

use crate::sim::{SimContext, SimError};

static CONTEXT: LazyLock<Mutex<SimContext>> =
    LazyLock::new(|| Mutex::new(SimContext::from_env()));

fn with_context<T>(f: impl FnOnce(&mut SimContext) -> Result<T, SimError>) -> T {
    match f(&mut CONTEXT.lock()) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("hlslitesim: {}", e);
            std::process::abort()
        }
    }
}

/// # Safety
/// `p` must be null or point to a NUL-terminated string.
unsafe fn text<'a>(p: *const c_char) -> Cow<'a, str> {
    if p.is_null() {
        Cow::Borrowed("")
    } else {
        CStr::from_ptr(p).to_string_lossy()
    }
}

fn addr<T>(p: *const T) -> u64 {
    p as usize as u64
}

// ── Block and loop tracing ─────────────────────────────────────────────────

/// # Safety
/// `func_name` must be null or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn __hlslitesim_trace_bb(func_name: *const c_char, bb_id: u32) {
    let name = text(func_name);
    with_context(|ctx| {
        ctx.trace_bb(&name, bb_id);
        Ok(())
    })
}

/// # Safety
/// `loop_name` must be null or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn __hlslitesim_trace_loop(loop_name: *const c_char, trip_count: u32) {
    let name = text(loop_name);
    with_context(|ctx| {
        ctx.trace_loop(&name, trip_count);
        Ok(())
    })
}

/// # Safety
/// `func_name` must be null or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn __hlslitesim_trace_loop_bb(func_name: *const c_char, bb_id: u32) {
    let name = text(func_name);
    with_context(|ctx| {
        ctx.trace_loop_bb(&name, bb_id);
        Ok(())
    })
}

/// # Safety
/// `loop_name` must be null or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn __hlslitesim_trace_end_loop_blocks(
    loop_name: *const c_char,
    trip_count: u32,
) {
    let name = text(loop_name);
    with_context(|ctx| {
        ctx.trace_end_loop_blocks(&name, trip_count);
        Ok(())
    })
}

/// # Safety
/// `loop_name` must be null or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn __hlslitesim_trace_end_loop(loop_name: *const c_char, trip_count: u32) {
    let name = text(loop_name);
    with_context(|ctx| {
        ctx.trace_end_loop(&name, trip_count);
        Ok(())
    })
}

// ── FIFO channels ──────────────────────────────────────────────────────────

macro_rules! fifo_entry_points {
    ($($read:ident, $write:ident: $t:ty;)*) => {$(
        #[no_mangle]
        pub extern "C" fn $read(fifo: *mut $t) -> $t {
            with_context(|ctx| ctx.fifo_read(addr(fifo))) as $t
        }

        #[no_mangle]
        pub extern "C" fn $write(fifo: *mut $t, value: $t) -> $t {
            with_context(|ctx| {
                ctx.fifo_write(addr(fifo), value as u64);
                Ok(value)
            })
        }
    )*};
}

fifo_entry_points! {
    _autotb_FifoRead_i8, _autotb_FifoWrite_i8: u8;
    _autotb_FifoRead_i16, _autotb_FifoWrite_i16: u16;
    _autotb_FifoRead_i32, _autotb_FifoWrite_i32: u32;
    _autotb_FifoRead_i64, _autotb_FifoWrite_i64: u64;
}

// ── AXI windows ────────────────────────────────────────────────────────────

#[no_mangle]
pub extern "C" fn __hlslitesim_set_read_req(base: *mut c_void, stride: u32, count: u32) {
    with_context(|ctx| {
        ctx.set_read_req(addr(base), stride, count);
        Ok(())
    })
}

#[no_mangle]
pub extern "C" fn __hlslitesim_set_write_req(base: *mut c_void, stride: u32, count: u32) {
    with_context(|ctx| {
        ctx.set_write_req(addr(base), stride, count);
        Ok(())
    })
}

/// Returns the element address for this access.
#[no_mangle]
pub extern "C" fn __hlslitesim_update_read_req(base: *mut c_void) -> *mut c_void {
    let at = with_context(|ctx| ctx.update_read_req(addr(base)));
    base.cast::<u8>().wrapping_add((at - addr(base)) as usize).cast()
}

#[no_mangle]
pub extern "C" fn __hlslitesim_update_write_req(base: *mut c_void) -> *mut c_void {
    let at = with_context(|ctx| ctx.update_write_req(addr(base)));
    base.cast::<u8>().wrapping_add((at - addr(base)) as usize).cast()
}

#[no_mangle]
pub extern "C" fn __hlslitesim_write_resp(base: *mut c_void) {
    with_context(|ctx| {
        ctx.write_resp(addr(base));
        Ok(())
    })
}

// ── Synthesis directives ───────────────────────────────────────────────────

/// # Safety
/// String arguments must be null or NUL-terminated.
#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn _ssdm_op_SpecChannel(
    channel_name: *const c_char,
    _kind: u32,
    _a: *const u8,
    _b: *const u8,
    depth: u32,
    _depth_again: u32,
    channel: *mut c_void,
    _channel_again: *mut c_void,
) -> u32 {
    let name = text(channel_name);
    with_context(|ctx| {
        ctx.spec_channel(addr(channel), &name, depth);
        Ok(0)
    })
}

/// # Safety
/// String arguments must be null or NUL-terminated.
#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn _ssdm_op_SpecInterface(
    address: *mut c_void,
    kind: *const c_char,
    _a: u32,
    _b: u32,
    _c: *const c_char,
    latency: u32,
    _d: u32,
    name: *const c_char,
    _e: *const c_char,
    _f: *const c_char,
    _g: u32,
    _h: u32,
    _i: u32,
    _j: u32,
    _k: *const c_char,
    _l: *const c_char,
) {
    let kind = text(kind);
    let name = text(name);
    with_context(|ctx| {
        ctx.spec_interface(addr(address), &kind, &name, latency);
        Ok(())
    })
}

#[no_mangle]
pub extern "C" fn _ssdm_SpecMemSelectRead() {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_round_trip_through_c_abi() {
        let mut chan = 0u32;
        let p: *mut u32 = &mut chan;
        assert_eq!(_autotb_FifoWrite_i32(p, 5), 5);
        assert_eq!(_autotb_FifoWrite_i32(p, 6), 6);
        assert_eq!(_autotb_FifoRead_i32(p), 5);
        assert_eq!(_autotb_FifoRead_i32(p), 6);
    }

    #[test]
    fn axi_window_yields_element_addresses() {
        let mut data = [0u32; 4];
        let base = data.as_mut_ptr().cast::<c_void>();
        __hlslitesim_set_read_req(base, 4, 4);
        let first = __hlslitesim_update_read_req(base);
        let second = __hlslitesim_update_read_req(base);
        assert_eq!(first, base);
        assert_eq!(second as usize - base as usize, 4);
    }

    #[test]
    fn null_strings_read_as_empty() {
        assert_eq!(unsafe { text(std::ptr::null()) }, "");
    }
}
