//! A module that only exports its load hook.

#[repr(C)]
pub struct ExtSlice {
    pub ptr: *const u8,
    pub len: usize,
}

#[no_mangle]
pub unsafe extern "C" fn extproxy_on_load(_host: *const std::ffi::c_void, _config: ExtSlice) -> i32 {
    0
}
