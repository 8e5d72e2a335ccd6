//! Exercise the InkScribe DLL the way the desktop host calls it.
//!
//! Usage: cargo run --example test_dll -- [font.ttf]

use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

// Pull the bridge in so its exported symbols are linked
use inkscribe_gui_dll as _;

extern "C" {
    fn inkscribe_init_logging() -> i32;

    fn inkscribe_validate_font(path: *const c_char) -> i32;

    fn inkscribe_wrap_json(
        settings_json: *const c_char,
        text: *const c_char,
        out: *mut *mut c_char,
    ) -> i32;

    fn inkscribe_free_string(ptr: *mut c_char);
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    unsafe {
        inkscribe_init_logging();
    }

    println!("Wrapping a paragraph with narrow margins");
    let settings = CString::new(r#"{ "geometry": { "marginLeft": 40, "marginRight": 300 } }"#)?;
    let text = CString::new("Dear diary,\nthe quick brown fox jumps over the lazy dog again and again.")?;

    let mut out: *mut c_char = ptr::null_mut();
    let status = unsafe { inkscribe_wrap_json(settings.as_ptr(), text.as_ptr(), &mut out) };
    if status == 0 && !out.is_null() {
        let json = unsafe { CStr::from_ptr(out).to_string_lossy().into_owned() };
        println!("{}", json);
        unsafe { inkscribe_free_string(out) };
    } else {
        println!("Wrapping failed with code {}", status);
    }

    if let Some(font_path) = std::env::args().nth(1) {
        let path = CString::new(font_path.clone())?;
        let status = unsafe { inkscribe_validate_font(path.as_ptr()) };
        match status {
            0 => println!("{} is a TrueType font", font_path),
            1 => println!("{} is an OpenType font", font_path),
            code => println!("{} was rejected with code {}", font_path, code),
        }
    }

    Ok(())
}
