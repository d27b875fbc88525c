//! Native error slots and their translation into [`TinyStanError`].

use std::ffi::{c_int, CStr};
use std::ptr;

use log::debug;

use crate::error::{NativeErrorKind, TinyStanError};
use crate::library::{NativeApi, RawError};
use crate::options::Algorithm;

/// Which native call a slot was handed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CallSite {
    Construct,
    Invoke(Algorithm),
}

/// An out-parameter the native side fills with a `TinyStanError*` on failure.
///
/// Consumed by [`ErrorSlot::check`], so an error object can be released at
/// most once.
pub(crate) struct ErrorSlot {
    raw: RawError,
}

impl ErrorSlot {
    pub fn new() -> Self {
        Self {
            raw: ptr::null_mut(),
        }
    }

    pub fn as_out(&mut self) -> *mut RawError {
        &mut self.raw
    }

    /// Translate a return code. The slot is only read when `code != 0`.
    pub fn check(self, api: &NativeApi, code: c_int, site: CallSite) -> Result<(), TinyStanError> {
        if code == 0 {
            return Ok(());
        }
        Err(self.translate(api, code, site))
    }

    fn translate(self, api: &NativeApi, code: c_int, site: CallSite) -> TinyStanError {
        if self.raw.is_null() {
            return TinyStanError::Unknown { code };
        }

        let (message, kind) = unsafe {
            let msg = (api.get_error_message)(self.raw);
            let message = if msg.is_null() {
                String::new()
            } else {
                CStr::from_ptr(msg).to_string_lossy().into_owned()
            };
            let kind = NativeErrorKind::from_code((api.get_error_type)(self.raw));
            (api.free_error)(self.raw);
            (message, kind)
        };
        debug!("native {kind} error from {site:?}: {message}");

        match site {
            CallSite::Construct => TinyStanError::Construction { kind, message },
            CallSite::Invoke(algorithm) => TinyStanError::Invocation {
                algorithm,
                kind,
                message,
            },
        }
    }
}
