//! Scoped lifetime of one native model handle.
//!
//! ```text
//! Unconstructed -> Constructing -> Active -> Destroying -> Destroyed
//!                        |                                    ^
//!                        +---------- (constructor failed) ----+
//! ```
//!
//! A session permits exactly one algorithm invocation. The handle is
//! destroyed right after that invocation returns, whatever its outcome, and
//! a handle the constructor never produced is never destroyed.

use std::ffi::{c_uint, CStr, CString};
use std::fmt;
use std::ptr::{self, NonNull};

use log::debug;

use crate::error::{Result, TinyStanError};
use crate::library::{split_param_names, NativeLibrary};
use crate::slot::{CallSite, ErrorSlot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unconstructed,
    Constructing,
    Active,
    Destroying,
    Destroyed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Unconstructed => "unconstructed",
            SessionState::Constructing => "constructing",
            SessionState::Active => "active",
            SessionState::Destroying => "destroying",
            SessionState::Destroyed => "destroyed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Address of a constructed `tinystan_model`.
///
/// Not `Send`: a handle belongs to the thread of the session that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ModelHandle(NonNull<std::ffi::c_void>);

impl ModelHandle {
    pub fn as_ptr(&self) -> *mut std::ffi::c_void {
        self.0.as_ptr()
    }
}

pub(crate) struct ModelSession<'lib> {
    library: &'lib NativeLibrary,
    handle: Option<ModelHandle>,
    state: SessionState,
}

impl<'lib> ModelSession<'lib> {
    pub fn new(library: &'lib NativeLibrary) -> Self {
        Self {
            library,
            handle: None,
            state: SessionState::Unconstructed,
        }
    }

    /// Run the native constructor with already-encoded data.
    pub(crate) fn construct(&mut self, data: Option<&CStr>, seed: u32) -> Result<()> {
        self.require(SessionState::Unconstructed)?;
        self.state = SessionState::Constructing;

        let api = self.library.api();
        let mut slot = ErrorSlot::new();
        let raw = unsafe {
            (api.create_model)(
                data.map_or(ptr::null(), CStr::as_ptr),
                seed as c_uint,
                slot.as_out(),
            )
        };

        match NonNull::new(raw) {
            Some(handle) => {
                self.handle = Some(ModelHandle(handle));
                self.state = SessionState::Active;
                debug!("constructed model {:p} (seed {seed})", raw);
                Ok(())
            }
            None => {
                self.state = SessionState::Destroyed;
                Err(slot
                    .check(api, 1, CallSite::Construct)
                    .err()
                    .unwrap_or(TinyStanError::Unknown { code: 1 }))
            }
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> SessionState {
        self.state
    }

    fn require(&self, expected: SessionState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(TinyStanError::SessionState {
                state: self.state.as_str(),
                expected: expected.as_str(),
            })
        }
    }

    fn active_handle(&self) -> Result<ModelHandle> {
        self.require(SessionState::Active)?;
        self.handle.ok_or(TinyStanError::SessionState {
            state: self.state.as_str(),
            expected: SessionState::Active.as_str(),
        })
    }

    /// Names of the model's constrained parameters, in output order.
    pub fn param_names(&self) -> Result<Vec<String>> {
        let handle = self.active_handle()?;
        let raw = unsafe { (self.library.api().model_param_names)(handle.as_ptr()) };
        if raw.is_null() {
            return Ok(Vec::new());
        }
        Ok(split_param_names(unsafe { CStr::from_ptr(raw) }))
    }

    /// Number of unconstrained parameters.
    pub fn num_free_params(&self) -> Result<usize> {
        let handle = self.active_handle()?;
        Ok(unsafe { (self.library.api().model_num_free_params)(handle.as_ptr()) })
    }

    /// Run the single invocation this session allows, then destroy the handle.
    pub(crate) fn invoke<T>(&mut self, call: impl FnOnce(ModelHandle) -> Result<T>) -> Result<T> {
        let handle = self.active_handle()?;
        let result = call(handle);
        self.destroy();
        result
    }

    fn destroy(&mut self) {
        if self.state != SessionState::Active {
            return;
        }
        self.state = SessionState::Destroying;
        if let Some(handle) = self.handle.take() {
            unsafe { (self.library.api().destroy_model)(handle.as_ptr()) };
            debug!("destroyed model {:p}", handle.as_ptr());
        }
        self.state = SessionState::Destroyed;
    }
}

impl Drop for ModelSession<'_> {
    fn drop(&mut self) {
        // Early returns between construction and invocation end up here.
        self.destroy();
    }
}

/// Construct a session, hand it to `body`, and destroy it on every exit path.
pub(crate) fn with_session<T>(
    library: &NativeLibrary,
    data: Option<&CString>,
    seed: u32,
    body: impl FnOnce(&mut ModelSession<'_>) -> Result<T>,
) -> Result<T> {
    let mut session = ModelSession::new(library);
    session.construct(data.map(CString::as_c_str), seed)?;
    let result = body(&mut session);
    session.destroy();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, mock_library};

    fn data(text: &str) -> CString {
        CString::new(text).unwrap()
    }

    #[test]
    fn construct_then_invoke_destroys_once() {
        testing::reset();
        let lib = mock_library();
        let mut session = ModelSession::new(&lib);
        assert_eq!(session.state(), SessionState::Unconstructed);

        session.construct(Some(data("{}").as_c_str()), 42).unwrap();
        assert_eq!(session.state(), SessionState::Active);
        assert_eq!(session.param_names().unwrap(), vec!["mu", "theta.1", "theta.2"]);
        assert_eq!(session.num_free_params().unwrap(), 3);

        let value = session.invoke(|_| Ok(5)).unwrap();
        assert_eq!(value, 5);
        assert_eq!(session.state(), SessionState::Destroyed);
        drop(session);

        assert_eq!(testing::created(), 1);
        assert_eq!(testing::destroyed(), 1);
    }

    #[test]
    fn failed_invocation_still_destroys() {
        testing::reset();
        let lib = mock_library();
        let mut session = ModelSession::new(&lib);
        session.construct(None, 1).unwrap();
        let err = session
            .invoke::<()>(|_| Err(TinyStanError::Unknown { code: 3 }))
            .unwrap_err();
        assert!(matches!(err, TinyStanError::Unknown { code: 3 }));
        assert_eq!(session.state(), SessionState::Destroyed);
        assert_eq!(testing::destroyed(), 1);
    }

    #[test]
    fn second_invocation_is_rejected() {
        testing::reset();
        let lib = mock_library();
        let mut session = ModelSession::new(&lib);
        session.construct(None, 1).unwrap();
        session.invoke(|_| Ok(())).unwrap();

        let err = session.invoke(|_| Ok(())).unwrap_err();
        assert!(matches!(err, TinyStanError::SessionState { .. }));
        assert!(session.param_names().is_err());
        assert_eq!(testing::destroyed(), 1);
    }

    #[test]
    fn failed_construction_never_destroys() {
        testing::reset();
        let lib = mock_library();
        let mut session = ModelSession::new(&lib);
        let err = session
            .construct(Some(data(testing::NEGATIVE_N_DATA).as_c_str()), 1)
            .unwrap_err();
        assert!(matches!(err, TinyStanError::Construction { .. }));
        assert!(err.to_string().contains("greater than or equal to 0"));
        assert_eq!(session.state(), SessionState::Destroyed);
        drop(session);

        assert_eq!(testing::created(), 0);
        assert_eq!(testing::destroyed(), 0);
        assert_eq!(testing::errors_freed(), 1);
    }

    #[test]
    fn null_without_error_is_unknown() {
        testing::reset();
        let lib = mock_library();
        let mut session = ModelSession::new(&lib);
        let err = session
            .construct(Some(data(testing::SILENT_FAILURE_DATA).as_c_str()), 1)
            .unwrap_err();
        assert!(matches!(err, TinyStanError::Unknown { code: 1 }));
        assert_eq!(testing::errors_freed(), 0);
    }

    #[test]
    fn dropped_active_session_is_destroyed() {
        testing::reset();
        let lib = mock_library();
        {
            let mut session = ModelSession::new(&lib);
            session.construct(None, 1).unwrap();
        }
        assert_eq!(testing::destroyed(), 1);
    }

    #[test]
    fn reconstruction_is_rejected() {
        testing::reset();
        let lib = mock_library();
        let mut session = ModelSession::new(&lib);
        session.construct(None, 1).unwrap();
        assert!(session.construct(None, 1).is_err());
        assert_eq!(testing::created(), 1);
    }

    #[test]
    fn with_session_destroys_on_early_error() {
        testing::reset();
        let lib = mock_library();
        let err = with_session::<()>(&lib, None, 9, |session| {
            session.num_free_params()?;
            Err(TinyStanError::argument("init_inv_metric", "wrong size"))
        })
        .unwrap_err();
        assert_eq!(err.option(), Some("init_inv_metric"));
        assert_eq!(testing::created(), 1);
        assert_eq!(testing::destroyed(), 1);
    }
}
