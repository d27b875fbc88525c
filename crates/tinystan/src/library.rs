//! Native library loading and entry-point resolution.
//!
//! Every symbol the binding needs is resolved once, when the library is
//! opened, into a [`NativeApi`] table of typed function pointers. A library
//! that lacks any of them is rejected up front with
//! [`TinyStanError::Symbol`].

use std::ffi::{c_char, c_int, c_uint, c_void, CStr};
use std::path::{Path, PathBuf};

use libloading::Library;
use log::{debug, info, warn};

use crate::error::{Result, TinyStanError};

/// Opaque `tinystan_model*`.
pub(crate) type RawModel = *mut c_void;
/// Opaque `TinyStanError*`.
pub(crate) type RawError = *mut c_void;

/// Signature of the callback installed with `tinystan_set_print_callback`.
pub type PrintCallback = unsafe extern "C" fn(msg: *const c_char, len: usize, is_error: bool);

pub(crate) type ApiVersionFn = unsafe extern "C" fn(*mut c_int, *mut c_int, *mut c_int);
pub(crate) type SeparatorFn = unsafe extern "C" fn() -> c_char;
pub(crate) type CreateModelFn = unsafe extern "C" fn(*const c_char, c_uint, *mut RawError) -> RawModel;
pub(crate) type DestroyModelFn = unsafe extern "C" fn(RawModel);
pub(crate) type ParamNamesFn = unsafe extern "C" fn(RawModel) -> *const c_char;
pub(crate) type NumFreeParamsFn = unsafe extern "C" fn(RawModel) -> usize;
pub(crate) type ErrorMessageFn = unsafe extern "C" fn(RawError) -> *const c_char;
pub(crate) type ErrorTypeFn = unsafe extern "C" fn(RawError) -> c_int;
pub(crate) type FreeErrorFn = unsafe extern "C" fn(RawError);
pub(crate) type SetPrintCallbackFn = unsafe extern "C" fn(Option<PrintCallback>);

pub(crate) type SampleFn = unsafe extern "C" fn(
    RawModel,
    usize,         // num_chains
    *const c_char, // inits
    c_uint,        // seed
    c_uint,        // id
    f64,           // init_radius
    c_int,         // num_warmup
    c_int,         // num_samples
    c_int,         // metric
    *const f64,    // init_inv_metric
    bool,          // adapt
    f64,           // delta
    f64,           // gamma
    f64,           // kappa
    f64,           // t0
    c_uint,        // init_buffer
    c_uint,        // term_buffer
    c_uint,        // window
    bool,          // save_warmup
    f64,           // stepsize
    f64,           // stepsize_jitter
    c_int,         // max_depth
    c_int,         // refresh
    c_int,         // num_threads
    *mut f64,      // out
    usize,         // out_size
    *mut f64,      // metric_out
    *mut RawError,
) -> c_int;

pub(crate) type PathfinderFn = unsafe extern "C" fn(
    RawModel,
    usize,         // num_paths
    *const c_char, // inits
    c_uint,        // seed
    c_uint,        // id
    f64,           // init_radius
    c_int,         // num_draws
    c_int,         // max_history_size
    f64,           // init_alpha
    f64,           // tol_obj
    f64,           // tol_rel_obj
    f64,           // tol_grad
    f64,           // tol_rel_grad
    f64,           // tol_param
    c_int,         // num_iterations
    c_int,         // num_elbo_draws
    c_int,         // num_multi_draws
    bool,          // calculate_lp
    bool,          // psis_resample
    c_int,         // refresh
    c_int,         // num_threads
    *mut f64,      // out
    usize,         // out_size
    *mut RawError,
) -> c_int;

pub(crate) type OptimizeFn = unsafe extern "C" fn(
    RawModel,
    *const c_char, // init
    c_uint,        // seed
    c_uint,        // id
    f64,           // init_radius
    c_int,         // algorithm
    c_int,         // num_iterations
    bool,          // jacobian
    c_int,         // max_history_size
    f64,           // init_alpha
    f64,           // tol_obj
    f64,           // tol_rel_obj
    f64,           // tol_grad
    f64,           // tol_rel_grad
    f64,           // tol_param
    c_int,         // refresh
    c_int,         // num_threads
    *mut f64,      // out
    usize,         // out_size
    *mut RawError,
) -> c_int;

pub(crate) type LaplaceFn = unsafe extern "C" fn(
    RawModel,
    *const f64,    // mode array
    *const c_char, // mode json
    c_uint,        // seed
    c_int,         // num_draws
    bool,          // jacobian
    bool,          // calculate_lp
    c_int,         // refresh
    c_int,         // num_threads
    *mut f64,      // out
    usize,         // out_size
    *mut f64,      // hessian_out
    *mut RawError,
) -> c_int;

/// Typed table of every entry point the binding calls.
#[derive(Clone, Copy)]
pub(crate) struct NativeApi {
    pub api_version: ApiVersionFn,
    pub separator_char: SeparatorFn,
    pub create_model: CreateModelFn,
    pub destroy_model: DestroyModelFn,
    pub model_param_names: ParamNamesFn,
    pub model_num_free_params: NumFreeParamsFn,
    pub sample: SampleFn,
    pub pathfinder: PathfinderFn,
    pub optimize: OptimizeFn,
    pub laplace_sample: LaplaceFn,
    pub get_error_message: ErrorMessageFn,
    pub get_error_type: ErrorTypeFn,
    pub free_error: FreeErrorFn,
    pub set_print_callback: SetPrintCallbackFn,
}

impl NativeApi {
    /// Resolve the complete table from an opened library.
    ///
    /// # Safety
    ///
    /// `library` must be a TinyStan model library whose exports match the
    /// declared signatures.
    unsafe fn resolve(library: &Library, path: &Path) -> Result<Self> {
        Ok(Self {
            api_version: symbol(library, path, "tinystan_api_version")?,
            separator_char: symbol(library, path, "tinystan_separator_char")?,
            create_model: symbol(library, path, "tinystan_create_model")?,
            destroy_model: symbol(library, path, "tinystan_destroy_model")?,
            model_param_names: symbol(library, path, "tinystan_model_param_names")?,
            model_num_free_params: symbol(library, path, "tinystan_model_num_free_params")?,
            sample: symbol(library, path, "tinystan_sample")?,
            pathfinder: symbol(library, path, "tinystan_pathfinder")?,
            optimize: symbol(library, path, "tinystan_optimize")?,
            laplace_sample: symbol(library, path, "tinystan_laplace_sample")?,
            get_error_message: symbol(library, path, "tinystan_get_error_message")?,
            get_error_type: symbol(library, path, "tinystan_get_error_type")?,
            free_error: symbol(library, path, "tinystan_free_stan_error")?,
            set_print_callback: symbol(library, path, "tinystan_set_print_callback")?,
        })
    }
}

unsafe fn symbol<T: Copy>(library: &Library, path: &Path, name: &'static str) -> Result<T> {
    library
        .get::<T>(name.as_bytes())
        .map(|sym| *sym)
        .map_err(|source| TinyStanError::Symbol {
            path: path.to_path_buf(),
            symbol: name,
            source,
        })
}

/// A loaded TinyStan model library.
pub struct NativeLibrary {
    api: NativeApi,
    separator: u8,
    path: PathBuf,
    // Keeps the image mapped for as long as `api` may be called.
    _library: Option<Library>,
}

impl NativeLibrary {
    /// Open a compiled model library and resolve its entry points.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let library = unsafe { Library::new(path) }.map_err(|source| TinyStanError::Load {
            path: path.to_path_buf(),
            source,
        })?;
        let api = unsafe { NativeApi::resolve(&library, path)? };
        let separator = unsafe { (api.separator_char)() } as u8;

        debug!(
            "loaded {} (separator byte {:#04x})",
            path.display(),
            separator
        );

        Ok(Self {
            api,
            separator,
            path: path.to_path_buf(),
            _library: Some(library),
        })
    }

    /// Wrap a table of entry points that live in the current process.
    #[cfg(test)]
    pub(crate) fn in_process(api: NativeApi, path: impl Into<PathBuf>) -> Self {
        let separator = unsafe { (api.separator_char)() } as u8;
        Self {
            api,
            separator,
            path: path.into(),
            _library: None,
        }
    }

    pub(crate) fn api(&self) -> &NativeApi {
        &self.api
    }

    /// Byte used to join multiple JSON payloads into one string.
    pub fn separator(&self) -> u8 {
        self.separator
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Version of the TinyStan C API the library was built against.
    pub fn api_version(&self) -> (i32, i32, i32) {
        let (mut major, mut minor, mut patch) = (0, 0, 0);
        unsafe { (self.api.api_version)(&mut major, &mut minor, &mut patch) };
        (major, minor, patch)
    }

    /// Route the library's print output into the `log` facade.
    pub fn capture_prints(&self) {
        unsafe { (self.api.set_print_callback)(Some(forward_print)) };
        debug!("installed print callback for {}", self.path.display());
    }
}

impl std::fmt::Debug for NativeLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeLibrary")
            .field("path", &self.path)
            .field("separator", &self.separator)
            .finish()
    }
}

/// Platform file name of a compiled model, e.g. `bernoulli_model.so`.
pub fn model_library_name(stem: &str) -> String {
    // TinyStan's makefile emits `.so` on every platform.
    format!("{stem}_model.so")
}

/// Split the comma-joined name list returned by the native side.
pub(crate) fn split_param_names(raw: &CStr) -> Vec<String> {
    let names = raw.to_string_lossy();
    let names = names.trim();
    if names.is_empty() {
        return Vec::new();
    }
    names.split(',').map(str::to_string).collect()
}

unsafe extern "C" fn forward_print(msg: *const c_char, len: usize, is_error: bool) {
    if msg.is_null() {
        return;
    }
    let bytes = std::slice::from_raw_parts(msg as *const u8, len);
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim_end_matches('\n');
    if is_error {
        warn!(target: "tinystan::stan", "{text}");
    } else {
        info!(target: "tinystan::stan", "{text}");
    }
}
