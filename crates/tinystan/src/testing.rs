//! In-process stand-ins for the TinyStan C entry points.
//!
//! Counters are thread-local: each test runs on its own thread and the
//! mock entry points are called synchronously on the caller's thread.

use std::cell::RefCell;
use std::ffi::{c_char, c_int, c_uint, CStr, CString};
use std::slice;

use crate::library::{NativeApi, NativeLibrary, PrintCallback, RawError, RawModel};

pub const MOCK_SEPARATOR: u8 = 0x01;

pub const NEGATIVE_N_DATA: &str = r#"{"N": -1, "y": []}"#;
pub const SILENT_FAILURE_DATA: &str = r#"{"silent": true}"#;
pub const EMPTY_MODEL_DATA: &str = r#"{"empty": true}"#;
pub const BAD_INIT: &str = r#"{"mu": "bad"}"#;

#[derive(Debug, Clone, Default)]
pub struct SampleRecord {
    pub num_chains: usize,
    pub inits: Option<Vec<u8>>,
    pub seed: u32,
    pub num_warmup: i32,
    pub num_samples: i32,
    pub metric: i32,
    pub adapt: bool,
    pub save_warmup: bool,
    pub num_threads: i32,
    pub out_size: usize,
    pub has_metric_in: bool,
    pub metric_in_first: Option<f64>,
    pub has_metric_out: bool,
}

#[derive(Debug, Clone, Default)]
pub struct PathfinderRecord {
    pub num_paths: usize,
    pub inits: Option<Vec<u8>>,
    pub out_size: usize,
}

#[derive(Default)]
struct Counters {
    created: usize,
    destroyed: usize,
    errors_freed: usize,
    algorithm_calls: usize,
    print_installed: bool,
    last_sample: Option<SampleRecord>,
    last_pathfinder: Option<PathfinderRecord>,
}

thread_local! {
    static COUNTERS: RefCell<Counters> = RefCell::new(Counters::default());
}

fn with<T>(f: impl FnOnce(&mut Counters) -> T) -> T {
    COUNTERS.with(|c| f(&mut c.borrow_mut()))
}

pub fn reset() {
    with(|c| *c = Counters::default());
}

pub fn created() -> usize {
    with(|c| c.created)
}

pub fn destroyed() -> usize {
    with(|c| c.destroyed)
}

pub fn errors_freed() -> usize {
    with(|c| c.errors_freed)
}

pub fn algorithm_calls() -> usize {
    with(|c| c.algorithm_calls)
}

pub fn print_callback_installed() -> bool {
    with(|c| c.print_installed)
}

pub fn last_sample() -> Option<SampleRecord> {
    with(|c| c.last_sample.clone())
}

pub fn last_pathfinder() -> Option<PathfinderRecord> {
    with(|c| c.last_pathfinder.clone())
}

struct MockModel {
    names: CString,
    num_names: usize,
    num_free: usize,
}

struct MockError {
    message: CString,
    kind: c_int,
}

/// Allocate an error object the way the native side does.
pub fn leak_error(message: &str, kind: c_int) -> RawError {
    let message = CString::new(message).unwrap_or_default();
    Box::into_raw(Box::new(MockError { message, kind })) as RawError
}

unsafe fn fail(err: *mut RawError, message: &str, kind: c_int) -> c_int {
    if !err.is_null() {
        *err = leak_error(message, kind);
    }
    1
}

unsafe fn bytes<'a>(ptr: *const c_char) -> Option<&'a [u8]> {
    if ptr.is_null() {
        None
    } else {
        Some(CStr::from_ptr(ptr).to_bytes())
    }
}

fn contains(haystack: &[u8], needle: &str) -> bool {
    haystack
        .windows(needle.len())
        .any(|w| w == needle.as_bytes())
}

/// Per-chain init entries; a single entry applies to every chain.
fn init_failures(inits: Option<&[u8]>, count: usize) -> Vec<bool> {
    match inits {
        None => vec![false; count],
        Some(raw) => {
            let entries: Vec<&[u8]> = raw.split(|b| *b == MOCK_SEPARATOR).collect();
            if entries.len() == 1 {
                vec![contains(entries[0], "bad"); count]
            } else {
                entries.iter().map(|e| contains(e, "bad")).collect()
            }
        }
    }
}

/// Seed-dependent fraction in [0, 0.1) added to every written value.
fn jitter(seed: c_uint) -> f64 {
    let mut x = u64::from(seed).wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^= x >> 31;
    (x % 1000) as f64 / 10_000.0
}

unsafe extern "C" fn api_version(major: *mut c_int, minor: *mut c_int, patch: *mut c_int) {
    *major = 0;
    *minor = 1;
    *patch = 0;
}

unsafe extern "C" fn separator_char() -> c_char {
    MOCK_SEPARATOR as c_char
}

unsafe extern "C" fn create_model(data: *const c_char, _seed: c_uint, err: *mut RawError) -> RawModel {
    let data = bytes(data).unwrap_or_default();
    if contains(data, "\"N\": -1") {
        fail(
            err,
            "Error in 'bernoulli.stan', line 2, column 2: N is -1, but must be greater than or equal to 0",
            1,
        );
        return std::ptr::null_mut();
    }
    if data.ends_with(b".json") {
        let path = String::from_utf8_lossy(data);
        if !std::path::Path::new(path.as_ref()).exists() {
            fail(err, &format!("Could not open data file {path}"), 1);
            return std::ptr::null_mut();
        }
    }
    if contains(data, "\"silent\"") {
        return std::ptr::null_mut();
    }

    let (names, num_names, num_free) = if contains(data, "\"empty\"") {
        ("", 0, 0)
    } else {
        ("mu,theta.1,theta.2", 3, 3)
    };
    with(|c| c.created += 1);
    Box::into_raw(Box::new(MockModel {
        names: CString::new(names).unwrap_or_default(),
        num_names,
        num_free,
    })) as RawModel
}

unsafe extern "C" fn destroy_model(model: RawModel) {
    assert!(!model.is_null(), "destroy_model called with a null handle");
    drop(Box::from_raw(model as *mut MockModel));
    with(|c| c.destroyed += 1);
}

unsafe extern "C" fn model_param_names(model: RawModel) -> *const c_char {
    (*(model as *const MockModel)).names.as_ptr()
}

unsafe extern "C" fn model_num_free_params(model: RawModel) -> usize {
    (*(model as *const MockModel)).num_free
}

#[allow(clippy::too_many_arguments)]
unsafe extern "C" fn sample(
    model: RawModel,
    num_chains: usize,
    inits: *const c_char,
    seed: c_uint,
    _id: c_uint,
    _init_radius: f64,
    num_warmup: c_int,
    num_samples: c_int,
    metric: c_int,
    init_inv_metric: *const f64,
    adapt: bool,
    _delta: f64,
    _gamma: f64,
    _kappa: f64,
    _t0: f64,
    _init_buffer: c_uint,
    _term_buffer: c_uint,
    _window: c_uint,
    save_warmup: bool,
    _stepsize: f64,
    _stepsize_jitter: f64,
    _max_depth: c_int,
    _refresh: c_int,
    num_threads: c_int,
    out: *mut f64,
    out_size: usize,
    metric_out: *mut f64,
    err: *mut RawError,
) -> c_int {
    let model = &*(model as *const MockModel);
    let inits = bytes(inits);
    with(|c| {
        c.algorithm_calls += 1;
        c.last_sample = Some(SampleRecord {
            num_chains,
            inits: inits.map(<[u8]>::to_vec),
            seed,
            num_warmup,
            num_samples,
            metric,
            adapt,
            save_warmup,
            num_threads,
            out_size,
            has_metric_in: !init_inv_metric.is_null(),
            metric_in_first: (!init_inv_metric.is_null()).then(|| *init_inv_metric),
            has_metric_out: !metric_out.is_null(),
        })
    });

    if init_failures(inits, num_chains).into_iter().any(|bad| bad) {
        return fail(err, "Initialization failed after 100 attempts", 0);
    }

    let width = (if model.num_free == 0 { 2 } else { 7 }) + model.num_names;
    let draws = (num_samples + if save_warmup { num_warmup } else { 0 }) as usize;
    if out_size != num_chains * draws * width {
        return fail(err, "output buffer has the wrong size", 1);
    }

    let out = slice::from_raw_parts_mut(out, out_size);
    let frac = jitter(seed);
    for chain in 0..num_chains {
        for draw in 0..draws {
            for p in 0..width {
                out[(chain * draws + draw) * width + p] =
                    (chain * 1_000_000 + draw * 1_000 + p) as f64 + frac;
            }
        }
    }

    if !metric_out.is_null() {
        let per_chain = if metric == 1 {
            model.num_free * model.num_free
        } else {
            model.num_free
        };
        slice::from_raw_parts_mut(metric_out, num_chains * per_chain).fill(1.0);
    }
    0
}

#[allow(clippy::too_many_arguments)]
unsafe extern "C" fn pathfinder(
    model: RawModel,
    num_paths: usize,
    inits: *const c_char,
    seed: c_uint,
    _id: c_uint,
    _init_radius: f64,
    num_draws: c_int,
    _max_history_size: c_int,
    _init_alpha: f64,
    _tol_obj: f64,
    _tol_rel_obj: f64,
    _tol_grad: f64,
    _tol_rel_grad: f64,
    _tol_param: f64,
    _num_iterations: c_int,
    _num_elbo_draws: c_int,
    num_multi_draws: c_int,
    calculate_lp: bool,
    psis_resample: bool,
    _refresh: c_int,
    _num_threads: c_int,
    out: *mut f64,
    out_size: usize,
    err: *mut RawError,
) -> c_int {
    let model = &*(model as *const MockModel);
    let inits = bytes(inits);
    with(|c| {
        c.algorithm_calls += 1;
        c.last_pathfinder = Some(PathfinderRecord {
            num_paths,
            inits: inits.map(<[u8]>::to_vec),
            out_size,
        })
    });

    if model.num_free == 0 {
        return fail(err, "Model has no parameters", 1);
    }
    let failed = init_failures(inits, num_paths);
    if failed.iter().all(|bad| *bad) {
        return fail(err, "No pathfinder path converged", 0);
    }

    let width = 2 + model.num_names;
    let resample = calculate_lp && psis_resample;
    let rows = if resample {
        num_multi_draws as usize
    } else {
        num_draws as usize * num_paths
    };
    if out_size != rows * width {
        return fail(err, "output buffer has the wrong size", 1);
    }

    let out = slice::from_raw_parts_mut(out, out_size);
    let frac = jitter(seed);
    for row in 0..rows {
        let path = if resample { 0 } else { row / num_draws as usize };
        if !resample && failed.get(path).copied().unwrap_or(false) {
            continue;
        }
        for p in 0..width {
            out[row * width + p] = (row * 1_000 + p) as f64 + frac;
        }
    }
    0
}

#[allow(clippy::too_many_arguments)]
unsafe extern "C" fn optimize(
    model: RawModel,
    init: *const c_char,
    seed: c_uint,
    _id: c_uint,
    _init_radius: f64,
    _algorithm: c_int,
    _num_iterations: c_int,
    _jacobian: bool,
    _max_history_size: c_int,
    _init_alpha: f64,
    _tol_obj: f64,
    _tol_rel_obj: f64,
    _tol_grad: f64,
    _tol_rel_grad: f64,
    _tol_param: f64,
    _refresh: c_int,
    _num_threads: c_int,
    out: *mut f64,
    out_size: usize,
    err: *mut RawError,
) -> c_int {
    let model = &*(model as *const MockModel);
    with(|c| c.algorithm_calls += 1);
    if bytes(init).is_some_and(|b| contains(b, "bad")) {
        return fail(err, "Rejecting initial value", 0);
    }
    if out_size != 1 + model.num_names {
        return fail(err, "output buffer has the wrong size", 1);
    }
    let out = slice::from_raw_parts_mut(out, out_size);
    let frac = jitter(seed);
    for (p, slot) in out.iter_mut().enumerate() {
        *slot = p as f64 + frac;
    }
    0
}

#[allow(clippy::too_many_arguments)]
unsafe extern "C" fn laplace_sample(
    model: RawModel,
    mode_array: *const f64,
    mode_json: *const c_char,
    seed: c_uint,
    num_draws: c_int,
    _jacobian: bool,
    _calculate_lp: bool,
    _refresh: c_int,
    _num_threads: c_int,
    out: *mut f64,
    out_size: usize,
    hessian_out: *mut f64,
    err: *mut RawError,
) -> c_int {
    let model = &*(model as *const MockModel);
    with(|c| c.algorithm_calls += 1);
    if mode_array.is_null() == mode_json.is_null() {
        return fail(err, "exactly one of mode array or mode json is required", 1);
    }
    let width = 2 + model.num_names;
    if out_size != num_draws as usize * width {
        return fail(err, "output buffer has the wrong size", 1);
    }
    let out = slice::from_raw_parts_mut(out, out_size);
    let frac = jitter(seed);
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = i as f64 + frac;
    }
    if !hessian_out.is_null() {
        let n = model.num_free;
        let hessian = slice::from_raw_parts_mut(hessian_out, n * n);
        for (i, slot) in hessian.iter_mut().enumerate() {
            *slot = if i % (n + 1) == 0 { 1.0 } else { 0.0 };
        }
    }
    0
}

unsafe extern "C" fn get_error_message(err: RawError) -> *const c_char {
    (*(err as *const MockError)).message.as_ptr()
}

unsafe extern "C" fn get_error_type(err: RawError) -> c_int {
    (*(err as *const MockError)).kind
}

unsafe extern "C" fn free_error(err: RawError) {
    drop(Box::from_raw(err as *mut MockError));
    with(|c| c.errors_freed += 1);
}

unsafe extern "C" fn set_print_callback(callback: Option<PrintCallback>) {
    with(|c| c.print_installed = callback.is_some());
}

pub fn mock_api() -> NativeApi {
    NativeApi {
        api_version,
        separator_char,
        create_model,
        destroy_model,
        model_param_names,
        model_num_free_params,
        sample,
        pathfinder,
        optimize,
        laplace_sample,
        get_error_message,
        get_error_type,
        free_error,
        set_print_callback,
    }
}

pub fn mock_library() -> NativeLibrary {
    NativeLibrary::in_process(mock_api(), "/mock/bernoulli_model.so")
}
