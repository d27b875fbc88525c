//! The native algorithm calls.
//!
//! Each function issues exactly one call against an active model handle with
//! arguments in the order the C signature declares, then translates the
//! return code. Buffers are sized by the caller from the declared [`Shape`].
//!
//! [`Shape`]: crate::output::Shape

use std::ffi::{c_char, c_int, CStr};
use std::ptr;

use crate::error::Result;
use crate::library::NativeApi;
use crate::options::{Algorithm, LaplaceOptions, OptimizeOptions, PathfinderOptions, SampleOptions};
use crate::output::OutputBuffer;
use crate::session::ModelHandle;
use crate::slot::{CallSite, ErrorSlot};

pub const HMC_SAMPLER_VARIABLES: [&str; 7] = [
    "lp__",
    "accept_stat__",
    "stepsize__",
    "treedepth__",
    "n_leapfrog__",
    "divergent__",
    "energy__",
];

/// Diagnostics written by the fixed-parameter sampler (zero free parameters).
pub const FIXED_SAMPLER_VARIABLES: [&str; 2] = ["lp__", "accept_stat__"];

pub const PATHFINDER_VARIABLES: [&str; 2] = ["lp_approx__", "lp__"];

pub const OPTIMIZE_VARIABLES: [&str; 1] = ["lp__"];

pub const LAPLACE_VARIABLES: [&str; 2] = ["log_p__", "log_q__"];

/// Diagnostic prefix followed by the model's own names.
pub(crate) fn labeled(prefix: &[&str], model_names: Vec<String>) -> Vec<String> {
    prefix
        .iter()
        .map(|s| s.to_string())
        .chain(model_names)
        .collect()
}

fn c_str_ptr(value: Option<&CStr>) -> *const c_char {
    value.map_or(ptr::null(), CStr::as_ptr)
}

fn array_ptr(value: Option<&[f64]>) -> *const f64 {
    value.map_or(ptr::null(), <[f64]>::as_ptr)
}

fn array_mut_ptr(value: Option<&mut [f64]>) -> *mut f64 {
    value.map_or(ptr::null_mut(), <[f64]>::as_mut_ptr)
}

pub(crate) struct SampleCall<'a> {
    pub options: &'a SampleOptions,
    pub inits: Option<&'a CStr>,
    pub seed: u32,
    pub num_threads: i32,
    pub init_inv_metric: Option<&'a [f64]>,
    pub metric_out: Option<&'a mut [f64]>,
}

pub(crate) fn sample(
    api: &NativeApi,
    model: ModelHandle,
    call: SampleCall<'_>,
    out: &mut OutputBuffer,
) -> Result<()> {
    let o = call.options;
    let mut slot = ErrorSlot::new();
    let rc = unsafe {
        (api.sample)(
            model.as_ptr(),
            o.num_chains,
            c_str_ptr(call.inits),
            call.seed,
            o.id,
            o.init_radius,
            o.num_warmup,
            o.num_samples,
            o.metric as c_int,
            array_ptr(call.init_inv_metric),
            o.adapt,
            o.delta,
            o.gamma,
            o.kappa,
            o.t0,
            o.init_buffer,
            o.term_buffer,
            o.window,
            o.save_warmup,
            o.stepsize,
            o.stepsize_jitter,
            o.max_depth,
            o.refresh,
            call.num_threads,
            out.as_mut_ptr(),
            out.len(),
            array_mut_ptr(call.metric_out),
            slot.as_out(),
        )
    };
    slot.check(api, rc, CallSite::Invoke(Algorithm::Sample))
}

pub(crate) struct PathfinderCall<'a> {
    pub options: &'a PathfinderOptions,
    pub inits: Option<&'a CStr>,
    pub seed: u32,
    pub num_threads: i32,
}

pub(crate) fn pathfinder(
    api: &NativeApi,
    model: ModelHandle,
    call: PathfinderCall<'_>,
    out: &mut OutputBuffer,
) -> Result<()> {
    let o = call.options;
    let mut slot = ErrorSlot::new();
    let rc = unsafe {
        (api.pathfinder)(
            model.as_ptr(),
            o.num_paths,
            c_str_ptr(call.inits),
            call.seed,
            o.id,
            o.init_radius,
            o.num_draws,
            o.max_history_size,
            o.init_alpha,
            o.tol_obj,
            o.tol_rel_obj,
            o.tol_grad,
            o.tol_rel_grad,
            o.tol_param,
            o.num_iterations,
            o.num_elbo_draws,
            o.num_multi_draws,
            o.calculate_lp,
            o.psis_resample,
            o.refresh,
            call.num_threads,
            out.as_mut_ptr(),
            out.len(),
            slot.as_out(),
        )
    };
    slot.check(api, rc, CallSite::Invoke(Algorithm::Pathfinder))
}

pub(crate) struct OptimizeCall<'a> {
    pub options: &'a OptimizeOptions,
    pub init: Option<&'a CStr>,
    pub seed: u32,
    pub num_threads: i32,
}

pub(crate) fn optimize(
    api: &NativeApi,
    model: ModelHandle,
    call: OptimizeCall<'_>,
    out: &mut OutputBuffer,
) -> Result<()> {
    let o = call.options;
    let mut slot = ErrorSlot::new();
    let rc = unsafe {
        (api.optimize)(
            model.as_ptr(),
            c_str_ptr(call.init),
            call.seed,
            o.id,
            o.init_radius,
            o.algorithm as c_int,
            o.num_iterations,
            o.jacobian,
            o.max_history_size,
            o.init_alpha,
            o.tol_obj,
            o.tol_rel_obj,
            o.tol_grad,
            o.tol_rel_grad,
            o.tol_param,
            o.refresh,
            call.num_threads,
            out.as_mut_ptr(),
            out.len(),
            slot.as_out(),
        )
    };
    slot.check(api, rc, CallSite::Invoke(Algorithm::Optimize))
}

pub(crate) struct LaplaceCall<'a> {
    pub options: &'a LaplaceOptions,
    pub mode_array: Option<&'a [f64]>,
    pub mode_json: Option<&'a CStr>,
    pub seed: u32,
    pub num_threads: i32,
    pub hessian_out: Option<&'a mut [f64]>,
}

pub(crate) fn laplace_sample(
    api: &NativeApi,
    model: ModelHandle,
    call: LaplaceCall<'_>,
    out: &mut OutputBuffer,
) -> Result<()> {
    let o = call.options;
    let mut slot = ErrorSlot::new();
    let rc = unsafe {
        (api.laplace_sample)(
            model.as_ptr(),
            array_ptr(call.mode_array),
            c_str_ptr(call.mode_json),
            call.seed,
            o.num_draws,
            o.jacobian,
            o.calculate_lp,
            o.refresh,
            call.num_threads,
            out.as_mut_ptr(),
            out.len(),
            array_mut_ptr(call.hessian_out),
            slot.as_out(),
        )
    };
    slot.check(api, rc, CallSite::Invoke(Algorithm::Laplace))
}
