//! Per-algorithm configuration.
//!
//! Each algorithm has its own option struct with the defaults of the TinyStan
//! reference clients. `validate` runs every bound host-side so that common
//! misuse is reported as [`TinyStanError::Argument`] before any native call.

use std::fmt;

use crate::encode::{Inits, JsonInput};
use crate::error::{Result, TinyStanError};

/// Native procedure being invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    Sample,
    Pathfinder,
    Optimize,
    Laplace,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Sample => "sample",
            Algorithm::Pathfinder => "pathfinder",
            Algorithm::Optimize => "optimize",
            Algorithm::Laplace => "laplace_sample",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A lower (and sometimes upper) bound on a numeric option.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Bound {
    /// `value >= n`
    AtLeast(i64),
    /// `value > 0`
    Positive,
    /// `value >= 0`
    NonNegative,
    /// `0 < value < 1`
    OpenUnit,
    /// `0 <= value <= 1`
    ClosedUnit,
    /// `-1` (native default) or a positive count.
    ThreadCount,
}

impl Bound {
    pub fn holds(&self, value: f64) -> bool {
        match *self {
            Bound::AtLeast(n) => value >= n as f64,
            Bound::Positive => value > 0.0,
            Bound::NonNegative => value >= 0.0,
            Bound::OpenUnit => value > 0.0 && value < 1.0,
            Bound::ClosedUnit => (0.0..=1.0).contains(&value),
            Bound::ThreadCount => value == -1.0 || value >= 1.0,
        }
    }

    pub fn describe(&self) -> String {
        match *self {
            Bound::AtLeast(0) => "must be non-negative".to_string(),
            Bound::AtLeast(n) => format!("must be at least {n}"),
            Bound::Positive => "must be positive".to_string(),
            Bound::NonNegative => "must be non-negative".to_string(),
            Bound::OpenUnit => "must be strictly between 0 and 1".to_string(),
            Bound::ClosedUnit => "must be between 0 and 1".to_string(),
            Bound::ThreadCount => "must be -1 or a positive thread count".to_string(),
        }
    }

    /// Check `value` for the option named `option`.
    pub fn check(&self, option: &'static str, value: f64) -> Result<()> {
        if self.holds(value) {
            Ok(())
        } else {
            Err(TinyStanError::argument(
                option,
                format!("{}, got {value}", self.describe()),
            ))
        }
    }
}

/// HMC metric, encoded as the integer the native side expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Metric {
    Unit = 0,
    Dense = 1,
    #[default]
    Diagonal = 2,
}

impl Metric {
    /// Shape of one chain's metric for a model with `n` free parameters.
    pub fn shape(&self, n: usize) -> Vec<usize> {
        match self {
            Metric::Dense => vec![n, n],
            Metric::Unit | Metric::Diagonal => vec![n],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptimizationAlgorithm {
    Newton = 0,
    Bfgs = 1,
    #[default]
    Lbfgs = 2,
}

/// Options for `tinystan_sample`.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleOptions {
    pub num_chains: usize,
    pub inits: Inits,
    pub seed: Option<u32>,
    pub id: u32,
    pub init_radius: f64,
    pub num_warmup: i32,
    pub num_samples: i32,
    pub metric: Metric,
    /// One metric shared by every chain, or one per chain back to back.
    pub init_inv_metric: Option<Vec<f64>>,
    pub save_metric: bool,
    pub adapt: bool,
    pub delta: f64,
    pub gamma: f64,
    pub kappa: f64,
    pub t0: f64,
    pub init_buffer: u32,
    pub term_buffer: u32,
    pub window: u32,
    pub save_warmup: bool,
    pub stepsize: f64,
    pub stepsize_jitter: f64,
    pub max_depth: i32,
    pub refresh: i32,
    pub num_threads: i32,
}

impl Default for SampleOptions {
    fn default() -> Self {
        Self {
            num_chains: 4,
            inits: Inits::None,
            seed: None,
            id: 1,
            init_radius: 2.0,
            num_warmup: 1000,
            num_samples: 1000,
            metric: Metric::Diagonal,
            init_inv_metric: None,
            save_metric: false,
            adapt: true,
            delta: 0.8,
            gamma: 0.05,
            kappa: 0.75,
            t0: 10.0,
            init_buffer: 75,
            term_buffer: 50,
            window: 25,
            save_warmup: false,
            stepsize: 1.0,
            stepsize_jitter: 0.0,
            max_depth: 10,
            refresh: 0,
            num_threads: -1,
        }
    }
}

impl SampleOptions {
    pub fn validate(&self) -> Result<()> {
        Bound::AtLeast(1).check("num_chains", self.num_chains as f64)?;
        Bound::NonNegative.check("init_radius", self.init_radius)?;
        Bound::AtLeast(0).check("num_warmup", self.num_warmup.into())?;
        Bound::AtLeast(1).check("num_samples", self.num_samples.into())?;
        Bound::OpenUnit.check("delta", self.delta)?;
        Bound::Positive.check("gamma", self.gamma)?;
        Bound::Positive.check("kappa", self.kappa)?;
        Bound::Positive.check("t0", self.t0)?;
        Bound::Positive.check("stepsize", self.stepsize)?;
        Bound::ClosedUnit.check("stepsize_jitter", self.stepsize_jitter)?;
        Bound::AtLeast(1).check("max_depth", self.max_depth.into())?;
        Bound::AtLeast(0).check("refresh", self.refresh.into())?;
        Bound::ThreadCount.check("num_threads", self.num_threads.into())?;
        Ok(())
    }

    /// Draws per chain written to the output buffer.
    pub fn draws_per_chain(&self) -> Result<usize> {
        let warmup = if self.save_warmup { self.num_warmup } else { 0 };
        self.num_samples
            .checked_add(warmup)
            .and_then(|draws| usize::try_from(draws).ok())
            .ok_or_else(|| {
                TinyStanError::argument(
                    "num_samples",
                    "num_samples plus saved warmup draws overflows",
                )
            })
    }
}

/// Options for `tinystan_pathfinder`.
#[derive(Debug, Clone, PartialEq)]
pub struct PathfinderOptions {
    pub num_paths: usize,
    pub inits: Inits,
    pub seed: Option<u32>,
    pub id: u32,
    pub init_radius: f64,
    pub num_draws: i32,
    pub max_history_size: i32,
    pub init_alpha: f64,
    pub tol_obj: f64,
    pub tol_rel_obj: f64,
    pub tol_grad: f64,
    pub tol_rel_grad: f64,
    pub tol_param: f64,
    pub num_iterations: i32,
    pub num_elbo_draws: i32,
    pub num_multi_draws: i32,
    pub calculate_lp: bool,
    pub psis_resample: bool,
    pub refresh: i32,
    pub num_threads: i32,
}

impl Default for PathfinderOptions {
    fn default() -> Self {
        Self {
            num_paths: 4,
            inits: Inits::None,
            seed: None,
            id: 1,
            init_radius: 2.0,
            num_draws: 1000,
            max_history_size: 5,
            init_alpha: 0.001,
            tol_obj: 1e-12,
            tol_rel_obj: 1e4,
            tol_grad: 1e-8,
            tol_rel_grad: 1e7,
            tol_param: 1e-8,
            num_iterations: 1000,
            num_elbo_draws: 100,
            num_multi_draws: 1000,
            calculate_lp: true,
            psis_resample: true,
            refresh: 0,
            num_threads: -1,
        }
    }
}

impl PathfinderOptions {
    pub fn validate(&self) -> Result<()> {
        Bound::AtLeast(1).check("num_paths", self.num_paths as f64)?;
        Bound::NonNegative.check("init_radius", self.init_radius)?;
        Bound::AtLeast(1).check("num_draws", self.num_draws.into())?;
        Bound::AtLeast(1).check("max_history_size", self.max_history_size.into())?;
        Bound::Positive.check("init_alpha", self.init_alpha)?;
        check_tolerances(
            self.tol_obj,
            self.tol_rel_obj,
            self.tol_grad,
            self.tol_rel_grad,
            self.tol_param,
        )?;
        Bound::AtLeast(1).check("num_iterations", self.num_iterations.into())?;
        Bound::AtLeast(1).check("num_elbo_draws", self.num_elbo_draws.into())?;
        Bound::AtLeast(1).check("num_multi_draws", self.num_multi_draws.into())?;
        Bound::AtLeast(0).check("refresh", self.refresh.into())?;
        Bound::ThreadCount.check("num_threads", self.num_threads.into())?;
        Ok(())
    }

    /// Rows in the output buffer.
    ///
    /// Resampling collapses every path into `num_multi_draws` draws; without
    /// it each path contributes `num_draws` rows.
    pub fn output_rows(&self) -> Result<usize> {
        if self.calculate_lp && self.psis_resample {
            Ok(self.num_multi_draws.max(0) as usize)
        } else {
            (self.num_draws.max(0) as usize)
                .checked_mul(self.num_paths)
                .ok_or_else(|| {
                    TinyStanError::argument("num_paths", "num_draws times num_paths overflows")
                })
        }
    }
}

/// Options for `tinystan_optimize`.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizeOptions {
    pub init: Option<JsonInput>,
    pub seed: Option<u32>,
    pub id: u32,
    pub init_radius: f64,
    pub algorithm: OptimizationAlgorithm,
    pub jacobian: bool,
    pub num_iterations: i32,
    pub max_history_size: i32,
    pub init_alpha: f64,
    pub tol_obj: f64,
    pub tol_rel_obj: f64,
    pub tol_grad: f64,
    pub tol_rel_grad: f64,
    pub tol_param: f64,
    pub refresh: i32,
    pub num_threads: i32,
}

impl Default for OptimizeOptions {
    fn default() -> Self {
        Self {
            init: None,
            seed: None,
            id: 1,
            init_radius: 2.0,
            algorithm: OptimizationAlgorithm::Lbfgs,
            jacobian: false,
            num_iterations: 2000,
            max_history_size: 5,
            init_alpha: 0.001,
            tol_obj: 1e-12,
            tol_rel_obj: 1e4,
            tol_grad: 1e-8,
            tol_rel_grad: 1e7,
            tol_param: 1e-8,
            refresh: 0,
            num_threads: -1,
        }
    }
}

impl OptimizeOptions {
    pub fn validate(&self) -> Result<()> {
        Bound::NonNegative.check("init_radius", self.init_radius)?;
        Bound::AtLeast(1).check("num_iterations", self.num_iterations.into())?;
        Bound::AtLeast(1).check("max_history_size", self.max_history_size.into())?;
        Bound::Positive.check("init_alpha", self.init_alpha)?;
        check_tolerances(
            self.tol_obj,
            self.tol_rel_obj,
            self.tol_grad,
            self.tol_rel_grad,
            self.tol_param,
        )?;
        Bound::AtLeast(0).check("refresh", self.refresh.into())?;
        Bound::ThreadCount.check("num_threads", self.num_threads.into())?;
        Ok(())
    }
}

/// Options for `tinystan_laplace_sample`.
#[derive(Debug, Clone, PartialEq)]
pub struct LaplaceOptions {
    pub num_draws: i32,
    pub jacobian: bool,
    pub calculate_lp: bool,
    pub save_hessian: bool,
    pub seed: Option<u32>,
    pub refresh: i32,
    pub num_threads: i32,
}

impl Default for LaplaceOptions {
    fn default() -> Self {
        Self {
            num_draws: 1000,
            jacobian: true,
            calculate_lp: true,
            save_hessian: false,
            seed: None,
            refresh: 0,
            num_threads: -1,
        }
    }
}

impl LaplaceOptions {
    pub fn validate(&self) -> Result<()> {
        Bound::AtLeast(1).check("num_draws", self.num_draws.into())?;
        Bound::AtLeast(0).check("refresh", self.refresh.into())?;
        Bound::ThreadCount.check("num_threads", self.num_threads.into())?;
        Ok(())
    }
}

fn check_tolerances(obj: f64, rel_obj: f64, grad: f64, rel_grad: f64, param: f64) -> Result<()> {
    Bound::Positive.check("tol_obj", obj)?;
    Bound::Positive.check("tol_rel_obj", rel_obj)?;
    Bound::Positive.check("tol_grad", grad)?;
    Bound::Positive.check("tol_rel_grad", rel_grad)?;
    Bound::Positive.check("tol_param", param)
}
