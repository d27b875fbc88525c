//! Rust bindings for TinyStan.
//!
//! A TinyStan model is a Stan program compiled into a shared library that
//! exports a small C API. [`Model`] compiles (if given a `.stan` file) and
//! loads such a library, and runs its algorithms: NUTS [`Model::sample`],
//! [`Model::pathfinder`], [`Model::optimize`] and
//! [`Model::laplace_sample`]. Each call constructs the native model with its
//! data, runs once, and releases it before returning a labeled
//! [`StanOutput`].
//!
//! ```no_run
//! use tinystan::{Model, PathfinderOptions};
//!
//! let model = Model::new("bernoulli_model.so")?;
//! let fit = model.pathfinder("bernoulli.data.json", &PathfinderOptions::default())?;
//! assert_eq!(fit.parameters()[..2], ["lp_approx__", "lp__"]);
//! # Ok::<(), tinystan::TinyStanError>(())
//! ```
//!
//! Native print output is forwarded to the `log` facade under the
//! `tinystan::stan` target; [`logging::init_logging`] installs a subscriber
//! for it.

pub mod config;
pub mod encode;
pub mod error;
mod invoke;
pub mod library;
pub mod model;
pub mod options;
pub mod output;
pub mod registry;
pub mod resolver;
mod session;
mod slot;

#[cfg(test)]
mod testing;

pub use tinystan_logging as logging;

pub use config::{ConfigLoader, TinyStanConfig};
pub use encode::{Inits, JsonInput};
pub use error::{NativeErrorKind, Result, TinyStanError};
pub use invoke::{
    FIXED_SAMPLER_VARIABLES, HMC_SAMPLER_VARIABLES, LAPLACE_VARIABLES, OPTIMIZE_VARIABLES,
    PATHFINDER_VARIABLES,
};
pub use library::NativeLibrary;
pub use model::{LaplaceMode, Model, ModelOptions};
pub use options::{
    Algorithm, LaplaceOptions, Metric, OptimizationAlgorithm, OptimizeOptions,
    PathfinderOptions, SampleOptions,
};
pub use output::{Array, Shape, StanOutput};
pub use session::SessionState;
