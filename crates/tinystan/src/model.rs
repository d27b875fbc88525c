//! The host-facing model object.
//!
//! Every algorithm call follows the same path: validate the options, encode
//! data and inits, pick the seed, then construct a session, size the output
//! from the names the model reports, invoke once, and decode. Nothing
//! touches the native library until the first three steps have succeeded.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use log::debug;

use crate::config::{BuildConfig, ConfigLoader, TinyStanConfig};
use crate::encode::{encode_data, encode_optional, JsonInput};
use crate::error::{Result, TinyStanError};
use crate::invoke::{
    self, labeled, LaplaceCall, OptimizeCall, PathfinderCall, SampleCall,
    FIXED_SAMPLER_VARIABLES, HMC_SAMPLER_VARIABLES, LAPLACE_VARIABLES, OPTIMIZE_VARIABLES,
    PATHFINDER_VARIABLES,
};
use crate::library::NativeLibrary;
use crate::options::{
    Algorithm, Bound, LaplaceOptions, OptimizeOptions, PathfinderOptions, SampleOptions,
};
use crate::output::{checked_size, Array, OutputBuffer, Shape, StanOutput};
use crate::registry::load_library;
use crate::resolver::resolve_artifact;
use crate::session::with_session;

/// How a [`Model`] is built and loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelOptions {
    pub build: BuildConfig,
    pub capture_stan_prints: bool,
    pub warn_on_reload: bool,
    /// Substituted whenever an algorithm's `num_threads` is left at -1.
    pub default_num_threads: i32,
}

impl ModelOptions {
    pub fn from_config(config: &TinyStanConfig) -> Self {
        Self {
            build: config.build.clone(),
            capture_stan_prints: config.runtime.capture_stan_prints,
            warn_on_reload: config.runtime.warn_on_reload,
            default_num_threads: config.runtime.default_num_threads,
        }
    }
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self::from_config(&TinyStanConfig::default())
    }
}

/// Mode of the approximation used by [`Model::laplace_sample`].
#[derive(Debug, Clone, PartialEq)]
pub enum LaplaceMode {
    /// Constrained parameter values in model order.
    Array(Vec<f64>),
    /// JSON text or file naming each parameter.
    Json(JsonInput),
}

impl LaplaceMode {
    /// Use the optimum found by [`Model::optimize`].
    pub fn from_optimum(output: &StanOutput) -> Result<Self> {
        match output.shape() {
            Shape::Point { .. } => {
                let skip = OPTIMIZE_VARIABLES.len().min(output.data().len());
                Ok(LaplaceMode::Array(output.data()[skip..].to_vec()))
            }
            _ => Err(TinyStanError::argument(
                "mode",
                "Laplace can only be used with Optimization output",
            )),
        }
    }
}

impl From<Vec<f64>> for LaplaceMode {
    fn from(values: Vec<f64>) -> Self {
        LaplaceMode::Array(values)
    }
}

impl From<JsonInput> for LaplaceMode {
    fn from(json: JsonInput) -> Self {
        LaplaceMode::Json(json)
    }
}

impl TryFrom<&StanOutput> for LaplaceMode {
    type Error = TinyStanError;

    fn try_from(output: &StanOutput) -> Result<Self> {
        LaplaceMode::from_optimum(output)
    }
}

/// A compiled Stan model loaded into this process.
///
/// ```no_run
/// use tinystan::{Model, SampleOptions};
///
/// let model = Model::new("bernoulli.stan")?;
/// let fit = model.sample(
///     r#"{"N": 4, "y": [0, 1, 0, 0]}"#,
///     &SampleOptions { seed: Some(1234), ..Default::default() },
/// )?;
/// let theta = fit.get("theta").unwrap_or_default();
/// # Ok::<(), tinystan::TinyStanError>(())
/// ```
pub struct Model {
    library: Arc<NativeLibrary>,
    default_num_threads: i32,
}

impl Model {
    /// Load a `.stan` file (compiling it) or a compiled library, using the
    /// configuration found by [`ConfigLoader::load`].
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let config = ConfigLoader::load()?;
        Self::with_options(path, ModelOptions::from_config(&config))
    }

    pub fn with_options(path: impl AsRef<Path>, options: ModelOptions) -> Result<Self> {
        let library_path = resolve_artifact(path.as_ref(), &options.build)?;
        let library = load_library(&library_path, options.warn_on_reload)?;
        Ok(Self::from_library(library, &options))
    }

    /// Wrap an already loaded library.
    pub fn from_library(library: Arc<NativeLibrary>, options: &ModelOptions) -> Self {
        if options.capture_stan_prints {
            library.capture_prints();
        }
        Self {
            library,
            default_num_threads: options.default_num_threads,
        }
    }

    pub fn library_path(&self) -> &Path {
        self.library.path()
    }

    pub fn api_version(&self) -> (i32, i32, i32) {
        self.library.api_version()
    }

    fn num_threads(&self, requested: i32) -> Result<i32> {
        if requested != -1 {
            return Ok(requested);
        }
        Bound::ThreadCount.check("default_num_threads", self.default_num_threads.into())?;
        Ok(self.default_num_threads)
    }

    /// Names of the model's parameters for `data`, without any diagnostics.
    pub fn param_names(&self, data: impl Into<JsonInput>) -> Result<Vec<String>> {
        let data = encode_data(&data.into())?;
        with_session(&self.library, data.as_ref(), pick_seed(None), |session| {
            session.param_names()
        })
    }

    /// Number of unconstrained parameters for `data`.
    pub fn num_free_params(&self, data: impl Into<JsonInput>) -> Result<usize> {
        let data = encode_data(&data.into())?;
        with_session(&self.library, data.as_ref(), pick_seed(None), |session| {
            session.num_free_params()
        })
    }

    /// Run NUTS. Output shape is `(chains, draws, params)`.
    ///
    /// A model without free parameters runs the fixed-parameter sampler and
    /// reports only `lp__` and `accept_stat__` before its own columns.
    pub fn sample(&self, data: impl Into<JsonInput>, options: &SampleOptions) -> Result<StanOutput> {
        options.validate()?;
        let data = encode_data(&data.into())?;
        let inits = options
            .inits
            .encode(options.num_chains, "chain", self.library.separator())?;
        let seed = pick_seed(options.seed);
        let num_threads = self.num_threads(options.num_threads)?;
        let chains = options.num_chains;
        let draws = options.draws_per_chain()?;

        with_session(&self.library, data.as_ref(), seed, |session| {
            let num_free = session.num_free_params()?;
            let prefix: &[&str] = if num_free == 0 {
                &FIXED_SAMPLER_VARIABLES
            } else {
                &HMC_SAMPLER_VARIABLES
            };
            let names = labeled(prefix, session.param_names()?);

            let metric_dims = options.metric.shape(num_free);
            let per_chain = checked_size(&metric_dims, "metric")?;
            let init_inv_metric = options
                .init_inv_metric
                .as_deref()
                .map(|metric| replicate_metric(metric, &metric_dims, chains))
                .transpose()?;
            let mut metric_out = if options.save_metric {
                Some(vec![0.0; checked_size(&[chains, per_chain], "num_chains")?])
            } else {
                None
            };

            let shape = Shape::Chains {
                chains,
                draws,
                params: names.len(),
            };
            shape.checked_len("num_samples")?;
            let mut out = OutputBuffer::zeroed(shape);
            session.invoke(|model| {
                invoke::sample(
                    self.library.api(),
                    model,
                    SampleCall {
                        options,
                        inits: inits.as_deref(),
                        seed,
                        num_threads,
                        init_inv_metric: init_inv_metric.as_deref(),
                        metric_out: metric_out.as_deref_mut(),
                    },
                    &mut out,
                )
            })?;

            let mut output = StanOutput::decode(names, out)?;
            output.metric = metric_out.map(|data| Array {
                dims: std::iter::once(chains).chain(metric_dims).collect(),
                data,
            });
            Ok(output)
        })
    }

    /// Run multi-path Pathfinder. Output shape is `(draws, params)`.
    ///
    /// Paths that fail are dropped by the native side; when resampling is
    /// off their rows stay NaN. Only the failure of every path is an error.
    pub fn pathfinder(
        &self,
        data: impl Into<JsonInput>,
        options: &PathfinderOptions,
    ) -> Result<StanOutput> {
        options.validate()?;
        let data = encode_data(&data.into())?;
        let inits = options
            .inits
            .encode(options.num_paths, "path", self.library.separator())?;
        let seed = pick_seed(options.seed);
        let num_threads = self.num_threads(options.num_threads)?;
        let rows = options.output_rows()?;

        with_session(&self.library, data.as_ref(), seed, |session| {
            if session.num_free_params()? == 0 {
                return Err(TinyStanError::NoParameters {
                    algorithm: Algorithm::Pathfinder,
                });
            }
            let names = labeled(&PATHFINDER_VARIABLES, session.param_names()?);
            let shape = Shape::Draws {
                draws: rows,
                params: names.len(),
            };
            shape.checked_len("num_draws")?;
            let mut out = OutputBuffer::nan_filled(shape);
            session.invoke(|model| {
                invoke::pathfinder(
                    self.library.api(),
                    model,
                    PathfinderCall {
                        options,
                        inits: inits.as_deref(),
                        seed,
                        num_threads,
                    },
                    &mut out,
                )
            })?;
            StanOutput::decode(names, out)
        })
    }

    /// Find a posterior mode. Output shape is `(params)`.
    pub fn optimize(&self, data: impl Into<JsonInput>, options: &OptimizeOptions) -> Result<StanOutput> {
        options.validate()?;
        let data = encode_data(&data.into())?;
        let init = encode_optional("init", options.init.as_ref())?;
        let seed = pick_seed(options.seed);
        let num_threads = self.num_threads(options.num_threads)?;

        with_session(&self.library, data.as_ref(), seed, |session| {
            let names = labeled(&OPTIMIZE_VARIABLES, session.param_names()?);
            let mut out = OutputBuffer::zeroed(Shape::Point {
                params: names.len(),
            });
            session.invoke(|model| {
                invoke::optimize(
                    self.library.api(),
                    model,
                    OptimizeCall {
                        options,
                        init: init.as_deref(),
                        seed,
                        num_threads,
                    },
                    &mut out,
                )
            })?;
            StanOutput::decode(names, out)
        })
    }

    /// Draw from the Laplace approximation around `mode`.
    /// Output shape is `(draws, params)`; the Hessian is `(free, free)`.
    pub fn laplace_sample(
        &self,
        mode: &LaplaceMode,
        data: impl Into<JsonInput>,
        options: &LaplaceOptions,
    ) -> Result<StanOutput> {
        options.validate()?;
        let data = encode_data(&data.into())?;
        let (mode_array, mode_json) = match mode {
            LaplaceMode::Array(values) => (Some(values.as_slice()), None),
            LaplaceMode::Json(json) => match encode_optional("mode", Some(json))? {
                Some(encoded) => (None, Some(encoded)),
                None => return Err(TinyStanError::argument("mode", "mode JSON is empty")),
            },
        };
        let seed = pick_seed(options.seed);
        let num_threads = self.num_threads(options.num_threads)?;

        with_session(&self.library, data.as_ref(), seed, |session| {
            let model_names = session.param_names()?;
            if let Some(values) = mode_array {
                if values.len() != model_names.len() {
                    return Err(TinyStanError::argument(
                        "mode",
                        format!(
                            "Mode array has incorrect length. Expected {} but got {}",
                            model_names.len(),
                            values.len()
                        ),
                    ));
                }
            }
            let names = labeled(&LAPLACE_VARIABLES, model_names);
            let num_free = session.num_free_params()?;
            let mut hessian = if options.save_hessian {
                Some(vec![0.0; checked_size(&[num_free, num_free], "save_hessian")?])
            } else {
                None
            };

            let shape = Shape::Draws {
                draws: options.num_draws as usize,
                params: names.len(),
            };
            shape.checked_len("num_draws")?;
            let mut out = OutputBuffer::zeroed(shape);
            session.invoke(|model| {
                invoke::laplace_sample(
                    self.library.api(),
                    model,
                    LaplaceCall {
                        options,
                        mode_array,
                        mode_json: mode_json.as_deref(),
                        seed,
                        num_threads,
                        hessian_out: hessian.as_deref_mut(),
                    },
                    &mut out,
                )
            })?;

            let mut output = StanOutput::decode(names, out)?;
            output.hessian = hessian.map(|data| Array {
                dims: vec![num_free, num_free],
                data,
            });
            Ok(output)
        })
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("library", &self.library.path())
            .field("default_num_threads", &self.default_num_threads)
            .finish()
    }
}

fn pick_seed(seed: Option<u32>) -> u32 {
    let seed = seed.unwrap_or_else(rand::random);
    debug!("using seed {seed}");
    seed
}

/// Expand one metric to every chain, or accept one metric per chain.
fn replicate_metric(metric: &[f64], dims: &[usize], chains: usize) -> Result<Vec<f64>> {
    let per_chain: usize = dims.iter().product();
    if metric.len() == per_chain {
        Ok(metric.repeat(chains))
    } else if metric.len() == per_chain * chains {
        Ok(metric.to_vec())
    } else {
        Err(TinyStanError::argument(
            "init_inv_metric",
            format!(
                "Invalid initial metric size. Expected {dims:?} or {:?} values, got {}",
                std::iter::once(chains).chain(dims.iter().copied()).collect::<Vec<_>>(),
                metric.len()
            ),
        ))
    }
}
