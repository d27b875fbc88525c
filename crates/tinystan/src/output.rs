//! Output buffers and their labeled decoding.
//!
//! Every native entry point writes a C-contiguous buffer whose last
//! dimension is the parameter axis. The leading dimensions differ per
//! algorithm, so the shape travels with the buffer instead of being inferred
//! from its length.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value as JsonValue;

use crate::encode::{Inits, JsonInput};
use crate::error::{Result, TinyStanError};

/// Declared layout of an output buffer, slowest dimension first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// `sample`: (chains, draws, params).
    Chains {
        chains: usize,
        draws: usize,
        params: usize,
    },
    /// `pathfinder` and `laplace_sample`: (draws, params).
    Draws { draws: usize, params: usize },
    /// `optimize`: (params).
    Point { params: usize },
}

impl Shape {
    pub fn dims(&self) -> Vec<usize> {
        match *self {
            Shape::Chains {
                chains,
                draws,
                params,
            } => vec![chains, draws, params],
            Shape::Draws { draws, params } => vec![draws, params],
            Shape::Point { params } => vec![params],
        }
    }

    pub fn num_params(&self) -> usize {
        match *self {
            Shape::Chains { params, .. } | Shape::Draws { params, .. } | Shape::Point { params } => {
                params
            }
        }
    }

    /// Number of parameter rows across all leading dimensions.
    pub fn num_rows(&self) -> usize {
        match *self {
            Shape::Chains { chains, draws, .. } => chains * draws,
            Shape::Draws { draws, .. } => draws,
            Shape::Point { .. } => 1,
        }
    }

    pub fn len(&self) -> usize {
        self.num_rows() * self.num_params()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element count, or an argument error naming `option` when it does not
    /// fit in `usize`.
    pub fn checked_len(&self, option: &'static str) -> Result<usize> {
        checked_size(&self.dims(), option)
    }
}

/// Product of `dims`, failing on overflow.
pub(crate) fn checked_size(dims: &[usize], option: &'static str) -> Result<usize> {
    dims.iter()
        .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
        .ok_or_else(|| {
            TinyStanError::argument(option, format!("output of shape {dims:?} is too large"))
        })
}

/// A pre-sized buffer handed to the native side.
#[derive(Debug)]
pub(crate) struct OutputBuffer {
    shape: Shape,
    data: Vec<f64>,
}

impl OutputBuffer {
    pub fn zeroed(shape: Shape) -> Self {
        Self {
            shape,
            data: vec![0.0; shape.len()],
        }
    }

    /// Slots the native side leaves untouched decode as NaN.
    pub fn nan_filled(shape: Shape) -> Self {
        Self {
            shape,
            data: vec![f64::NAN; shape.len()],
        }
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn as_mut_ptr(&mut self) -> *mut f64 {
        self.data.as_mut_ptr()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn into_vec(self) -> Vec<f64> {
        self.data
    }
}

/// An auxiliary array returned next to the draws (metric, Hessian).
#[derive(Debug, Clone, PartialEq)]
pub struct Array {
    pub dims: Vec<usize>,
    pub data: Vec<f64>,
}

/// Labeled result of one algorithm run.
#[derive(Debug, Clone)]
pub struct StanOutput {
    parameters: Vec<String>,
    shape: Shape,
    data: Vec<f64>,
    pub metric: Option<Array>,
    pub hessian: Option<Array>,
}

impl StanOutput {
    /// Pair a populated buffer with the names labelling its last axis.
    pub(crate) fn decode(parameters: Vec<String>, buffer: OutputBuffer) -> Result<Self> {
        let shape = buffer.shape();
        if parameters.len() != shape.num_params() {
            return Err(TinyStanError::argument(
                "parameters",
                format!(
                    "{} names for a buffer with {} parameter columns",
                    parameters.len(),
                    shape.num_params()
                ),
            ));
        }
        let data = buffer.into_vec();
        debug_assert_eq!(data.len(), shape.len());
        Ok(Self {
            parameters,
            shape,
            data,
            metric: None,
            hessian: None,
        })
    }

    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    /// Raw C-order buffer.
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn num_rows(&self) -> usize {
        self.shape.num_rows()
    }

    /// One row of parameter values; rows run chain-major for `sample`.
    pub fn row(&self, index: usize) -> Option<&[f64]> {
        let width = self.shape.num_params();
        if index >= self.num_rows() || width == 0 {
            return None;
        }
        Some(&self.data[index * width..(index + 1) * width])
    }

    /// Draw `draw` of chain `chain` for `sample` output.
    pub fn chain_draw(&self, chain: usize, draw: usize) -> Option<&[f64]> {
        match self.shape {
            Shape::Chains { chains, draws, .. } if chain < chains && draw < draws => {
                self.row(chain * draws + draw)
            }
            _ => None,
        }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.parameters.iter().position(|p| p == name)
    }

    /// Every value of one column, in buffer order.
    pub fn column(&self, index: usize) -> Vec<f64> {
        let width = self.shape.num_params();
        if index >= width {
            return Vec::new();
        }
        self.data.iter().skip(index).step_by(width).copied().collect()
    }

    /// Every value of the named parameter, in buffer order.
    pub fn get(&self, name: &str) -> Option<Vec<f64>> {
        self.column_index(name).map(|i| self.column(i))
    }

    /// Build per-chain inits from randomly chosen draws of this output.
    ///
    /// Diagnostic columns (names ending in `__`) are dropped and indexed
    /// names such as `theta.2.1` are regrouped into nested arrays.
    pub fn create_inits(&self, chains: usize, seed: u32) -> Result<Inits> {
        let rows = self.num_rows();
        if rows == 0 {
            return Err(TinyStanError::argument("inits", "output has no draws"));
        }
        let mut rng = StdRng::seed_from_u64(u64::from(seed));
        let mut inits = Vec::with_capacity(chains);
        for _ in 0..chains {
            let row = rng.gen_range(0..rows);
            let values = self.row(row).unwrap_or_default();
            inits.push(JsonInput::from_value(&self.row_to_json(values)?));
        }
        if chains == 1 {
            return Ok(Inits::Single(inits.remove(0)));
        }
        Ok(Inits::PerChain(inits))
    }

    fn row_to_json(&self, values: &[f64]) -> Result<JsonValue> {
        let mut grouped: BTreeMap<&str, Vec<(Vec<usize>, f64)>> = BTreeMap::new();
        for (name, &value) in self.parameters.iter().zip(values) {
            if name.ends_with("__") {
                continue;
            }
            let mut parts = name.split('.');
            let base = parts.next().unwrap_or(name);
            let indices = parts
                .map(|p| p.parse::<usize>().ok().filter(|&i| i >= 1))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| {
                    TinyStanError::argument(
                        "inits",
                        format!("cannot rebuild structure of parameter '{name}'"),
                    )
                })?;
            grouped.entry(base).or_default().push((indices, value));
        }

        let mut object = serde_json::Map::new();
        for (base, entries) in grouped {
            object.insert(base.to_string(), nest(&entries)?);
        }
        Ok(JsonValue::Object(object))
    }
}

/// Rebuild a (possibly multi-dimensional) array from 1-based index tuples.
fn nest(entries: &[(Vec<usize>, f64)]) -> Result<JsonValue> {
    match entries {
        [(indices, value)] if indices.is_empty() => Ok(number(*value)),
        _ => {
            let mut children: BTreeMap<usize, Vec<(Vec<usize>, f64)>> = BTreeMap::new();
            for (indices, value) in entries {
                let (first, rest) = indices.split_first().ok_or_else(|| {
                    TinyStanError::argument("inits", "mixed scalar and array entries")
                })?;
                children
                    .entry(*first)
                    .or_default()
                    .push((rest.to_vec(), *value));
            }
            let items = children
                .values()
                .map(|child| nest(child))
                .collect::<Result<Vec<_>>>()?;
            Ok(JsonValue::Array(items))
        }
    }
}

fn number(value: f64) -> JsonValue {
    serde_json::Number::from_f64(value)
        .map(JsonValue::Number)
        .unwrap_or(JsonValue::Null)
}
