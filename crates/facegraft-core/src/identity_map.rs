//! Identity projection for the swap model.
//!
//! inswapper is conditioned on `normalize(embedding · emap)`, where `emap` is
//! a 512×512 matrix stored as the last graph initializer of the ONNX file and
//! not exposed as an input. It is read either from a raw little-endian f32
//! sidecar (`<model>.emap`) or decoded from the model protobuf.

use crate::error::PipelineError;
use crate::recognizer::ARCFACE_EMBEDDING_DIM;
use ndarray::Array2;
use prost::Message;
use std::path::{Path, PathBuf};

const ONNX_FLOAT: i32 = 1;

/// Sidecar path for a model file: `inswapper_128.onnx` → `inswapper_128.onnx.emap`.
pub fn sidecar_path(model_path: &Path) -> PathBuf {
    let mut name = model_path.as_os_str().to_owned();
    name.push(".emap");
    PathBuf::from(name)
}

/// Load the identity projection for `model_path`.
pub fn load(model_path: &Path) -> Result<Array2<f32>, PipelineError> {
    let dim = ARCFACE_EMBEDDING_DIM;
    let sidecar = sidecar_path(model_path);
    if sidecar.is_file() {
        let bytes = std::fs::read(&sidecar)?;
        let values = floats_from_le(&bytes);
        if values.len() != dim * dim {
            return Err(PipelineError::inference(format!(
                "{}: expected {} floats, got {}",
                sidecar.display(),
                dim * dim,
                values.len()
            )));
        }
        tracing::debug!(path = %sidecar.display(), "identity map loaded from sidecar");
        return to_matrix(values, dim);
    }

    let bytes = std::fs::read(model_path)?;
    let values = find_square_initializer(&bytes, dim).ok_or_else(|| {
        PipelineError::inference(format!(
            "{}: no {dim}x{dim} identity map initializer",
            model_path.display()
        ))
    })?;
    to_matrix(values, dim)
}

/// Project an identity embedding through `emap` and L2-normalize it.
pub fn project(embedding: &[f32], emap: &Array2<f32>) -> Vec<f32> {
    let latent: Vec<f32> = (0..emap.ncols())
        .map(|j| embedding.iter().enumerate().map(|(i, e)| e * emap[[i, j]]).sum())
        .collect();
    let norm = latent.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        latent.into_iter().map(|v| v / norm).collect()
    } else {
        latent
    }
}

fn to_matrix(values: Vec<f32>, dim: usize) -> Result<Array2<f32>, PipelineError> {
    Array2::from_shape_vec((dim, dim), values)
        .map_err(|e| PipelineError::inference(format!("identity map shape: {e}")))
}

fn floats_from_le(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

// The few ONNX messages needed to reach graph initializers. Everything
// else in the model is skipped by the decoder.
#[derive(Clone, PartialEq, Message)]
struct ModelProto {
    #[prost(message, optional, tag = "7")]
    graph: Option<GraphProto>,
}

#[derive(Clone, PartialEq, Message)]
struct GraphProto {
    #[prost(message, repeated, tag = "5")]
    initializer: Vec<TensorProto>,
}

#[derive(Clone, PartialEq, Message)]
struct TensorProto {
    #[prost(int64, repeated, tag = "1")]
    dims: Vec<i64>,
    #[prost(int32, tag = "2")]
    data_type: i32,
    #[prost(float, repeated, tag = "4")]
    float_data: Vec<f32>,
    #[prost(bytes = "vec", tag = "9")]
    raw_data: Vec<u8>,
}

impl TensorProto {
    /// Values of a FLOAT tensor shaped `[dim, dim]`.
    fn square_floats(&self, dim: usize) -> Option<Vec<f32>> {
        let d = dim as i64;
        if self.data_type != ONNX_FLOAT || self.dims != [d, d] {
            return None;
        }
        let values = if self.raw_data.is_empty() {
            self.float_data.clone()
        } else {
            floats_from_le(&self.raw_data)
        };
        (values.len() == dim * dim).then_some(values)
    }
}

/// The last FLOAT initializer with dims `[dim, dim]` in an ONNX model.
fn find_square_initializer(model: &[u8], dim: usize) -> Option<Vec<f32>> {
    let model = match ModelProto::decode(model) {
        Ok(m) => m,
        Err(e) => {
            tracing::debug!(error = %e, "model is not a decodable ONNX protobuf");
            return None;
        }
    };
    model
        .graph?
        .initializer
        .iter()
        .rev()
        .find_map(|t| t.square_floats(dim))
}
