//! facegraft-core: portrait face swap pipeline.
//!
//! SCRFD locates faces and ArcFace encodes identity, inswapper transplants
//! the source identity onto the target face, and GFPGAN/CodeFormer (or a
//! classical fallback) restore the result. All models run on ONNX Runtime
//! and are provisioned through [`registry::ModelRegistry`].

pub mod alignment;
pub mod batch;
pub mod classical;
pub mod demo;
pub mod detector;
pub mod enhancer;
pub mod error;
pub mod identity_map;
pub mod io;
pub mod locator;
pub mod pipeline;
pub mod recognizer;
pub mod registry;
pub mod restorer;
pub mod swapper;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use batch::{process_batch, BatchJob, BatchOptions, BatchReport, FsTemplateStore, TemplateStore};
pub use enhancer::{EnhanceStrategy, QualityEnhancer, StrategyKind};
pub use error::PipelineError;
pub use io::{FsOutputStore, OutputStore};
pub use locator::FaceLocate;
pub use pipeline::Pipeline;
pub use registry::{LoadResult, ModelActivator, ModelRegistry, ModelState};
pub use swapper::FaceSwap;
pub use types::{
    EnhanceMethod, FaceDescriptor, RenderPath, SwapRequest, SwapResult, TransformOptions,
};
