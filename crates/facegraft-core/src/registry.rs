//! Process-wide model registry.
//!
//! Each model kind is provisioned and activated at most once. Failure policy
//! differs per kind: detection is fatal, swap degrades the whole process to
//! demo rendering, restoration silently drops that strategy.

use crate::enhancer::{EnhanceStrategy, StrategyKind};
use crate::error::PipelineError;
use crate::locator::{FaceLocate, OnnxFaceLocator};
use crate::restorer::OnnxFaceRestorer;
use crate::swapper::{FaceSwap, OnnxFaceSwapper};
use facegraft_models::{Catalog, ModelKind, Phase, Provisioner};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

/// Lifecycle of one model handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelState {
    Unloaded,
    Downloading,
    Validating,
    Loaded,
    Failed,
}

/// Outcome of loading a non-fatal model.
#[derive(Clone)]
pub enum LoadResult<T> {
    Loaded(T),
    Unavailable(String),
}

impl<T> LoadResult<T> {
    pub fn ok(self) -> Option<T> {
        match self {
            Self::Loaded(v) => Some(v),
            Self::Unavailable(_) => None,
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded(_))
    }
}

/// Turns a provisioned artifact into a live inference handle.
pub trait ModelActivator: Send + Sync {
    fn detection(&self, bundle_dir: &Path) -> Result<Arc<dyn FaceLocate>, String>;
    fn swap(&self, model_path: &Path) -> Result<Arc<dyn FaceSwap>, String>;
    fn restoration(
        &self,
        kind: StrategyKind,
        model_path: &Path,
        locator: Arc<dyn FaceLocate>,
    ) -> Result<Arc<dyn EnhanceStrategy>, String>;
}

/// Opens ONNX Runtime sessions.
pub struct OnnxActivator;

impl ModelActivator for OnnxActivator {
    fn detection(&self, bundle_dir: &Path) -> Result<Arc<dyn FaceLocate>, String> {
        let locator = OnnxFaceLocator::load(bundle_dir).map_err(|e| e.to_string())?;
        Ok(Arc::new(locator))
    }

    fn swap(&self, model_path: &Path) -> Result<Arc<dyn FaceSwap>, String> {
        let swapper = OnnxFaceSwapper::load(model_path).map_err(|e| e.to_string())?;
        Ok(Arc::new(swapper))
    }

    fn restoration(
        &self,
        kind: StrategyKind,
        model_path: &Path,
        locator: Arc<dyn FaceLocate>,
    ) -> Result<Arc<dyn EnhanceStrategy>, String> {
        let restorer =
            OnnxFaceRestorer::load(kind, model_path, locator).map_err(|e| e.to_string())?;
        Ok(Arc::new(restorer))
    }
}

pub struct ModelRegistry {
    catalog: Catalog,
    provisioner: Provisioner,
    activator: Arc<dyn ModelActivator>,
    states: Mutex<BTreeMap<ModelKind, ModelState>>,
    detection: OnceLock<LoadResult<Arc<dyn FaceLocate>>>,
    swap: OnceLock<LoadResult<Arc<dyn FaceSwap>>>,
    restore_primary: OnceLock<LoadResult<Arc<dyn EnhanceStrategy>>>,
    restore_secondary: OnceLock<LoadResult<Arc<dyn EnhanceStrategy>>>,
    degraded: AtomicBool,
}

impl ModelRegistry {
    pub fn new(
        catalog: Catalog,
        provisioner: Provisioner,
        activator: Arc<dyn ModelActivator>,
    ) -> Self {
        Self {
            catalog,
            provisioner,
            activator,
            states: Mutex::new(ModelKind::ALL.iter().map(|k| (*k, ModelState::Unloaded)).collect()),
            detection: OnceLock::new(),
            swap: OnceLock::new(),
            restore_primary: OnceLock::new(),
            restore_secondary: OnceLock::new(),
            degraded: AtomicBool::new(false),
        }
    }

    /// Registry backed by ONNX Runtime.
    pub fn onnx(catalog: Catalog, provisioner: Provisioner) -> Self {
        Self::new(catalog, provisioner, Arc::new(OnnxActivator))
    }

    pub fn model_dir(&self) -> &Path {
        self.provisioner.cache().root()
    }

    /// Face locator. Failure here is fatal to the caller.
    pub fn load_detection_model(&self) -> Result<Arc<dyn FaceLocate>, PipelineError> {
        let result = self.detection.get_or_init(|| {
            self.provision(ModelKind::Detection, |path| self.activator.detection(path))
        });
        match result {
            LoadResult::Loaded(locator) => Ok(Arc::clone(locator)),
            LoadResult::Unavailable(reason) => Err(PipelineError::ModelUnavailable {
                model: ModelKind::Detection,
                reason: reason.clone(),
            }),
        }
    }

    /// Swap model. On failure the registry enters degraded mode for good.
    pub fn load_swap_model(&self) -> LoadResult<Arc<dyn FaceSwap>> {
        let result = self
            .swap
            .get_or_init(|| self.provision(ModelKind::Swap, |path| self.activator.swap(path)))
            .clone();
        if let LoadResult::Unavailable(reason) = &result {
            self.enter_degraded(reason);
        }
        result
    }

    /// Restoration model for a learned strategy. Never fatal.
    pub fn load_restoration_model(
        &self,
        kind: StrategyKind,
    ) -> LoadResult<Arc<dyn EnhanceStrategy>> {
        let (model, handle) = match kind {
            StrategyKind::Primary => (ModelKind::RestorePrimary, &self.restore_primary),
            StrategyKind::Secondary => (ModelKind::RestoreSecondary, &self.restore_secondary),
            StrategyKind::Classical => {
                return LoadResult::Unavailable("classical enhancement uses no model".into());
            }
        };

        handle
            .get_or_init(|| {
                let locator = match self.load_detection_model() {
                    Ok(locator) => locator,
                    Err(e) => {
                        self.set_state(model, ModelState::Failed);
                        return LoadResult::Unavailable(e.to_string());
                    }
                };
                self.provision(model, |path| {
                    self.activator.restoration(kind, path, Arc::clone(&locator))
                })
            })
            .clone()
    }

    /// Force degraded mode without touching the swap model.
    pub fn disable_swap(&self, reason: &str) {
        if self.swap.set(LoadResult::Unavailable(reason.to_string())).is_ok() {
            self.set_state(ModelKind::Swap, ModelState::Failed);
        }
        self.enter_degraded(reason);
    }

    /// True once the swap model has failed; never resets.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    pub fn state(&self, kind: ModelKind) -> ModelState {
        self.states.lock().get(&kind).copied().unwrap_or(ModelState::Unloaded)
    }

    pub fn states(&self) -> BTreeMap<ModelKind, ModelState> {
        self.states.lock().clone()
    }

    /// Activate every model now, applying each kind's failure policy.
    pub fn warm_up(&self) -> Result<(), PipelineError> {
        self.load_detection_model()?;
        if let LoadResult::Unavailable(reason) = self.load_swap_model() {
            tracing::warn!(reason = %reason, "swap model unavailable; serving demo output");
        }
        for kind in [StrategyKind::Primary, StrategyKind::Secondary] {
            if let LoadResult::Unavailable(reason) = self.load_restoration_model(kind) {
                tracing::info!(strategy = ?kind, reason = %reason, "restoration strategy disabled");
            }
        }
        Ok(())
    }

    fn enter_degraded(&self, reason: &str) {
        if !self.degraded.swap(true, Ordering::SeqCst) {
            tracing::warn!(reason = %reason, "swap model unavailable; entering degraded mode");
        }
    }

    fn set_state(&self, kind: ModelKind, state: ModelState) {
        self.states.lock().insert(kind, state);
    }

    fn provision<T: ?Sized, F>(&self, kind: ModelKind, activate: F) -> LoadResult<Arc<T>>
    where
        F: FnMut(&Path) -> Result<Arc<T>, String>,
    {
        let on_phase = |phase: Phase| {
            self.set_state(
                kind,
                match phase {
                    Phase::Downloading => ModelState::Downloading,
                    Phase::Validating => ModelState::Validating,
                },
            );
        };

        match self.provisioner.provision(self.catalog.spec(kind), &on_phase, activate) {
            Ok(provisioned) => {
                self.set_state(kind, ModelState::Loaded);
                tracing::info!(
                    model = %kind,
                    path = %provisioned.path.display(),
                    origin = ?provisioned.origin,
                    "model loaded"
                );
                LoadResult::Loaded(provisioned.value)
            }
            Err(e) => {
                self.set_state(kind, ModelState::Failed);
                tracing::warn!(model = %kind, error = %e, "model unavailable");
                LoadResult::Unavailable(e.to_string())
            }
        }
    }
}
