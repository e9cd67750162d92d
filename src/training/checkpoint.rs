//! Best-model checkpointing
//!
//! Files written under `checkpoint_path`, for a stem `<model>_<run>_<suffix>`:
//! - `<stem>_model.mpk`: model record
//! - `<stem>_optim.mpk`: optimizer record
//! - `<stem>.json`: [`CheckpointMetadata`]
//!
//! All three are rewritten each time the monitored validation metric improves.

use std::fs;
use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::optim::Optimizer;
use burn::record::{CompactRecorder, Recorder};
use burn::tensor::backend::{AutodiffBackend, Backend};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{Method, RunConfig};
use crate::model::{SslClassifier, SslClassifierConfig};
use crate::utils::error::{Result, SslError};

/// Description of the saved best model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub epoch: usize,
    pub metric_name: String,
    pub best_value: f64,
    pub method: Method,
    pub model: String,
    pub nb_classes: usize,
    pub timestamp: String,
    pub model_file: PathBuf,
    pub optimizer_file: PathBuf,
}

impl CheckpointMetadata {
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(SslError::PathNotFound(path.to_path_buf()));
        }
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }
}

/// Saves the model and optimizer whenever the monitored metric reaches a new maximum
#[derive(Debug, Clone)]
pub struct Checkpoint {
    stem: PathBuf,
    metric_name: String,
    method: Method,
    model: String,
    nb_classes: usize,
    best: Option<f64>,
}

impl Checkpoint {
    pub fn new(config: &RunConfig) -> Self {
        Self::with_stem(config.checkpoint_stem(), config)
    }

    pub fn with_stem(stem: impl Into<PathBuf>, config: &RunConfig) -> Self {
        Self {
            stem: stem.into(),
            metric_name: config.checkpoint_metric_name.clone(),
            method: config.run,
            model: config.model.clone(),
            nb_classes: config.nb_classes,
            best: None,
        }
    }

    pub fn metric_name(&self) -> &str {
        &self.metric_name
    }

    pub fn best(&self) -> Option<f64> {
        self.best
    }

    /// Path given to the recorder, which appends `.mpk`
    pub fn model_path(&self) -> PathBuf {
        suffixed(&self.stem, "_model")
    }

    pub fn optimizer_path(&self) -> PathBuf {
        suffixed(&self.stem, "_optim")
    }

    pub fn metadata_path(&self) -> PathBuf {
        suffixed(&self.stem, ".json")
    }

    pub fn is_improvement(&self, value: f64) -> bool {
        self.best.map_or(true, |best| value > best)
    }

    /// Save when `value` beats the best so far. Returns whether files were written.
    pub fn step<B, O>(
        &mut self,
        value: f64,
        epoch: usize,
        model: &SslClassifier<B>,
        optimizer: &O,
    ) -> Result<bool>
    where
        B: AutodiffBackend,
        O: Optimizer<SslClassifier<B>, B>,
    {
        if !self.is_improvement(value) {
            return Ok(false);
        }
        self.best = Some(value);

        if let Some(parent) = self.stem.parent() {
            fs::create_dir_all(parent)?;
        }
        let recorder = CompactRecorder::new();
        model
            .clone()
            .save_file(self.model_path(), &recorder)
            .map_err(|e| SslError::Checkpoint(format!("Failed to save model: {:?}", e)))?;
        Recorder::<B>::record(&recorder, optimizer.to_record(), self.optimizer_path())
            .map_err(|e| SslError::Checkpoint(format!("Failed to save optimizer: {:?}", e)))?;

        CheckpointMetadata {
            epoch,
            metric_name: self.metric_name.clone(),
            best_value: value,
            method: self.method,
            model: self.model.clone(),
            nb_classes: self.nb_classes,
            timestamp: chrono::Utc::now().to_rfc3339(),
            model_file: self.model_path().with_extension("mpk"),
            optimizer_file: self.optimizer_path().with_extension("mpk"),
        }
        .save(&self.metadata_path())?;

        info!(
            "Checkpoint saved at epoch {} ({} = {:.4}) to {:?}",
            epoch + 1,
            self.metric_name,
            value,
            self.stem
        );
        Ok(true)
    }
}

fn suffixed(stem: &Path, suffix: &str) -> PathBuf {
    let mut name = stem.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// Load a model saved by [`Checkpoint::step`]
pub fn load_model<B: Backend>(
    model_path: impl Into<PathBuf>,
    config: &SslClassifierConfig,
    device: &B::Device,
) -> Result<SslClassifier<B>> {
    let model_path = model_path.into();
    let recorder = CompactRecorder::new();
    config
        .init::<B>(device)
        .load_file(model_path.clone(), &recorder, device)
        .map_err(|e| SslError::Checkpoint(format!("Failed to load model from {:?}: {:?}", model_path, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};
    use burn::module::AutodiffModule;
    use burn::optim::AdamConfig;
    use burn::tensor::Tensor;

    type TestBackend = Autodiff<NdArray>;

    fn model_config() -> SslClassifierConfig {
        SslClassifierConfig::new()
            .with_nb_classes(3)
            .with_base_filters(2)
            .with_hidden_size(4)
    }

    #[test]
    fn test_paths_share_the_stem() {
        let checkpoint = Checkpoint::with_stem("/tmp/models/SslCnn_FixMatch_", &RunConfig::default());
        assert_eq!(checkpoint.model_path(), PathBuf::from("/tmp/models/SslCnn_FixMatch__model"));
        assert_eq!(checkpoint.metadata_path(), PathBuf::from("/tmp/models/SslCnn_FixMatch_.json"));
    }

    #[test]
    fn test_saves_only_on_improvement() {
        let dir = tempfile::tempdir().unwrap();
        let config = RunConfig {
            nb_classes: 3,
            ..Default::default()
        };
        let mut checkpoint = Checkpoint::with_stem(dir.path().join("run"), &config);
        let device = Default::default();
        let model = model_config().init::<TestBackend>(&device);
        let optimizer = AdamConfig::new().init::<TestBackend, SslClassifier<TestBackend>>();

        assert!(checkpoint.step(0.4, 0, &model, &optimizer).unwrap());
        assert!(!checkpoint.step(0.3, 1, &model, &optimizer).unwrap());
        assert!(!checkpoint.step(0.4, 2, &model, &optimizer).unwrap());
        assert!(checkpoint.step(0.6, 3, &model, &optimizer).unwrap());
        assert_eq!(checkpoint.best(), Some(0.6));

        let metadata = CheckpointMetadata::load(&checkpoint.metadata_path()).unwrap();
        assert_eq!(metadata.epoch, 3);
        assert_eq!(metadata.best_value, 0.6);
        assert_eq!(metadata.metric_name, "acc");
        assert!(metadata.model_file.exists());
        assert!(metadata.optimizer_file.exists());
    }

    #[test]
    fn test_saved_model_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let config = RunConfig {
            nb_classes: 3,
            ..Default::default()
        };
        let mut checkpoint = Checkpoint::with_stem(dir.path().join("run"), &config);
        let device = Default::default();
        let model = model_config().init::<TestBackend>(&device);
        let optimizer = AdamConfig::new().init::<TestBackend, SslClassifier<TestBackend>>();
        checkpoint.step(0.5, 0, &model, &optimizer).unwrap();

        let loaded = load_model::<NdArray>(checkpoint.model_path(), &model_config(), &device).unwrap();
        let input = Tensor::<NdArray, 4>::ones([1, 3, 8, 8], &device);
        let expected = model.valid().forward(input.clone()).into_data();
        let actual = loaded.forward(input).into_data();
        // Compact records are stored at half precision
        expected.assert_approx_eq(&actual, 2);
    }

    #[test]
    fn test_missing_metadata() {
        assert!(matches!(
            CheckpointMetadata::load(Path::new("/nonexistent/run.json")),
            Err(SslError::PathNotFound(_))
        ));
    }
}
