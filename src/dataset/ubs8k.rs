//! UrbanSound8K reader over precomputed log-mel spectrograms
//!
//! Layout under the dataset root:
//!
//! ```text
//! metadata/UrbanSound8K.csv   slice_file_name,fsID,start,end,salience,fold,classID,class
//! features/<slice stem>.f32   little-endian f32, N_MELS rows of up to N_FRAMES frames
//! ```
//!
//! Clips shorter than four seconds are padded with zeros along time.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use tracing::info;

use crate::dataset::{InMemoryDataset, SslItem};
use crate::utils::error::{Result, ResultExt, SslError};

pub const N_MELS: usize = 64;
pub const N_FRAMES: usize = 173;
pub const UBS8K_SHAPE: [usize; 3] = [1, N_MELS, N_FRAMES];
pub const NB_FOLDS: usize = 10;

pub const METADATA_FILE: &str = "metadata/UrbanSound8K.csv";
pub const FEATURES_DIR: &str = "features";

/// One row of the metadata file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipMeta {
    pub slice_file_name: String,
    pub fold: usize,
    pub class_id: usize,
}

impl ClipMeta {
    fn feature_path(&self, root: &Path) -> PathBuf {
        let stem = Path::new(&self.slice_file_name)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| self.slice_file_name.clone());
        root.join(FEATURES_DIR).join(format!("{}.f32", stem))
    }
}

/// Training folds and the validation fold for `fold_val`
pub fn folds_for_validation(fold_val: usize) -> Result<(Vec<usize>, Vec<usize>)> {
    if !(1..=NB_FOLDS).contains(&fold_val) {
        return Err(SslError::Config(format!(
            "fold_val must be in 1..={}, got {}",
            NB_FOLDS, fold_val
        )));
    }
    let train = (1..=NB_FOLDS).filter(|&f| f != fold_val).collect();
    Ok((train, vec![fold_val]))
}

pub fn parse_metadata(content: &str) -> Result<Vec<ClipMeta>> {
    let mut lines = content.lines().filter(|l| !l.trim().is_empty());
    let header: Vec<&str> = lines
        .next()
        .ok_or_else(|| SslError::Dataset("Empty UBS8K metadata".to_string()))?
        .split(',')
        .map(str::trim)
        .collect();

    let column = |name: &str| {
        header
            .iter()
            .position(|h| *h == name)
            .ok_or_else(|| SslError::Dataset(format!("Missing column \"{}\" in UBS8K metadata", name)))
    };
    let (name_col, fold_col, class_col) = (column("slice_file_name")?, column("fold")?, column("classID")?);

    lines
        .enumerate()
        .map(|(i, line)| {
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            let field = |col: usize| {
                fields.get(col).copied().ok_or_else(|| {
                    SslError::Dataset(format!("Metadata line {} has {} fields", i + 2, fields.len()))
                })
            };
            let number = |col: usize| -> Result<usize> {
                let value = field(col)?;
                value.parse().map_err(|_| {
                    SslError::Dataset(format!("Metadata line {}: \"{}\" is not a number", i + 2, value))
                })
            };
            Ok(ClipMeta {
                slice_file_name: field(name_col)?.to_string(),
                fold: number(fold_col)?,
                class_id: number(class_col)?,
            })
        })
        .collect()
}

/// Decode a feature file into a `[1, N_MELS, N_FRAMES]` buffer
pub fn parse_features(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(SslError::Dataset(format!(
            "Feature file of {} bytes is not a f32 array",
            bytes.len()
        )));
    }
    let values: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    if values.len() % N_MELS != 0 || values.len() / N_MELS > N_FRAMES {
        return Err(SslError::Dataset(format!(
            "Feature file of {} values does not hold {} mel bands of at most {} frames",
            values.len(),
            N_MELS,
            N_FRAMES
        )));
    }

    let frames = values.len() / N_MELS;
    let mut data = vec![0.0f32; N_MELS * N_FRAMES];
    for (mel, row) in values.chunks_exact(frames.max(1)).enumerate().take(N_MELS) {
        data[mel * N_FRAMES..mel * N_FRAMES + frames].copy_from_slice(row);
    }
    Ok(data)
}

/// Load every clip of the given folds, in metadata order
pub fn load_ubs8k(root: impl AsRef<Path>, folds: &[usize]) -> Result<InMemoryDataset> {
    let root = root.as_ref();
    let metadata_path = root.join(METADATA_FILE);
    if !metadata_path.exists() {
        return Err(SslError::PathNotFound(metadata_path));
    }
    let clips: Vec<ClipMeta> = parse_metadata(&fs::read_to_string(&metadata_path)?)?
        .into_iter()
        .filter(|clip| folds.contains(&clip.fold))
        .collect();

    let pb = ProgressBar::new(clips.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("  {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")
            .map_err(|e| SslError::Dataset(e.to_string()))?
            .progress_chars("#>-"),
    );
    let loaded = AtomicUsize::new(0);

    let items = clips
        .par_iter()
        .map(|clip| {
            let path = clip.feature_path(root);
            let bytes = fs::read(&path).dataset_context(&format!("Failed to read {}", path.display()))?;
            let data = parse_features(&bytes)?;
            let count = loaded.fetch_add(1, Ordering::Relaxed);
            if count % 100 == 0 {
                pb.set_position(count as u64);
            }
            Ok(SslItem {
                data,
                label: clip.class_id,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    pb.finish_and_clear();

    info!("Loaded {} UBS8K clips from folds {:?}", items.len(), folds);
    InMemoryDataset::new(items, UBS8K_SHAPE)
}
