//! Data assembly for the two labelled sources
//!
//! The competition table (`train.csv`: `id_code,diagnosis`) and the auxiliary
//! table (`trainLabels_cropped.csv`: `Unnamed: 0,Unnamed: 0.1,image,level`)
//! are both reshaped into `diagnosis,path` so one sample type serves both.

use std::path::{Path, PathBuf};

use rand::Rng;
use rayon::prelude::*;
use tracing::info;

use super::table::{ManifestTable, SampleRecord};
use crate::utils::error::{GradingError, Result};

pub const PRIMARY_TRAIN_CSV: &str = "train.csv";
pub const PRIMARY_TEST_CSV: &str = "sample_submission.csv";
pub const PRIMARY_TRAIN_DIR: &str = "train_images";
pub const PRIMARY_TEST_DIR: &str = "test_images";
pub const PRIMARY_SUFFIX: &str = "png";

pub const AUXILIARY_CSV: &str = "trainLabels_cropped.csv";
pub const AUXILIARY_SUFFIX: &str = "jpeg";
pub const AUXILIARY_BOOKKEEPING: [&str; 2] = ["Unnamed: 0", "Unnamed: 0.1"];

/// Column names of the unified shape
pub const PATH_COLUMN: &str = "path";
pub const LABEL_COLUMN: &str = "diagnosis";
pub const ID_COLUMN: &str = "id_code";

/// Image directory of the auxiliary set (the archive nests it twice)
pub fn auxiliary_image_dir(root: &Path) -> PathBuf {
    root.join("resized_train_cropped").join("resized_train_cropped")
}

/// Competition training table plus the unlabelled test table
#[derive(Debug, Clone)]
pub struct PrimaryData {
    /// `diagnosis,path`, shuffled
    pub train: ManifestTable,
    /// `sample_submission.csv` as read
    pub test: ManifestTable,
}

impl PrimaryData {
    pub fn train_samples(&self) -> Result<Vec<SampleRecord>> {
        self.train.to_samples(PATH_COLUMN, LABEL_COLUMN)
    }
}

/// Load the competition data rooted at `root`
pub fn load_primary<R: Rng + ?Sized>(root: &Path, rng: &mut R) -> Result<PrimaryData> {
    let image_dir = root.join(PRIMARY_TRAIN_DIR);

    let mut train = ManifestTable::read_csv(&root.join(PRIMARY_TRAIN_CSV))?;
    train.derive_column(PATH_COLUMN, ID_COLUMN, |id| {
        image_path(&image_dir, id, PRIMARY_SUFFIX)
    })?;
    train.drop_columns(&[ID_COLUMN])?;
    train.shuffle(rng);

    let test = ManifestTable::read_csv(&root.join(PRIMARY_TEST_CSV))?;

    info!(
        "Primary data: {} training rows, {} test rows from {:?}",
        train.len(),
        test.len(),
        root
    );

    Ok(PrimaryData { train, test })
}

/// Load the auxiliary (pre-training) data rooted at `root`
pub fn load_auxiliary<R: Rng + ?Sized>(root: &Path, rng: &mut R) -> Result<ManifestTable> {
    let image_dir = auxiliary_image_dir(root);

    let mut table = ManifestTable::read_csv(&root.join(AUXILIARY_CSV))?;
    table.derive_column(PATH_COLUMN, "image", |image| {
        image_path(&image_dir, image, AUXILIARY_SUFFIX)
    })?;
    table.drop_columns(&["image"])?;
    table.shuffle(rng);
    table.rename_column("level", LABEL_COLUMN)?;
    table.drop_columns(&AUXILIARY_BOOKKEEPING)?;

    info!("Auxiliary data: {} rows from {:?}", table.len(), root);

    Ok(table)
}

/// Samples for the test split; labels are placeholders
pub fn test_samples(root: &Path, test: &ManifestTable) -> Result<Vec<SampleRecord>> {
    let image_dir = root.join(PRIMARY_TEST_DIR);

    Ok(test
        .column_values(ID_COLUMN)?
        .into_iter()
        .map(|id| SampleRecord::new(image_path(&image_dir, id, PRIMARY_SUFFIX), 0.0))
        .collect())
}

/// Check that every sample's image exists and has a readable header
///
/// Only the header is decoded. Reports the first failing sample in input order.
pub fn validate_images(source: &str, samples: &[SampleRecord]) -> Result<()> {
    let failure = samples.par_iter().find_map_first(|sample| {
        if !sample.path.is_file() {
            return Some(GradingError::PathNotFound(
                sample.path.clone(),
                format!("image listed in the {} manifest", source),
            ));
        }
        image::image_dimensions(&sample.path)
            .err()
            .map(|e| GradingError::Image(sample.path.clone(), e.to_string()))
    });

    match failure {
        Some(err) => Err(err),
        None => {
            info!("{}: {} images present", source, samples.len());
            Ok(())
        }
    }
}

fn image_path(dir: &Path, stem: &str, suffix: &str) -> String {
    dir.join(format!("{}.{}", stem, suffix))
        .to_string_lossy()
        .to_string()
}
