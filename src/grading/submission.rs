//! Submission file writer

use std::path::Path;

use tracing::info;

use crate::dataset::assembly::LABEL_COLUMN;
use crate::dataset::ManifestTable;
use crate::utils::error::{GradingError, Result};

/// Put `grades` into the diagnosis column of `test` and write it as CSV
///
/// Header and row order come from the test table. The file is written in
/// place, not atomically.
pub fn write_submission(test: &ManifestTable, grades: &[i64], path: &Path) -> Result<ManifestTable> {
    if grades.len() != test.len() {
        return Err(GradingError::Dataset(format!(
            "Submission has {} test rows but {} grades",
            test.len(),
            grades.len()
        )));
    }

    let mut submission = test.clone();
    submission.set_column(LABEL_COLUMN, grades.iter().map(|g| g.to_string()).collect())?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    submission.write_csv(path)?;

    info!("Wrote {} predictions to {:?}", submission.len(), path);
    Ok(submission)
}
