//! Boundary-facing orchestration: upload validation, scratch-file lifecycle
//! and response shaping.

use std::fs;
use std::path::Path;

use tempfile::TempDir;

use shared::PredictionResponse;

use crate::classifier::config::ClassifierConfig;
use crate::classifier::registry;
use crate::error::ClassifierError;

pub const ALLOWED_CONTENT_TYPES: [&str; 3] = ["image/jpeg", "image/png", "image/bmp"];

const SUCCESS_MESSAGE: &str = "image analysis succeeded";

#[derive(Clone)]
pub struct PredictionService {
    config: ClassifierConfig,
}

impl PredictionService {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Checked before any bytes are buffered or written to disk.
    pub fn validate_content_type(&self, content_type: &str) -> Result<(), ClassifierError> {
        if ALLOWED_CONTENT_TYPES.contains(&content_type) {
            Ok(())
        } else {
            Err(ClassifierError::UnsupportedMediaType(
                content_type.to_string(),
            ))
        }
    }

    /// A payload of exactly the configured limit is accepted; one byte over
    /// is not.
    pub fn validate_file_size(&self, size: usize) -> Result<(), ClassifierError> {
        if size > self.config.max_upload_bytes {
            Err(ClassifierError::PayloadTooLarge {
                size,
                max: self.config.max_upload_bytes,
            })
        } else {
            Ok(())
        }
    }

    /// Writes the upload to a uniquely-named scratch directory, runs the
    /// shared classifier on it and shapes the success envelope. The scratch
    /// directory is removed on every exit path, error or not.
    pub fn predict(
        &self,
        file_bytes: &[u8],
        filename: &str,
    ) -> Result<PredictionResponse, ClassifierError> {
        let scratch = self.scratch_dir()?;
        let target = scratch.path().join(sanitize_filename(filename));
        fs::write(&target, file_bytes)?;

        let classifier = registry::get_classifier(&self.config)?;
        let result = classifier.predict(&target)?;

        Ok(PredictionResponse {
            message: SUCCESS_MESSAGE.to_string(),
            data: result,
        })
    }

    fn scratch_dir(&self) -> Result<TempDir, ClassifierError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("vegetable-predict-");
        match &self.config.scratch_dir {
            Some(root) => {
                fs::create_dir_all(root)?;
                builder.tempdir_in(root)
            }
            None => builder.tempdir(),
        }
        .map_err(ClassifierError::from)
    }
}

/// Client-supplied names keep only their final path component; the extension
/// is preserved for format sniffing at decode time.
fn sanitize_filename(filename: &str) -> String {
    Path::new(filename)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload.img".to_string())
}
