//! Persistence of the trained recognizer at its well-known path.

use clockface_core::{Classifier, LbphModel, ModelError};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Where the single shared recognizer lives.
///
/// `replace` is atomic with respect to `load`: a concurrent reader sees either
/// the previous model or the new one, never a partial file.
pub trait ModelStore {
    type Model: Classifier;

    fn exists(&self) -> bool;

    /// `Ok(None)` when no model has been trained yet.
    fn load(&self) -> Result<Option<Self::Model>, ModelError>;

    fn replace(&self, model: &LbphModel) -> Result<(), ModelError>;
}

#[derive(Debug, Clone)]
pub struct FileModelStore {
    path: PathBuf,
}

impl FileModelStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl ModelStore for FileModelStore {
    type Model = LbphModel;

    fn exists(&self) -> bool {
        self.path.is_file()
    }

    fn load(&self) -> Result<Option<LbphModel>, ModelError> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let model = LbphModel::read_from(BufReader::new(file))?;
        tracing::debug!(
            path = %self.path.display(),
            samples = model.sample_count(),
            trained_at = %model.trained_at,
            "recognizer model loaded"
        );
        Ok(Some(model))
    }

    fn replace(&self, model: &LbphModel) -> Result<(), ModelError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let tmp = self.temp_path();
        let file = File::create(&tmp)?;
        let mut writer = BufWriter::new(file);
        model.write_to(&mut writer)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        drop(writer);
        std::fs::rename(&tmp, &self.path)?;

        tracing::info!(
            path = %self.path.display(),
            samples = model.sample_count(),
            "recognizer model replaced"
        );
        Ok(())
    }
}

/// Whether `model` was fitted on a corpus other than the one fingerprinted now.
pub fn is_stale(model: &LbphModel, corpus_fingerprint: &str) -> bool {
    model.corpus_fingerprint != corpus_fingerprint
}
