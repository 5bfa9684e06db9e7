//! On-disk face sample store.
//!
//! One directory, one file per sample, named `<sanitizedName>.<employeeId>.<seq>.png`.
//! The employee id is recovered from the second dot-separated field; files that
//! don't follow the scheme are ignored when the corpus is enumerated.

use crate::error::StorageError;
use crate::identity::EmployeeId;
use image::GrayImage;
use sha2::{Digest, Sha256};
use std::fs::OpenOptions;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

const SAMPLE_EXTENSION: &str = "png";
const READABLE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "pgm"];

/// A sample file whose name parsed cleanly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleEntry {
    pub path: PathBuf,
    pub employee_id: EmployeeId,
    pub sequence: u32,
}

#[derive(Debug, Clone)]
pub struct SampleStore {
    root: PathBuf,
}

impl SampleStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every well-formed sample, ordered by (employee, sequence).
    ///
    /// A missing root directory is an empty corpus.
    pub fn entries(&self) -> Result<Vec<SampleEntry>, StorageError> {
        let dir = match std::fs::read_dir(&self.root) {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for item in dir {
            let path = item?.path();
            if !path.is_file() {
                continue;
            }
            match parse_sample_name(&path) {
                Some((employee_id, sequence)) => entries.push(SampleEntry {
                    path,
                    employee_id,
                    sequence,
                }),
                None => tracing::warn!(path = %path.display(), "ignoring unrecognized file in sample store"),
            }
        }
        entries.sort_by_key(|e| (e.employee_id, e.sequence));
        Ok(entries)
    }

    pub fn samples_for(&self, employee: EmployeeId) -> Result<Vec<SampleEntry>, StorageError> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|e| e.employee_id == employee)
            .collect())
    }

    pub fn count_for(&self, employee: EmployeeId) -> Result<usize, StorageError> {
        Ok(self.samples_for(employee)?.len())
    }

    /// First unused sequence number for `employee` (1-based, one past the highest).
    pub fn next_sequence(&self, employee: EmployeeId) -> Result<u32, StorageError> {
        match self.samples_for(employee)?.iter().map(|e| e.sequence).max() {
            None => Ok(1),
            Some(max) => max.checked_add(1).ok_or_else(|| sequence_exhausted(employee)),
        }
    }

    /// Persist one canonical sample under `<key>.<sequence>.png`.
    ///
    /// `key` is the employee's `<sanitizedName>.<id>` prefix. Existing files are
    /// never overwritten.
    pub fn write(&self, key: &str, sequence: u32, face: &GrayImage) -> Result<PathBuf, StorageError> {
        std::fs::create_dir_all(&self.root)?;
        let path = self.root.join(format!("{key}.{sequence}.{SAMPLE_EXTENSION}"));

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => StorageError::SampleExists(path.display().to_string()),
                _ => StorageError::Io(e),
            })?;
        let mut writer = BufWriter::new(file);
        face.write_to(&mut writer, image::ImageFormat::Png)?;
        Ok(path)
    }

    pub fn load(&self, entry: &SampleEntry) -> Result<GrayImage, StorageError> {
        Ok(image::open(&entry.path)?.to_luma8())
    }

    /// Remove every sample belonging to `employee`. Returns how many were deleted.
    pub fn delete_for(&self, employee: EmployeeId) -> Result<usize, StorageError> {
        let entries = self.samples_for(employee)?;
        for entry in &entries {
            std::fs::remove_file(&entry.path)?;
        }
        if !entries.is_empty() {
            tracing::info!(employee = %employee, removed = entries.len(), "deleted face samples");
        }
        Ok(entries.len())
    }

    /// SHA-256 over the sorted file names and sizes of the whole corpus.
    ///
    /// Cheap to compute and changes whenever a sample is added, removed or
    /// rewritten with a different size; used to tell whether the trained model
    /// still reflects the store.
    pub fn fingerprint(&self) -> Result<String, StorageError> {
        let mut hasher = Sha256::new();
        for entry in self.entries()? {
            let name = entry
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let len = std::fs::metadata(&entry.path)?.len();
            hasher.update(format!("{name}:{len}\n").as_bytes());
        }
        Ok(hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect())
    }
}

pub(crate) fn sequence_exhausted(employee: EmployeeId) -> StorageError {
    StorageError::Corrupt(format!("sample sequence numbers for employee {employee} are exhausted"))
}

/// Parse `<name>.<id>.<seq>.<ext>` into `(id, seq)`.
fn parse_sample_name(path: &Path) -> Option<(EmployeeId, u32)> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    if !READABLE_EXTENSIONS.contains(&ext.as_str()) {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    let mut parts = stem.split('.');
    let name = parts.next()?;
    let id = parts.next()?.parse::<i64>().ok()?;
    let seq = parts.next()?.parse::<u32>().ok()?;
    if name.is_empty() || parts.next().is_some() {
        return None;
    }
    Some((EmployeeId(id), seq))
}
