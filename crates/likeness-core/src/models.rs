//! Model files and their integrity checks.

use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// SCRFD detector file name.
pub const DETECTOR_MODEL: &str = "det_10g.onnx";
/// ArcFace recognizer file name.
pub const RECOGNIZER_MODEL: &str = "w600k_r50.onnx";

/// A model the provider needs, with its expected SHA-256.
#[derive(Debug, Clone, Copy)]
pub struct ModelFile {
    pub name: &'static str,
    pub sha256: &'static str,
    pub size_display: &'static str,
}

// insightface buffalo_l release
pub const MODELS: &[ModelFile] = &[
    ModelFile {
        name: DETECTOR_MODEL,
        sha256: "5838f7fe053675b1c7a08b633df49e7af5495cee0493c7dcf6697200b85b5b91",
        size_display: "16 MB",
    },
    ModelFile {
        name: RECOGNIZER_MODEL,
        sha256: "4c06341c33c2ca1f86781dab0e829f88ad5b64be9fba56e56bc9ebdefc619e43",
        size_display: "166 MB",
    },
];

#[derive(Error, Debug)]
pub enum ModelIntegrityError {
    #[error("model file not found: {name} ({path})")]
    Missing { name: &'static str, path: PathBuf },

    #[error("failed to read model file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("checksum mismatch for {name} ({path})\n  expected: {expected}\n  got:      {got}")]
    ChecksumMismatch {
        name: &'static str,
        path: PathBuf,
        expected: String,
        got: String,
    },
}

/// Model directory from `LIKENESS_MODEL_DIR`, else the XDG data directory.
pub fn default_model_dir() -> PathBuf {
    resolve_model_dir(
        std::env::var_os("LIKENESS_MODEL_DIR").map(PathBuf::from),
        std::env::var_os("XDG_DATA_HOME").map(PathBuf::from),
        std::env::var_os("HOME").map(PathBuf::from),
    )
}

fn resolve_model_dir(
    explicit: Option<PathBuf>,
    data_home: Option<PathBuf>,
    home: Option<PathBuf>,
) -> PathBuf {
    if let Some(dir) = explicit.filter(|d| !d.as_os_str().is_empty()) {
        return dir;
    }
    let data_home = data_home
        .filter(|d| !d.as_os_str().is_empty())
        .unwrap_or_else(|| {
            home.unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".local/share")
        });
    data_home.join("likeness/models")
}

pub fn model_path(model_dir: &Path, name: &str) -> PathBuf {
    model_dir.join(name)
}

/// SHA-256 of a file as lowercase hex.
pub fn sha256_file_hex(path: &Path) -> Result<String, ModelIntegrityError> {
    let io_err = |source| ModelIntegrityError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = fs::File::open(path).map_err(io_err)?;

    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf).map_err(io_err)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Check one model file against its expected checksum.
pub fn check_model(model: &ModelFile, model_dir: &Path) -> Result<PathBuf, ModelIntegrityError> {
    let path = model_path(model_dir, model.name);
    if !path.exists() {
        return Err(ModelIntegrityError::Missing {
            name: model.name,
            path,
        });
    }

    let got = sha256_file_hex(&path)?;
    if got != model.sha256 {
        return Err(ModelIntegrityError::ChecksumMismatch {
            name: model.name,
            path,
            expected: model.sha256.to_string(),
            got,
        });
    }
    Ok(path)
}

/// Check every known model; stops at the first problem.
pub fn verify_models(model_dir: &Path) -> Result<(), ModelIntegrityError> {
    for model in MODELS {
        check_model(model, model_dir)?;
        tracing::debug!(model = model.name, "model checksum ok");
    }
    Ok(())
}
