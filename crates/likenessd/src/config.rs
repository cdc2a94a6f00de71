use likeness_core::policy::{DetectorOptions, PROVIDER_TIMEOUT};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_PORT: u16 = 3001;
const DEFAULT_MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;
const DEFAULT_WORKERS: usize = 2;

/// Service configuration, loaded from environment variables.
///
/// The match threshold is not read here; it is a policy constant.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address (default: 0.0.0.0:3001).
    pub bind: String,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    pub detector: DetectorOptions,
    /// Upper bound on one provider call.
    pub provider_timeout: Duration,
    /// Largest accepted photo, per field.
    pub max_image_bytes: usize,
    /// HTTP worker threads.
    pub workers: usize,
}

impl Config {
    /// Load configuration from `LIKENESS_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = DetectorOptions::default();

        let bind = var("LIKENESS_BIND").unwrap_or_else(|| {
            let port: u16 = parse_var(&var, "PORT").unwrap_or(DEFAULT_PORT);
            format!("0.0.0.0:{port}")
        });

        let model_dir = var("LIKENESS_MODEL_DIR")
            .filter(|d| !d.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(likeness_core::models::default_model_dir);

        Self {
            bind,
            model_dir,
            detector: DetectorOptions {
                input_size: parse_var(&var, "LIKENESS_DETECTOR_INPUT_SIZE").unwrap_or(defaults.input_size),
                score_threshold: parse_var(&var, "LIKENESS_DETECTOR_SCORE_THRESHOLD")
                    .unwrap_or(defaults.score_threshold),
                ..defaults
            },
            provider_timeout: parse_var(&var, "LIKENESS_PROVIDER_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(PROVIDER_TIMEOUT),
            max_image_bytes: parse_var(&var, "LIKENESS_MAX_IMAGE_BYTES")
                .unwrap_or(DEFAULT_MAX_IMAGE_BYTES),
            workers: parse_var::<usize>(&var, "LIKENESS_WORKERS")
                .filter(|&n| n > 0)
                .unwrap_or(DEFAULT_WORKERS),
        }
    }
}

fn parse_var<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    var(key).and_then(|v| v.trim().parse().ok())
}
