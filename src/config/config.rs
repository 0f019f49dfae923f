//! Application configuration and CLI argument parsing.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::tuning::Tuning;

/// Compute device for classifier inference.
/// Auto-detected based on platform if not specified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// CPU inference (default fallback, always available)
    #[default]
    Cpu,
    /// NVIDIA CUDA acceleration (requires the `cuda` feature)
    Cuda,
    /// Apple Metal acceleration (requires the `metal` feature)
    Metal,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provider::Cpu => write!(f, "cpu"),
            Provider::Cuda => write!(f, "cuda"),
            Provider::Metal => write!(f, "metal"),
        }
    }
}

/// Recognizer configuration.
#[derive(Parser, Debug, Clone, Serialize, Deserialize)]
#[command(name = "isl-recognizer")]
#[command(author, version, about = "Real-time ISL finger-spelling recognizer", long_about = None)]
pub struct AppConfig {
    /// Directory containing the classifier checkpoint
    #[arg(long, short = 'd', env = "MODEL_DIR", default_value_os_t = default_base_dir().join("models"))]
    pub model_dir: PathBuf,

    /// Checkpoint file (.pth or .safetensors); defaults to <model-dir>/best.pth
    #[arg(long, short = 'm', env = "MODEL_PATH")]
    pub model_path: Option<PathBuf>,

    /// Hardware acceleration provider (auto-detected if not specified)
    #[arg(long, value_enum)]
    pub provider: Option<Provider>,

    /// Extra dictionary words, one per line, merged with the built-in list
    #[arg(long, env = "ISL_DICTIONARY")]
    pub dictionary: Option<PathBuf>,

    /// JSON file overriding tuned thresholds and correction tables
    #[arg(long, env = "ISL_TUNING")]
    pub tuning: Option<PathBuf>,

    /// Directory where collected (image, label) samples are written
    #[arg(long, env = "ISL_SAMPLE_DIR", default_value_os_t = default_base_dir().join("samples"))]
    pub sample_dir: PathBuf,

    /// Gesture letter that arms recognition (overrides the tuning file)
    #[arg(long)]
    pub activation_letter: Option<char>,

    /// Start sessions with recognition already active
    #[arg(long)]
    pub start_active: bool,

    /// Idle seconds before the current word is finalized (overrides the tuning file)
    #[arg(long)]
    pub word_timeout: Option<f32>,

    /// Defer loading the checkpoint until the first frame arrives
    #[arg(long)]
    pub lazy_model: bool,

    /// Session id used for commands that don't name one
    #[arg(long, default_value = "default")]
    pub default_session: String,

    /// Frames processed concurrently across sessions (0 = auto-detect based on CPU cores)
    #[arg(long, default_value = "0")]
    pub max_concurrent_frames: usize,

    /// Enable verbose logging
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

impl AppConfig {
    /// Parse configuration from command line arguments.
    pub fn from_args() -> Self {
        let mut config = Self::parse();
        config.normalize_concurrency();
        config
    }

    /// Resolve the frame concurrency from CPU cores and provider.
    ///
    /// GPU inference is serialized by the device queue anyway, so more than a
    /// couple of in-flight frames only adds contention there.
    fn normalize_concurrency(&mut self) {
        if self.max_concurrent_frames == 0 {
            let cpu_cores = num_cpus::get();
            self.max_concurrent_frames = if self.effective_provider() == Provider::Cpu { (cpu_cores / 2).max(1) } else { 2 };
        }

        if self.verbose {
            info!("CPU cores: {}, Provider: {}, Concurrent frames: {}", num_cpus::get(), self.effective_provider(), self.max_concurrent_frames);
        }
    }

    /// Get the effective inference provider.
    pub fn effective_provider(&self) -> Provider {
        self.provider.unwrap_or_else(detect_provider)
    }

    /// Get the path to the classifier checkpoint.
    pub fn checkpoint_path(&self) -> PathBuf {
        self.model_path.clone().unwrap_or_else(|| self.model_dir.join("best.pth"))
    }

    /// Build the tuning tables: file overrides first, then CLI overrides.
    pub fn load_tuning(&self) -> Result<Tuning> {
        let mut tuning = match &self.tuning {
            Some(path) => Tuning::from_file(path)?,
            None => Tuning::default(),
        };

        if let Some(letter) = self.activation_letter {
            tuning.activation.letter = letter.to_ascii_uppercase();
        }
        if self.start_active {
            tuning.activation.start_active = true;
        }
        if let Some(timeout) = self.word_timeout {
            tuning.words.word_timeout_secs = timeout;
        }

        tuning.validate()?;
        Ok(tuning)
    }

    /// Validate the configuration.
    ///
    /// A missing checkpoint is not an error here: the recognizer starts in a
    /// not-ready state and reports it per frame.
    pub fn validate(&self) -> Result<()> {
        if let Some(ref path) = self.tuning
            && !path.exists()
        {
            anyhow::bail!("Tuning file not found: {}", path.display());
        }

        if let Some(ref path) = self.dictionary
            && !path.exists()
        {
            anyhow::bail!("Dictionary file not found: {}", path.display());
        }

        if let Some(letter) = self.activation_letter
            && !letter.is_ascii_alphanumeric()
        {
            anyhow::bail!("Activation letter must be 0-9 or A-Z, got '{}'", letter);
        }

        if let Some(timeout) = self.word_timeout
            && timeout <= 0.0
        {
            anyhow::bail!("Word timeout must be positive");
        }

        if self.default_session.trim().is_empty() {
            anyhow::bail!("Default session id must not be empty");
        }

        Ok(())
    }

    /// Log the current configuration.
    pub fn log_config(&self) {
        info!("Configuration:");
        info!("  Checkpoint: {}", self.checkpoint_path().display());
        info!("  Provider: {}", self.effective_provider());
        info!("  Model loading: {}", if self.lazy_model { "on first frame" } else { "at startup" });
        if let Some(ref path) = self.dictionary {
            info!("  Dictionary: {}", path.display());
        }
        if let Some(ref path) = self.tuning {
            info!("  Tuning: {}", path.display());
        }
        // No landmark model ships with the binary
        info!("  Hand landmarks: client-supplied only, frames without them are classified whole");
        info!("  Sample directory: {}", self.sample_dir.display());
        info!("  Default session: {}", self.default_session);
        info!("  Concurrent frames: {}", self.max_concurrent_frames);
        if self.start_active {
            info!("  Activation: disabled (sessions start active)");
        }
    }
}

/// Get the default base directory (~/.isl-recognizer).
fn default_base_dir() -> PathBuf {
    if let Some(home_dir) = dirs::home_dir() {
        home_dir.join(".isl-recognizer")
    } else {
        PathBuf::from(".isl-recognizer")
    }
}

/// Auto-detect the best inference provider.
fn detect_provider() -> Provider {
    #[cfg(all(target_os = "macos", feature = "metal"))]
    {
        info!("Detected macOS, using Metal provider");
        Provider::Metal
    }

    #[cfg(all(target_os = "linux", feature = "cuda"))]
    {
        if has_nvidia_gpu() {
            info!("Detected NVIDIA GPU, using CUDA provider");
            Provider::Cuda
        } else {
            info!("No GPU detected, using CPU provider");
            Provider::Cpu
        }
    }

    #[cfg(not(any(all(target_os = "macos", feature = "metal"), all(target_os = "linux", feature = "cuda"))))]
    {
        Provider::Cpu
    }
}

/// Check if an NVIDIA GPU is available (Linux only).
#[cfg(all(target_os = "linux", feature = "cuda"))]
fn has_nvidia_gpu() -> bool {
    use std::path::Path;

    let nvidia_paths = [
        "/dev/nvidia0",
        "/dev/nvidiactl",
        "/dev/nvidia-uvm",
        // Jetson devices
        "/dev/nvhost-ctrl",
        "/dev/nvhost-ctrl-gpu",
    ];

    nvidia_paths.iter().any(|path| Path::new(path).exists()) || Path::new("/etc/nv_tegra_release").exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_tuning() {
        let config = AppConfig::parse_from(["isl-recognizer", "--activation-letter", "b", "--word-timeout", "1.5", "--start-active"]);
        let tuning = config.load_tuning().unwrap();
        assert_eq!(tuning.activation.letter, 'B');
        assert!(tuning.activation.start_active);
        assert_eq!(tuning.words.word_timeout_secs, 1.5);
    }

    #[test]
    fn test_checkpoint_defaults_to_model_dir() {
        let config = AppConfig::parse_from(["isl-recognizer", "--model-dir", "/opt/isl"]);
        assert_eq!(config.checkpoint_path(), PathBuf::from("/opt/isl/best.pth"));
    }

    #[test]
    fn test_validate_rejects_bad_activation_letter() {
        let config = AppConfig::parse_from(["isl-recognizer", "--activation-letter", "?"]);
        assert!(config.validate().is_err());
    }
}
