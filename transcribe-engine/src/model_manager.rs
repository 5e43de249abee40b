//! Locale registry and model provisioning for the streaming analyzer.
//!
//! Supported locales map to GGML Whisper model files. `ensure_model` is the
//! single entry point: membership check, install check, and
//! download-and-install when missing. Downloads land in a temp file, get a
//! SHA-256 sidecar for later integrity checks, and are renamed into place
//! atomically.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::error::SessionError;

const MODEL_BASE_URL: &str = "https://huggingface.co/ggerganov/whisper.cpp/resolve/main";

/// One supported locale and the model file serving it.
#[derive(Debug, Clone, Copy)]
pub struct ModelInfo {
    pub locale: &'static str,
    pub filename: &'static str,
    pub size_mb: u64,
}

/// English gets the dedicated model; other locales share the multilingual
/// base model, selected per session through the language parameter.
const LOCALE_MODELS: &[ModelInfo] = &[
    ModelInfo { locale: "en", filename: "ggml-base.en.bin", size_mb: 142 },
    ModelInfo { locale: "es", filename: "ggml-base.bin", size_mb: 142 },
    ModelInfo { locale: "fr", filename: "ggml-base.bin", size_mb: 142 },
    ModelInfo { locale: "de", filename: "ggml-base.bin", size_mb: 142 },
    ModelInfo { locale: "it", filename: "ggml-base.bin", size_mb: 142 },
    ModelInfo { locale: "pt", filename: "ggml-base.bin", size_mb: 142 },
    ModelInfo { locale: "nl", filename: "ggml-base.bin", size_mb: 142 },
    ModelInfo { locale: "ru", filename: "ggml-base.bin", size_mb: 142 },
    ModelInfo { locale: "uk", filename: "ggml-base.bin", size_mb: 142 },
    ModelInfo { locale: "ja", filename: "ggml-base.bin", size_mb: 142 },
    ModelInfo { locale: "zh", filename: "ggml-base.bin", size_mb: 142 },
    ModelInfo { locale: "ko", filename: "ggml-base.bin", size_mb: 142 },
];

/// Locales the analyzer can serve.
pub fn supported_locales() -> Vec<&'static str> {
    LOCALE_MODELS.iter().map(|m| m.locale).collect()
}

/// Look up the model for a locale. Region subtags are ignored, so "en-US"
/// resolves the same as "en".
pub fn model_for(locale: &str) -> Option<&'static ModelInfo> {
    let language = locale
        .split(['-', '_'])
        .next()
        .unwrap_or(locale)
        .to_lowercase();
    LOCALE_MODELS.iter().find(|m| m.locale == language)
}

/// Expand `~` and environment variables in a model directory setting.
pub fn expand_model_dir(model_dir: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(model_dir)
        .map_err(|e| anyhow::anyhow!("failed to expand model dir: {}", e))?;
    Ok(PathBuf::from(expanded.to_string()))
}

/// Path the locale's model would occupy under `dir`.
pub fn model_path(locale: &str, dir: &Path) -> Option<PathBuf> {
    model_for(locale).map(|info| dir.join(info.filename))
}

/// Whether the locale's model is present on disk.
pub fn model_installed(locale: &str, dir: &Path) -> bool {
    model_path(locale, dir)
        .map(|p| p.is_file())
        .unwrap_or(false)
}

/// Ensure the locale's model is present and intact, downloading if needed.
///
/// An unsupported locale is a terminal error. A model whose sidecar digest
/// no longer matches is treated as corrupt and re-downloaded.
pub fn ensure_model(locale: &str, dir: &Path) -> Result<PathBuf, SessionError> {
    let info = model_for(locale)
        .ok_or_else(|| SessionError::LocaleUnsupported(locale.to_string()))?;

    let dest = dir.join(info.filename);
    if dest.is_file() {
        match verify_sidecar(&dest) {
            Ok(true) => {
                info!("model present: {}", dest.display());
                return Ok(dest);
            }
            Ok(false) => {
                warn!("model {} failed integrity check, re-downloading", dest.display());
                let _ = fs::remove_file(&dest);
            }
            Err(e) => {
                warn!("could not verify {}: {}", dest.display(), e);
                return Ok(dest);
            }
        }
    }

    download_model(info, dir).map_err(|e| SessionError::ModelInstall(e.to_string()))
}

/// Download a model file with a progress bar and write its digest sidecar.
fn download_model(info: &ModelInfo, dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("creating model dir {}", dir.display()))?;

    let url = format!("{}/{}", MODEL_BASE_URL, info.filename);
    let dest = dir.join(info.filename);

    info!("downloading model {} (~{}MB)", info.filename, info.size_mb);
    info!("from: {}", url);
    info!("to: {}", dest.display());

    let response = reqwest::blocking::get(&url)
        .with_context(|| format!("requesting {}", url))?;
    if !response.status().is_success() {
        anyhow::bail!("download failed with status: {}", response.status());
    }

    let total_size = response
        .content_length()
        .unwrap_or(info.size_mb * 1024 * 1024);

    let pb = ProgressBar::new(total_size);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta})")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_message(format!("Downloading {}", info.filename));

    let temp_path = dir.join(format!("{}.tmp", info.filename));
    let mut dest_file = fs::File::create(&temp_path)?;
    let mut reader = pb.wrap_read(response);
    std::io::copy(&mut reader, &mut dest_file)?;
    pb.finish_with_message(format!("Downloaded {}", info.filename));

    let digest = file_sha256(&temp_path)?;
    fs::write(sidecar_path(&dest), &digest)?;
    fs::rename(&temp_path, &dest)?;

    info!("model installed: {} (sha256 {})", dest.display(), &digest[..12]);
    Ok(dest)
}

fn sidecar_path(model: &Path) -> PathBuf {
    let mut name = model.file_name().unwrap_or_default().to_os_string();
    name.push(".sha256");
    model.with_file_name(name)
}

/// Check a model against its digest sidecar. Returns `Ok(true)` when the
/// digest matches or no sidecar exists (nothing to check against).
fn verify_sidecar(model: &Path) -> Result<bool> {
    let sidecar = sidecar_path(model);
    if !sidecar.is_file() {
        return Ok(true);
    }
    let expected = fs::read_to_string(&sidecar)?.trim().to_lowercase();
    let actual = file_sha256(model)?;
    Ok(expected == actual)
}

fn file_sha256(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 1 << 16];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
