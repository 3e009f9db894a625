//! Hugging Face model cache lookup, used to tell the user whether the first
//! generation will download the model.

use std::path::{Path, PathBuf};

use directories_next::BaseDirs;

/// Hub cache root: `HF_HUB_CACHE`, else `$HF_HOME/hub`, else
/// `~/.cache/huggingface/hub`.
pub fn hub_cache_dir() -> Option<PathBuf> {
    if let Some(dir) = std::env::var_os("HF_HUB_CACHE").filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(dir));
    }
    if let Some(home) = std::env::var_os("HF_HOME").filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(home).join("hub"));
    }
    BaseDirs::new().map(|dirs| dirs.home_dir().join(".cache").join("huggingface").join("hub"))
}

/// `<root>/models--<org>--<name>` for a model id like `org/name`.
pub fn model_cache_path(cache_root: &Path, model_id: &str) -> PathBuf {
    cache_root.join(format!("models--{}", model_id.replace('/', "--")))
}

pub fn is_model_cached(cache_root: &Path, model_id: &str) -> bool {
    model_cache_path(cache_root, model_id).is_dir()
}

/// Human-readable note on the model's cache state.
pub fn model_cache_hint(model_id: &str) -> String {
    match hub_cache_dir() {
        Some(root) if is_model_cached(&root, model_id) => {
            format!("Model {model_id} is cached at {}", model_cache_path(&root, model_id).display())
        }
        _ => format!("Model {model_id} is not cached yet; the first generation will download it"),
    }
}
