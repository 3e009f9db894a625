//! Worker script materialization and worker selection.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use tracing::{debug, info};

use crate::core::progress::WORKER_LOG_PREFIX;
use crate::core::types::WorkerKind;
use crate::io::layout::RuntimeLayout;

const STANDARD_WORKER_TEMPLATE: &str = include_str!("../../worker/cartoonizer_cli.py.j2");

/// Render the standard worker for `model_id`.
pub fn render_standard_worker(model_id: &str) -> Result<String> {
    let mut env = Environment::new();
    env.set_keep_trailing_newline(true);
    env.add_template("cartoonizer_cli.py", STANDARD_WORKER_TEMPLATE)
        .context("parse worker template")?;
    let template = env.get_template("cartoonizer_cli.py")?;
    let rendered = template
        .render(context! {
            log_prefix => WORKER_LOG_PREFIX,
            default_model => model_id,
        })
        .context("render worker template")?;
    Ok(rendered)
}

/// Write the standard worker script into the scripts directory and mark it
/// executable. Returns the paths written.
///
/// The accelerated worker ships alongside its compiled models and is never
/// generated here.
pub fn materialize_worker_scripts(layout: &RuntimeLayout, model_id: &str) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(&layout.scripts_dir)
        .with_context(|| format!("create {}", layout.scripts_dir.display()))?;
    let script = render_standard_worker(model_id)?;
    fs::write(&layout.standard_script, script)
        .with_context(|| format!("write {}", layout.standard_script.display()))?;
    make_executable(&layout.standard_script)?;
    debug!(path = %layout.standard_script.display(), "materialized worker script");
    Ok(vec![layout.standard_script.clone()])
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
        .with_context(|| format!("chmod {}", path.display()))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

/// True when any of the configured compiled model directories exists.
pub fn has_accelerated_models(layout: &RuntimeLayout, model_dirs: &[PathBuf]) -> bool {
    model_dirs
        .iter()
        .any(|dir| layout.models_dir.join(dir).is_dir())
}

/// Prefer the accelerated worker when both its models and its script are on
/// disk; otherwise use the standard worker.
pub fn select_worker(layout: &RuntimeLayout, model_dirs: &[PathBuf]) -> WorkerKind {
    if has_accelerated_models(layout, model_dirs) && layout.accelerated_script.is_file() {
        info!("using accelerated worker");
        WorkerKind::Accelerated
    } else {
        debug!("accelerated models not found, using standard worker");
        WorkerKind::Standard
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::BridgeConfig;

    #[test]
    fn rendered_worker_carries_prefix_and_model() {
        let script = render_standard_worker("Lykon/dreamshaper-8").expect("render");
        assert!(script.starts_with("#!/usr/bin/env python3\n"));
        assert!(script.contains("LOG_PREFIX = \"[Picturesque]\""));
        assert!(script.contains("DEFAULT_MODEL = \"Lykon/dreamshaper-8\""));
        assert!(script.contains("--params"));
        assert!(script.ends_with('\n'));
    }

    #[cfg(unix)]
    #[test]
    fn materialized_script_is_executable() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::tempdir().expect("tempdir");
        let layout = RuntimeLayout::new(temp.path());
        let written = materialize_worker_scripts(&layout, "Lykon/dreamshaper-8").expect("write");
        assert_eq!(written, vec![layout.standard_script.clone()]);
        let mode = fs::metadata(&layout.standard_script)
            .expect("metadata")
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn accelerated_worker_needs_models_and_script() {
        let temp = tempfile::tempdir().expect("tempdir");
        let layout = RuntimeLayout::new(temp.path());
        let dirs = BridgeConfig::default().accelerated_models;
        assert_eq!(select_worker(&layout, &dirs), WorkerKind::Standard);

        fs::create_dir_all(layout.models_dir.join(&dirs[1])).expect("models");
        assert!(has_accelerated_models(&layout, &dirs));
        assert_eq!(select_worker(&layout, &dirs), WorkerKind::Standard);

        fs::create_dir_all(&layout.scripts_dir).expect("scripts");
        fs::write(&layout.accelerated_script, "print()\n").expect("script");
        assert_eq!(select_worker(&layout, &dirs), WorkerKind::Accelerated);
    }
}
