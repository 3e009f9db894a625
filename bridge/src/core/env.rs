//! Environment overrides applied to worker and installer subprocesses.

/// Overrides every Python subprocess needs: fork-safety off and GPU fallback on.
pub fn runtime_env() -> Vec<(String, String)> {
    [
        ("OBJC_DISABLE_INITIALIZE_FORK_SAFETY", "YES"),
        ("PYTORCH_ENABLE_MPS_FALLBACK", "1"),
        ("PYTORCH_MPS_HIGH_WATERMARK_RATIO", "0.0"),
    ]
    .into_iter()
    .map(|(key, value)| (key.to_string(), value.to_string()))
    .collect()
}

/// Overrides for a generation worker: [`runtime_env`] plus thread caps for the
/// numeric libraries, tokenizer parallelism off, and unbuffered output so
/// log lines arrive while the job runs.
pub fn worker_env(threads: u32) -> Vec<(String, String)> {
    let threads = threads.to_string();
    let mut env = runtime_env();
    env.push(("PYTHONUNBUFFERED".to_string(), "1".to_string()));
    for key in ["OMP_NUM_THREADS", "MKL_NUM_THREADS", "OPENBLAS_NUM_THREADS"] {
        env.push((key.to_string(), threads.clone()));
    }
    env.push(("TOKENIZERS_PARALLELISM".to_string(), "false".to_string()));
    env
}
