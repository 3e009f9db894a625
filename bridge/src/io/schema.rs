//! JSON Schema check for the worker parameter file.

use anyhow::{Context, Result, bail};
use jsonschema::Draft;
use serde_json::Value;

const WORKER_PARAMS_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/worker_params.schema.json"
));

/// Validate a parameter object before it is handed to the worker.
pub fn validate_worker_params(instance: &Value) -> Result<()> {
    let schema: Value =
        serde_json::from_str(WORKER_PARAMS_SCHEMA).context("parse worker params schema")?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .context("compile worker params schema")?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!("worker params failed validation:\n- {}", messages.join("\n- "));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::core::job::{GenerationParams, JobSpecBuilder};

    fn valid_params() -> Value {
        let job = JobSpecBuilder::default().build(&GenerationParams::for_input("/in.png"));
        serde_json::to_value(job.worker_params(Path::new("/t/in.png"), Path::new("/o/out.png")))
            .expect("serialize")
    }

    #[test]
    fn built_params_pass() {
        validate_worker_params(&valid_params()).expect("valid");
    }

    #[test]
    fn missing_required_key_fails() {
        let mut params = valid_params();
        params
            .as_object_mut()
            .expect("object")
            .remove("force_cpu");
        let err = validate_worker_params(&params).unwrap_err();
        assert!(err.to_string().contains("force_cpu"));
    }

    #[test]
    fn zero_steps_fail() {
        let mut params = valid_params();
        params["steps"] = Value::from(0);
        assert!(validate_worker_params(&params).is_err());
    }
}
