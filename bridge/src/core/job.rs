//! Job spec builder: user-facing parameters to a canonical job descriptor.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::style::Style;

/// Default diffusion model handed to the worker.
pub const DEFAULT_MODEL_ID: &str = "Lykon/dreamshaper-8";

/// Encoding of the generated image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Png,
    Jpeg,
}

impl ExportFormat {
    /// Lenient parse: `jpeg`/`jpg` in any case select JPEG, anything else PNG.
    pub fn resolve(name: &str) -> ExportFormat {
        match name.trim().to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" => ExportFormat::Jpeg,
            _ => ExportFormat::Png,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Png => "png",
            ExportFormat::Jpeg => "jpeg",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Png => "png",
            ExportFormat::Jpeg => "jpg",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw parameters as collected by the presentation layer.
///
/// Numeric fields that come from sliders (`steps`, `max_resolution`,
/// `jpeg_quality`) are floating point here and coerced to integers by
/// [`JobSpecBuilder::build`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParams {
    pub input_path: PathBuf,
    pub style: String,
    pub prompt_extra: String,
    pub strength: f64,
    pub guidance_scale: f64,
    pub steps: f64,
    /// Negative means unseeded.
    pub seed: i64,
    pub max_resolution: f64,
    pub output_scale: f64,
    pub export_format: String,
    pub jpeg_quality: f64,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            input_path: PathBuf::new(),
            style: Style::Anime.as_str().to_string(),
            prompt_extra: String::new(),
            strength: 0.8,
            guidance_scale: 7.5,
            steps: 30.0,
            seed: -1,
            max_resolution: 768.0,
            output_scale: 1.0,
            export_format: ExportFormat::Png.as_str().to_string(),
            jpeg_quality: 90.0,
        }
    }
}

impl GenerationParams {
    pub fn for_input(input_path: impl Into<PathBuf>) -> Self {
        Self {
            input_path: input_path.into(),
            ..Default::default()
        }
    }
}

/// Canonical parameters for one generation request.
#[derive(Debug, Clone, PartialEq)]
pub struct JobDescriptor {
    pub input_path: PathBuf,
    pub style: Style,
    pub prompt_extra: String,
    /// Style preset prompt with `prompt_extra` appended.
    pub prompt: String,
    pub negative_prompt: String,
    pub strength: f64,
    pub guidance_scale: f64,
    pub steps: u32,
    pub seed: i64,
    pub max_resolution: u32,
    pub output_scale: f64,
    pub export_format: ExportFormat,
    pub jpeg_quality: u8,
    pub model_id: String,
    pub force_cpu: bool,
}

impl JobDescriptor {
    pub fn is_seeded(&self) -> bool {
        self.seed >= 0
    }

    /// Wire form written to the worker's `--params` file.
    pub fn worker_params(&self, input_path: &Path, output_path: &Path) -> WorkerParams {
        WorkerParams {
            input_path: input_path.display().to_string(),
            output_path: output_path.display().to_string(),
            style: self.style,
            prompt_extra: self.prompt_extra.clone(),
            strength: self.strength,
            guidance_scale: self.guidance_scale,
            steps: self.steps,
            seed: self.seed,
            max_resolution: self.max_resolution,
            output_scale: self.output_scale,
            export_format: self.export_format,
            jpeg_quality: self.jpeg_quality,
            model_id: self.model_id.clone(),
            force_cpu: self.force_cpu,
            prompt: self.prompt.clone(),
            negative_prompt: self.negative_prompt.clone(),
        }
    }
}

/// JSON object the worker reads via `--params <path>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerParams {
    pub input_path: String,
    pub output_path: String,
    pub style: Style,
    pub prompt_extra: String,
    pub strength: f64,
    pub guidance_scale: f64,
    pub steps: u32,
    pub seed: i64,
    pub max_resolution: u32,
    pub output_scale: f64,
    pub export_format: ExportFormat,
    pub jpeg_quality: u8,
    pub model_id: String,
    pub force_cpu: bool,
    pub prompt: String,
    pub negative_prompt: String,
}

/// Builds [`JobDescriptor`]s, filling the internal fields from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpecBuilder {
    model_id: String,
    force_cpu: bool,
}

impl Default for JobSpecBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_MODEL_ID, true)
    }
}

impl JobSpecBuilder {
    pub fn new(model_id: impl Into<String>, force_cpu: bool) -> Self {
        Self {
            model_id: model_id.into(),
            force_cpu,
        }
    }

    /// Resolve presets and coerce slider values. Out-of-range strength and
    /// guidance values are passed through untouched.
    pub fn build(&self, params: &GenerationParams) -> JobDescriptor {
        let style = Style::resolve(&params.style);
        let preset = style.preset();
        let prompt = if params.prompt_extra.trim().is_empty() {
            preset.prompt.to_string()
        } else {
            format!("{}, {}", preset.prompt, params.prompt_extra)
        };

        JobDescriptor {
            input_path: params.input_path.clone(),
            style,
            prompt_extra: params.prompt_extra.clone(),
            prompt,
            negative_prompt: preset.negative_prompt.to_string(),
            strength: params.strength,
            guidance_scale: params.guidance_scale,
            steps: coerce_u32(params.steps).max(1),
            seed: params.seed,
            max_resolution: coerce_u32(params.max_resolution).max(1),
            output_scale: params.output_scale,
            export_format: ExportFormat::resolve(&params.export_format),
            jpeg_quality: coerce_u32(params.jpeg_quality).min(100) as u8,
            model_id: self.model_id.clone(),
            force_cpu: self.force_cpu,
        }
    }
}

/// Truncate toward zero; NaN and negatives become 0.
fn coerce_u32(value: f64) -> u32 {
    if value.is_nan() || value <= 0.0 {
        0
    } else if value >= f64::from(u32::MAX) {
        u32::MAX
    } else {
        value.trunc() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(style: &str) -> GenerationParams {
        GenerationParams {
            input_path: PathBuf::from("/photos/me.jpg"),
            style: style.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn unknown_style_uses_anime_preset() {
        let job = JobSpecBuilder::default().build(&params("vaporwave"));
        let anime = Style::Anime.preset();
        assert_eq!(job.style, Style::Anime);
        assert_eq!(job.prompt, anime.prompt);
        assert_eq!(job.negative_prompt, anime.negative_prompt);
    }

    #[test]
    fn prompt_extra_is_appended_with_comma() {
        let mut raw = params("Comic");
        raw.prompt_extra = "red hair".to_string();
        let job = JobSpecBuilder::default().build(&raw);
        assert_eq!(job.style, Style::Comic);
        assert_eq!(
            job.prompt,
            format!("{}, red hair", Style::Comic.preset().prompt)
        );
    }

    #[test]
    fn blank_prompt_extra_leaves_preset_untouched() {
        let mut raw = params("sketch");
        raw.prompt_extra = "   ".to_string();
        let job = JobSpecBuilder::default().build(&raw);
        assert_eq!(job.prompt, Style::Sketch.preset().prompt);
    }

    #[test]
    fn prompt_extra_is_appended_verbatim() {
        let mut raw = params("comic");
        raw.prompt_extra = " red hair\n".to_string();
        let job = JobSpecBuilder::default().build(&raw);
        assert_eq!(
            job.prompt,
            format!("{},  red hair\n", Style::Comic.preset().prompt)
        );
    }

    #[test]
    fn slider_values_are_coerced_to_integers() {
        let mut raw = params("anime");
        raw.steps = 29.9;
        raw.max_resolution = 640.4;
        raw.jpeg_quality = 250.0;
        let job = JobSpecBuilder::default().build(&raw);
        assert_eq!(job.steps, 29);
        assert_eq!(job.max_resolution, 640);
        assert_eq!(job.jpeg_quality, 100);

        raw.steps = 0.0;
        assert_eq!(JobSpecBuilder::default().build(&raw).steps, 1);
    }

    #[test]
    fn strength_is_passed_through_unclamped() {
        let mut raw = params("anime");
        raw.strength = 1.7;
        raw.guidance_scale = 0.5;
        let job = JobSpecBuilder::default().build(&raw);
        assert_eq!(job.strength, 1.7);
        assert_eq!(job.guidance_scale, 0.5);
    }

    #[test]
    fn internal_fields_come_from_builder() {
        let job = JobSpecBuilder::new("runwayml/stable-diffusion-v1-5", false).build(&params("pixar"));
        assert_eq!(job.model_id, "runwayml/stable-diffusion-v1-5");
        assert!(!job.force_cpu);
        assert!(!job.is_seeded());
    }

    #[test]
    fn export_format_accepts_ui_spellings() {
        assert_eq!(ExportFormat::resolve("PNG"), ExportFormat::Png);
        assert_eq!(ExportFormat::resolve("JPEG"), ExportFormat::Jpeg);
        assert_eq!(ExportFormat::resolve("jpg"), ExportFormat::Jpeg);
        assert_eq!(ExportFormat::resolve("webp"), ExportFormat::Png);
        assert_eq!(ExportFormat::Jpeg.extension(), "jpg");
    }

    #[test]
    fn worker_params_carry_required_keys() {
        let job = JobSpecBuilder::default().build(&params("watercolor"));
        let wire = job.worker_params(Path::new("/tmp/in.jpg"), Path::new("/tmp/out.png"));
        let value = serde_json::to_value(&wire).expect("serialize");
        for key in [
            "input_path",
            "output_path",
            "style",
            "prompt_extra",
            "strength",
            "guidance_scale",
            "steps",
            "seed",
            "max_resolution",
            "output_scale",
            "export_format",
            "jpeg_quality",
            "model_id",
            "force_cpu",
        ] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
        assert_eq!(value["style"], "watercolor");
        assert_eq!(value["export_format"], "png");
        assert_eq!(value["seed"], -1);
    }
}
