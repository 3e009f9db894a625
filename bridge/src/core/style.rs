//! Style presets mapping a style identifier to its diffusion prompts.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Cartoonization style offered to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Style {
    #[default]
    Anime,
    Comic,
    Pixar,
    Sketch,
    Watercolor,
}

/// Prompt pair resolved for one style.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StylePreset {
    pub prompt: &'static str,
    pub negative_prompt: &'static str,
}

const PORTRAIT_NEGATIVE: &str = "hands, arms, fingers, body, torso, pencils, pens, brushes, tools, objects, items, sketchbook, notebook, paper, canvas, easel, drawing hand, artist hand, holding, watermark, text, signature, logo, frame, border, multiple people, ugly, deformed, blurry, low quality";

const SKETCH_NEGATIVE: &str = "(hands:1.5), (fingers:1.5), (pencil:2.0), (pen:2.0), (artist hand:2.0), (holding:2.0), arms, body, torso, drawing pencils, graphite pencil, colored pencils, mechanical pencil, charcoal stick, brushes, erasers, tools, objects, sketchbook, spiral notebook, notebook, paper background, paper texture, canvas, easel, artist, drawing process, meta, holding pencil, holding pen, holding anything, drawing hand, hand drawing, items, watermark, text, signature, logo, frame, border, multiple people, photograph, photo, realistic, ugly, deformed, blurry, low quality, bad anatomy, extra limbs";

const WATERCOLOR_NEGATIVE: &str = "(hands:1.5), (fingers:1.5), (paintbrush:2.0), (brush:2.0), (artist hand:2.0), (holding:2.0), arms, body, torso, painting tools, pencils, pens, palette, paint tubes, paint palette, water cup, canvas, easel, paper, artist, painting process, holding brush, holding anything, drawing hand, objects, items, watermark, text, signature, logo, frame, border, multiple people, ugly, deformed, blurry, low quality";

impl Style {
    pub const ALL: [Style; 5] = [
        Style::Anime,
        Style::Comic,
        Style::Pixar,
        Style::Sketch,
        Style::Watercolor,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Style::Anime => "anime",
            Style::Comic => "comic",
            Style::Pixar => "pixar",
            Style::Sketch => "sketch",
            Style::Watercolor => "watercolor",
        }
    }

    /// Exact (case-insensitive) lookup; `None` for unknown identifiers.
    pub fn lookup(name: &str) -> Option<Style> {
        let name = name.trim();
        Style::ALL
            .into_iter()
            .find(|style| style.as_str().eq_ignore_ascii_case(name))
    }

    /// Lookup that never fails: unknown identifiers resolve to [`Style::Anime`].
    pub fn resolve(name: &str) -> Style {
        Style::lookup(name).unwrap_or_default()
    }

    pub fn preset(&self) -> StylePreset {
        match self {
            Style::Anime => StylePreset {
                prompt: "high quality anime portrait art, beautiful face, detailed eyes, vibrant colors, clean digital art",
                negative_prompt: PORTRAIT_NEGATIVE,
            },
            Style::Comic => StylePreset {
                prompt: "comic book style portrait, bold ink lines, cel shading, colorful character art",
                negative_prompt: PORTRAIT_NEGATIVE,
            },
            Style::Pixar => StylePreset {
                prompt: "pixar 3d rendered portrait, smooth skin, professional lighting, animated character",
                negative_prompt: PORTRAIT_NEGATIVE,
            },
            Style::Sketch => StylePreset {
                prompt: "monochrome portrait in pencil sketch style, grayscale face art, charcoal portrait aesthetic, line art face, head and shoulders only",
                negative_prompt: SKETCH_NEGATIVE,
            },
            Style::Watercolor => StylePreset {
                prompt: "watercolor portrait art style, painted face effect, soft artistic rendering, pastel portrait",
                negative_prompt: WATERCOLOR_NEGATIVE,
            },
        }
    }
}

impl fmt::Display for Style {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
