//! File names for exported results.

use std::path::Path;

use chrono::NaiveDateTime;

use crate::core::job::ExportFormat;

/// Default file name when saving a result: `<input-stem>-<yyyyMMdd-HHmmss>.<ext>`,
/// or `picturesque.<ext>` when there is no usable input name.
pub fn suggested_export_name(
    input: Option<&Path>,
    format: ExportFormat,
    now: NaiveDateTime,
) -> String {
    let stem = input
        .and_then(Path::file_stem)
        .map(|stem| stem.to_string_lossy())
        .filter(|stem| !stem.is_empty());
    match stem {
        Some(stem) => format!(
            "{}-{}.{}",
            stem,
            now.format("%Y%m%d-%H%M%S"),
            format.extension()
        ),
        None => format!("picturesque.{}", format.extension()),
    }
}
