//! Classification of worker log lines into progress updates.

use std::sync::LazyLock;

use regex::Regex;

/// Prefix the worker puts on its human-readable stage lines.
pub const WORKER_LOG_PREFIX: &str = "[Picturesque]";

/// Incremental progress surfaced while a job runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// A named stage reported by the worker, e.g. `Loading model...`.
    Stage(String),
    /// Denoising progress from a tqdm-style bar, 0–100.
    Percent(u8),
}

static PERCENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{1,3})%\|").expect("percent regex is valid"));

/// Classify one output line. Lines that carry neither a stage nor a
/// percentage yield `None`.
///
/// tqdm redraws with carriage returns, so a single line may hold several
/// updates; the last one wins.
pub fn classify_line(line: &str) -> Option<Progress> {
    let line = line.trim_end_matches(['\r', '\n']);

    if let Some(stage) = line.trim_start().strip_prefix(WORKER_LOG_PREFIX) {
        let stage = stage.trim();
        return (!stage.is_empty()).then(|| Progress::Stage(stage.to_string()));
    }

    line.rsplit('\r').find_map(|segment| {
        PERCENT_RE
            .captures_iter(segment)
            .last()
            .and_then(|caps| caps[1].parse::<u16>().ok())
            .map(|pct| Progress::Percent(pct.min(100) as u8))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixed_lines_become_stages() {
        assert_eq!(
            classify_line("[Picturesque] Loading model from Lykon/dreamshaper-8...\n"),
            Some(Progress::Stage(
                "Loading model from Lykon/dreamshaper-8...".to_string()
            ))
        );
        assert_eq!(classify_line("[Picturesque]   "), None);
    }

    #[test]
    fn tqdm_bars_become_percentages() {
        assert_eq!(
            classify_line(" 45%|████▌     | 9/20 [00:12<00:15,  1.40s/it]"),
            Some(Progress::Percent(45))
        );
    }

    #[test]
    fn carriage_return_redraws_keep_latest() {
        let line = "  5%|▌ | 1/20\r 10%|█ | 2/20\r 15%|█▌ | 3/20";
        assert_eq!(classify_line(line), Some(Progress::Percent(15)));
    }

    #[test]
    fn unrelated_lines_are_ignored() {
        assert_eq!(classify_line("Fetching 15 files"), None);
        assert_eq!(classify_line("{\"success\": true}"), None);
        assert_eq!(classify_line("discount 50% off"), None);
    }
}
