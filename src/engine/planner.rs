//! Subclip planning: slice sources into fixed-duration windows and resolve
//! the target geometry.

use std::path::{Path, PathBuf};

use anyhow::Result;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::probe::{MediaInfo, probe_media};
use super::runner::MediaRunner;

/// Output frame geometry requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoAspect {
    Portrait,
    Landscape,
    Square,
    /// Resolved from the first planned window; 1080x1920 when there is none.
    Original,
}

impl VideoAspect {
    pub fn resolution(self) -> Option<(u32, u32)> {
        match self {
            VideoAspect::Portrait => Some((1080, 1920)),
            VideoAspect::Landscape => Some((1920, 1080)),
            VideoAspect::Square => Some((1080, 1080)),
            VideoAspect::Original => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConcatMode {
    /// One window per source, in the given source order.
    Sequential,
    /// Every full window from every source, uniformly shuffled.
    Random,
}

/// A planned [start, end) interval over a source clip.
#[derive(Debug, Clone, PartialEq)]
pub struct SubclipWindow {
    pub source: PathBuf,
    pub start: f64,
    pub end: f64,
    pub width: u32,
    pub height: u32,
}

impl SubclipWindow {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Probe every source and emit its windows. Sources that cannot be probed
/// are skipped with a warning; a source shorter than one full window
/// contributes nothing.
pub fn plan_windows(
    runner: &MediaRunner,
    sources: &[PathBuf],
    max_clip_duration: f64,
    mode: ConcatMode,
) -> Result<Vec<SubclipWindow>> {
    let mut windows = Vec::new();

    for source in sources {
        let info = match probe_media(runner, source) {
            Ok(info) => info,
            Err(err) => {
                warn!("skipping unreadable source {}: {err:#}", source.display());
                continue;
            }
        };
        windows.extend(windows_for_source(source, &info, max_clip_duration, mode));
    }

    if mode == ConcatMode::Random {
        windows.shuffle(&mut rand::thread_rng());
    }

    debug!("total subclip windows: {}", windows.len());
    Ok(windows)
}

/// Emit back-to-back full windows starting at 0. The trailing remainder
/// shorter than `max_clip_duration` is discarded; sequential mode stops
/// after the first window.
pub(crate) fn windows_for_source(
    source: &Path,
    info: &MediaInfo,
    max_clip_duration: f64,
    mode: ConcatMode,
) -> Vec<SubclipWindow> {
    let mut windows = Vec::new();
    let mut start = 0.0;

    while start < info.duration {
        let end = (start + max_clip_duration).min(info.duration);
        if info.duration - start >= max_clip_duration {
            windows.push(SubclipWindow {
                source: source.to_path_buf(),
                start,
                end,
                width: info.width,
                height: info.height,
            });
        }
        start = end;

        if mode == ConcatMode::Sequential {
            break;
        }
    }

    windows
}

/// Resolve the target geometry. `Original` takes the dimensions of the
/// first window after any shuffle, falling back to portrait defaults when
/// nothing was planned.
pub fn resolve_geometry(aspect: VideoAspect, windows: &[SubclipWindow]) -> (u32, u32) {
    if let Some(resolution) = aspect.resolution() {
        return resolution;
    }

    match windows.first() {
        Some(first) => {
            info!(
                "using original aspect ratio: {}x{} (from first clip)",
                first.width, first.height
            );
            (first.width, first.height)
        }
        None => {
            warn!("no clips available, using default resolution 1080x1920");
            (1080, 1920)
        }
    }
}
