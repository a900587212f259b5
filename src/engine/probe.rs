// Media probing using ffprobe

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use super::runner::{LISTING_TIMEOUT, MediaRunner};

/// Metadata of a decodable media file, as reported by ffprobe.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaInfo {
    pub width: u32,
    pub height: u32,
    pub duration: f64,
    pub fps: f64,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    width: Option<u64>,
    height: Option<u64>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    format: Option<FfprobeFormat>,
}

/// Probe a video (or still image) for its dimensions, duration and frame
/// rate. Still images report a zero duration.
pub fn probe_media(runner: &MediaRunner, path: &Path) -> Result<MediaInfo> {
    let json = probe_json(runner, path, "v:0")?;
    parse_media_info(&json).with_context(|| format!("no video stream in {}", path.display()))
}

/// Probe any media file (audio included) for its container duration.
pub fn probe_duration(runner: &MediaRunner, path: &Path) -> Result<f64> {
    let json = probe_json(runner, path, "")?;
    parse_duration(&json).with_context(|| format!("no duration reported for {}", path.display()))
}

fn probe_json(runner: &MediaRunner, path: &Path, select: &str) -> Result<String> {
    let mut args = vec![
        "-v".to_string(),
        "quiet".to_string(),
        "-print_format".to_string(),
        "json".to_string(),
        "-show_format".to_string(),
        "-show_streams".to_string(),
    ];
    if !select.is_empty() {
        args.push("-select_streams".to_string());
        args.push(select.to_string());
    }
    args.push(path.display().to_string());

    let output = runner
        .run_ffprobe(&args, LISTING_TIMEOUT)
        .with_context(|| format!("failed to probe {}", path.display()))?;

    if !output.success() {
        anyhow::bail!(
            "ffprobe failed for {}: {}",
            path.display(),
            output.stderr.trim()
        );
    }

    Ok(output.stdout)
}

fn parse_media_info(json: &str) -> Result<MediaInfo> {
    let probe: FfprobeOutput =
        serde_json::from_str(json).context("Failed to parse ffprobe JSON output")?;

    let stream = probe
        .streams
        .first()
        .context("No video stream found in ffprobe output")?;

    let width = stream.width.context("Failed to get video width")? as u32;
    let height = stream.height.context("Failed to get video height")? as u32;

    // r_frame_rate is the more accurate of the two; avg_frame_rate covers
    // containers that omit it.
    let fps = stream
        .r_frame_rate
        .as_deref()
        .and_then(parse_fraction)
        .or_else(|| stream.avg_frame_rate.as_deref().and_then(parse_fraction))
        .unwrap_or(super::DEFAULT_FPS as f64);

    let duration = probe
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .or(stream.duration.as_deref())
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.0);

    Ok(MediaInfo {
        width,
        height,
        duration,
        fps,
    })
}

fn parse_duration(json: &str) -> Result<f64> {
    let probe: FfprobeOutput =
        serde_json::from_str(json).context("Failed to parse ffprobe JSON output")?;

    probe
        .format
        .and_then(|f| f.duration)
        .or_else(|| probe.streams.into_iter().find_map(|s| s.duration))
        .and_then(|s| s.parse::<f64>().ok())
        .context("No duration found in ffprobe output")
}

/// Parse a fraction string like "30000/1001" to f64
fn parse_fraction(s: &str) -> Option<f64> {
    let (num, den) = s.split_once('/')?;
    let numerator: f64 = num.parse().ok()?;
    let denominator: f64 = den.parse().ok()?;

    if denominator == 0.0 {
        return None;
    }

    Some(numerator / denominator)
}
