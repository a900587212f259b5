// Per-subclip processing: decode window, fit geometry, transition, cap, encode.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, error, warn};

use super::planner::SubclipWindow;
use super::policy::EncoderPolicy;
use super::probe::probe_media;
use super::runner::{MediaRunner, TRANSCODE_TIMEOUT};
use super::transition::{self, TransitionMode};

/// A finished, target-sized, silent clip owned by the pipeline until the
/// concatenator consumes it.
#[derive(Debug, Clone)]
pub struct ProcessedClip {
    pub path: PathBuf,
    pub duration: f64,
    pub width: u32,
    pub height: u32,
}

/// Process one window into `{output_dir}/temp-clip-{index+1}.mp4`.
///
/// Any failure is logged and demoted to `None`; the driver records the gap
/// and the pipeline continues.
#[allow(clippy::too_many_arguments)]
pub fn process_subclip(
    runner: &MediaRunner,
    policy: &EncoderPolicy,
    scale_filter: Option<&str>,
    window: &SubclipWindow,
    index: usize,
    target_width: u32,
    target_height: u32,
    output_dir: &Path,
    max_clip_duration: f64,
    transition_mode: TransitionMode,
) -> Option<ProcessedClip> {
    match try_process(
        runner,
        policy,
        scale_filter,
        window,
        index,
        target_width,
        target_height,
        output_dir,
        max_clip_duration,
        transition_mode,
    ) {
        Ok(clip) => Some(clip),
        Err(err) => {
            error!("failed to process clip {}: {err:#}", index + 1);
            None
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn try_process(
    runner: &MediaRunner,
    policy: &EncoderPolicy,
    scale_filter: Option<&str>,
    window: &SubclipWindow,
    index: usize,
    target_width: u32,
    target_height: u32,
    output_dir: &Path,
    max_clip_duration: f64,
    transition_mode: TransitionMode,
) -> Result<ProcessedClip> {
    let clip_number = index + 1;
    debug!(
        "processing clip {clip_number}: {}x{} -> {target_width}x{target_height}",
        window.width, window.height
    );

    let mut input = window.source.clone();
    let mut input_start = window.start;
    let mut clip_duration = window.duration();
    let mut clip_w = window.width;
    let mut clip_h = window.height;
    let mut scratch: Option<PathBuf> = None;

    // GPU scale fast path: only worthwhile when no letterboxing is needed.
    let needs_resize = clip_w != target_width || clip_h != target_height;
    if needs_resize && aspects_match(clip_w, clip_h, target_width, target_height) {
        if let Some(filter) = scale_filter {
            match gpu_scale(
                runner,
                policy.video_codec(),
                filter,
                window,
                clip_number,
                target_width,
                target_height,
                output_dir,
            ) {
                Ok(resized) => {
                    let info = probe_media(runner, &resized)
                        .context("failed to reopen GPU-scaled clip")?;
                    debug!("clip {clip_number} GPU scale succeeded");
                    input = resized.clone();
                    input_start = 0.0;
                    clip_duration = info.duration;
                    clip_w = info.width;
                    clip_h = info.height;
                    scratch = Some(resized);
                }
                Err(err) => {
                    debug!("clip {clip_number} GPU scale failed, using CPU path: {err:#}");
                }
            }
        }
    }

    let chain = geometry_filter(clip_w, clip_h, target_width, target_height);
    let effect = transition::resolve(transition_mode, &mut rand::thread_rng());
    let encoded_duration = clip_duration.min(max_clip_duration);
    let output_path = output_dir.join(format!("temp-clip-{clip_number}.mp4"));

    let result = policy.encode(runner, TRANSCODE_TIMEOUT, |codec| {
        let mut args = vec![
            "-ss".to_string(),
            format!("{input_start:.3}"),
            "-t".to_string(),
            format!("{clip_duration:.3}"),
            "-i".to_string(),
            input.display().to_string(),
        ];

        if let Some((x, y)) = effect.overlay_position(clip_duration) {
            // Slides composite the clip over a black canvas of the target
            // geometry with a one-second position ramp.
            let fit = chain.clone().unwrap_or_else(|| "null".to_string());
            let graph = format!(
                "color=c=black:s={target_width}x{target_height}:d={clip_duration:.3}[bg];\
                 [0:v]{fit}[fg];[bg][fg]overlay=x='{x}':y='{y}':shortest=1[vout]"
            );
            args.push("-filter_complex".to_string());
            args.push(graph);
            args.push("-map".to_string());
            args.push("[vout]".to_string());
        } else {
            let mut parts: Vec<String> = chain.clone().into_iter().collect();
            if let Some(fade) = effect.fade_filter(clip_duration) {
                parts.push(fade);
            }
            if !parts.is_empty() {
                args.push("-vf".to_string());
                args.push(parts.join(","));
            }
        }

        args.extend([
            "-an".to_string(),
            "-c:v".to_string(),
            codec.to_string(),
            "-r".to_string(),
            super::DEFAULT_FPS.to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-t".to_string(),
            format!("{encoded_duration:.3}"),
            "-y".to_string(),
            output_path.display().to_string(),
        ]);
        args
    });

    if let Some(path) = scratch {
        remove_quietly(&path);
    }

    result.with_context(|| format!("encoding clip {clip_number} failed"))?;

    Ok(ProcessedClip {
        path: output_path,
        duration: encoded_duration,
        width: target_width,
        height: target_height,
    })
}

/// Serialize the decoded window and scale it on the GPU. Returns the path
/// of the scaled file; the serialized input is always cleaned up.
#[allow(clippy::too_many_arguments)]
fn gpu_scale(
    runner: &MediaRunner,
    encoder: &str,
    filter: &str,
    window: &SubclipWindow,
    clip_number: usize,
    target_width: u32,
    target_height: u32,
    output_dir: &Path,
) -> Result<PathBuf> {
    let temp_input = output_dir.join(format!("temp-input-{clip_number}.mp4"));
    let temp_resized = output_dir.join(format!("temp-resized-{clip_number}.mp4"));

    let serialize = runner.run_checked(
        &[
            "-ss".to_string(),
            format!("{:.3}", window.start),
            "-t".to_string(),
            format!("{:.3}", window.duration()),
            "-i".to_string(),
            window.source.display().to_string(),
            "-an".to_string(),
            "-c:v".to_string(),
            "libx264".to_string(),
            "-preset".to_string(),
            "ultrafast".to_string(),
            "-r".to_string(),
            super::DEFAULT_FPS.to_string(),
            "-y".to_string(),
            temp_input.display().to_string(),
        ],
        TRANSCODE_TIMEOUT,
    );

    if let Err(err) = serialize {
        remove_quietly(&temp_input);
        return Err(err).context("failed to serialize segment for GPU scaling");
    }

    let scaled = runner.run_checked(
        &[
            "-i".to_string(),
            temp_input.display().to_string(),
            "-vf".to_string(),
            format!("{filter}={target_width}:{target_height}"),
            "-c:v".to_string(),
            encoder.to_string(),
            "-preset".to_string(),
            "fast".to_string(),
            "-crf".to_string(),
            "23".to_string(),
            "-r".to_string(),
            super::DEFAULT_FPS.to_string(),
            "-y".to_string(),
            temp_resized.display().to_string(),
        ],
        TRANSCODE_TIMEOUT,
    );

    remove_quietly(&temp_input);

    match scaled {
        Ok(_) if temp_resized.is_file() => Ok(temp_resized),
        Ok(_) => {
            anyhow::bail!("GPU scale produced no output file");
        }
        Err(err) => {
            remove_quietly(&temp_resized);
            Err(err).context("GPU scale invocation failed")
        }
    }
}

/// Exact aspect equality in integer form; float division never enters.
pub(crate) fn aspects_match(clip_w: u32, clip_h: u32, target_w: u32, target_h: u32) -> bool {
    u64::from(clip_w) * u64::from(target_h) == u64::from(clip_h) * u64::from(target_w)
}

/// Uniform scale bounded by the target box, truncated like the reference
/// pipeline rounds.
pub(crate) fn letterbox_dims(
    clip_w: u32,
    clip_h: u32,
    target_w: u32,
    target_h: u32,
) -> (u32, u32) {
    let clip_ratio = clip_w as f64 / clip_h as f64;
    let video_ratio = target_w as f64 / target_h as f64;

    let scale = if clip_ratio > video_ratio {
        target_w as f64 / clip_w as f64
    } else {
        target_h as f64 / clip_h as f64
    };

    ((clip_w as f64 * scale) as u32, (clip_h as f64 * scale) as u32)
}

/// Geometry-fit filter chain: nothing when the clip already matches,
/// a direct resize when only the scale differs, otherwise scale plus a
/// centered pad over black.
pub(crate) fn geometry_filter(
    clip_w: u32,
    clip_h: u32,
    target_w: u32,
    target_h: u32,
) -> Option<String> {
    if clip_w == target_w && clip_h == target_h {
        return None;
    }

    if aspects_match(clip_w, clip_h, target_w, target_h) {
        return Some(format!("scale={target_w}:{target_h}"));
    }

    let (new_w, new_h) = letterbox_dims(clip_w, clip_h, target_w, target_h);
    Some(format!(
        "scale={new_w}:{new_h},pad={target_w}:{target_h}:(ow-iw)/2:(oh-ih)/2:black"
    ))
}

fn remove_quietly(path: &Path) {
    if path.exists() {
        if let Err(err) = std::fs::remove_file(path) {
            warn!("failed to remove {}: {err}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aspects_match() {
        assert!(aspects_match(1920, 1080, 1280, 720));
        assert!(aspects_match(1080, 1920, 540, 960));
        assert!(!aspects_match(1920, 1080, 1080, 1920));
        // 1366x768 is close to 16:9 but not equal.
        assert!(!aspects_match(1366, 768, 1920, 1080));
    }

    #[test]
    fn test_letterbox_dims_wide_into_portrait() {
        // 16:9 landscape into a portrait frame: width binds.
        assert_eq!(letterbox_dims(1920, 1080, 1080, 1920), (1080, 607));
    }

    #[test]
    fn test_letterbox_dims_tall_into_landscape() {
        // Portrait into a landscape frame: height binds.
        assert_eq!(letterbox_dims(1080, 1920, 1920, 1080), (607, 1080));
    }

    #[test]
    fn test_letterbox_dims_into_square() {
        assert_eq!(letterbox_dims(1920, 1080, 1080, 1080), (1080, 607));
        assert_eq!(letterbox_dims(1080, 1920, 1080, 1080), (607, 1080));
    }

    #[test]
    fn test_geometry_filter_identity() {
        assert_eq!(geometry_filter(1080, 1920, 1080, 1920), None);
    }

    #[test]
    fn test_geometry_filter_direct_scale() {
        assert_eq!(
            geometry_filter(540, 960, 1080, 1920),
            Some("scale=1080:1920".to_string())
        );
    }

    #[test]
    fn test_geometry_filter_letterbox() {
        assert_eq!(
            geometry_filter(1920, 1080, 1080, 1920),
            Some("scale=1080:607,pad=1080:1920:(ow-iw)/2:(oh-ih)/2:black".to_string())
        );
    }
}
