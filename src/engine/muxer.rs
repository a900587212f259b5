//! Final mux: narration + optional BGM onto the combined video, subtitles
//! burned in via libass when possible, drawtext composite otherwise.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::config::Config;
use crate::engine::capability::{capabilities, filter_supported};
use crate::engine::planner::VideoAspect;
use crate::engine::policy::EncoderPolicy;
use crate::engine::probe::probe_media;
use crate::engine::runner::{FINAL_TIMEOUT, MediaRunner};
use crate::engine::subtitle::{
    self, SubtitleCue, SubtitleError, SubtitlePosition, SubtitleStyle,
};

const BGM_FADE_SECS: f64 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BgmType {
    Random,
    File,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizeParams {
    pub aspect: VideoAspect,
    pub subtitle_enabled: bool,
    pub font_name: String,
    pub font_size: u32,
    pub stroke_width: f32,
    pub fore_color: String,
    pub stroke_color: String,
    pub background_color: Option<String>,
    pub position: SubtitlePosition,
    pub custom_position: f32,
    pub bgm_type: BgmType,
    pub bgm_file: Option<PathBuf>,
    pub voice_volume: f32,
    pub bgm_volume: f32,
    pub threads: usize,
}

impl Default for FinalizeParams {
    fn default() -> Self {
        Self {
            aspect: VideoAspect::Portrait,
            subtitle_enabled: true,
            font_name: "STHeitiMedium.ttc".to_string(),
            font_size: 60,
            stroke_width: 1.5,
            fore_color: "#FFFFFF".to_string(),
            stroke_color: "#000000".to_string(),
            background_color: None,
            position: SubtitlePosition::Bottom,
            custom_position: 70.0,
            bgm_type: BgmType::None,
            bgm_file: None,
            voice_volume: 1.0,
            bgm_volume: 0.2,
            threads: 2,
        }
    }
}

/// Produce the final narrated video. The output appears atomically: all
/// intermediate encodes land in `dirname(output)` and the last one is
/// renamed into place.
pub fn finalize(
    video_path: &Path,
    narration_path: &Path,
    subtitle_path: Option<&Path>,
    output: &Path,
    params: &FinalizeParams,
) -> Result<PathBuf> {
    let config = Config::load_or_default();
    let runner = MediaRunner::new(&config);
    let caps = capabilities(&runner);
    let policy = EncoderPolicy::new(caps.video_encoder.clone(), &config.ffmpeg_extra_args);

    let video_info = probe_media(&runner, video_path)
        .with_context(|| format!("failed to probe {}", video_path.display()))?;
    let (width, height) = match params.aspect.resolution() {
        Some(resolution) => resolution,
        None => {
            info!(
                "using original aspect ratio: {}x{} (from input video)",
                video_info.width, video_info.height
            );
            (video_info.width, video_info.height)
        }
    };

    info!("generating video: {width}x{height}");
    let output_dir = output.parent().unwrap_or(Path::new(".")).to_path_buf();

    // Subtitle strategy selection.
    let mut ass_path: Option<PathBuf> = None;
    let mut cues: Vec<SubtitleCue> = Vec::new();
    let mut burn = false;
    let mut composite = false;
    let font_file = config.font_dir.join(&params.font_name);

    if params.subtitle_enabled {
        if let Some(srt) = subtitle_path.filter(|p| p.exists()) {
            let style = subtitle_style(params, &font_file);
            let candidate = output_dir.join("subtitle.ass");
            match subtitle::transcode_to_ass(srt, &candidate, &style, width, height) {
                Ok(()) => {
                    cues = subtitle::parse_srt(srt).unwrap_or_default();
                    ass_path = Some(candidate);
                    if filter_supported(&runner, "ass") {
                        burn = true;
                    } else {
                        warn!("ffmpeg lacks the ass filter, compositing subtitles instead");
                        composite = true;
                    }
                }
                Err(err @ (SubtitleError::NoCues(_) | SubtitleError::FontMissing(_))) => {
                    warn!("subtitles disabled for this run: {err}");
                }
                Err(err) => {
                    warn!("subtitle transcode failed, subtitles disabled: {err}");
                }
            }
        }
    }

    let bgm = resolve_bgm(&config, params.bgm_type, params.bgm_file.as_deref());

    // Mux the audio track onto the (stripped) video. When subtitles follow,
    // the result is an intermediate; otherwise it is renamed into place.
    let muxed = if burn || composite {
        output_dir.join("temp_no_subtitle.mp4")
    } else {
        output_dir.join("temp-final.mp4")
    };

    if let Err(err) = mux_audio(
        &runner,
        &policy,
        video_path,
        narration_path,
        bgm.as_deref(),
        params,
        video_info.duration,
        &muxed,
    ) {
        delete_quietly(&muxed);
        return Err(err).context("failed to mux audio");
    }

    if !burn && !composite {
        fs::rename(&muxed, output).context("failed to move final video into place")?;
        if let Some(ass) = &ass_path {
            delete_quietly(ass);
        }
        info!("video generation completed: {}", output.display());
        return Ok(output.to_path_buf());
    }

    let final_target = output_dir.join("temp-final.mp4");

    if let (true, Some(ass)) = (burn, ass_path.as_deref()) {
        info!("burning subtitles via ass filter");
        match burn_subtitles(
            &runner,
            &policy,
            &muxed,
            ass,
            &config.font_dir,
            params.threads,
            &final_target,
        ) {
            Ok(()) => {
                fs::rename(&final_target, output)
                    .context("failed to move final video into place")?;
                delete_quietly(&muxed);
                delete_quietly(ass);
                info!("video generation completed: {}", output.display());
                return Ok(output.to_path_buf());
            }
            Err(err) => {
                // The ASS file stays behind for diagnosis.
                error!("subtitle burn failed: {err:#}");
                warn!("ASS file retained for debugging: {}", ass.display());
                composite = true;
            }
        }
    }

    if composite {
        info!("compositing subtitles as text overlays");
        let result = composite_subtitles(
            &runner,
            &policy,
            &muxed,
            &cues,
            params,
            &font_file,
            height,
            &final_target,
        )
        .context("failed to composite subtitles")
        .and_then(|()| {
            fs::rename(&final_target, output).context("failed to move final video into place")
        });
        if let Err(err) = result {
            // Only the diagnostic ASS file survives a failed run.
            delete_quietly(&muxed);
            delete_quietly(&final_target);
            return Err(err);
        }
        delete_quietly(&muxed);
        // The composite succeeded; a burn failure earlier keeps the ASS
        // file around, a plain composite run does not need it.
        if !burn {
            if let Some(ass) = &ass_path {
                delete_quietly(ass);
            }
        }
    }

    info!("video generation completed: {}", output.display());
    Ok(output.to_path_buf())
}

fn subtitle_style(params: &FinalizeParams, font_file: &Path) -> SubtitleStyle {
    SubtitleStyle {
        font_file: font_file.to_path_buf(),
        font_size: params.font_size,
        stroke_width: params.stroke_width,
        fore_color: params.fore_color.clone(),
        stroke_color: params.stroke_color.clone(),
        position: params.position,
        custom_position: params.custom_position,
    }
}

/// Strip the video's own audio, apply the voice volume to the narration,
/// mix in looped/faded BGM when present.
#[allow(clippy::too_many_arguments)]
fn mux_audio(
    runner: &MediaRunner,
    policy: &EncoderPolicy,
    video: &Path,
    narration: &Path,
    bgm: Option<&Path>,
    params: &FinalizeParams,
    video_duration: f64,
    dest: &Path,
) -> Result<()> {
    let graph = audio_graph(params.voice_volume, params.bgm_volume, bgm.is_some(), video_duration);

    policy
        .encode(runner, FINAL_TIMEOUT, |codec| {
            let mut args = vec![
                "-i".to_string(),
                video.display().to_string(),
                "-i".to_string(),
                narration.display().to_string(),
            ];
            if let Some(bgm) = bgm {
                args.extend([
                    "-stream_loop".to_string(),
                    "-1".to_string(),
                    "-i".to_string(),
                    bgm.display().to_string(),
                ]);
            }
            args.extend([
                "-filter_complex".to_string(),
                graph.clone(),
                "-map".to_string(),
                "0:v:0".to_string(),
                "-map".to_string(),
                "[aout]".to_string(),
                "-c:v".to_string(),
                codec.to_string(),
                "-c:a".to_string(),
                super::AUDIO_CODEC.to_string(),
                "-r".to_string(),
                super::DEFAULT_FPS.to_string(),
                "-pix_fmt".to_string(),
                "yuv420p".to_string(),
                "-threads".to_string(),
                params.threads.to_string(),
                "-y".to_string(),
                dest.display().to_string(),
            ]);
            args
        })
        .map_err(Into::into)
}

/// Narration-only or narration+BGM mixing graph. The BGM loops for the
/// whole video and fades out over its last three seconds.
pub(crate) fn audio_graph(
    voice_volume: f32,
    bgm_volume: f32,
    with_bgm: bool,
    video_duration: f64,
) -> String {
    if !with_bgm {
        return format!("[1:a]volume={voice_volume}[aout]");
    }
    let fade_start = (video_duration - BGM_FADE_SECS).max(0.0);
    format!(
        "[1:a]volume={voice_volume}[voice];\
         [2:a]volume={bgm_volume},afade=t=out:st={fade_start:.3}:d={BGM_FADE_SECS}[bgm];\
         [voice][bgm]amix=inputs=2:duration=first:dropout_transition=0:normalize=0[aout]"
    )
}

/// Burn the ASS document into the muxed video. Paths inside the filter
/// argument need forward slashes and escaped drive colons on Windows.
fn burn_subtitles(
    runner: &MediaRunner,
    policy: &EncoderPolicy,
    video: &Path,
    ass: &Path,
    font_dir: &Path,
    threads: usize,
    dest: &Path,
) -> Result<()> {
    let filter = format!(
        "ass='{}':fontsdir='{}',format=yuv420p",
        escape_filter_path(ass),
        escape_filter_path(font_dir)
    );

    policy
        .encode(runner, FINAL_TIMEOUT, |codec| {
            vec![
                "-i".to_string(),
                video.display().to_string(),
                "-vf".to_string(),
                filter.clone(),
                "-c:v".to_string(),
                codec.to_string(),
                "-c:a".to_string(),
                super::AUDIO_CODEC.to_string(),
                "-preset".to_string(),
                "fast".to_string(),
                "-threads".to_string(),
                threads.to_string(),
                "-pix_fmt".to_string(),
                "yuv420p".to_string(),
                "-y".to_string(),
                dest.display().to_string(),
            ]
        })
        .map_err(Into::into)
}

/// Composite fallback: one drawtext overlay per cue, positioned with the
/// pixel-space equivalents of the ASS alignment rules.
#[allow(clippy::too_many_arguments)]
fn composite_subtitles(
    runner: &MediaRunner,
    policy: &EncoderPolicy,
    video: &Path,
    cues: &[SubtitleCue],
    params: &FinalizeParams,
    font_file: &Path,
    height: u32,
    dest: &Path,
) -> Result<()> {
    anyhow::ensure!(!cues.is_empty(), "no cues available for compositing");

    let filter = drawtext_chain(cues, params, font_file, height)
        .context("no renderable cues for compositing")?;

    policy
        .encode(runner, FINAL_TIMEOUT, |codec| {
            vec![
                "-i".to_string(),
                video.display().to_string(),
                "-vf".to_string(),
                filter.clone(),
                "-c:v".to_string(),
                codec.to_string(),
                "-c:a".to_string(),
                super::AUDIO_CODEC.to_string(),
                "-threads".to_string(),
                params.threads.to_string(),
                "-pix_fmt".to_string(),
                "yuv420p".to_string(),
                "-y".to_string(),
                dest.display().to_string(),
            ]
        })
        .map_err(Into::into)
}

pub(crate) fn drawtext_chain(
    cues: &[SubtitleCue],
    params: &FinalizeParams,
    font_file: &Path,
    height: u32,
) -> Option<String> {
    let font_size = subtitle::scaled_font_size(params.font_size, height);
    let outline = subtitle::scaled_outline(params.stroke_width, height);
    let y_expr = position_expr(params.position, params.custom_position);
    let fore = drawtext_color(&params.fore_color);
    let stroke = drawtext_color(&params.stroke_color);

    let mut parts = Vec::new();
    for cue in cues {
        if cue.text.trim().is_empty() {
            continue;
        }
        let (Some(start), Some(end)) = (
            subtitle::srt_time_to_seconds(&cue.start),
            subtitle::srt_time_to_seconds(&cue.end),
        ) else {
            continue;
        };

        let mut overlay = format!(
            "drawtext=fontfile='{}':text='{}':fontsize={font_size}:fontcolor={fore}:\
             borderw={outline}:bordercolor={stroke}",
            escape_filter_path(font_file),
            escape_drawtext(cue.text.trim()),
        );
        if let Some(bg) = &params.background_color {
            overlay.push_str(&format!(":box=1:boxcolor={}", drawtext_color(bg)));
        }
        overlay.push_str(&format!(
            ":x=(w-text_w)/2:y={y_expr}:enable='between(t,{start:.3},{end:.3})'"
        ));
        parts.push(overlay);
    }

    if parts.is_empty() {
        return None;
    }
    parts.push("format=yuv420p".to_string());
    Some(parts.join(","))
}

fn position_expr(position: SubtitlePosition, custom_percent: f32) -> String {
    match position {
        SubtitlePosition::Top => "h*0.05".to_string(),
        SubtitlePosition::Bottom => "h*0.95-text_h".to_string(),
        SubtitlePosition::Center => "(h-text_h)/2".to_string(),
        SubtitlePosition::Custom => {
            let fraction = custom_percent as f64 / 100.0;
            format!("max(10\\,min((h-text_h)*{fraction:.4}\\,h-text_h-10))")
        }
    }
}

/// `#RRGGBB` -> an ffmpeg color literal; malformed input renders white.
pub(crate) fn drawtext_color(hex: &str) -> String {
    let trimmed = hex.trim().trim_start_matches('#');
    if trimmed.len() == 6 && trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
        format!("0x{trimmed}")
    } else {
        "white".to_string()
    }
}

/// Make a path safe inside a single-quoted filter argument: absolute,
/// forward slashes, and on Windows the drive colon escaped so the filter
/// parser does not treat it as an option separator.
pub(crate) fn escape_filter_path(path: &Path) -> String {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut s = absolute.display().to_string();
    if cfg!(windows) {
        s = s.replace('\\', "/").replace(':', "\\:");
    }
    s
}

/// Escape text for a quoted drawtext value. A literal single quote cannot
/// live inside the quotes; the quote is closed around it.
pub(crate) fn escape_drawtext(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('\'', "'\\''")
}

/// An explicitly given BGM file wins; `random` draws from the configured
/// song directory.
fn resolve_bgm(config: &Config, bgm_type: BgmType, bgm_file: Option<&Path>) -> Option<PathBuf> {
    if bgm_type == BgmType::None {
        return None;
    }

    if let Some(file) = bgm_file {
        if file.exists() {
            return Some(file.to_path_buf());
        }
        warn!("BGM file not found: {}", file.display());
    }

    if bgm_type == BgmType::Random {
        let song_dir = config.song_dir.as_ref()?;
        let songs: Vec<PathBuf> = WalkDir::new(song_dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e.eq_ignore_ascii_case("mp3"))
            })
            .collect();

        if songs.is_empty() {
            warn!("no BGM tracks found in {}", song_dir.display());
            return None;
        }
        return songs.choose(&mut rand::thread_rng()).cloned();
    }

    None
}

fn delete_quietly(path: &Path) {
    if path.exists() {
        let _ = fs::remove_file(path);
    }
}
