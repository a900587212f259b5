// Material preprocessing: still images become short zooming clips.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::Config;
use crate::engine::capability::capabilities;
use crate::engine::policy::EncoderPolicy;
use crate::engine::probe::probe_media;
use crate::engine::runner::{MediaRunner, TRANSCODE_TIMEOUT};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "webp"];

/// Minimum usable source dimension on either axis.
const MIN_DIMENSION: u32 = 480;

/// A source material; `path` is rewritten when preprocessing produces a
/// derived clip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Material {
    pub path: PathBuf,
}

/// Convert every still image in `materials` into a `clip_duration`-second
/// clip with a slow linear zoom, rewriting the material path to the
/// produced mp4. Videos pass through untouched; materials under 480x480
/// are skipped.
pub fn preprocess(materials: &mut [Material], clip_duration: u32) -> Result<()> {
    let config = Config::load_or_default();
    let runner = MediaRunner::new(&config);
    let caps = capabilities(&runner);
    let policy = EncoderPolicy::new(caps.video_encoder.clone(), &config.ffmpeg_extra_args);

    for material in materials {
        let info = match probe_media(&runner, &material.path) {
            Ok(info) => info,
            Err(err) => {
                warn!("skipping unreadable material {}: {err:#}", material.path.display());
                continue;
            }
        };

        if info.width < MIN_DIMENSION || info.height < MIN_DIMENSION {
            warn!(
                "low resolution material: {}x{}, minimum 480x480 required",
                info.width, info.height
            );
            continue;
        }

        if !is_image(&material.path) {
            continue;
        }

        info!("processing image: {}", material.path.display());
        let video_file = PathBuf::from(format!("{}.mp4", material.path.display()));
        let filter = zoom_filter(info.width, info.height, clip_duration, super::DEFAULT_FPS);

        policy
            .encode(&runner, TRANSCODE_TIMEOUT, |codec| {
                vec![
                    "-i".to_string(),
                    material.path.display().to_string(),
                    "-vf".to_string(),
                    filter.clone(),
                    "-c:v".to_string(),
                    codec.to_string(),
                    "-pix_fmt".to_string(),
                    "yuv420p".to_string(),
                    "-y".to_string(),
                    video_file.display().to_string(),
                ]
            })
            .with_context(|| format!("failed to process image {}", material.path.display()))?;

        info!("image processed: {}", video_file.display());
        material.path = video_file;
    }

    Ok(())
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.as_str()))
}

/// Linear zoom from 1.0 to `1 + 0.03 * duration` over the clip, centered.
/// Output dimensions are forced even for yuv420p.
pub(crate) fn zoom_filter(width: u32, height: u32, duration: u32, fps: u32) -> String {
    let frames = duration * fps;
    let ramp = 0.03 * duration as f64;
    let even_w = width & !1;
    let even_h = height & !1;
    format!(
        "zoompan=z='1+{ramp}*on/{frames}':x='iw/2-(iw/zoom/2)':y='ih/2-(ih/zoom/2)':\
         d={frames}:s={even_w}x{even_h}:fps={fps}"
    )
}
