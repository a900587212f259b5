// Encoder selection and GPU -> CPU demotion on runtime failure.

use std::time::Duration;

use tracing::{info, warn};

use crate::engine::capability::Capabilities;
use crate::engine::runner::{MediaRunner, RunnerError};

/// Hardware encoders that are subject to runtime demotion.
pub const GPU_ENCODERS: &[&str] = &["h264_nvenc", "h264_qsv", "h264_amf", "h264_videotoolbox"];

/// Error-message fragments that identify a recoverable GPU-encoder failure.
/// This set is part of the demotion contract.
pub const DEMOTION_MARKERS: &[&str] =
    &["nvenc", "driver", "encoder", "not support", "invalid argument"];

/// Decides which video codec each encode runs with, and retries once on
/// CPU when the hardware encoder rejects a clip.
#[derive(Debug, Clone)]
pub struct EncoderPolicy {
    video_codec: String,
    extra_args: Vec<String>,
}

impl EncoderPolicy {
    pub fn from_capabilities(caps: &Capabilities) -> Self {
        Self::new(caps.video_encoder.clone(), "")
    }

    pub fn new(video_codec: String, extra_args: &str) -> Self {
        Self {
            video_codec,
            extra_args: split_extra_args(extra_args),
        }
    }

    pub fn video_codec(&self) -> &str {
        &self.video_codec
    }

    pub fn is_gpu(&self) -> bool {
        is_gpu_encoder(&self.video_codec)
    }

    /// Run an encode built by `build_args(codec)`. A GPU encoder whose
    /// failure matches the demotion markers is retried once with libx264;
    /// every other failure is surfaced. libx264 never retries.
    pub fn encode<F>(
        &self,
        runner: &MediaRunner,
        timeout: Duration,
        build_args: F,
    ) -> Result<(), RunnerError>
    where
        F: Fn(&str) -> Vec<String>,
    {
        let mut args = build_args(&self.video_codec);
        args.extend(self.extra_args.iter().cloned());

        match runner.run_checked(&args, timeout) {
            Ok(_) => Ok(()),
            Err(RunnerError::Failed { stderr, .. })
                if self.is_gpu() && should_demote(&stderr) =>
            {
                warn!(
                    "GPU encoder {} failed: {}",
                    self.video_codec,
                    stderr.lines().next().unwrap_or_default()
                );
                info!("retrying with CPU encoder {}", super::FALLBACK_VIDEO_CODEC);

                let mut args = build_args(super::FALLBACK_VIDEO_CODEC);
                args.extend(self.extra_args.iter().cloned());
                runner.run_checked(&args, timeout).map(|_| ())
            }
            Err(err) => Err(err),
        }
    }
}

pub(crate) fn is_gpu_encoder(codec: &str) -> bool {
    GPU_ENCODERS.contains(&codec)
}

/// Substring match over the failure output, case-insensitive.
pub(crate) fn should_demote(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    DEMOTION_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Shell-style split so quoted arguments with spaces survive; unbalanced
/// quotes degrade to whitespace splitting.
fn split_extra_args(extra: &str) -> Vec<String> {
    if extra.is_empty() {
        return Vec::new();
    }
    shlex::split(extra)
        .unwrap_or_else(|| extra.split_whitespace().map(str::to_string).collect())
}
