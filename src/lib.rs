//! FFmpeg-driven video composition pipeline.
//!
//! Assembles a narrated video from an ordered set of source clips, a
//! narration track, and optional subtitles and background music. The
//! pipeline probes the host for hardware encoders once, prepares subclips
//! in parallel while preserving input order, concatenates with a
//! stream-copy fast path, and burns subtitles with a composite fallback.
//!
//! Entry points: [`combine`], [`finalize`] and [`preprocess`]. Acquiring
//! the media, generating subtitles and wiring up a tracing subscriber are
//! the caller's business.

pub mod config;
pub mod engine;

pub use config::Config;
pub use engine::capability::{Capabilities, GpuVendor, capabilities};
pub use engine::driver::{CombineOptions, combine};
pub use engine::muxer::{BgmType, FinalizeParams, finalize};
pub use engine::planner::{ConcatMode, VideoAspect};
pub use engine::preprocess::{Material, preprocess};
pub use engine::subtitle::{SubtitleCue, SubtitleError, SubtitlePosition, parse_srt};
pub use engine::transition::TransitionMode;
