// Parallel combination driver: plan, fan out, reassemble in order, concat.

use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::engine::capability::capabilities;
use crate::engine::concat::concat_clips;
use crate::engine::planner::{ConcatMode, SubclipWindow, VideoAspect, plan_windows, resolve_geometry};
use crate::engine::policy::EncoderPolicy;
use crate::engine::probe::probe_duration;
use crate::engine::runner::MediaRunner;
use crate::engine::transition::TransitionMode;
use crate::engine::worker::{ProcessedClip, process_subclip};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombineOptions {
    pub aspect: VideoAspect,
    pub concat_mode: ConcatMode,
    pub transition: TransitionMode,
    pub max_clip_duration: f64,
    pub threads: usize,
}

impl Default for CombineOptions {
    fn default() -> Self {
        Self {
            aspect: VideoAspect::Portrait,
            concat_mode: ConcatMode::Sequential,
            transition: TransitionMode::None,
            max_clip_duration: 5.0,
            threads: 2,
        }
    }
}

/// Assemble the combined silent video: slice the sources into windows,
/// process them in parallel, loop the results out to the narration length
/// and concatenate into `output`.
///
/// With zero usable clips the output path is returned untouched; callers
/// treat a missing file as failure.
pub fn combine(
    output: &Path,
    sources: &[PathBuf],
    narration: &Path,
    options: &CombineOptions,
) -> Result<PathBuf> {
    let config = Config::load_or_default();
    let runner = MediaRunner::new(&config);
    let caps = capabilities(&runner);
    let policy = EncoderPolicy::new(caps.video_encoder.clone(), &config.ffmpeg_extra_args);

    let narration_duration = probe_duration(&runner, narration)
        .with_context(|| format!("failed to probe narration {}", narration.display()))?;
    info!("audio duration: {narration_duration:.2} seconds");
    info!(
        "maximum clip duration: {:.2} seconds",
        options.max_clip_duration
    );

    let output_dir = output.parent().unwrap_or(Path::new(".")).to_path_buf();

    let windows = plan_windows(
        &runner,
        sources,
        options.max_clip_duration,
        options.concat_mode,
    )?;
    let (target_width, target_height) = resolve_geometry(options.aspect, &windows);

    let selected = planned_prefix(windows, narration_duration);
    if selected.is_empty() {
        warn!("no clips available for merging");
        return Ok(output.to_path_buf());
    }

    let worker_count = selected.len().min(cpu_count()).max(1);
    info!(
        "processing {} clips with {worker_count} workers",
        selected.len()
    );

    let ordered = run_workers(
        &runner,
        &policy,
        caps.scale_filter.as_deref(),
        selected,
        target_width,
        target_height,
        &output_dir,
        options,
        worker_count,
    );

    if ordered.is_empty() {
        warn!("no clips available for merging");
        return Ok(output.to_path_buf());
    }

    let produced: f64 = ordered.iter().map(|c| c.duration).sum();
    let clips = fill_to_duration(ordered, narration_duration);
    if produced < narration_duration {
        info!(
            "looped clips to cover narration: {:.2}s -> {:.2}s",
            produced,
            clips.iter().map(|c| c.duration).sum::<f64>()
        );
    }

    info!("starting clip merging process");
    concat_clips(&runner, &policy, &clips, output, options.threads)?;
    info!("video combining completed");

    Ok(output.to_path_buf())
}

/// Bounded pool over a shared queue. Workers receive their original input
/// index; the assembled result is in ascending input-index order with the
/// failures dropped.
#[allow(clippy::too_many_arguments)]
fn run_workers(
    runner: &MediaRunner,
    policy: &EncoderPolicy,
    scale_filter: Option<&str>,
    windows: Vec<SubclipWindow>,
    target_width: u32,
    target_height: u32,
    output_dir: &Path,
    options: &CombineOptions,
    worker_count: usize,
) -> Vec<ProcessedClip> {
    let queue: Arc<Mutex<VecDeque<(usize, SubclipWindow)>>> =
        Arc::new(Mutex::new(windows.into_iter().enumerate().collect()));
    let (tx, rx) = mpsc::channel::<(usize, Option<ProcessedClip>)>();

    let mut results: BTreeMap<usize, ProcessedClip> = BTreeMap::new();

    thread::scope(|scope| {
        for _ in 0..worker_count {
            let queue = Arc::clone(&queue);
            let tx = tx.clone();
            scope.spawn(move || {
                loop {
                    let job = queue.lock().expect("queue lock poisoned").pop_front();
                    let Some((index, window)) = job else { break };
                    let clip = process_subclip(
                        runner,
                        policy,
                        scale_filter,
                        &window,
                        index,
                        target_width,
                        target_height,
                        output_dir,
                        options.max_clip_duration,
                        options.transition,
                    );
                    let _ = tx.send((index, clip));
                }
            });
        }
        drop(tx);

        let mut total = 0.0;
        for (index, clip) in rx {
            match clip {
                Some(clip) => {
                    total += clip.duration;
                    debug!(
                        "clip {} done, duration: {:.2}s, total: {total:.2}s",
                        index + 1,
                        clip.duration
                    );
                    results.insert(index, clip);
                }
                None => warn!("clip {} failed, leaving a gap", index + 1),
            }
        }
    });

    results.into_values().collect()
}

fn cpu_count() -> usize {
    thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

/// Take the window prefix whose cumulative planned duration has not yet
/// exceeded the narration duration at the time each window is admitted.
pub(crate) fn planned_prefix(windows: Vec<SubclipWindow>, narration: f64) -> Vec<SubclipWindow> {
    let mut planned = 0.0;
    let mut selected = Vec::new();

    for window in windows {
        if planned > narration {
            break;
        }
        planned += window.duration();
        selected.push(window);
    }

    selected
}

/// Cycle the successful clips, appending path references until the total
/// duration covers the narration. No re-encoding happens here; the
/// underlying temp files are shared by path.
pub(crate) fn fill_to_duration(clips: Vec<ProcessedClip>, narration: f64) -> Vec<ProcessedClip> {
    let mut total: f64 = clips.iter().map(|c| c.duration).sum();
    if total >= narration || clips.is_empty() {
        return clips;
    }

    let base = clips.clone();
    let mut filled = clips;
    for clip in base.iter().cycle() {
        if total >= narration {
            break;
        }
        total += clip.duration;
        filled.push(clip.clone());
    }

    filled
}
