// Clip concatenation: stream-copy fast path with a re-encode fallback.

use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use super::policy::EncoderPolicy;
use super::runner::{MediaRunner, TRANSCODE_TIMEOUT};
use super::worker::ProcessedClip;

/// Concatenate the processed clips into `output`. Consumes the clip temp
/// files: they are deleted on success along with the list file.
pub fn concat_clips(
    runner: &MediaRunner,
    policy: &EncoderPolicy,
    clips: &[ProcessedClip],
    output: &Path,
    threads: usize,
) -> Result<()> {
    anyhow::ensure!(!clips.is_empty(), "no clips to concatenate");

    let output_dir = output.parent().unwrap_or(Path::new(".")).to_path_buf();

    if clips.len() == 1 {
        info!("using single clip directly");
        fs::copy(&clips[0].path, output).with_context(|| {
            format!("failed to copy {} to output", clips[0].path.display())
        })?;
        delete_clip_files(clips);
        return Ok(());
    }

    let list_path = output_dir.join("concat_list.txt");
    write_concat_list(&list_path, clips).context("failed to write concat list")?;

    info!("merging {} clips via concat demuxer", clips.len());
    let fast = runner.run_checked(
        &[
            "-f".to_string(),
            "concat".to_string(),
            "-safe".to_string(),
            "0".to_string(),
            "-i".to_string(),
            concat_path_string(&list_path),
            "-c".to_string(),
            "copy".to_string(),
            "-y".to_string(),
            output.display().to_string(),
        ],
        TRANSCODE_TIMEOUT,
    );

    match fast {
        Ok(_) if output.is_file() => {
            delete_quietly(&list_path);
            delete_clip_files(clips);
            return Ok(());
        }
        Ok(_) => warn!("concat demuxer produced no output, re-encoding"),
        Err(err) => warn!("concat demuxer failed, re-encoding: {err:#}"),
    }

    reencode_concat(runner, policy, clips, output, &output_dir, threads)?;

    delete_quietly(&list_path);
    delete_clip_files(clips);
    Ok(())
}

/// Pairwise re-encode: grow a working file one clip at a time. A clip that
/// refuses to merge is skipped rather than aborting the whole video.
fn reencode_concat(
    runner: &MediaRunner,
    policy: &EncoderPolicy,
    clips: &[ProcessedClip],
    output: &Path,
    output_dir: &Path,
    threads: usize,
) -> Result<()> {
    let working = output_dir.join("temp-merged-video.mp4");
    let next = output_dir.join("temp-merged-next.mp4");

    fs::copy(&clips[0].path, &working)
        .with_context(|| format!("failed to seed merge with {}", clips[0].path.display()))?;

    for (i, clip) in clips.iter().enumerate().skip(1) {
        info!(
            "merging clip {i}/{}, duration: {:.2}s",
            clips.len() - 1,
            clip.duration
        );

        let result = policy.encode(runner, TRANSCODE_TIMEOUT, |codec| {
            vec![
                "-i".to_string(),
                working.display().to_string(),
                "-i".to_string(),
                clip.path.display().to_string(),
                "-filter_complex".to_string(),
                "[0:v][1:v]concat=n=2:v=1:a=0[v]".to_string(),
                "-map".to_string(),
                "[v]".to_string(),
                "-c:v".to_string(),
                codec.to_string(),
                "-r".to_string(),
                super::DEFAULT_FPS.to_string(),
                "-pix_fmt".to_string(),
                "yuv420p".to_string(),
                "-threads".to_string(),
                threads.to_string(),
                "-y".to_string(),
                next.display().to_string(),
            ]
        });

        match result {
            Ok(()) => {
                delete_quietly(&working);
                fs::rename(&next, &working).context("failed to swap merged video")?;
            }
            Err(err) => {
                warn!("failed to merge clip {}: {err:#}", clip.path.display());
                delete_quietly(&next);
            }
        }
    }

    fs::rename(&working, output).context("failed to move merged video into place")?;
    Ok(())
}

/// One `file '...'` line per clip, absolute paths, forward slashes on
/// Windows (the concat demuxer chokes on backslashes).
fn write_concat_list(list_path: &Path, clips: &[ProcessedClip]) -> std::io::Result<()> {
    let mut file = fs::File::create(list_path)?;
    for clip in clips {
        let absolute = std::path::absolute(&clip.path)?;
        writeln!(file, "file '{}'", concat_path_string(&absolute))?;
    }
    Ok(())
}

fn concat_path_string(path: &Path) -> String {
    let s = path.display().to_string();
    if cfg!(windows) { s.replace('\\', "/") } else { s }
}

/// Looped clips reference the same temp file more than once; delete each
/// underlying file exactly once.
fn delete_clip_files(clips: &[ProcessedClip]) {
    let unique: HashSet<&PathBuf> = clips.iter().map(|c| &c.path).collect();
    for path in unique {
        delete_quietly(path);
    }
}

fn delete_quietly(path: &Path) {
    if path.exists() {
        let _ = fs::remove_file(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clip(path: &Path) -> ProcessedClip {
        ProcessedClip {
            path: path.to_path_buf(),
            duration: 5.0,
            width: 1080,
            height: 1920,
        }
    }

    #[test]
    fn test_write_concat_list() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("temp-clip-1.mp4");
        let b = dir.path().join("temp-clip-2.mp4");
        fs::write(&a, b"x").unwrap();
        fs::write(&b, b"x").unwrap();

        let list = dir.path().join("concat_list.txt");
        write_concat_list(&list, &[clip(&a), clip(&b)]).unwrap();

        let contents = fs::read_to_string(&list).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("file '"));
        assert!(lines[0].contains("temp-clip-1.mp4"));
        assert!(lines[1].contains("temp-clip-2.mp4"));
        // Absolute paths only.
        for line in &lines {
            let inner = line.trim_start_matches("file '").trim_end_matches('\'');
            assert!(Path::new(inner).is_absolute());
        }
    }

    #[test]
    fn test_delete_clip_files_handles_repeats() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("temp-clip-1.mp4");
        fs::write(&a, b"x").unwrap();

        // The same file referenced three times (loop-fill) is removed once.
        let clips = vec![clip(&a), clip(&a), clip(&a)];
        delete_clip_files(&clips);
        assert!(!a.exists());
    }
}
