//! Host capability discovery: GPU vendor, hardware encoder, GPU scale filter.
//!
//! The verdict is computed once per process and memoized; every probe runs
//! with a short timeout and failure on any axis demotes that axis to CPU.

use std::path::Path;
use std::sync::OnceLock;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::engine::runner::{LISTING_TIMEOUT, MediaRunner, PROBE_TIMEOUT, run_command};

/// Minimum NVIDIA driver major version with a usable NVENC API.
const MIN_NVIDIA_DRIVER_MAJOR: u32 = 570;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GpuVendor {
    Nvidia,
    Intel,
    Amd,
    Apple,
    None,
}

/// Memoized probe verdict: which GPU is present, which video encoder to
/// use, and which GPU scale filter (if any) is usable.
#[derive(Debug, Clone)]
pub struct Capabilities {
    pub gpu_vendor: GpuVendor,
    pub video_encoder: String,
    pub scale_filter: Option<String>,
}

static CAPABILITIES: OnceLock<Capabilities> = OnceLock::new();

/// Probe the host once and cache the verdict for the lifetime of the
/// process. Safe under concurrent first use.
pub fn capabilities(runner: &MediaRunner) -> &'static Capabilities {
    CAPABILITIES.get_or_init(|| detect(runner))
}

fn detect(runner: &MediaRunner) -> Capabilities {
    let gpu_vendor = detect_gpu();

    let mut video_encoder = preferred_encoder(gpu_vendor).to_string();
    if video_encoder != super::FALLBACK_VIDEO_CODEC {
        if encoder_supported(runner, &video_encoder) {
            info!("using hardware encoder {video_encoder} ({gpu_vendor:?})");
        } else {
            warn!(
                "{gpu_vendor:?} GPU detected but ffmpeg lacks {video_encoder}, \
                 falling back to CPU encoding"
            );
            video_encoder = super::FALLBACK_VIDEO_CODEC.to_string();
        }
    } else {
        info!("using CPU encoder {video_encoder}");
    }

    let scale_filter = preferred_scale_filter(gpu_vendor).and_then(|name| {
        if filter_supported(runner, name) {
            debug!("GPU scale filter available: {name}");
            Some(name.to_string())
        } else {
            debug!("GPU scale filter {name} not supported, using CPU scaling");
            None
        }
    });

    Capabilities {
        gpu_vendor,
        video_encoder,
        scale_filter,
    }
}

fn preferred_encoder(vendor: GpuVendor) -> &'static str {
    match vendor {
        GpuVendor::Nvidia => "h264_nvenc",
        GpuVendor::Intel => "h264_qsv",
        GpuVendor::Amd => "h264_amf",
        GpuVendor::Apple => "h264_videotoolbox",
        GpuVendor::None => super::FALLBACK_VIDEO_CODEC,
    }
}

fn preferred_scale_filter(vendor: GpuVendor) -> Option<&'static str> {
    match vendor {
        GpuVendor::Nvidia => Some("scale_npp"),
        GpuVendor::Intel => Some("scale_qsv"),
        // AMD and VideoToolbox have no usable GPU scaler here.
        GpuVendor::Amd | GpuVendor::Apple | GpuVendor::None => None,
    }
}

/// Detect the GPU vendor, short-circuiting on the first match.
fn detect_gpu() -> GpuVendor {
    // NVIDIA first: nvidia-smi answers on every platform it ships on.
    if let Ok(output) = run_command(
        Path::new("nvidia-smi"),
        &["--query-gpu=name", "--format=csv,noheader"],
        PROBE_TIMEOUT,
    ) {
        if output.success() {
            if let Some(name) = output.stdout.lines().next().map(str::trim) {
                if !name.is_empty() {
                    info!("detected NVIDIA GPU: {name}");
                    if nvidia_driver_supported() {
                        return GpuVendor::Nvidia;
                    }
                    warn!("NVIDIA driver too old for NVENC, hardware encoding disabled");
                    return GpuVendor::None;
                }
            }
        }
    }

    if cfg!(target_os = "windows") {
        if let Ok(output) = run_command(
            Path::new("wmic"),
            &["path", "win32_VideoController", "get", "name"],
            PROBE_TIMEOUT,
        ) {
            if output.success() {
                let vendor = vendor_from_controller_listing(&output.stdout);
                if vendor != GpuVendor::None {
                    info!("detected {vendor:?} GPU");
                    return vendor;
                }
            }
        }
    }

    if cfg!(target_os = "macos") {
        if let Ok(output) = run_command(
            Path::new("system_profiler"),
            &["SPDisplaysDataType"],
            PROBE_TIMEOUT,
        ) {
            if output.success() && output.stdout.contains("Apple") {
                info!("detected Apple GPU");
                return GpuVendor::Apple;
            }
        }
    }

    if cfg!(target_os = "linux") {
        if let Ok(vendor_id) = std::fs::read_to_string("/sys/class/drm/card0/device/vendor") {
            let vendor = vendor_from_sysfs_id(vendor_id.trim());
            if vendor != GpuVendor::None {
                info!("detected {vendor:?} GPU");
                return vendor;
            }
        }
    }

    GpuVendor::None
}

/// NVENC needs driver major >= 570 (NVENC API 13.0).
fn nvidia_driver_supported() -> bool {
    let output = match run_command(
        Path::new("nvidia-smi"),
        &["--query-gpu=driver_version", "--format=csv,noheader"],
        PROBE_TIMEOUT,
    ) {
        Ok(output) if output.success() => output,
        _ => return false,
    };

    let version = match output.stdout.lines().next().map(str::trim) {
        Some(v) if !v.is_empty() => v,
        _ => return false,
    };

    match parse_driver_major(version) {
        Some(major) if major >= MIN_NVIDIA_DRIVER_MAJOR => {
            debug!("NVIDIA driver {version} supports NVENC");
            true
        }
        Some(_) => {
            warn!("NVIDIA driver {version} predates NVENC support (need >= 570.0)");
            false
        }
        None => {
            debug!("could not parse NVIDIA driver version: {version}");
            false
        }
    }
}

/// Extract the major version from a driver string like "570.61".
fn parse_driver_major(version: &str) -> Option<u32> {
    version.split('.').next()?.trim().parse().ok()
}

/// Classify the Windows video-controller listing.
fn vendor_from_controller_listing(listing: &str) -> GpuVendor {
    let lower = listing.to_lowercase();
    if lower.contains("intel")
        && (lower.contains("uhd") || lower.contains("iris") || lower.contains("xe"))
    {
        GpuVendor::Intel
    } else if lower.contains("amd") || lower.contains("radeon") {
        GpuVendor::Amd
    } else {
        GpuVendor::None
    }
}

/// Classify a PCI vendor id read from sysfs.
fn vendor_from_sysfs_id(id: &str) -> GpuVendor {
    match id {
        "0x8086" => GpuVendor::Intel,
        "0x1002" => GpuVendor::Amd,
        _ => GpuVendor::None,
    }
}

/// Check whether ffmpeg advertises the named encoder.
pub(crate) fn encoder_supported(runner: &MediaRunner, name: &str) -> bool {
    match runner.run(&["-hide_banner", "-encoders"], LISTING_TIMEOUT) {
        Ok(output) if output.success() => listing_contains(&output.stdout, name),
        _ => false,
    }
}

/// Check whether ffmpeg advertises the named filter.
pub(crate) fn filter_supported(runner: &MediaRunner, name: &str) -> bool {
    match runner.run(&["-hide_banner", "-filters"], LISTING_TIMEOUT) {
        Ok(output) if output.success() => listing_contains(&output.stdout, name),
        _ => false,
    }
}

/// Listing lines look like ` V....D h264_nvenc   NVIDIA NVENC ...` and
/// ` ... scale_npp   V->V ...`; the name is the second column. A raw
/// substring test would match `ass` against `bandpass`.
fn listing_contains(listing: &str, name: &str) -> bool {
    listing
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .any(|candidate| candidate == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_driver_major() {
        assert_eq!(parse_driver_major("570.61"), Some(570));
        assert_eq!(parse_driver_major("569.99"), Some(569));
        assert_eq!(parse_driver_major("570.0"), Some(570));
        assert_eq!(parse_driver_major("535"), Some(535));
        assert_eq!(parse_driver_major("garbage"), None);
        assert_eq!(parse_driver_major(""), None);
    }

    #[test]
    fn test_driver_version_boundary() {
        // 569.x is rejected, 570.0 is the first accepted release.
        assert!(parse_driver_major("569.99").unwrap() < MIN_NVIDIA_DRIVER_MAJOR);
        assert!(parse_driver_major("570.0").unwrap() >= MIN_NVIDIA_DRIVER_MAJOR);
    }

    #[test]
    fn test_vendor_from_controller_listing() {
        assert_eq!(
            vendor_from_controller_listing("Name\nIntel(R) UHD Graphics 770\n"),
            GpuVendor::Intel
        );
        assert_eq!(
            vendor_from_controller_listing("Name\nIntel(R) Iris(R) Xe Graphics\n"),
            GpuVendor::Intel
        );
        assert_eq!(
            vendor_from_controller_listing("Name\nAMD Radeon RX 7800 XT\n"),
            GpuVendor::Amd
        );
        // Intel without a recognized family marker is not accepted.
        assert_eq!(
            vendor_from_controller_listing("Name\nIntel(R) HD Graphics 4000\n"),
            GpuVendor::None
        );
        assert_eq!(
            vendor_from_controller_listing("Name\nNVIDIA GeForce RTX 4090\n"),
            GpuVendor::None
        );
    }

    #[test]
    fn test_vendor_from_sysfs_id() {
        assert_eq!(vendor_from_sysfs_id("0x8086"), GpuVendor::Intel);
        assert_eq!(vendor_from_sysfs_id("0x1002"), GpuVendor::Amd);
        assert_eq!(vendor_from_sysfs_id("0x10de"), GpuVendor::None);
    }

    #[test]
    fn test_encoder_table() {
        assert_eq!(preferred_encoder(GpuVendor::Nvidia), "h264_nvenc");
        assert_eq!(preferred_encoder(GpuVendor::Intel), "h264_qsv");
        assert_eq!(preferred_encoder(GpuVendor::Amd), "h264_amf");
        assert_eq!(preferred_encoder(GpuVendor::Apple), "h264_videotoolbox");
        assert_eq!(preferred_encoder(GpuVendor::None), "libx264");
    }

    #[test]
    fn test_scale_filter_table() {
        assert_eq!(preferred_scale_filter(GpuVendor::Nvidia), Some("scale_npp"));
        assert_eq!(preferred_scale_filter(GpuVendor::Intel), Some("scale_qsv"));
        assert_eq!(preferred_scale_filter(GpuVendor::Amd), None);
        assert_eq!(preferred_scale_filter(GpuVendor::Apple), None);
        assert_eq!(preferred_scale_filter(GpuVendor::None), None);
    }

    #[test]
    fn test_listing_contains_matches_name_column() {
        let filters = " T.. scale_npp         V->V       NVIDIA Performance Primitives scaler\n \
                       ... bandpass          A->A       Apply a two-pole Butterworth band-pass filter\n";
        assert!(listing_contains(filters, "scale_npp"));
        assert!(!listing_contains(filters, "ass"));
        assert!(!listing_contains(filters, "scale"));

        let encoders = " V....D h264_nvenc           NVIDIA NVENC H.264 encoder (codec h264)\n";
        assert!(listing_contains(encoders, "h264_nvenc"));
        assert!(!listing_contains(encoders, "h264"));
    }
}
