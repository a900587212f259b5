//! SRT -> styled ASS transcoding.
//!
//! The ASS document carries its own play resolution, so every size in the
//! style block is computed against the target geometry; the base font size
//! is calibrated for a 1920-pixel-tall frame and scaled from there.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Height the caller-supplied font/stroke sizes are calibrated for.
const REFERENCE_HEIGHT: u32 = 1920;

#[derive(Debug, Error)]
pub enum SubtitleError {
    #[error("subtitle file has no usable cues: {0}")]
    NoCues(PathBuf),

    #[error("font file not found: {0}")]
    FontMissing(PathBuf),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One subtitle event, times kept in SRT `HH:MM:SS,mmm` form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtitleCue {
    pub index: usize,
    pub start: String,
    pub end: String,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubtitlePosition {
    Top,
    Bottom,
    Center,
    Custom,
}

/// Style inputs for the generated ASS document.
#[derive(Debug, Clone)]
pub struct SubtitleStyle {
    pub font_file: PathBuf,
    pub font_size: u32,
    pub stroke_width: f32,
    pub fore_color: String,
    pub stroke_color: String,
    pub position: SubtitlePosition,
    pub custom_position: f32,
}

/// Read an SRT file into cues. Blocks with an unparsable index or time
/// line are skipped rather than failing the whole file.
pub fn parse_srt(path: &Path) -> Result<Vec<SubtitleCue>, SubtitleError> {
    let raw = fs::read_to_string(path).map_err(|source| SubtitleError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let raw = raw.trim_start_matches('\u{feff}').replace("\r\n", "\n");

    let mut cues = Vec::new();
    for block in raw.split("\n\n") {
        let mut lines = block.lines();
        let Some(index_line) = lines.next() else {
            continue;
        };
        let Ok(index) = index_line.trim().parse::<usize>() else {
            continue;
        };
        let Some(time_line) = lines.next() else {
            continue;
        };
        let Some((start, end)) = time_line.split_once("-->") else {
            continue;
        };
        let (start, end) = (start.trim().to_string(), end.trim().to_string());
        if !is_srt_time(&start) || !is_srt_time(&end) {
            continue;
        }

        let text = lines.collect::<Vec<_>>().join("\n").trim().to_string();
        cues.push(SubtitleCue {
            index,
            start,
            end,
            text,
        });
    }

    if cues.is_empty() {
        return Err(SubtitleError::NoCues(path.to_path_buf()));
    }
    Ok(cues)
}

/// Transcode an SRT file into a styled ASS document at `ass_path`.
pub fn transcode_to_ass(
    srt_path: &Path,
    ass_path: &Path,
    style: &SubtitleStyle,
    width: u32,
    height: u32,
) -> Result<(), SubtitleError> {
    let cues = parse_srt(srt_path)?;
    let font_name = resolve_font_family(&style.font_file)?;
    info!(
        "subtitle font: {font_name} (file: {})",
        style.font_file.display()
    );

    let document = render_ass(&cues, style, &font_name, width, height)
        .ok_or_else(|| SubtitleError::NoCues(srt_path.to_path_buf()))?;

    // UTF-8 with BOM; some renderers refuse the file without it.
    let mut bytes = vec![0xef, 0xbb, 0xbf];
    bytes.extend_from_slice(document.as_bytes());
    fs::write(ass_path, bytes).map_err(|source| SubtitleError::Io {
        path: ass_path.to_path_buf(),
        source,
    })?;

    debug!(
        "wrote ASS subtitle: {} ({} cues, {width}x{height})",
        ass_path.display(),
        cues.len()
    );
    Ok(())
}

/// Build the document text; `None` when no cue survives filtering.
fn render_ass(
    cues: &[SubtitleCue],
    style: &SubtitleStyle,
    font_name: &str,
    width: u32,
    height: u32,
) -> Option<String> {
    let primary_color = hex_to_ass_color(&style.fore_color);
    let outline_color = hex_to_ass_color(&style.stroke_color);
    let font_size = scaled_font_size(style.font_size, height);
    let outline = scaled_outline(style.stroke_width, height);
    let (alignment, margin_v) =
        alignment_and_margin(style.position, style.custom_position, height, font_size);

    let mut lines = vec![
        "[Script Info]".to_string(),
        "Title: Subtitle".to_string(),
        "ScriptType: v4.00+".to_string(),
        format!("PlayResX: {width}"),
        format!("PlayResY: {height}"),
        String::new(),
        "[V4+ Styles]".to_string(),
        "Format: Name, Fontname, Fontsize, PrimaryColour, SecondaryColour, OutlineColour, \
         BackColour, Bold, Italic, Underline, StrikeOut, ScaleX, ScaleY, Spacing, Angle, \
         BorderStyle, Outline, Shadow, Alignment, MarginL, MarginR, MarginV, Encoding"
            .to_string(),
        format!(
            "Style: Default,{font_name},{font_size},{primary_color},&HFFFFFF&,{outline_color},\
             &H000000&,0,0,0,0,100,100,0,0,1,{outline},0,{alignment},10,10,{margin_v},1"
        ),
        String::new(),
        "[Events]".to_string(),
        "Format: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text"
            .to_string(),
    ];

    let mut dialogue_count = 0;
    for cue in cues {
        if cue.text.trim().is_empty() {
            continue;
        }
        let start = srt_time_to_ass_time(&cue.start);
        let end = srt_time_to_ass_time(&cue.end);
        let text = escape_ass_text(cue.text.trim());
        lines.push(format!("Dialogue: 0,{start},{end},Default,,0,0,0,,{text}"));
        dialogue_count += 1;
    }

    if dialogue_count == 0 {
        warn!("no usable subtitle events after filtering");
        return None;
    }
    Some(lines.join("\n"))
}

/// `#RRGGBB` -> ASS `&HBBGGRR&` (BGR byte order). Anything malformed maps
/// to white.
pub fn hex_to_ass_color(hex: &str) -> String {
    let hex = hex.trim().trim_start_matches('#');
    if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return "&HFFFFFF&".to_string();
    }
    let (r, g, b) = (&hex[0..2], &hex[2..4], &hex[4..6]);
    format!("&H{b}{g}{r}&")
}

/// Inverse of [`hex_to_ass_color`]; malformed input maps to `#FFFFFF`.
pub fn ass_to_hex(ass: &str) -> String {
    let inner = ass
        .trim()
        .strip_prefix("&H")
        .and_then(|s| s.strip_suffix('&'));
    match inner {
        Some(s) if s.len() == 6 && s.chars().all(|c| c.is_ascii_hexdigit()) => {
            let (b, g, r) = (&s[0..2], &s[2..4], &s[4..6]);
            format!("#{r}{g}{b}")
        }
        _ => "#FFFFFF".to_string(),
    }
}

/// SRT `HH:MM:SS,mmm` -> ASS `H:MM:SS.cc` (centiseconds, no leading zero
/// on the hour). Unrecognized input is passed through untouched.
pub fn srt_time_to_ass_time(srt_time: &str) -> String {
    let time = srt_time.replace(',', ".");
    let parts: Vec<&str> = time.split(':').collect();
    if parts.len() != 3 {
        return time;
    }

    let (Ok(hours), Ok(minutes)) = (parts[0].parse::<u32>(), parts[1].parse::<u32>()) else {
        return time;
    };
    let mut seconds_parts = parts[2].splitn(2, '.');
    let Ok(seconds) = seconds_parts.next().unwrap_or_default().parse::<u32>() else {
        return time;
    };
    let centiseconds = match seconds_parts.next() {
        Some(frac) => {
            let mut cs: String = frac.chars().take(2).collect();
            while cs.len() < 2 {
                cs.push('0');
            }
            cs
        }
        None => "00".to_string(),
    };

    format!("{hours}:{minutes:02}:{seconds:02}.{centiseconds}")
}

/// Inverse of [`srt_time_to_ass_time`] for centisecond-precision times.
pub fn ass_time_to_srt_time(ass_time: &str) -> String {
    let parts: Vec<&str> = ass_time.split(':').collect();
    if parts.len() != 3 {
        return ass_time.to_string();
    }
    let (Ok(hours), Ok(minutes)) = (parts[0].parse::<u32>(), parts[1].parse::<u32>()) else {
        return ass_time.to_string();
    };
    let mut seconds_parts = parts[2].splitn(2, '.');
    let Ok(seconds) = seconds_parts.next().unwrap_or_default().parse::<u32>() else {
        return ass_time.to_string();
    };
    let millis = seconds_parts
        .next()
        .and_then(|cs| cs.parse::<u32>().ok())
        .map(|cs| cs * 10)
        .unwrap_or(0);

    format!("{hours:02}:{minutes:02}:{seconds:02},{millis:03}")
}

/// SRT time to seconds, for filter `enable` windows.
pub(crate) fn srt_time_to_seconds(srt_time: &str) -> Option<f64> {
    let time = srt_time.replace(',', ".");
    let parts: Vec<&str> = time.split(':').collect();
    if parts.len() != 3 {
        return None;
    }
    let hours: f64 = parts[0].parse().ok()?;
    let minutes: f64 = parts[1].parse().ok()?;
    let seconds: f64 = parts[2].parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

fn is_srt_time(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() == 12
        && bytes[2] == b':'
        && bytes[5] == b':'
        && bytes[8] == b','
        && [0, 1, 3, 4, 6, 7, 9, 10, 11]
            .iter()
            .all(|&i| bytes[i].is_ascii_digit())
}

/// Scale the base font size (calibrated for H=1920) to the target height,
/// floored at 5% of the height (never below 40px) and capped at 200px.
pub(crate) fn scaled_font_size(base: u32, height: u32) -> u32 {
    if height == REFERENCE_HEIGHT {
        return base.max(40);
    }
    let scale = height as f64 / REFERENCE_HEIGHT as f64;
    let scaled = (base as f64 * scale) as u32;
    let min_size = 40.max((height as f64 * 0.05) as u32);
    min_size.max(scaled.min(200))
}

/// Stroke width scales with the same factor, clamped to [1, 10].
pub(crate) fn scaled_outline(base: f32, height: u32) -> u32 {
    if height == REFERENCE_HEIGHT {
        return base as u32;
    }
    let scale = height as f64 / REFERENCE_HEIGHT as f64;
    ((base as f64 * scale) as u32).clamp(1, 10)
}

/// ASS numpad alignment plus vertical margin for the requested position.
pub(crate) fn alignment_and_margin(
    position: SubtitlePosition,
    custom_percent: f32,
    height: u32,
    font_size: u32,
) -> (u8, i64) {
    let edge_margin = (height as f64 * 0.05) as i64;
    match position {
        SubtitlePosition::Top => (8, edge_margin),
        SubtitlePosition::Bottom => (2, edge_margin),
        SubtitlePosition::Center => (5, 0),
        SubtitlePosition::Custom => {
            let span = height as i64 - font_size as i64;
            let margin = (span as f64 * (custom_percent as f64 / 100.0)) as i64;
            (5, margin.clamp(10, (span - 10).max(10)))
        }
    }
}

/// Escape order matters: backslash first, then braces, then newlines.
fn escape_ass_text(text: &str) -> String {
    text.replace("\r\n", "\n")
        .replace('\r', "\n")
        .replace('\\', "\\\\")
        .replace('{', "\\{")
        .replace('}', "\\}")
        .replace('\n', "\\N")
}

/// Fixed filename -> family fallbacks for fonts whose name table cannot be
/// read.
const FONT_FAMILY_MAP: &[(&str, &str)] = &[
    ("microsoftyaheibold.ttc", "Microsoft YaHei"),
    ("microsoftyaheinormal.ttc", "Microsoft YaHei"),
    ("stheitimedium.ttc", "STHeiti"),
    ("stheitilight.ttc", "STHeiti"),
    ("charm-bold.ttf", "Charm"),
    ("charm-regular.ttf", "Charm"),
];

const FONT_NAME_SUFFIXES: &[&str] = &["bold", "regular", "medium", "light", "normal"];

/// Resolve the family name the renderer will match against: read it from
/// the font's name table, fall back to the fixed map, then derive it from
/// the filename.
pub fn resolve_font_family(font_path: &Path) -> Result<String, SubtitleError> {
    if !font_path.exists() {
        return Err(SubtitleError::FontMissing(font_path.to_path_buf()));
    }

    if let Some(family) = read_family_name(font_path) {
        debug!("font family from name table: {family}");
        return Ok(family);
    }

    Ok(family_from_filename(font_path))
}

fn read_family_name(font_path: &Path) -> Option<String> {
    let data = fs::read(font_path).ok()?;
    let face = ttf_parser::Face::parse(&data, 0).ok()?;
    face.names()
        .into_iter()
        .find(|name| name.name_id == ttf_parser::name_id::FAMILY && name.is_unicode())
        .and_then(|name| name.to_string())
}

fn family_from_filename(font_path: &Path) -> String {
    let basename = font_path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    if let Some((_, family)) = FONT_FAMILY_MAP.iter().find(|(file, _)| *file == basename) {
        return (*family).to_string();
    }

    let mut stem = basename
        .rsplit_once('.')
        .map(|(s, _)| s.to_string())
        .unwrap_or(basename);
    for suffix in FONT_NAME_SUFFIXES {
        if let Some(stripped) = stem.strip_suffix(suffix) {
            stem = stripped.trim().to_string();
        }
    }

    let titled = title_case(stem.trim());
    if titled.is_empty() {
        "Arial".to_string()
    } else {
        titled
    }
}

fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_hex_to_ass_color() {
        assert_eq!(hex_to_ass_color("#FFFFFF"), "&HFFFFFF&");
        assert_eq!(hex_to_ass_color("#000000"), "&H000000&");
        // BGR order.
        assert_eq!(hex_to_ass_color("#FF8800"), "&H0088FF&");
        assert_eq!(hex_to_ass_color("FF8800"), "&H0088FF&");
        assert_eq!(hex_to_ass_color("  #FF8800  "), "&H0088FF&");
    }

    #[test]
    fn test_hex_to_ass_color_invalid() {
        assert_eq!(hex_to_ass_color("#GGH"), "&HFFFFFF&");
        assert_eq!(hex_to_ass_color(""), "&HFFFFFF&");
        assert_eq!(hex_to_ass_color("#12345"), "&HFFFFFF&");
        assert_eq!(hex_to_ass_color("#GGHHII"), "&HFFFFFF&");
    }

    #[test]
    fn test_ass_to_hex() {
        assert_eq!(ass_to_hex("&H0088FF&"), "#FF8800");
        assert_eq!(ass_to_hex("&HFFFFFF&"), "#FFFFFF");
        assert_eq!(ass_to_hex("garbage"), "#FFFFFF");
    }

    proptest! {
        #[test]
        fn prop_color_round_trip(r in 0u8..=255, g in 0u8..=255, b in 0u8..=255) {
            let hex = format!("#{r:02X}{g:02X}{b:02X}");
            prop_assert_eq!(ass_to_hex(&hex_to_ass_color(&hex)), hex);
        }

        #[test]
        fn prop_time_round_trip(h in 0u32..24, m in 0u32..60, s in 0u32..60, cs in 0u32..100) {
            // SRT carries milliseconds but ASS only centiseconds, so the
            // law holds for centisecond-precision times.
            let srt = format!("{h:02}:{m:02}:{s:02},{:03}", cs * 10);
            prop_assert_eq!(ass_time_to_srt_time(&srt_time_to_ass_time(&srt)), srt);
        }
    }

    #[test]
    fn test_srt_time_to_ass_time() {
        assert_eq!(srt_time_to_ass_time("00:00:01,000"), "0:00:01.00");
        assert_eq!(srt_time_to_ass_time("00:00:02,500"), "0:00:02.50");
        assert_eq!(srt_time_to_ass_time("01:02:03,456"), "1:02:03.45");
        assert_eq!(srt_time_to_ass_time("12:34:56,789"), "12:34:56.78");
        // Unparsable input passes through.
        assert_eq!(srt_time_to_ass_time("bogus"), "bogus");
    }

    #[test]
    fn test_srt_time_to_seconds() {
        assert_eq!(srt_time_to_seconds("00:00:01,000"), Some(1.0));
        assert_eq!(srt_time_to_seconds("00:01:02,500"), Some(62.5));
        assert_eq!(srt_time_to_seconds("01:00:00,000"), Some(3600.0));
        assert_eq!(srt_time_to_seconds("nope"), None);
    }

    #[test]
    fn test_scaled_font_size_reference_height() {
        assert_eq!(scaled_font_size(60, 1920), 60);
        assert_eq!(scaled_font_size(24, 1920), 40);
    }

    #[test]
    fn test_scaled_font_size_scaled_heights() {
        // H=1248: floor is max(40, 62) = 62, scaled 60 -> 39, so 62 wins.
        assert_eq!(scaled_font_size(60, 1248), 62);
        // H=3840: scaled 60 -> 120, floor 192 wins.
        assert_eq!(scaled_font_size(60, 3840), 192);
        // Large base is capped at 200 before the floor applies.
        assert_eq!(scaled_font_size(500, 1080), 200);
    }

    #[test]
    fn test_scaled_outline() {
        assert_eq!(scaled_outline(1.5, 1920), 1);
        assert_eq!(scaled_outline(1.5, 1248), 1);
        assert_eq!(scaled_outline(8.0, 3840), 10);
        assert_eq!(scaled_outline(0.5, 1080), 1);
    }

    #[test]
    fn test_alignment_and_margin() {
        assert_eq!(
            alignment_and_margin(SubtitlePosition::Top, 0.0, 1920, 60),
            (8, 96)
        );
        assert_eq!(
            alignment_and_margin(SubtitlePosition::Bottom, 0.0, 1920, 60),
            (2, 96)
        );
        assert_eq!(
            alignment_and_margin(SubtitlePosition::Center, 0.0, 1920, 60),
            (5, 0)
        );
    }

    #[test]
    fn test_alignment_and_margin_custom() {
        // 50% of (1920 - 60) = 930, inside the clamp range.
        assert_eq!(
            alignment_and_margin(SubtitlePosition::Custom, 50.0, 1920, 60),
            (5, 930)
        );
        // 0% clamps up to 10, 100% clamps down to span - 10.
        assert_eq!(
            alignment_and_margin(SubtitlePosition::Custom, 0.0, 1920, 60),
            (5, 10)
        );
        assert_eq!(
            alignment_and_margin(SubtitlePosition::Custom, 100.0, 1920, 60),
            (5, 1850)
        );
    }

    #[test]
    fn test_escape_ass_text() {
        assert_eq!(escape_ass_text("Hello {world}"), "Hello \\{world\\}");
        assert_eq!(escape_ass_text("a\\b"), "a\\\\b");
        assert_eq!(escape_ass_text("line1\nline2"), "line1\\Nline2");
        assert_eq!(escape_ass_text("line1\r\nline2"), "line1\\Nline2");
        // Backslash is escaped before the newline marker is introduced.
        assert_eq!(escape_ass_text("\\N"), "\\\\N");
    }

    #[test]
    fn test_family_from_filename_map() {
        assert_eq!(
            family_from_filename(Path::new("/fonts/STHeitiMedium.ttc")),
            "STHeiti"
        );
        assert_eq!(
            family_from_filename(Path::new("Charm-Bold.ttf")),
            "Charm"
        );
    }

    #[test]
    fn test_family_from_filename_derived() {
        // Unknown font: lowercase stem, strip the style suffix, title-case.
        assert_eq!(
            family_from_filename(Path::new("OpenSansBold.ttf")),
            "Opensans"
        );
        assert_eq!(family_from_filename(Path::new("lato regular.ttf")), "Lato");
    }

    #[test]
    fn test_resolve_font_family_missing_file() {
        let result = resolve_font_family(Path::new("/nonexistent/font.ttf"));
        assert!(matches!(result, Err(SubtitleError::FontMissing(_))));
    }

    #[test]
    fn test_parse_srt() {
        let dir = tempfile::tempdir().unwrap();
        let srt = dir.path().join("subtitle.srt");
        fs::write(
            &srt,
            "1\n00:00:01,000 --> 00:00:02,500\nHello {world}\n\n\
             2\n00:00:03,000 --> 00:00:04,000\nSecond line\nwrapped\n",
        )
        .unwrap();

        let cues = parse_srt(&srt).unwrap();
        assert_eq!(cues.len(), 2);
        assert_eq!(cues[0].start, "00:00:01,000");
        assert_eq!(cues[0].end, "00:00:02,500");
        assert_eq!(cues[0].text, "Hello {world}");
        assert_eq!(cues[1].text, "Second line\nwrapped");
    }

    #[test]
    fn test_parse_srt_skips_malformed_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let srt = dir.path().join("subtitle.srt");
        fs::write(
            &srt,
            "not-an-index\n00:00:01,000 --> 00:00:02,000\nskipped\n\n\
             2\nnot a time line\nskipped\n\n\
             3\n00:00:05,000 --> 00:00:06,000\nkept\n",
        )
        .unwrap();

        let cues = parse_srt(&srt).unwrap();
        assert_eq!(cues.len(), 1);
        assert_eq!(cues[0].text, "kept");
    }

    #[test]
    fn test_parse_srt_no_cues() {
        let dir = tempfile::tempdir().unwrap();
        let srt = dir.path().join("empty.srt");
        fs::write(&srt, "\n\n").unwrap();
        assert!(matches!(parse_srt(&srt), Err(SubtitleError::NoCues(_))));
    }

    #[test]
    fn test_render_ass_document_shape() {
        let cues = vec![SubtitleCue {
            index: 1,
            start: "00:00:01,000".to_string(),
            end: "00:00:02,500".to_string(),
            text: "Hello {world}".to_string(),
        }];
        let style = SubtitleStyle {
            font_file: PathBuf::from("font.ttf"),
            font_size: 60,
            stroke_width: 1.5,
            fore_color: "#FF8800".to_string(),
            stroke_color: "#000000".to_string(),
            position: SubtitlePosition::Top,
            custom_position: 70.0,
        };

        let doc = render_ass(&cues, &style, "Test Font", 720, 1248).unwrap();
        assert!(doc.contains("PlayResX: 720"));
        assert!(doc.contains("PlayResY: 1248"));
        // H=1248 scales the 60px base below the 62px floor.
        assert!(doc.contains("Style: Default,Test Font,62,&H0088FF&,&HFFFFFF&,&H000000&,"));
        assert!(doc.contains("Dialogue: 0,0:00:01.00,0:00:02.50,Default,,0,0,0,,Hello \\{world\\}"));
    }

    #[test]
    fn test_render_ass_skips_empty_text() {
        let cues = vec![SubtitleCue {
            index: 1,
            start: "00:00:01,000".to_string(),
            end: "00:00:02,000".to_string(),
            text: "   ".to_string(),
        }];
        let style = SubtitleStyle {
            font_file: PathBuf::from("font.ttf"),
            font_size: 60,
            stroke_width: 1.5,
            fore_color: "#FFFFFF".to_string(),
            stroke_color: "#000000".to_string(),
            position: SubtitlePosition::Bottom,
            custom_position: 70.0,
        };
        assert!(render_ass(&cues, &style, "Arial", 1080, 1920).is_none());
    }
}
