// End-to-end checks of the SRT -> ASS transcoder against real files.

use std::fs;
use std::path::PathBuf;

use clipforge::engine::subtitle::{
    SubtitleError, SubtitlePosition, SubtitleStyle, transcode_to_ass,
};

fn write_fixture(dir: &tempfile::TempDir, srt_body: &str) -> (PathBuf, PathBuf, PathBuf) {
    let srt = dir.path().join("subtitle.srt");
    fs::write(&srt, srt_body).unwrap();

    // An existing but unparsable font file exercises the filename-derived
    // family fallback.
    let font = dir.path().join("TestFontBold.ttf");
    fs::write(&font, b"not a real font").unwrap();

    let ass = dir.path().join("subtitle.ass");
    (srt, font, ass)
}

fn style(font: PathBuf, position: SubtitlePosition) -> SubtitleStyle {
    SubtitleStyle {
        font_file: font,
        font_size: 60,
        stroke_width: 1.5,
        fore_color: "#FFFFFF".to_string(),
        stroke_color: "#000000".to_string(),
        position,
        custom_position: 70.0,
    }
}

#[test]
fn transcodes_single_cue_with_scaled_font() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let dir = tempfile::tempdir().unwrap();
    let (srt, font, ass) = write_fixture(
        &dir,
        "1\n00:00:01,000 --> 00:00:02,500\nHello {world}\n",
    );

    transcode_to_ass(&srt, &ass, &style(font, SubtitlePosition::Bottom), 720, 1248).unwrap();

    let bytes = fs::read(&ass).unwrap();
    assert_eq!(&bytes[0..3], &[0xef, 0xbb, 0xbf], "UTF-8 BOM expected");

    let doc = String::from_utf8(bytes[3..].to_vec()).unwrap();
    assert!(doc.contains("PlayResX: 720"));
    assert!(doc.contains("PlayResY: 1248"));
    // Base size 60 scaled by 1248/1920 is 39, below the 62px floor for
    // this height, so the floor wins.
    assert!(doc.contains(",62,"), "expected scaled font size 62:\n{doc}");
    // Derived family: lowercase stem minus the style suffix, title-cased.
    assert!(doc.contains("Style: Default,Testfont,"));
    assert!(doc.contains("Dialogue: 0,0:00:01.00,0:00:02.50,Default,,0,0,0,,Hello \\{world\\}"));
}

#[test]
fn style_line_carries_colors_alignment_and_margin() {
    let dir = tempfile::tempdir().unwrap();
    let (srt, font, ass) = write_fixture(&dir, "1\n00:00:00,000 --> 00:00:01,000\nHi\n");

    let style = SubtitleStyle {
        fore_color: "#FF8800".to_string(),
        ..style(font, SubtitlePosition::Top)
    };
    transcode_to_ass(&srt, &ass, &style, 1080, 1920).unwrap();

    let doc = fs::read_to_string(&ass).unwrap();
    let style_line = doc
        .lines()
        .find(|l| l.starts_with("Style: "))
        .expect("style line present");

    // BGR color order, numpad alignment 8 (top-center), MarginV 5% of 1920.
    assert!(style_line.contains("&H0088FF&"));
    assert!(style_line.contains("&H000000&"));
    assert!(style_line.ends_with(",1,1,0,8,10,10,96,1"), "{style_line}");

    let fields: Vec<&str> = style_line.trim_start_matches("Style: ").split(',').collect();
    assert_eq!(fields.len(), 23, "ASS style line has 23 fields");
    assert_eq!(fields[11], "100", "ScaleX");
    assert_eq!(fields[12], "100", "ScaleY");
}

#[test]
fn multi_line_cues_use_ass_line_breaks() {
    let dir = tempfile::tempdir().unwrap();
    let (srt, font, ass) = write_fixture(
        &dir,
        "1\n00:00:01,000 --> 00:00:02,000\nfirst\nsecond\n\n\
         2\n00:00:03,000 --> 00:00:04,000\nthird\n",
    );

    transcode_to_ass(&srt, &ass, &style(font, SubtitlePosition::Center), 1080, 1920).unwrap();

    let doc = fs::read_to_string(&ass).unwrap();
    assert!(doc.contains(",first\\Nsecond"));
    assert_eq!(doc.matches("Dialogue: ").count(), 2);
}

#[test]
fn missing_font_is_surfaced() {
    let dir = tempfile::tempdir().unwrap();
    let (srt, _, ass) = write_fixture(&dir, "1\n00:00:01,000 --> 00:00:02,000\nHi\n");

    let style = style(dir.path().join("absent.ttf"), SubtitlePosition::Bottom);
    let err = transcode_to_ass(&srt, &ass, &style, 1080, 1920).unwrap_err();
    assert!(matches!(err, SubtitleError::FontMissing(_)));
    assert!(!ass.exists());
}

#[test]
fn srt_without_usable_cues_is_surfaced() {
    let dir = tempfile::tempdir().unwrap();
    let (srt, font, ass) = write_fixture(&dir, "garbage\nwithout structure\n");

    let err =
        transcode_to_ass(&srt, &ass, &style(font, SubtitlePosition::Bottom), 1080, 1920)
            .unwrap_err();
    assert!(matches!(err, SubtitleError::NoCues(_)));
    assert!(!ass.exists());
}
