// Transition effects between clips, realized as ffmpeg filter fragments.

use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

/// Every transition runs over one second.
pub const TRANSITION_SECS: f64 = 1.0;

/// Transition requested by the caller; `Shuffle` picks one of the concrete
/// effects per clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionMode {
    None,
    FadeIn,
    FadeOut,
    SlideIn,
    SlideOut,
    Shuffle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
    Top,
    Bottom,
}

impl Side {
    pub const ALL: [Side; 4] = [Side::Left, Side::Right, Side::Top, Side::Bottom];
}

/// A concrete effect applied to one clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    None,
    FadeIn,
    FadeOut,
    SlideIn(Side),
    SlideOut(Side),
}

/// Pick the effect for one clip: a random side is drawn first, then
/// `Shuffle` chooses uniformly among the four effects with that same side.
pub fn resolve<R: Rng>(mode: TransitionMode, rng: &mut R) -> Effect {
    let side = *Side::ALL.choose(rng).expect("side set is non-empty");
    match mode {
        TransitionMode::None => Effect::None,
        TransitionMode::FadeIn => Effect::FadeIn,
        TransitionMode::FadeOut => Effect::FadeOut,
        TransitionMode::SlideIn => Effect::SlideIn(side),
        TransitionMode::SlideOut => Effect::SlideOut(side),
        TransitionMode::Shuffle => {
            let choices = [
                Effect::FadeIn,
                Effect::FadeOut,
                Effect::SlideIn(side),
                Effect::SlideOut(side),
            ];
            *choices.choose(rng).expect("effect set is non-empty")
        }
    }
}

impl Effect {
    /// Fades are a plain `fade` filter appended to the clip's chain.
    pub fn fade_filter(self, clip_duration: f64) -> Option<String> {
        match self {
            Effect::FadeIn => Some(format!("fade=t=in:st=0:d={TRANSITION_SECS}")),
            Effect::FadeOut => {
                let start = (clip_duration - TRANSITION_SECS).max(0.0);
                Some(format!("fade=t=out:st={start:.3}:d={TRANSITION_SECS}"))
            }
            _ => None,
        }
    }

    /// Slides are overlay position expressions, evaluated while the clip is
    /// composited over a black background of the target geometry.
    pub fn overlay_position(self, clip_duration: f64) -> Option<(String, String)> {
        let d = TRANSITION_SECS;
        match self {
            Effect::SlideIn(side) => Some(match side {
                Side::Left => (format!("-w+w*min(t/{d},1)"), "0".to_string()),
                Side::Right => (format!("W-W*min(t/{d},1)"), "0".to_string()),
                Side::Top => ("0".to_string(), format!("-h+h*min(t/{d},1)")),
                Side::Bottom => ("0".to_string(), format!("H-H*min(t/{d},1)")),
            }),
            Effect::SlideOut(side) => {
                let start = (clip_duration - d).max(0.0);
                Some(match side {
                    Side::Left => (format!("-w*max(0,t-{start:.3})/{d}"), "0".to_string()),
                    Side::Right => (format!("w*max(0,t-{start:.3})/{d}"), "0".to_string()),
                    Side::Top => ("0".to_string(), format!("-h*max(0,t-{start:.3})/{d}")),
                    Side::Bottom => ("0".to_string(), format!("h*max(0,t-{start:.3})/{d}")),
                })
            }
            _ => None,
        }
    }

    pub fn is_slide(self) -> bool {
        matches!(self, Effect::SlideIn(_) | Effect::SlideOut(_))
    }
}
