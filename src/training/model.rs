// Training data model
// Exercises are read-only to the session core; a session snapshots them at start

use crate::training::media::{MediaKind, classify_media};
use uuid::Uuid;

/// Beats per measure for the metronome count
/// `None` plays every beat unaccented (a 1-beat measure).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum BeatStyle {
    #[serde(rename = "none")]
    None,
    #[serde(rename = "2/4")]
    TwoBeat,
    #[serde(rename = "3/4")]
    ThreeBeat,
    #[serde(rename = "4/4")]
    FourBeat,
}

impl BeatStyle {
    /// Number of beats in one measure
    pub fn beats_per_measure(&self) -> u8 {
        match self {
            BeatStyle::None => 1,
            BeatStyle::TwoBeat => 2,
            BeatStyle::ThreeBeat => 3,
            BeatStyle::FourBeat => 4,
        }
    }
}

impl Default for BeatStyle {
    fn default() -> Self {
        BeatStyle::None
    }
}

/// A single timed exercise within a training
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Exercise {
    pub title: String,
    #[serde(default)]
    pub resource_link: Option<String>,
    /// Tempo in BPM; 0 means no metronome
    #[serde(default)]
    pub bpm: u32,
    #[serde(default)]
    pub duration_minutes: u32,
    #[serde(default)]
    pub duration_seconds: u32,
    /// Rest before the next exercise; 0 means no rest
    #[serde(default)]
    pub break_seconds: u32,
    #[serde(default)]
    pub beat_style: BeatStyle,
    /// Full measures of metronome count-in before the exercise starts
    #[serde(default)]
    pub prep_measures: u32,
}

impl Exercise {
    /// Creates an untimed, silent exercise with the given title
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            resource_link: None,
            bpm: 0,
            duration_minutes: 0,
            duration_seconds: 0,
            break_seconds: 0,
            beat_style: BeatStyle::None,
            prep_measures: 0,
        }
    }

    /// Total active duration in seconds; 0 means untimed
    pub fn active_seconds(&self) -> u32 {
        self.duration_minutes * 60 + self.duration_seconds
    }

    /// Beats per measure from the beat style
    pub fn beats_per_measure(&self) -> u8 {
        self.beat_style.beats_per_measure()
    }

    /// Count-in duration in whole seconds, rounded up, minimum 1s when a
    /// count-in exists at all (bpm > 0 and prep_measures > 0), else 0
    pub fn count_in_seconds(&self) -> u32 {
        if self.bpm == 0 || self.prep_measures == 0 {
            return 0;
        }
        let beats = self.prep_measures as f64 * self.beats_per_measure() as f64;
        let secs = beats * 60.0 / self.bpm as f64;
        (secs.ceil() as u32).max(1)
    }

    /// Media classification of the resource link
    pub fn media_kind(&self) -> MediaKind {
        classify_media(self.resource_link.as_deref())
    }

    /// Untimed exercises run until an external end-of-media signal
    pub fn is_untimed(&self) -> bool {
        self.active_seconds() == 0 || self.media_kind() == MediaKind::External
    }
}

/// An ordered list of exercises plus identity metadata
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Training {
    pub id: Uuid,
    pub title: String,
    #[serde(default)]
    pub exercises: Vec<Exercise>,
}

impl Training {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            exercises: Vec::new(),
        }
    }
}
