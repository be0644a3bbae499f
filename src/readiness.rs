//! Composite readiness score
//!
//! Folds one sample's quality report and presence signal into the cached
//! `ReadinessState` the caller polls between samples.

use serde::Serialize;

use crate::config::{ScorePoints, ScoreWeights};
use crate::presence::PresenceReport;
use crate::quality::{QualityReport, Status};

/// Raw measurements of one sample; dropped once folded into `ReadinessState`
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FrameMetrics {
    pub brightness: f32,
    pub sharpness: f32,
    pub framing_deviation: f32,
    pub subject_present: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadinessState {
    pub brightness_status: Status,
    pub sharpness_status: Status,
    pub framing_status: Status,
    pub subject_present: bool,
    pub score: u8,
    pub may_capture: bool,
    /// True until the first sample after start or a facing switch
    pub analyzing: bool,
    pub metrics: Option<FrameMetrics>,
    pub messages: Vec<&'static str>,
}

impl ReadinessState {
    /// State shown while waiting for the first sample
    pub fn analyzing() -> Self {
        Self {
            brightness_status: Status::Warning,
            sharpness_status: Status::Warning,
            framing_status: Status::Warning,
            subject_present: false,
            score: 0,
            may_capture: false,
            analyzing: true,
            metrics: None,
            messages: vec!["analyzing"],
        }
    }
}

impl Default for ReadinessState {
    fn default() -> Self {
        Self::analyzing()
    }
}

fn points(status: Status, weights: ScorePoints) -> u8 {
    match status {
        Status::Good => weights.good,
        Status::Warning => weights.warning,
        Status::Error => 0,
    }
}

/// Score for a set of statuses. Framing earns nothing on a frame with no
/// local contrast: a flat frame is trivially "centered".
pub fn score(
    brightness: Status,
    sharpness: Status,
    framing: Status,
    subject_present: bool,
    weights: &ScoreWeights,
) -> u8 {
    let framing_points = if sharpness == Status::Error {
        0
    } else {
        points(framing, weights.framing)
    };
    let presence_points = if subject_present { weights.presence } else { 0 };

    let total = points(brightness, weights.brightness) as u32
        + points(sharpness, weights.sharpness) as u32
        + framing_points as u32
        + presence_points as u32;
    total.min(100) as u8
}

pub fn may_capture(score: u8, subject_present: bool, weights: &ScoreWeights) -> bool {
    score >= weights.capture_threshold && subject_present
}

fn messages(quality: &QualityReport, subject_present: bool) -> Vec<&'static str> {
    let mut out = Vec::new();
    match quality.brightness_status {
        Status::Error if quality.brightness < 128.0 => out.push("too dark"),
        Status::Error => out.push("too bright"),
        Status::Warning if quality.brightness < 128.0 => out.push("a little dark"),
        Status::Warning => out.push("a little bright"),
        Status::Good => {}
    }
    if quality.sharpness_status != Status::Good {
        out.push("hold steady");
    }
    if quality.framing_status != Status::Good {
        out.push("adjust position");
    }
    if !subject_present {
        out.push("no subject detected");
    }
    out
}

pub fn evaluate(
    quality: &QualityReport,
    presence: &PresenceReport,
    weights: &ScoreWeights,
) -> ReadinessState {
    let subject_present = presence.present;
    let score = score(
        quality.brightness_status,
        quality.sharpness_status,
        quality.framing_status,
        subject_present,
        weights,
    );

    ReadinessState {
        brightness_status: quality.brightness_status,
        sharpness_status: quality.sharpness_status,
        framing_status: quality.framing_status,
        subject_present,
        score,
        may_capture: may_capture(score, subject_present, weights),
        analyzing: false,
        metrics: Some(FrameMetrics {
            brightness: quality.brightness,
            sharpness: quality.sharpness,
            framing_deviation: quality.framing_deviation,
            subject_present,
        }),
        messages: messages(quality, subject_present),
    }
}
