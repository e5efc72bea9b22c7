//! Tempo map converting between beats, seconds and ticks.

use super::SequencerContext;

pub const DEFAULT_TEMPO: f64 = 120.0;

#[derive(Debug, Clone, Copy, PartialEq)]
struct TempoPoint {
    beat: f64,
    bpm: f64,
    /// Absolute time of `beat`, kept up to date on insertion.
    seconds: f64,
}

/// Piecewise constant tempo, starting at beat 0.
#[derive(Debug, Clone, PartialEq)]
pub struct TempoMap {
    points: Vec<TempoPoint>,
}

impl Default for TempoMap {
    fn default() -> Self {
        Self::new(DEFAULT_TEMPO)
    }
}

impl TempoMap {
    pub fn new(bpm: f64) -> Self {
        Self {
            points: vec![TempoPoint {
                beat: 0.0,
                bpm: sanitize(bpm),
                seconds: 0.0,
            }],
        }
    }

    /// Tempo from a Set Tempo meta event.
    pub fn bpm_from_micros(micros_per_quarter: u32) -> f64 {
        60_000_000.0 / micros_per_quarter.max(1) as f64
    }

    /// Changes the tempo from `beat` onwards, replacing a change at the same beat.
    pub fn insert(&mut self, beat: f64, bpm: f64) {
        let beat = if beat.is_finite() { beat.max(0.0) } else { 0.0 };
        let point = TempoPoint {
            beat,
            bpm: sanitize(bpm),
            seconds: 0.0,
        };
        match self.points.iter().position(|p| p.beat >= beat) {
            Some(i) if self.points[i].beat == beat => self.points[i] = point,
            Some(i) => self.points.insert(i, point),
            None => self.points.push(point),
        }
        self.update_seconds();
    }

    fn update_seconds(&mut self) {
        for i in 1..self.points.len() {
            let prev = self.points[i - 1];
            self.points[i].seconds = prev.seconds + (self.points[i].beat - prev.beat) * 60.0 / prev.bpm;
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    fn point_at_beat(&self, beat: f64) -> &TempoPoint {
        let i = self.points.partition_point(|p| p.beat <= beat);
        &self.points[i.saturating_sub(1)]
    }

    fn point_at_seconds(&self, seconds: f64) -> &TempoPoint {
        let i = self.points.partition_point(|p| p.seconds <= seconds);
        &self.points[i.saturating_sub(1)]
    }

    pub fn bpm_at_beat(&self, beat: f64) -> f64 {
        self.point_at_beat(beat).bpm
    }

    pub fn seconds_at_beat(&self, beat: f64) -> f64 {
        let beat = beat.max(0.0);
        let p = self.point_at_beat(beat);
        p.seconds + (beat - p.beat) * 60.0 / p.bpm
    }

    pub fn beat_at_seconds(&self, seconds: f64) -> f64 {
        let seconds = seconds.max(0.0);
        let p = self.point_at_seconds(seconds);
        p.beat + (seconds - p.seconds) * p.bpm / 60.0
    }

    pub fn seconds_at_tick(&self, tick: u64, ticks_per_quarter: u16) -> f64 {
        self.seconds_at_beat(tick as f64 / ticks_per_quarter.max(1) as f64)
    }

    /// Last whole tick at or before `seconds`.
    pub fn tick_at_seconds(&self, seconds: f64, ticks_per_quarter: u16) -> u64 {
        let ticks = self.beat_at_seconds(seconds) * ticks_per_quarter.max(1) as f64;
        // 1e-4 of a tick absorbs rounding so exact boundaries don't land one tick early.
        (ticks + 1e-4).floor() as u64
    }
}

impl SequencerContext for TempoMap {
    fn tempo_track(&self) -> &TempoMap {
        self
    }
}

fn sanitize(bpm: f64) -> f64 {
    if bpm.is_finite() && bpm > 0.0 {
        bpm
    } else {
        DEFAULT_TEMPO
    }
}
