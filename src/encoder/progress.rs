//! Accumulator for the encoder's `-progress pipe:1` stream.
//!
//! One logical update is spread over several `key=value` lines and closed by a
//! `progress=continue|end` marker. Fields keep their last seen value across
//! blocks; an [`Update`] is produced only on the marker.

use crate::progress::{JobId, Stage, Update};

#[derive(Debug, Clone)]
pub struct ProgressState {
    job_id: JobId,
    duration_sec: f64,
    audio_only: bool,
    out_time_us: u64,
    speed: Option<String>,
    total_size: u64,
}

impl ProgressState {
    pub fn new(job_id: JobId, duration_sec: f64, audio_only: bool) -> Self {
        Self {
            job_id,
            duration_sec,
            audio_only,
            out_time_us: 0,
            speed: None,
            total_size: 0,
        }
    }

    pub fn message(&self) -> &'static str {
        if self.audio_only {
            "Encoding (audio)"
        } else {
            "Encoding"
        }
    }

    /// `out_time_ms` is in microseconds despite its name.
    pub fn set_out_time_us(&mut self, value: &str) {
        if let Ok(v) = value.parse::<u64>() {
            self.out_time_us = v;
        }
    }

    pub fn set_speed(&mut self, value: &str) {
        if !value.is_empty() && value != "N/A" {
            self.speed = Some(value.to_string());
        }
    }

    pub fn set_total_size(&mut self, value: &str) {
        if let Ok(v) = value.parse::<u64>() {
            self.total_size = v;
        }
    }

    /// Unknown for audio-only jobs and when the duration is unknown.
    pub fn percent(&self) -> Option<f64> {
        if self.audio_only || self.duration_sec.is_nan() || self.duration_sec <= 0.0 {
            return None;
        }
        let pct = self.out_time_us as f64 / (self.duration_sec * 1_000_000.0) * 100.0;
        Some(pct.min(100.0))
    }

    pub fn flush(&self) -> Update {
        Update {
            job_id: self.job_id,
            stage: Stage::Encoding,
            percent: self.percent(),
            eta: None,
            bytes: (self.total_size > 0).then_some(self.total_size),
            speed: self.speed.clone(),
            message: self.message().to_string(),
        }
    }

    /// Feeds one line; returns an update when the line closes a block.
    pub fn feed(&mut self, line: &str) -> Option<Update> {
        let (key, value) = line.split_once('=')?;
        let value = value.trim();
        match key.trim() {
            "out_time_ms" | "out_time_us" => self.set_out_time_us(value),
            "speed" => self.set_speed(value),
            "total_size" => self.set_total_size(value),
            "progress" => return Some(self.flush()),
            _ => {}
        }
        None
    }
}
