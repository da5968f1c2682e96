//! Size-target bitrate arithmetic.

/// Audio never gets less than this.
pub const MIN_AUDIO_KBPS: u32 = 64;

const BYTES_PER_MB: u64 = 1024 * 1024;

pub fn safe_audio_kbps(kbps: u32) -> u32 {
    kbps.max(MIN_AUDIO_KBPS)
}

/// Lower bound wins when the bounds are inverted.
fn clamp(value: i64, min: u32, max: u32) -> u32 {
    if value < i64::from(min) {
        min
    } else if value > i64::from(max) {
        max
    } else {
        value as u32
    }
}

/// Video bitrate that fits `max_size_mb` over `duration_sec` next to the
/// audio track, clamped to `[min_kbps, max_kbps]`.
///
/// Unknown duration (`<= 0`) yields `max_kbps`.
pub fn compute_video_kbps(
    max_size_mb: u32,
    duration_sec: f64,
    audio_kbps: u32,
    min_kbps: u32,
    max_kbps: u32,
) -> u32 {
    if duration_sec.is_nan() || duration_sec <= 0.0 {
        return max_kbps;
    }
    let max_bits = u64::from(max_size_mb) * BYTES_PER_MB * 8;
    let total_kbps = (max_bits as f64 / duration_sec / 1000.0) as i64;
    clamp(total_kbps - i64::from(audio_kbps), min_kbps, max_kbps)
}

/// Whether `bytes` exceeds the target by more than 10%.
///
/// Returns the ratio too; with no target (`max_size_mb == 0`) it is 0 and
/// never an overshoot.
pub fn check_overshoot(bytes: u64, max_size_mb: u32) -> (bool, f64) {
    if max_size_mb == 0 {
        return (false, 0.0);
    }
    let ratio = bytes as f64 / (u64::from(max_size_mb) * BYTES_PER_MB) as f64;
    (ratio > 1.10, ratio)
}
