//! Mixer - buffer-level arithmetic used on the audio path
//!
//! All functions are allocation-free and operate on at most `n` samples;
//! `n` is clamped to the shorter slice so a short scratch buffer can never
//! cause a panic in the audio callback.

use crate::types::Sample;

/// Static buffer arithmetic
pub struct Mixer;

impl Mixer {
    /// `dst[i] += src[i]` for `i` in `0..n`
    #[inline]
    pub fn mix_buffers_no_gain(dst: &mut [Sample], src: &[Sample], n: usize) {
        let n = n.min(dst.len()).min(src.len());
        for (d, s) in dst[..n].iter_mut().zip(&src[..n]) {
            *d += *s;
        }
    }

    /// `dst[i] += src[i] * gain` for `i` in `0..n`
    #[inline]
    pub fn mix_buffers_with_gain(dst: &mut [Sample], src: &[Sample], n: usize, gain: Sample) {
        let n = n.min(dst.len()).min(src.len());
        for (d, s) in dst[..n].iter_mut().zip(&src[..n]) {
            *d += *s * gain;
        }
    }

    /// `buf[i] *= gain` for `i` in `0..n`
    #[inline]
    pub fn apply_gain_to_buffer(buf: &mut [Sample], n: usize, gain: Sample) {
        let n = n.min(buf.len());
        for s in &mut buf[..n] {
            *s *= gain;
        }
    }

    /// Largest absolute sample in `buf[..n]`, or `previous_peak` if larger
    ///
    /// Peaks are monotonic within a metering window; the caller resets.
    #[inline]
    pub fn compute_peak(buf: &[Sample], n: usize, previous_peak: Sample) -> Sample {
        let n = n.min(buf.len());
        buf[..n].iter().fold(previous_peak, |peak, s| peak.max(s.abs()))
    }
}
