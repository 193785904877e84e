//! Stereo feedback delay

use crate::plugin::hosted::{InstanceInfo, PluginInstance};
use crate::plugin::PortInfo;
use crate::types::{Frames, Sample, SAMPLE_RATE};

pub const URI: &str = "urn:cadence:native:delay";

/// Maximum delay time in seconds
const MAX_DELAY_SECONDS: f32 = 2.0;

/// Stereo delay line
struct DelayLine {
    buffer_l: Vec<f32>,
    buffer_r: Vec<f32>,
    write_pos: usize,
    delay_samples: usize,
}

impl DelayLine {
    fn new(len: usize) -> Self {
        Self {
            buffer_l: vec![0.0; len],
            buffer_r: vec![0.0; len],
            write_pos: 0,
            delay_samples: 1,
        }
    }

    fn len(&self) -> usize {
        self.buffer_l.len()
    }

    fn set_delay_samples(&mut self, samples: usize) {
        self.delay_samples = samples.clamp(1, self.len() - 1);
    }

    #[inline]
    fn read(&self) -> (f32, f32) {
        let read_pos = (self.write_pos + self.len() - self.delay_samples) % self.len();
        (self.buffer_l[read_pos], self.buffer_r[read_pos])
    }

    /// Write input plus feedback, advance, and return the delayed pair
    #[inline]
    fn process(&mut self, left: f32, right: f32, feedback: f32) -> (f32, f32) {
        let (delayed_l, delayed_r) = self.read();
        self.buffer_l[self.write_pos] = left + delayed_l * feedback;
        self.buffer_r[self.write_pos] = right + delayed_r * feedback;
        self.write_pos = (self.write_pos + 1) % self.len();
        (delayed_l, delayed_r)
    }

    fn reset(&mut self) {
        self.buffer_l.fill(0.0);
        self.buffer_r.fill(0.0);
        self.write_pos = 0;
    }
}

/// Stereo delay with feedback and dry/wet mix
///
/// Parameters:
/// - Time: Delay time in ms (1-2000ms)
/// - Feedback: Amount of signal fed back (0-95%)
/// - Mix: Dry/wet balance (0 = dry, 1 = wet)
///
/// The delay line is allocated in `activate`, never on the audio thread.
pub struct FeedbackDelay {
    info: InstanceInfo,
    sample_rate: f32,
    time_ms: f32,
    feedback: f32,
    mix: f32,
    line: DelayLine,
}

impl FeedbackDelay {
    pub fn new() -> Self {
        let info = InstanceInfo::new("Stereo Delay", URI, 2, 2)
            .with_port(PortInfo::new("Time", 250.0).with_range(1.0, 2000.0).with_unit("ms"))
            .with_port(PortInfo::new("Feedback", 0.4).with_range(0.0, 0.95))
            .with_port(PortInfo::new("Mix", 0.3));
        let sample_rate = SAMPLE_RATE as f32;
        let mut delay = Self {
            info,
            sample_rate,
            time_ms: 250.0,
            feedback: 0.4,
            mix: 0.3,
            line: DelayLine::new(Self::line_len(sample_rate)),
        };
        delay.update_delay_time();
        delay
    }

    fn line_len(sample_rate: f32) -> usize {
        (sample_rate * MAX_DELAY_SECONDS) as usize + 1
    }

    fn update_delay_time(&mut self) {
        let samples = (self.time_ms / 1000.0 * self.sample_rate) as usize;
        self.line.set_delay_samples(samples);
    }
}

impl Default for FeedbackDelay {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginInstance for FeedbackDelay {
    fn info(&self) -> &InstanceInfo {
        &self.info
    }

    fn activate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate.max(1) as f32;
        self.line = DelayLine::new(Self::line_len(self.sample_rate));
        self.update_delay_time();
    }

    fn set_param(&mut self, index: usize, value: f32) {
        match index {
            0 if value != self.time_ms => {
                self.time_ms = value;
                self.update_delay_time();
            }
            1 => self.feedback = value,
            2 => self.mix = value,
            _ => {}
        }
    }

    fn run(&mut self, channels: &mut [&mut [Sample]], frames: Frames) {
        let dry = 1.0 - self.mix;
        match channels {
            [left, right] => {
                let n = frames.min(left.len()).min(right.len());
                for i in 0..n {
                    let (dl, dr) = self.line.process(left[i], right[i], self.feedback);
                    left[i] = left[i] * dry + dl * self.mix;
                    right[i] = right[i] * dry + dr * self.mix;
                }
            }
            [mono] => {
                for s in mono.iter_mut().take(frames) {
                    let (dl, _) = self.line.process(*s, 0.0, self.feedback);
                    *s = *s * dry + dl * self.mix;
                }
            }
            _ => {}
        }
    }

    fn reset(&mut self) {
        self.line.reset();
    }
}
