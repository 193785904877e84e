//! Audio source metadata
//!
//! Describes where a clip's audio came from. Only the metadata is handled
//! here; reading and decoding files is left to the caller.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Length of the timestamp suffix appended to recorded file names
const RECORDING_SUFFIX_LEN: usize = 20;

fn default_name() -> String {
    "No name supplied?".to_string()
}

/// Persisted description of an audio source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioSourceInfo {
    #[serde(rename = "channelcount", default)]
    pub channel_count: usize,
    /// Session that recorded this source, 0 for imported files
    #[serde(rename = "origsheetid", default)]
    pub orig_session_id: i64,
    #[serde(default)]
    pub dir: String,
    #[serde(default)]
    pub id: i64,
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(rename = "origbitdepth", default)]
    pub orig_bit_depth: u32,
    #[serde(rename = "wasrecording", default)]
    pub was_recording: bool,
    /// Length in frames
    #[serde(default)]
    pub length: u64,
    #[serde(default)]
    pub rate: u32,
    #[serde(default)]
    pub decoder: String,
}

impl Default for AudioSourceInfo {
    fn default() -> Self {
        Self {
            channel_count: 0,
            orig_session_id: 0,
            dir: String::new(),
            id: 0,
            name: default_name(),
            orig_bit_depth: 0,
            was_recording: false,
            length: 0,
            rate: 0,
            decoder: String::new(),
        }
    }
}

impl AudioSourceInfo {
    /// Recorded by a session, either flagged or implied by the session id
    pub fn was_recording(&self) -> bool {
        self.was_recording || self.orig_session_id != 0
    }

    /// Display name; recordings drop their timestamp suffix
    pub fn short_name(&self) -> &str {
        if !self.was_recording() {
            return &self.name;
        }
        let keep = self.name.chars().count().saturating_sub(RECORDING_SUFFIX_LEN);
        match self.name.char_indices().nth(keep) {
            Some((end, _)) => &self.name[..end],
            None => &self.name,
        }
    }

    pub fn file_name(&self) -> PathBuf {
        PathBuf::from(&self.dir).join(&self.name)
    }

    /// Duration in seconds, 0 when the rate is unknown
    pub fn duration_secs(&self) -> f64 {
        if self.rate == 0 {
            return 0.0;
        }
        self.length as f64 / self.rate as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orig_session_implies_recording() {
        let info: AudioSourceInfo =
            serde_yaml::from_str("origsheetid: 42\nname: Vocals-2024-01-01-12-00-00\n").unwrap();
        assert!(info.was_recording());
        assert_eq!(info.short_name(), "Vocals");
    }

    #[test]
    fn test_imported_keeps_full_name() {
        let info = AudioSourceInfo {
            name: "drums.wav".to_string(),
            ..AudioSourceInfo::default()
        };
        assert!(!info.was_recording());
        assert_eq!(info.short_name(), "drums.wav");
    }

    #[test]
    fn test_short_recording_name() {
        let info = AudioSourceInfo {
            name: "tiny".to_string(),
            was_recording: true,
            ..AudioSourceInfo::default()
        };
        assert_eq!(info.short_name(), "");
    }

    #[test]
    fn test_defaults_and_round_trip() {
        let info: AudioSourceInfo = serde_yaml::from_str("id: 7\n").unwrap();
        assert_eq!(info.name, "No name supplied?");
        assert_eq!(info.channel_count, 0);

        let full = AudioSourceInfo {
            channel_count: 2,
            dir: "/audio".to_string(),
            name: "take.wav".to_string(),
            length: 96000,
            rate: 48000,
            ..AudioSourceInfo::default()
        };
        let yaml = serde_yaml::to_string(&full).unwrap();
        assert!(yaml.contains("channelcount: 2"));
        let parsed: AudioSourceInfo = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, full);
        assert_eq!(parsed.file_name(), PathBuf::from("/audio/take.wav"));
        assert_eq!(parsed.duration_secs(), 2.0);
    }
}
