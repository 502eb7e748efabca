//! PLAYBACK channel: inbound audio stream from the server (spec.md §4.4).

use crate::error::{Result, SpiceError};
use crate::wire::audio_mode;

/// Public audio sample-format enum (spec.md §4.4: "only S16 is translated;
/// others map to INVALID").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    S16,
    Invalid,
}

impl AudioFormat {
    fn from_wire(mode: u16) -> Self {
        match mode {
            audio_mode::S16 => AudioFormat::S16,
            _ => AudioFormat::Invalid,
        }
    }
}

pub struct PlaybackState {
    pub has_volume_callback: bool,
    pub started: bool,
}

impl PlaybackState {
    pub fn new(has_volume_callback: bool) -> Self {
        Self {
            has_volume_callback,
            started: false,
        }
    }
}

/// `SpiceMsgPlaybackStart` (spec.md §4.4): channel count, sample rate,
/// and format.
pub struct StartInfo {
    pub channels: u8,
    pub frequency: u32,
    pub format: AudioFormat,
}

pub fn parse_start(payload: &[u8]) -> Result<StartInfo> {
    if payload.len() < 10 {
        return Err(SpiceError::Protocol("short PLAYBACK_START message".into()));
    }
    let channels = payload[0];
    let frequency = u32::from_le_bytes(payload[4..8].try_into().unwrap());
    let format = AudioFormat::from_wire(u16::from_le_bytes(payload[8..10].try_into().unwrap()));
    Ok(StartInfo {
        channels,
        frequency,
        format,
    })
}

/// `SpiceMsgPlaybackPacket`'s data, after stripping the leading 4-byte
/// timestamp (spec.md §4.4: "pass pointer and length (header-size minus
/// the small `time` prefix) to the data callback").
pub fn parse_data(payload: &[u8]) -> Result<&[u8]> {
    payload
        .get(4..)
        .ok_or_else(|| SpiceError::Protocol("short PLAYBACK_DATA message".into()))
}

/// `SpiceMsgAudioVolume`: a count-prefixed list of per-channel 16-bit
/// volumes.
pub fn parse_volume(payload: &[u8]) -> Result<Vec<u16>> {
    if payload.is_empty() {
        return Err(SpiceError::Protocol("short *_VOLUME message".into()));
    }
    let count = payload[0] as usize;
    let body = payload
        .get(1..1 + count * 2)
        .ok_or_else(|| SpiceError::Protocol("*_VOLUME message shorter than declared count".into()))?;
    Ok(body
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect())
}

pub fn parse_mute(payload: &[u8]) -> Result<bool> {
    payload
        .first()
        .map(|&b| b != 0)
        .ok_or_else(|| SpiceError::Protocol("short *_MUTE message".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_translates_non_s16_to_invalid() {
        let mut payload = vec![0u8; 10];
        payload[0] = 2; // channels
        payload[4..8].copy_from_slice(&44100u32.to_le_bytes());
        payload[8..10].copy_from_slice(&99u16.to_le_bytes());
        let info = parse_start(&payload).unwrap();
        assert_eq!(info.channels, 2);
        assert_eq!(info.frequency, 44100);
        assert_eq!(info.format, AudioFormat::Invalid);
    }

    #[test]
    fn data_strips_time_prefix() {
        let mut payload = 0u32.to_le_bytes().to_vec();
        payload.extend_from_slice(&[1, 2, 3, 4]);
        assert_eq!(parse_data(&payload).unwrap(), &[1, 2, 3, 4]);
    }

    #[test]
    fn volume_parses_per_channel_list() {
        let payload = [2u8, 0x00, 0x10, 0x00, 0x20];
        let vols = parse_volume(&payload).unwrap();
        assert_eq!(vols, vec![0x1000, 0x2000]);
    }
}
