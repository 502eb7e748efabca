//! RECORD channel: start/stop/volume/mute symmetric to playback, plus the
//! outbound `writeAudio` path (spec.md §4.4).

use binrw::BinWrite;

use crate::channel::playback::StartInfo;
use crate::error::Result;
use crate::wire::record_msgc;

pub struct RecordState {
    pub has_volume_callback: bool,
    pub started: bool,
}

impl RecordState {
    pub fn new(has_volume_callback: bool) -> Self {
        Self {
            has_volume_callback,
            started: false,
        }
    }
}

pub fn parse_start(payload: &[u8]) -> Result<StartInfo> {
    crate::channel::playback::parse_start(payload)
}

pub fn parse_volume(payload: &[u8]) -> Result<Vec<u16>> {
    crate::channel::playback::parse_volume(payload)
}

pub fn parse_mute(payload: &[u8]) -> Result<bool> {
    crate::channel::playback::parse_mute(payload)
}

/// `SpiceMsgcRecordPacket`: a leading timestamp followed by raw audio
/// bytes (spec.md §4.4: "emits a record-data header plus the audio
/// bytes").
#[derive(Debug, Clone, Copy, BinWrite)]
#[brw(little)]
struct RecordDataHeader {
    time: u32,
}

pub fn build_write_audio(data: &[u8], time: u32) -> (u16, Vec<u8>) {
    let mut cursor = std::io::Cursor::new(Vec::with_capacity(4 + data.len()));
    RecordDataHeader { time }
        .write(&mut cursor)
        .expect("fixed-size struct always serialises");
    let mut payload = cursor.into_inner();
    payload.extend_from_slice(data);
    (record_msgc::DATA, payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_audio_prefixes_timestamp() {
        let (msg_type, payload) = build_write_audio(&[1, 2, 3], 42);
        assert_eq!(msg_type, record_msgc::DATA);
        assert_eq!(&payload[0..4], &42u32.to_le_bytes());
        assert_eq!(&payload[4..], &[1, 2, 3]);
    }
}
