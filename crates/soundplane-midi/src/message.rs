//! MIDI channel messages and their byte encoding
//!
//! Channels are zero-based here (0-15); configs and zones use 1-16.

/// Centre of the 14-bit pitch bend range
pub const PITCH_BEND_CENTER: u16 = 8192;

/// Outgoing channel voice message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiEvent {
    NoteOff { channel: u8, note: u8, velocity: u8 },
    NoteOn { channel: u8, note: u8, velocity: u8 },
    PolyPressure { channel: u8, note: u8, value: u8 },
    ControlChange { channel: u8, cc: u8, value: u8 },
    ChannelPressure { channel: u8, value: u8 },
    /// 14-bit value, 8192 = centre
    PitchBend { channel: u8, value: u16 },
}

impl MidiEvent {
    /// Encode into `out`
    ///
    /// Status: 0x8n note off, 0x9n note on, 0xAn poly pressure, 0xBn control
    /// change, 0xDn channel pressure, 0xEn pitch bend (LSB first).
    pub fn encode(&self, out: &mut Vec<u8>) {
        match *self {
            MidiEvent::NoteOff { channel, note, velocity } => {
                out.extend_from_slice(&[0x80 | ch(channel), note & 0x7F, velocity & 0x7F])
            }
            MidiEvent::NoteOn { channel, note, velocity } => {
                out.extend_from_slice(&[0x90 | ch(channel), note & 0x7F, velocity & 0x7F])
            }
            MidiEvent::PolyPressure { channel, note, value } => {
                out.extend_from_slice(&[0xA0 | ch(channel), note & 0x7F, value & 0x7F])
            }
            MidiEvent::ControlChange { channel, cc, value } => {
                out.extend_from_slice(&[0xB0 | ch(channel), cc & 0x7F, value & 0x7F])
            }
            MidiEvent::ChannelPressure { channel, value } => {
                out.extend_from_slice(&[0xD0 | ch(channel), value & 0x7F])
            }
            MidiEvent::PitchBend { channel, value } => {
                let value = value.min(0x3FFF);
                out.extend_from_slice(&[
                    0xE0 | ch(channel),
                    (value & 0x7F) as u8,
                    (value >> 7) as u8,
                ])
            }
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(3);
        self.encode(&mut out);
        out
    }

    /// Decode one message; note on with velocity 0 is a note off
    pub fn parse(data: &[u8]) -> Option<Self> {
        let (&status, rest) = data.split_first()?;
        let channel = status & 0x0F;
        let event = match (status & 0xF0, rest) {
            (0x80, [note, velocity, ..]) => MidiEvent::NoteOff {
                channel,
                note: *note,
                velocity: *velocity,
            },
            (0x90, [note, 0, ..]) => MidiEvent::NoteOff {
                channel,
                note: *note,
                velocity: 0,
            },
            (0x90, [note, velocity, ..]) => MidiEvent::NoteOn {
                channel,
                note: *note,
                velocity: *velocity,
            },
            (0xA0, [note, value, ..]) => MidiEvent::PolyPressure {
                channel,
                note: *note,
                value: *value,
            },
            (0xB0, [cc, value, ..]) => MidiEvent::ControlChange {
                channel,
                cc: *cc,
                value: *value,
            },
            (0xD0, [value, ..]) => MidiEvent::ChannelPressure {
                channel,
                value: *value,
            },
            (0xE0, [lsb, msb, ..]) => MidiEvent::PitchBend {
                channel,
                value: (*lsb as u16 & 0x7F) | ((*msb as u16 & 0x7F) << 7),
            },
            _ => return None,
        };
        Some(event)
    }

    pub fn channel(&self) -> u8 {
        match *self {
            MidiEvent::NoteOff { channel, .. }
            | MidiEvent::NoteOn { channel, .. }
            | MidiEvent::PolyPressure { channel, .. }
            | MidiEvent::ControlChange { channel, .. }
            | MidiEvent::ChannelPressure { channel, .. }
            | MidiEvent::PitchBend { channel, .. } => channel,
        }
    }
}

fn ch(channel: u8) -> u8 {
    channel & 0x0F
}

/// Map 0..1 onto a 7-bit value
pub fn unit_to_7bit(v: f32) -> u8 {
    if v.is_nan() {
        return 0;
    }
    (v.clamp(0.0, 1.0) * 127.0).round() as u8
}

/// Pitch bend for an offset in semitones, given the receiver's bend range
pub fn pitch_bend_value(semitones: f32, range: u8) -> u16 {
    if !semitones.is_finite() || range == 0 {
        return PITCH_BEND_CENTER;
    }
    let normalized = (semitones / range as f32).clamp(-1.0, 1.0);
    let value = PITCH_BEND_CENTER as f32 + normalized * 8191.0;
    value.round().clamp(0.0, 16383.0) as u16
}

/// Registered parameter number write: select, data entry MSB, null RPN
pub fn rpn(channel: u8, parameter: u16, value: u8) -> [MidiEvent; 5] {
    let cc = |cc, value| MidiEvent::ControlChange { channel, cc, value };
    [
        cc(101, (parameter >> 7) as u8 & 0x7F),
        cc(100, parameter as u8 & 0x7F),
        cc(6, value & 0x7F),
        cc(101, 0x7F),
        cc(100, 0x7F),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_note_and_bend() {
        let on = MidiEvent::NoteOn { channel: 1, note: 60, velocity: 100 };
        assert_eq!(on.to_bytes(), vec![0x91, 60, 100]);

        let bend = MidiEvent::PitchBend { channel: 0, value: PITCH_BEND_CENTER };
        assert_eq!(bend.to_bytes(), vec![0xE0, 0x00, 0x40]);

        let pressure = MidiEvent::ChannelPressure { channel: 15, value: 200 };
        assert_eq!(pressure.to_bytes(), vec![0xDF, 200 & 0x7F]);
    }

    #[test]
    fn test_parse_encoded_messages() {
        let events = [
            MidiEvent::PolyPressure { channel: 3, note: 40, value: 9 },
            MidiEvent::ControlChange { channel: 2, cc: 74, value: 64 },
            MidiEvent::PitchBend { channel: 4, value: 12000 },
        ];
        for event in events {
            assert_eq!(MidiEvent::parse(&event.to_bytes()), Some(event));
        }
        assert_eq!(
            MidiEvent::parse(&[0x90, 60, 0]),
            Some(MidiEvent::NoteOff { channel: 0, note: 60, velocity: 0 })
        );
        assert_eq!(MidiEvent::parse(&[0x90, 60]), None);
        assert_eq!(MidiEvent::parse(&[]), None);
    }

    #[test]
    fn test_pitch_bend_scaling() {
        assert_eq!(pitch_bend_value(0.0, 48), PITCH_BEND_CENTER);
        assert_eq!(pitch_bend_value(48.0, 48), 16383);
        assert_eq!(pitch_bend_value(-96.0, 48), 1);
        assert!(pitch_bend_value(0.5, 2) > PITCH_BEND_CENTER);
        assert_eq!(pitch_bend_value(f32::NAN, 2), PITCH_BEND_CENTER);
    }

    #[test]
    fn test_rpn_sequence() {
        let bytes: Vec<u8> = rpn(1, 0, 48).iter().flat_map(|e| e.to_bytes()).collect();
        assert_eq!(
            bytes,
            vec![0xB1, 101, 0, 0xB1, 100, 0, 0xB1, 6, 48, 0xB1, 101, 127, 0xB1, 100, 127]
        );
    }
}
