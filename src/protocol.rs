//! Robofocus wire protocol: 9-byte frames, checksum, backlash/temperature
//! encoding, and the async-status-byte sync rule.
//!
//! Every reply frame is 9 bytes: two ASCII command letters, six ASCII decimal
//! digits (zero-padded, 0..=999999), and a checksum byte equal to the sum
//! mod 256 of the first eight bytes. Between frames the hardware may emit
//! lone `I`/`O`/`F` bytes while the focuser is moving under manual
//! (hand-controller) control; those are not part of any frame.

use crate::error::{Result, RobofocusError};

/// Length of a Robofocus wire frame in bytes.
pub const FRAME_LEN: usize = 9;

/// Largest value a 6-digit decimal field can carry.
pub const MAX_VALUE: u32 = 999_999;

/// A decoded (or about-to-be-encoded) 9-byte Robofocus frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet {
    pub command: [u8; 2],
    pub value: u32,
}

impl Packet {
    /// Build a packet, rejecting values that don't fit in six decimal digits.
    pub fn new(command: [u8; 2], value: u32) -> Result<Self> {
        if value > MAX_VALUE {
            return Err(RobofocusError::InvalidValue(format!(
                "value {value} exceeds 6-digit field width"
            )));
        }
        Ok(Self { command, value })
    }

    /// The two-letter command prefix as a `&str`, for logging and comparison.
    pub fn command_str(&self) -> &str {
        std::str::from_utf8(&self.command).unwrap_or("??")
    }

    /// Encode this packet into its 9-byte wire representation.
    pub fn encode(&self) -> [u8; FRAME_LEN] {
        let mut frame = [0u8; FRAME_LEN];
        frame[0] = self.command[0];
        frame[1] = self.command[1];
        let digits = format!("{:06}", self.value);
        frame[2..8].copy_from_slice(digits.as_bytes());
        frame[8] = checksum(&frame[..8]);
        frame
    }

    /// Decode a 9-byte wire frame, validating the checksum and digit field.
    pub fn decode(frame: &[u8; FRAME_LEN]) -> Result<Self> {
        let expected = checksum(&frame[..8]);
        let got = frame[8];
        if expected != got {
            return Err(RobofocusError::ChecksumMismatch { expected, got });
        }
        let digits = std::str::from_utf8(&frame[2..8])
            .map_err(|_| RobofocusError::ProtocolError("non-ASCII value digits".into()))?;
        let value: u32 = digits
            .parse()
            .map_err(|_| RobofocusError::ProtocolError(format!("malformed digits {digits:?}")))?;
        Ok(Self {
            command: [frame[0], frame[1]],
            value,
        })
    }
}

/// Sum of `bytes` modulo 256, as used for the frame's ninth byte.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// An unsolicited single-byte movement event seen between frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncEvent {
    /// `I` — the focuser moved one step inward.
    Inward,
    /// `O` — the focuser moved one step outward.
    Outward,
    /// `F` — the current motion has finished.
    Finished,
}

impl AsyncEvent {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'I' => Some(AsyncEvent::Inward),
            b'O' => Some(AsyncEvent::Outward),
            b'F' => Some(AsyncEvent::Finished),
            _ => None,
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            AsyncEvent::Inward => b'I',
            AsyncEvent::Outward => b'O',
            AsyncEvent::Finished => b'F',
        }
    }
}

/// A request/response command recognized by the hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// FV — read firmware version (value is always 0).
    FirmwareVersion,
    /// FG — goto absolute position.
    GotoAbsolute(u32),
    /// FI — move inward N steps.
    MoveInward(u32),
    /// FO — move outward N steps.
    MoveOutward(u32),
    /// FT — read temperature (value is always 0).
    ReadTemperature,
    /// FB with value 0 — read backlash.
    GetBacklash,
    /// FB with an encoded direction+magnitude — set backlash.
    SetBacklash(i16),
    /// FL with value 0 — read max travel.
    GetMaxTravel,
    /// FL with a new value — set max travel.
    SetMaxTravel(u32),
    /// FS — sync the position counter without moving.
    SyncPosition(u32),
    /// FQ — halt motion (value is always 0).
    Halt,
}

impl Command {
    /// The two-letter prefix this command is sent under.
    pub fn prefix(&self) -> [u8; 2] {
        match self {
            Command::FirmwareVersion => *b"FV",
            Command::GotoAbsolute(_) => *b"FG",
            Command::MoveInward(_) => *b"FI",
            Command::MoveOutward(_) => *b"FO",
            Command::ReadTemperature => *b"FT",
            Command::GetBacklash | Command::SetBacklash(_) => *b"FB",
            Command::GetMaxTravel | Command::SetMaxTravel(_) => *b"FL",
            Command::SyncPosition(_) => *b"FS",
            Command::Halt => *b"FQ",
        }
    }

    /// The two-letter prefix of the reply this command expects.
    ///
    /// Most commands echo their own prefix back (`FV`, `FT`, `FB`, `FL`).
    /// Movement and sync commands reply with `FD` instead, the hardware's
    /// uniform "here is the position" frame regardless of which of them
    /// was sent.
    pub fn expected_reply_prefix(&self) -> [u8; 2] {
        match self {
            Command::FirmwareVersion => *b"FV",
            Command::ReadTemperature => *b"FT",
            Command::GetBacklash | Command::SetBacklash(_) => *b"FB",
            Command::GetMaxTravel | Command::SetMaxTravel(_) => *b"FL",
            Command::GotoAbsolute(_)
            | Command::MoveInward(_)
            | Command::MoveOutward(_)
            | Command::SyncPosition(_)
            | Command::Halt => *b"FD",
        }
    }

    /// The six-digit value field to send with this command.
    pub fn value(&self) -> Result<u32> {
        match self {
            Command::FirmwareVersion | Command::ReadTemperature | Command::Halt => Ok(0),
            Command::GetBacklash | Command::GetMaxTravel => Ok(0),
            Command::GotoAbsolute(v) | Command::MoveInward(v) | Command::MoveOutward(v) => {
                Ok(*v)
            }
            Command::SetMaxTravel(v) => Ok(*v),
            Command::SyncPosition(v) => {
                validate_sync_value(*v)?;
                Ok(*v)
            }
            Command::SetBacklash(signed) => encode_backlash(*signed),
        }
    }

    /// Build the request packet for this command.
    pub fn to_packet(&self) -> Result<Packet> {
        Packet::new(self.prefix(), self.value()?)
    }
}

/// Hardware quirk: `FS` values 0 and 1 are rejected because
/// the hardware echoes the current position instead of syncing to them.
/// The driver enforces a minimum usable sync value of 2.
pub fn validate_sync_value(value: u32) -> Result<()> {
    if value < 2 {
        return Err(RobofocusError::InvalidValue(format!(
            "FS sync value {value} is below the minimum usable value of 2"
        )));
    }
    Ok(())
}

/// Encode a signed backlash value (INDI convention: negative = inward,
/// positive = outward, zero = disabled) into the FB wire value: digit 1 is
/// the direction (0 = inward, 1 = outward), digits 4-6 are the magnitude.
pub fn encode_backlash(signed: i16) -> Result<u32> {
    if !(-255..=255).contains(&signed) {
        return Err(RobofocusError::InvalidValue(format!(
            "backlash {signed} out of range [-255, 255]"
        )));
    }
    let direction: u32 = if signed >= 0 { 1 } else { 0 };
    let magnitude = signed.unsigned_abs() as u32;
    Ok(direction * 100_000 + magnitude)
}

/// Decode an FB wire value back into the signed backlash representation.
pub fn decode_backlash(value: u32) -> i16 {
    let direction = (value / 100_000) % 10;
    let magnitude = (value % 1000) as i16;
    if direction == 1 {
        magnitude
    } else {
        -magnitude
    }
}

/// Decode a raw FT ADC reading into degrees Celsius: `r / 2.0 - 273.15`.
/// This conversion is hard-wired; there is no configurable slope or offset.
pub fn decode_temperature(raw: u32) -> f64 {
    raw as f64 / 2.0 - 273.15
}

/// Returns whether `byte` is the second letter of a reply two-letter prefix
/// this protocol knows how to receive (`FD`, `FV`, `FT`, `FB`, `FL`). Used to
/// disambiguate a lone `F` async-finished byte from the start of a frame
/// whose first byte also happens to be `F` (every reply starts with `F`).
fn is_reply_second_letter(byte: u8) -> bool {
    matches!(byte, b'D' | b'V' | b'T' | b'B' | b'L')
}

/// The outcome of feeding one more byte into a [`FrameSync`].
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    /// An out-of-frame async status byte was observed.
    Event(AsyncEvent),
    /// A complete, checksum-valid frame was assembled.
    Frame(Packet),
    /// A complete frame was assembled but failed checksum validation.
    FrameError(RobofocusError),
}

/// Byte-at-a-time reassembler implementing the framing rule: bytes are
/// accumulated into a 9-byte frame once a genuine frame
/// start is recognized; a lone `I`/`O`/`F` seen outside a frame is reported
/// as an [`AsyncEvent`] instead. Because every reply frame also starts with
/// `F` (the shared first letter of `FD`/`FV`/`FT`/`FB`/`FL`), a leading `F`
/// is held back ("pending") until the next byte disambiguates it: a known
/// second letter begins a frame, anything else means the `F` was a
/// standalone "finished" marker (and the following byte is reprocessed from
/// scratch).
///
/// This state machine has no I/O of its own, which makes it independently
/// testable against plain byte slices (see the proptest/unit tests below)
/// and shareable between the real serial transport and the in-process
/// simulator.
#[derive(Debug, Default)]
pub struct FrameSync {
    buf: [u8; FRAME_LEN],
    filled: usize,
    pending_f: bool,
}

impl FrameSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one more byte from the wire, returning zero, one, or two
    /// outcomes produced by it (a disambiguated pending `F` can yield both
    /// a `Finished` event and a fresh outcome from the byte that follows).
    pub fn push_byte(&mut self, byte: u8) -> Vec<FrameOutcome> {
        let mut out = Vec::with_capacity(1);

        if self.pending_f {
            self.pending_f = false;
            if is_reply_second_letter(byte) {
                self.buf[0] = b'F';
                self.buf[1] = byte;
                self.filled = 2;
                return out;
            }
            out.push(FrameOutcome::Event(AsyncEvent::Finished));
            // `byte` was never consumed into a frame; reprocess it below.
        }

        if self.filled == 0 {
            if byte == b'F' {
                self.pending_f = true;
            } else if let Some(event) = AsyncEvent::from_byte(byte) {
                out.push(FrameOutcome::Event(event));
            }
            // Any other byte outside a frame is noise: skip silently.
            return out;
        }

        self.buf[self.filled] = byte;
        self.filled += 1;
        if self.filled == FRAME_LEN {
            out.push(match Packet::decode(&self.buf) {
                Ok(packet) => FrameOutcome::Frame(packet),
                Err(e) => FrameOutcome::FrameError(e),
            });
            self.filled = 0;
        }
        out
    }
}
