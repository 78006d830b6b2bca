// SLCAN (Lawicel) serial CAN adapter
//
// The motor controller sits on CAN; we reach it through a USB adapter that
// speaks ASCII over a serial port:
//   open:     "C\r" (close), "S6\r" (500 kbit/s), "O\r" (open)
//   transmit: "t" + 3 hex id + 1 digit DLC + 2 hex per data byte + "\r"
//   receive:  same line format; "\r" / "z\r" acknowledge, BEL means refused

use serialport::{self, ClearBuffer, SerialPort};
use std::collections::VecDeque;
use std::fmt::Write as _;
use std::io::{Read, Write};
use std::time::Duration;
use tracing::{debug, trace};

use super::{Result, TransportError};
use crate::protocol::bus::{Transmit, TransmitError};
use crate::protocol::frame::{Frame, MAX_FRAME_LEN};

/// Default serial configuration for the adapter
pub const DEFAULT_BAUDRATE: u32 = 115_200;
pub const DEFAULT_TIMEOUT_MS: u64 = 50;

const CR: u8 = b'\r';
const BEL: u8 = 0x07;

// Bytes read while waiting for a setup answer before giving up
const SETUP_REPLY_LIMIT: usize = 4096;

/// Map a CAN bitrate to its SLCAN setup command
pub fn bitrate_command(bitrate: u32) -> Result<&'static str> {
    Ok(match bitrate {
        10_000 => "S0",
        20_000 => "S1",
        50_000 => "S2",
        100_000 => "S3",
        125_000 => "S4",
        250_000 => "S5",
        500_000 => "S6",
        800_000 => "S7",
        1_000_000 => "S8",
        other => return Err(TransportError::Bitrate(other)),
    })
}

/// Encode a standard-id data frame as an SLCAN line (with trailing CR)
pub fn encode_line(can_id: u16, frame: &Frame) -> String {
    let bytes = frame.as_bytes();
    let mut line = String::with_capacity(6 + 2 * bytes.len());
    line.push('t');
    let _ = write!(line, "{:03X}{}", can_id & 0x7FF, bytes.len());
    for b in bytes {
        let _ = write!(line, "{:02X}", b);
    }
    line.push('\r');
    line
}

fn hex_value(line: &[u8], range: std::ops::Range<usize>) -> Option<u32> {
    let text = std::str::from_utf8(line.get(range)?).ok()?;
    u32::from_str_radix(text, 16).ok()
}

/// A standard-id data frame as it appeared on the bus, from any node
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct CanFrame {
    pub id: u16,
    data: [u8; MAX_FRAME_LEN],
    len: usize,
}

impl CanFrame {
    pub fn data(&self) -> &[u8] {
        &self.data[..self.len]
    }
}

/// Parse one received line (without the CR).
///
/// Returns `None` for acknowledgements and for frames we do not carry
/// (extended ids, remote frames). Zero-length frames are valid CAN and are
/// returned as such; only the caller knows whether the id matters.
pub fn parse_line(line: &[u8]) -> Result<Option<CanFrame>> {
    let malformed = |reason: &str| TransportError::Malformed {
        line: String::from_utf8_lossy(line).into_owned(),
        reason: reason.to_string(),
    };

    match line.first() {
        None | Some(b'z') | Some(b'Z') => return Ok(None),
        Some(b'T') | Some(b'r') | Some(b'R') => return Ok(None),
        Some(b't') => {}
        Some(_) => return Err(malformed("unknown line type")),
    }

    let id = hex_value(line, 1..4).ok_or_else(|| malformed("bad id"))? as u16;
    let len = hex_value(line, 4..5).ok_or_else(|| malformed("bad DLC"))? as usize;
    if len > MAX_FRAME_LEN {
        return Err(malformed("DLC out of range"));
    }

    let data_end = 5 + 2 * len;
    // Some adapters append a 4-digit timestamp
    if line.len() != data_end && line.len() != data_end + 4 {
        return Err(malformed("length does not match DLC"));
    }

    let mut data = [0u8; MAX_FRAME_LEN];
    for (i, slot) in data[..len].iter_mut().enumerate() {
        let start = 5 + 2 * i;
        *slot = hex_value(line, start..start + 2).ok_or_else(|| malformed("bad data byte"))? as u8;
    }
    Ok(Some(CanFrame { id, data, len }))
}

/// Splits adapter output into lines and picks out the controller's frames
#[derive(Debug, Default)]
pub struct LineDecoder {
    partial: Vec<u8>,
    lines: VecDeque<Result<Vec<u8>>>,
}

impl LineDecoder {
    /// Feed raw bytes as read from the port. Lines may arrive in pieces.
    pub fn push(&mut self, bytes: &[u8]) {
        for &b in bytes {
            match b {
                CR => self.lines.push_back(Ok(std::mem::take(&mut self.partial))),
                BEL => {
                    self.partial.clear();
                    self.lines.push_back(Err(TransportError::Refused));
                }
                _ => self.partial.push(b),
            }
        }
    }

    /// Next complete frame from `rx_id`. Frames from other nodes are skipped.
    pub fn next_frame(&mut self, rx_id: u16) -> Result<Option<Frame>> {
        while let Some(line) = self.lines.pop_front() {
            let line = line?;
            let Some(raw) = parse_line(&line)? else {
                continue;
            };
            if raw.id != rx_id {
                trace!("Skipping frame from 0x{:03X}", raw.id);
                continue;
            }
            // The controller always sends at least the register byte
            let frame = Frame::new(raw.data()).map_err(|e| TransportError::Malformed {
                line: String::from_utf8_lossy(&line).into_owned(),
                reason: e.to_string(),
            })?;
            return Ok(Some(frame));
        }
        Ok(None)
    }
}

/// Read what `reader` has into `decoder`. `false` on timeout.
fn fill<R: Read + ?Sized>(reader: &mut R, decoder: &mut LineDecoder) -> Result<bool> {
    let mut buf = [0u8; 64];
    match reader.read(&mut buf) {
        Ok(0) => Ok(false),
        Ok(n) => {
            decoder.push(&buf[..n]);
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(false),
        Err(e) => Err(e.into()),
    }
}

fn receive<R: Read + ?Sized>(
    reader: &mut R,
    decoder: &mut LineDecoder,
    rx_id: u16,
) -> Result<Option<Frame>> {
    loop {
        if let Some(frame) = decoder.next_frame(rx_id)? {
            return Ok(Some(frame));
        }
        if !fill(reader, decoder)? {
            return Ok(None);
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Reply {
    Ack,
    Refused,
}

/// Send a setup command and wait for its answer. Frame lines still queued
/// from an earlier session are read past.
fn setup_command<P: Read + Write + ?Sized>(port: &mut P, cmd: &str) -> Result<Reply> {
    trace!("SLCAN command {:?}", cmd);
    port.write_all(cmd.as_bytes())?;
    port.write_all(&[CR])?;
    port.flush()?;

    let mut byte = [0u8; 1];
    let mut stale = 0usize;
    for _ in 0..SETUP_REPLY_LIMIT {
        match port.read(&mut byte) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => break,
            Err(e) => return Err(e.into()),
        }
        match byte[0] {
            BEL => return Ok(Reply::Refused),
            CR if stale == 0 => return Ok(Reply::Ack),
            CR => stale = 0,
            _ => stale += 1,
        }
    }
    Err(TransportError::NoReply(cmd.to_string()))
}

/// Close, set the bitrate and open the channel, checking each answer
fn bring_up<P: Read + Write + ?Sized>(port: &mut P, bitrate_cmd: &str) -> Result<()> {
    // Refused when the channel is already closed, the usual case on start
    if setup_command(port, "C")? == Reply::Refused {
        debug!("SLCAN channel was already closed");
    }
    for cmd in [bitrate_cmd, "O"] {
        if setup_command(port, cmd)? == Reply::Refused {
            debug!("SLCAN adapter refused {:?}", cmd);
            return Err(TransportError::Refused);
        }
    }
    Ok(())
}

/// Serial CAN adapter bound to one controller (one id each way)
pub struct SlcanPort {
    port: Box<dyn SerialPort>,
    tx_id: u16,
    rx_id: u16,
    decoder: LineDecoder,
}

impl SlcanPort {
    /// Open the adapter and bring the CAN channel up
    pub fn open(path: &str, baudrate: u32, bitrate: u32, tx_id: u16, rx_id: u16) -> Result<Self> {
        let setup = bitrate_command(bitrate)?;
        let mut port = serialport::new(path, baudrate)
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .open()?;
        port.clear(ClearBuffer::Input)?;

        bring_up(&mut *port, setup)?;
        debug!(
            "SLCAN channel open on {} ({} bit/s, tx 0x{:03X}, rx 0x{:03X})",
            path, bitrate, tx_id, rx_id
        );
        Ok(Self::from_port(port, tx_id, rx_id))
    }

    /// Wrap an already opened port
    pub fn from_port(port: Box<dyn SerialPort>, tx_id: u16, rx_id: u16) -> Self {
        Self {
            port,
            tx_id,
            rx_id,
            decoder: LineDecoder::default(),
        }
    }

    /// Second handle on the same port, used as the receive half
    pub fn try_clone(&self) -> Result<Self> {
        Ok(Self::from_port(self.port.try_clone()?, self.tx_id, self.rx_id))
    }

    /// Write a frame to the controller
    pub fn send(&mut self, frame: &Frame) -> Result<()> {
        let line = encode_line(self.tx_id, frame);
        trace!("SLCAN tx {}", line.trim_end());
        self.port.write_all(line.as_bytes())?;
        self.port.flush()?;
        Ok(())
    }

    /// Next frame from the controller, or `None` if nothing arrived before
    /// the port timeout. Frames from other ids are skipped.
    pub fn recv(&mut self) -> Result<Option<Frame>> {
        receive(&mut *self.port, &mut self.decoder, self.rx_id)
    }
}

impl Transmit for SlcanPort {
    fn transmit(&mut self, frame: Frame) -> std::result::Result<(), TransmitError> {
        Ok(self.send(&frame)?)
    }
}
