//! Classic capture-file (pcap) decoder
//!
//! Reads the 24-byte global header, then streams 16-byte record headers
//! plus payloads as a lazy, forward-only iterator. Truncated trailing
//! records end iteration cleanly; only a bad magic or a short global
//! header is fatal.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use chrono::{DateTime, Utc};
use log::debug;

use crate::errors::PipelineError;

/// Link type for Ethernet frames, the only one the extractor decodes.
pub const LINKTYPE_ETHERNET: u32 = 1;

/// Magic written by big-endian capture tools.
const MAGIC_BE: u32 = 0xA1B2_C3D4;
/// The same magic as seen when the file is little-endian.
const MAGIC_LE: u32 = 0xD4C3_B2A1;

/// Upper bound on a single record's captured length. Anything above
/// this is a corrupt header; iteration stops as if the file were
/// truncated.
const MAX_CAPTURED_LEN: u32 = 0x0100_0000;

/// One captured link-layer frame.
#[derive(Debug, Clone)]
pub struct PacketRecord {
    pub timestamp: DateTime<Utc>,
    pub captured_length: u32,
    pub original_length: u32,
    pub data: Vec<u8>,
    pub link_type: u32,
    /// Position of the record in the file, counting from zero.
    pub packet_id: u64,
}

/// Streaming reader over a classic capture file.
///
/// The file handle lives inside the reader, so dropping it (on any exit
/// path) releases the file.
pub struct PcapReader {
    reader: BufReader<File>,
    big_endian: bool,
    link_type: u32,
    next_packet_id: u64,
}

impl PcapReader {
    /// Open a capture file and parse its global header.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, PipelineError> {
        let file = File::open(path.as_ref())?;
        let mut reader = BufReader::new(file);

        let mut header = [0u8; 24];
        reader.read_exact(&mut header).map_err(|_| {
            PipelineError::InvalidFormat("global header too short".to_string())
        })?;

        let magic = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        let big_endian = match magic {
            MAGIC_BE => true,
            MAGIC_LE => false,
            other => {
                return Err(PipelineError::InvalidFormat(format!(
                    "bad magic number {:#010x}",
                    other
                )))
            }
        };

        let link_type = read_u32(&header, 20, big_endian);
        debug!(
            "capture header: endian={}, link_type={}",
            if big_endian { "big" } else { "little" },
            link_type
        );

        Ok(Self {
            reader,
            big_endian,
            link_type,
            next_packet_id: 0,
        })
    }

    pub fn link_type(&self) -> u32 {
        self.link_type
    }
}

impl Iterator for PcapReader {
    type Item = PacketRecord;

    fn next(&mut self) -> Option<PacketRecord> {
        let mut record_header = [0u8; 16];
        if self.reader.read_exact(&mut record_header).is_err() {
            // end of file or truncated record header
            return None;
        }

        let ts_sec = read_u32(&record_header, 0, self.big_endian);
        let ts_usec = read_u32(&record_header, 4, self.big_endian);
        let captured_length = read_u32(&record_header, 8, self.big_endian);
        let original_length = read_u32(&record_header, 12, self.big_endian);

        if captured_length > MAX_CAPTURED_LEN {
            debug!("record {} declares {} bytes, treating as corrupt tail", self.next_packet_id, captured_length);
            return None;
        }

        let mut data = vec![0u8; captured_length as usize];
        if self.reader.read_exact(&mut data).is_err() {
            // record shorter than declared
            return None;
        }

        let timestamp = DateTime::from_timestamp(i64::from(ts_sec), 0)
            .unwrap_or_default()
            + chrono::Duration::microseconds(i64::from(ts_usec));

        let packet_id = self.next_packet_id;
        self.next_packet_id += 1;

        Some(PacketRecord {
            timestamp,
            captured_length,
            original_length,
            data,
            link_type: self.link_type,
            packet_id,
        })
    }
}

fn read_u32(buf: &[u8], offset: usize, big_endian: bool) -> u32 {
    let bytes = [buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]];
    if big_endian {
        u32::from_be_bytes(bytes)
    } else {
        u32::from_le_bytes(bytes)
    }
}
