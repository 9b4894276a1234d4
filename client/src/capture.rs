//! Datagram capture files and offline replay.
//!
//! A capture is a plain sequence of bincode-encoded [`CapturedDatagram`]
//! records. Replaying feeds the server-to-client records into an offline
//! [`ClientSession`], which rebuilds the room without ticking it.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use shared::packet::Direction;
use thiserror::Error;

use crate::game::ClientSession;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("capture I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("corrupt capture record: {0}")]
    Encoding(#[from] bincode::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedDatagram {
    /// Milliseconds since the capture started.
    pub at_ms: u64,
    pub direction: Direction,
    pub bytes: Vec<u8>,
}

/// Appends datagrams to a capture stream.
pub struct CaptureWriter<W: Write> {
    out: W,
    started: Instant,
    records: usize,
}

impl CaptureWriter<BufWriter<File>> {
    pub fn create(path: &Path) -> Result<Self, CaptureError> {
        info!("capturing to {}", path.display());
        Ok(Self::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write> CaptureWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            started: Instant::now(),
            records: 0,
        }
    }

    pub fn record(&mut self, direction: Direction, bytes: &[u8], now: Instant) -> Result<(), CaptureError> {
        let at_ms = u64::try_from(now.saturating_duration_since(self.started).as_millis())
            .unwrap_or(u64::MAX);
        let record = CapturedDatagram {
            at_ms,
            direction,
            bytes: bytes.to_vec(),
        };
        bincode::serialize_into(&mut self.out, &record)?;
        self.records += 1;
        Ok(())
    }

    pub fn records(&self) -> usize {
        self.records
    }

    pub fn flush(&mut self) -> Result<(), CaptureError> {
        self.out.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// Reads records until the stream ends.
pub fn read_capture<R: Read>(reader: R) -> Result<Vec<CapturedDatagram>, CaptureError> {
    let mut reader = BufReader::new(reader);
    let mut records = Vec::new();
    loop {
        match bincode::deserialize_from::<_, CapturedDatagram>(&mut reader) {
            Ok(record) => records.push(record),
            Err(e) => match *e {
                bincode::ErrorKind::Io(ref io) if io.kind() == io::ErrorKind::UnexpectedEof => {
                    break
                }
                _ => return Err(e.into()),
            },
        }
    }
    debug!("read {} capture records", records.len());
    Ok(records)
}

pub fn load_capture(path: &Path) -> Result<Vec<CapturedDatagram>, CaptureError> {
    read_capture(File::open(path)?)
}

/// Rebuilds the client's view of a session from its inbound traffic.
///
/// Datagrams that fail to decode are skipped; retransmissions are dropped
/// by the transport's duplicate check, the same as live.
pub fn replay(records: &[CapturedDatagram]) -> ClientSession {
    let base = Instant::now();
    let mut session = ClientSession::offline("replay", base);
    let mut applied = 0usize;
    for record in records
        .iter()
        .filter(|r| r.direction == Direction::Clientbound)
    {
        let at = base + Duration::from_millis(record.at_ms);
        match session.receive(&record.bytes, at) {
            Ok(()) => applied += 1,
            Err(e) => warn!("skipping datagram at {} ms: {}", record.at_ms, e),
        }
    }
    info!("replayed {} of {} datagrams", applied, records.len());
    session
}
