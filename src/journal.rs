//! Append-only debug journal of the raw bytes seen on a connection.
//!
//! Each record is `varint type | varint length | payload`. Raw traffic is
//! recorded as received, before decryption; the shared secret is recorded
//! once the cipher is established so the capture can be decrypted offline.

use crate::protocol::{decoder, Decoder, Encoder};
use std::{
    io::{self, BufWriter, Write},
    path::Path,
};

/// Sink for journal records.
pub trait Journal: Send {
    fn append_clientbound(&mut self, data: &[u8]);
    fn append_serverbound(&mut self, data: &[u8]);
    fn set_enckey(&mut self, shared_secret: &[u8]);
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RecordType {
    Clientbound = 1,
    Serverbound = 2,
    EncryptionKey = 3,
}

impl RecordType {
    fn from_wire(value: i32) -> Option<Self> {
        match value {
            1 => Some(Self::Clientbound),
            2 => Some(Self::Serverbound),
            3 => Some(Self::EncryptionKey),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JournalRecord {
    pub record_type: RecordType,
    pub payload: Vec<u8>,
}

/// Writes journal records to `W`.
///
/// The first I/O error is logged and turns the writer into a no-op; the
/// journal is a debugging aid and never takes the connection down.
pub struct JournalWriter<W: Write> {
    writer: Option<W>,
}

impl JournalWriter<BufWriter<fs_err::File>> {
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = fs_err::File::create(path.as_ref())?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> JournalWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Some(writer),
        }
    }

    pub fn is_active(&self) -> bool {
        self.writer.is_some()
    }

    pub fn into_inner(self) -> Option<W> {
        self.writer
    }

    fn record(&mut self, record_type: RecordType, payload: &[u8]) {
        let Some(writer) = &mut self.writer else {
            return;
        };
        let mut header = Vec::with_capacity(10);
        let mut encoder = Encoder::new(&mut header);
        encoder.write_var_int(record_type as i32);
        encoder.write_var_int(payload.len().try_into().unwrap_or(i32::MAX));

        let result = writer
            .write_all(&header)
            .and_then(|()| writer.write_all(payload))
            .and_then(|()| writer.flush());
        if let Err(e) = result {
            tracing::warn!("Debug journal disabled after write failure: {e}");
            self.writer = None;
        }
    }
}

impl<W: Write + Send> Journal for JournalWriter<W> {
    fn append_clientbound(&mut self, data: &[u8]) {
        self.record(RecordType::Clientbound, data);
    }

    fn append_serverbound(&mut self, data: &[u8]) {
        self.record(RecordType::Serverbound, data);
    }

    fn set_enckey(&mut self, shared_secret: &[u8]) {
        self.record(RecordType::EncryptionKey, shared_secret);
    }
}

/// Parses a complete journal. Records of unknown type are skipped.
pub fn read_records(data: &[u8]) -> decoder::Result<Vec<JournalRecord>> {
    let mut decoder = Decoder::new(data);
    let mut records = Vec::new();
    while !decoder.is_finished() {
        let record_type = decoder.read_var_int()?;
        let length = usize::try_from(decoder.read_var_int()?)?;
        let payload = decoder.consume_slice(length)?;
        if let Some(record_type) = RecordType::from_wire(record_type) {
            records.push(JournalRecord {
                record_type,
                payload: payload.to_vec(),
            });
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_are_type_length_payload() {
        let mut journal = JournalWriter::new(Vec::new());
        journal.append_serverbound(&[1, 2, 3]);
        journal.set_enckey(&[9; 16]);
        journal.append_clientbound(&[]);

        let bytes = journal.into_inner().unwrap();
        assert_eq!(&bytes[..5], [2, 3, 1, 2, 3]);
        assert_eq!(
            read_records(&bytes).unwrap(),
            [
                JournalRecord {
                    record_type: RecordType::Serverbound,
                    payload: vec![1, 2, 3],
                },
                JournalRecord {
                    record_type: RecordType::EncryptionKey,
                    payload: vec![9; 16],
                },
                JournalRecord {
                    record_type: RecordType::Clientbound,
                    payload: vec![],
                },
            ]
        );
    }

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn write_failure_disables_the_journal() {
        let mut journal = JournalWriter::new(Broken);
        assert!(journal.is_active());
        journal.append_clientbound(&[1]);
        assert!(!journal.is_active());
        journal.append_clientbound(&[1]);
    }
}
