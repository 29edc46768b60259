//! Merkle Integrity Content Encoding (`mi-sha256`).
//!
//! ```text
//! +-------------------+------------------------------------------+
//! | u64 record_size   | big-endian                               |
//! +-------------------+------------------------------------------+
//! | record 0          | record_size bytes                        |
//! +-------------------+------------------------------------------+
//! | proof 1 (32B)     | SHA-256 chaining value of record 1..     |
//! | record 1          | record_size bytes                        |
//! +-------------------+------------------------------------------+
//! | ...               | last record may be shorter               |
//! +-------------------+------------------------------------------+
//! ```
//!
//! The proof of the last record is `SHA256(record || 0x00)`; every earlier
//! proof is `SHA256(record || next_proof || 0x01)`. Proof 0 is carried out of
//! band in the `digest` header.

use crate::MiceError;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bytes::{BufMut, Bytes, BytesMut};
use sha2::{Digest, Sha256};
use std::io::{self, Read};
use tracing::trace;

/// Record size used when a caller does not pick one
pub const DEFAULT_RECORD_SIZE: usize = 4096;

/// Largest record size a reader accepts by default
pub const MAX_RECORD_SIZE: u64 = 16384;

/// Prefix of the digest header value
pub const DIGEST_PREFIX: &str = "mi-sha256=";

/// Size of a SHA-256 proof
pub const PROOF_SIZE: usize = 32;

type Proof = [u8; PROOF_SIZE];

fn last_proof(record: &[u8]) -> Proof {
    let mut hasher = Sha256::new();
    hasher.update(record);
    hasher.update([0x00]);
    hasher.finalize().into()
}

fn chained_proof(record: &[u8], next: &Proof) -> Proof {
    let mut hasher = Sha256::new();
    hasher.update(record);
    hasher.update(next);
    hasher.update([0x01]);
    hasher.finalize().into()
}

/// Encode `payload` with records of `record_size` bytes.
///
/// Returns the wire bytes and the digest header value.
pub fn encode(payload: &[u8], record_size: usize) -> Result<(Bytes, String), MiceError> {
    if record_size == 0 {
        return Err(MiceError::ZeroRecordSize);
    }

    let records: Vec<&[u8]> = if payload.is_empty() {
        vec![payload]
    } else {
        payload.chunks(record_size).collect()
    };

    let mut proofs = vec![[0u8; PROOF_SIZE]; records.len()];
    let last = records.len() - 1;
    proofs[last] = last_proof(records[last]);
    for i in (0..last).rev() {
        proofs[i] = chained_proof(records[i], &proofs[i + 1]);
    }

    let mut buf = BytesMut::with_capacity(8 + payload.len() + last * PROOF_SIZE);
    buf.put_u64(record_size as u64);
    for (i, record) in records.iter().enumerate() {
        if i > 0 {
            buf.put_slice(&proofs[i]);
        }
        buf.put_slice(record);
    }

    Ok((buf.freeze(), format_digest(&proofs[0])))
}

/// Format a top-level proof as a digest header value
pub fn format_digest(proof: &[u8]) -> String {
    format!("{DIGEST_PREFIX}{}", URL_SAFE_NO_PAD.encode(proof))
}

/// Extract the top-level proof from a digest header value.
///
/// The header may list several digests separated by commas; the first
/// `mi-sha256` entry is used.
pub fn parse_digest(value: &str) -> Result<Proof, MiceError> {
    let encoded = value
        .split(',')
        .map(str::trim)
        .find_map(|item| item.strip_prefix(DIGEST_PREFIX))
        .ok_or_else(|| MiceError::Digest(format!("no {DIGEST_PREFIX} entry in {value:?}")))?;
    let raw = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|e| MiceError::Digest(e.to_string()))?;
    raw.try_into()
        .map_err(|raw: Vec<u8>| MiceError::Digest(format!("proof is {} bytes", raw.len())))
}

/// Pull-based verifying decoder.
///
/// Every record is checked against the running proof before any of its bytes
/// are handed out.
pub struct MiceReader<R> {
    inner: R,
    record_size: usize,
    expected: Proof,
    record_no: u64,
    pending: Bytes,
    done: bool,
}

impl<R: Read> MiceReader<R> {
    /// Start decoding `inner`, whose top-level proof must be `expected`
    pub fn new(mut inner: R, expected: Proof, max_record_size: u64) -> Result<Self, MiceError> {
        let mut size = [0u8; 8];
        if read_full(&mut inner, &mut size)? != size.len() {
            return Err(MiceError::Truncated);
        }
        let size = u64::from_be_bytes(size);
        if size == 0 {
            return Err(MiceError::ZeroRecordSize);
        }
        if size > max_record_size {
            return Err(MiceError::RecordSize {
                size,
                max: max_record_size,
            });
        }
        let record_size = usize::try_from(size).map_err(|_| MiceError::RecordSize {
            size,
            max: max_record_size,
        })?;

        Ok(Self {
            inner,
            record_size,
            expected,
            record_no: 0,
            pending: Bytes::new(),
            done: false,
        })
    }

    /// Start decoding with the proof taken from a digest header value
    pub fn from_digest_header(
        inner: R,
        digest: &str,
        max_record_size: u64,
    ) -> Result<Self, MiceError> {
        let expected = parse_digest(digest)?;
        Self::new(inner, expected, max_record_size)
    }

    /// Record size declared by the stream
    pub fn record_size(&self) -> usize {
        self.record_size
    }

    /// Read and verify the next record. Returns `None` after the last one.
    pub fn read_record(&mut self) -> Result<Option<Bytes>, MiceError> {
        if self.done {
            return Ok(None);
        }

        // A full record followed by a proof means more records follow.
        let mut buf = vec![0u8; self.record_size + PROOF_SIZE];
        let n = read_full(&mut self.inner, &mut buf)?;

        let record = if n == buf.len() {
            let mut next = [0u8; PROOF_SIZE];
            next.copy_from_slice(&buf[self.record_size..]);
            buf.truncate(self.record_size);
            if chained_proof(&buf, &next) != self.expected {
                return Err(MiceError::Integrity(self.record_no));
            }
            self.expected = next;
            buf
        } else if n <= self.record_size {
            buf.truncate(n);
            if last_proof(&buf) != self.expected {
                return Err(MiceError::Integrity(self.record_no));
            }
            self.done = true;
            buf
        } else {
            return Err(MiceError::Truncated);
        };

        trace!(
            record = self.record_no,
            len = record.len(),
            last = self.done,
            "verified mice record"
        );
        self.record_no += 1;
        Ok(Some(Bytes::from(record)))
    }

    /// Verify and collect the whole payload
    pub fn decode_all(mut self) -> Result<Bytes, MiceError> {
        let mut out = BytesMut::new();
        while let Some(record) = self.read_record()? {
            out.put_slice(&record);
        }
        Ok(out.freeze())
    }
}

impl<R: Read> Read for MiceReader<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        while self.pending.is_empty() {
            match self.read_record() {
                Ok(Some(record)) => self.pending = record,
                Ok(None) => return Ok(0),
                Err(MiceError::Io(e)) => return Err(e),
                Err(e) => return Err(io::Error::new(io::ErrorKind::InvalidData, e)),
            }
        }
        let n = out.len().min(self.pending.len());
        out[..n].copy_from_slice(&self.pending.split_to(n));
        Ok(n)
    }
}

/// Verify MICE-encoded `wire` bytes against a digest header value
pub fn decode(wire: &[u8], digest: &str, max_record_size: u64) -> Result<Bytes, MiceError> {
    MiceReader::from_digest_header(wire, digest, max_record_size)?.decode_all()
}

/// Fill `buf` from `reader`, stopping early only at end of input.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize, MiceError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}
