//! Length-prefixed framing with optional zlib compression.
//!
//! Uncompressed frame: `VarInt length | body`.
//! Compressed frame: `VarInt length | VarInt data_length | payload`, where
//! `data_length == 0` means `payload` is the body stored as-is (it was below
//! the threshold) and otherwise `payload` is the zlib stream of a body
//! of exactly `data_length` bytes.
//!
//! Frames handed out by this module are always plain bodies
//! (`VarInt packet_id | packet data`).

use super::{encoder::var_int_size, DecodeError, Decoder, Encoder, BUFFER_LIMIT};
use flate2::Compression;
use std::io::{self, Read, Write};

/// Most proxied frames are small and latency matters more than ratio.
const COMPRESSION_LEVEL: Compression = Compression::fast();

/// Body size in bytes at or above which a frame is compressed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CompressionThreshold(usize);

impl CompressionThreshold {
    pub fn new(threshold: usize) -> Self {
        Self(threshold)
    }

    /// Interprets the value carried by a SetCompression packet.
    /// Negative values disable compression.
    pub fn from_wire(threshold: i32) -> Option<Self> {
        usize::try_from(threshold).ok().map(Self)
    }

    pub fn get(self) -> usize {
        self.0
    }
}

/// A malformed or truncated frame that waiting for more bytes cannot fix.
///
/// Fatal for the connection it occurs on.
#[derive(Debug, thiserror::Error)]
pub enum StreamViolation {
    #[error("malformed frame length prefix")]
    MalformedLength(#[source] DecodeError),
    #[error("negative frame length {0}")]
    NegativeLength(i32),
    #[error("frame length of {0} exceeds maximum allowed")]
    FrameTooLarge(usize),
    #[error("malformed compressed frame header")]
    MalformedCompressionHeader(#[source] DecodeError),
    #[error("failed to inflate compressed frame")]
    Inflate(#[source] io::Error),
    #[error("compressed frame declared {declared} bytes but inflated to {actual}")]
    DecompressedLengthMismatch { declared: usize, actual: usize },
    #[error("failed to decode {context} packet")]
    Packet {
        context: String,
        #[source]
        source: DecodeError,
    },
    #[error("session was already terminated by an earlier violation")]
    Terminated,
}

/// Extracts complete frames from the front of `buffer`.
///
/// Returns the undecoded remainder (a partial frame, or whatever follows
/// the `limit`-th frame) together with the decoded frame bodies, in order.
/// The remainder must be prepended to the next call's input.
pub fn decode(
    buffer: &[u8],
    compression: Option<CompressionThreshold>,
    limit: Option<usize>,
) -> Result<(&[u8], Vec<Vec<u8>>), StreamViolation> {
    let mut remaining = buffer;
    let mut frames = Vec::new();
    while limit.map_or(true, |limit| frames.len() < limit) {
        match decode_one(remaining, compression)? {
            Some((body, consumed)) => {
                frames.push(body);
                remaining = &remaining[consumed..];
            }
            None => break,
        }
    }
    Ok((remaining, frames))
}

/// Decodes a single frame. `Ok(None)` means more bytes are needed.
fn decode_one(
    buffer: &[u8],
    compression: Option<CompressionThreshold>,
) -> Result<Option<(Vec<u8>, usize)>, StreamViolation> {
    let mut decoder = Decoder::new(buffer);
    let (length, prefix_size) = match decoder.read_var_int_with_size() {
        Ok(x) => x,
        Err(DecodeError::EndOfStream(..)) => return Ok(None),
        Err(e) => return Err(StreamViolation::MalformedLength(e)),
    };
    let length = usize::try_from(length).map_err(|_| StreamViolation::NegativeLength(length))?;
    if length > BUFFER_LIMIT {
        return Err(StreamViolation::FrameTooLarge(length));
    }

    let Ok(contents) = decoder.consume_slice(length) else {
        return Ok(None);
    };

    let body = match compression {
        Some(_) => inflate(contents)?,
        None => contents.to_vec(),
    };
    Ok(Some((body, prefix_size + length)))
}

fn inflate(contents: &[u8]) -> Result<Vec<u8>, StreamViolation> {
    let mut decoder = Decoder::new(contents);
    let data_length = decoder
        .read_var_int()
        .map_err(StreamViolation::MalformedCompressionHeader)?;
    let data_length = usize::try_from(data_length)
        .map_err(|e| StreamViolation::MalformedCompressionHeader(e.into()))?;

    if data_length == 0 {
        return Ok(decoder.buffer().to_vec());
    }
    if data_length > BUFFER_LIMIT {
        return Err(StreamViolation::FrameTooLarge(data_length));
    }

    let mut body = Vec::with_capacity(data_length);
    flate2::read::ZlibDecoder::new(decoder.buffer())
        .take(data_length as u64 + 1)
        .read_to_end(&mut body)
        .map_err(StreamViolation::Inflate)?;
    if body.len() != data_length {
        return Err(StreamViolation::DecompressedLengthMismatch {
            declared: data_length,
            actual: body.len(),
        });
    }
    Ok(body)
}

/// Frames a plain packet body for the wire.
pub fn encode(body: &[u8], compression: Option<CompressionThreshold>) -> Vec<u8> {
    let mut frame = Vec::with_capacity(body.len() + 8);
    let mut encoder = Encoder::new(&mut frame);
    let body_length = i32::try_from(body.len()).unwrap_or(i32::MAX);

    match compression {
        Some(threshold) if body.len() >= threshold.get() => {
            let mut zlib = flate2::write::ZlibEncoder::new(Vec::new(), COMPRESSION_LEVEL);
            zlib.write_all(body).expect("infallible write");
            let compressed = zlib.finish().expect("infallible write");
            let compressed_length = i32::try_from(compressed.len()).unwrap_or(i32::MAX);
            encoder.write_var_int(var_int_size(body_length) as i32 + compressed_length);
            encoder.write_var_int(body_length);
            encoder.write_slice(&compressed);
        }
        Some(_) => {
            // below the threshold: data_length 0, body stored as-is
            encoder.write_var_int(body_length + 1);
            encoder.write_var_int(0);
            encoder.write_slice(body);
        }
        None => {
            encoder.write_var_int(body_length);
            encoder.write_slice(body);
        }
    }
    frame
}

/// Per-direction accumulator of inbound bytes that have not
/// yet formed a complete frame.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    read_buffer: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends (already decrypted) bytes to the accumulator.
    pub fn give_data(&mut self, data: &[u8]) {
        self.read_buffer.extend_from_slice(data);
    }

    /// Decodes up to `limit` frames, keeping any remainder buffered.
    ///
    /// On error the buffer contents are unspecified; the stream is dead.
    pub fn decode_frames(
        &mut self,
        compression: Option<CompressionThreshold>,
        limit: Option<usize>,
    ) -> Result<Vec<Vec<u8>>, StreamViolation> {
        let (remaining, frames) = decode(&self.read_buffer, compression, limit)?;
        let consumed = self.read_buffer.len() - remaining.len();
        self.read_buffer.drain(..consumed);
        Ok(frames)
    }

    pub fn buffered(&self) -> &[u8] {
        &self.read_buffer
    }

    /// Buffered bytes, for in-place transforms (decrypting bytes that
    /// turned out to be ciphertext).
    pub fn buffered_mut(&mut self) -> &mut [u8] {
        &mut self.read_buffer
    }

    /// Removes and returns everything buffered.
    pub fn take_buffered(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.read_buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn threshold(t: usize) -> Option<CompressionThreshold> {
        Some(CompressionThreshold::new(t))
    }

    #[test]
    fn threshold_boundary() {
        let t = 64;
        let below = vec![0x2a; t - 1];
        let at = vec![0x2a; t];

        let below_frame = encode(&below, threshold(t));
        // length, data_length = 0, raw body
        assert_eq!(below_frame[1], 0x00);
        assert_eq!(&below_frame[2..], &below[..]);

        let at_frame = encode(&at, threshold(t));
        let mut decoder = Decoder::new(&at_frame);
        decoder.read_var_int().unwrap();
        assert_eq!(decoder.read_var_int().unwrap(), t as i32);
        assert_ne!(decoder.buffer(), &at[..]);

        for (body, frame) in [(below, below_frame), (at, at_frame)] {
            let (remaining, frames) = decode(&frame, threshold(t), None).unwrap();
            assert!(remaining.is_empty());
            assert_eq!(frames, vec![body]);
        }
    }

    #[test]
    fn partial_length_prefix_is_kept() {
        let body = vec![7u8; 300];
        let frame = encode(&body, None);
        // 300 needs a two-byte VarInt; feed only its first byte
        let (remaining, frames) = decode(&frame[..1], None, None).unwrap();
        assert!(frames.is_empty());
        assert_eq!(remaining, &frame[..1]);

        let (remaining, frames) = decode(&frame[..frame.len() - 1], None, None).unwrap();
        assert!(frames.is_empty());
        assert_eq!(remaining.len(), frame.len() - 1);
    }

    #[test]
    fn limit_stops_early() {
        let mut stream = encode(&[0x01, 0xaa], None);
        stream.extend(encode(&[0x02, 0xbb], None));
        let (remaining, frames) = decode(&stream, None, Some(1)).unwrap();
        assert_eq!(frames, vec![vec![0x01, 0xaa]]);
        assert_eq!(remaining, &stream[3..]);
    }

    #[test]
    fn overlong_length_prefix_is_a_violation() {
        let bytes = [0xff, 0xff, 0xff, 0xff, 0xff, 0x01];
        assert!(matches!(
            decode(&bytes, None, None),
            Err(StreamViolation::MalformedLength(DecodeError::VarIntTooLong))
        ));
    }

    #[test]
    fn negative_length_is_a_violation() {
        let mut bytes = Vec::new();
        Encoder::new(&mut bytes).write_var_int(-5);
        assert!(matches!(
            decode(&bytes, None, None),
            Err(StreamViolation::NegativeLength(-5))
        ));
    }

    #[test]
    fn oversized_frame_is_a_violation() {
        let mut bytes = Vec::new();
        Encoder::new(&mut bytes).write_var_int(BUFFER_LIMIT as i32 + 1);
        assert!(matches!(
            decode(&bytes, None, None),
            Err(StreamViolation::FrameTooLarge(_))
        ));
    }

    #[test]
    fn short_inflation_is_a_violation() {
        let body = vec![0x11; 200];
        let mut zlib = flate2::write::ZlibEncoder::new(Vec::new(), COMPRESSION_LEVEL);
        zlib.write_all(&body).unwrap();
        let compressed = zlib.finish().unwrap();

        // claim one more byte than the zlib stream actually holds
        let mut inner = Vec::new();
        let mut encoder = Encoder::new(&mut inner);
        encoder.write_var_int(201);
        encoder.write_slice(&compressed);
        let mut frame = Vec::new();
        let mut encoder = Encoder::new(&mut frame);
        encoder.write_var_int(inner.len() as i32);
        encoder.write_slice(&inner);

        assert!(matches!(
            decode(&frame, threshold(16), None),
            Err(StreamViolation::DecompressedLengthMismatch {
                declared: 201,
                actual: 200
            })
        ));
    }

    #[test]
    fn garbage_zlib_is_a_violation() {
        let mut frame = Vec::new();
        let mut encoder = Encoder::new(&mut frame);
        encoder.write_var_int(5);
        encoder.write_var_int(100);
        encoder.write_slice(&[0xde, 0xad, 0xbe, 0xef]);
        assert!(decode(&frame, threshold(16), None).is_err());
    }

    #[test]
    fn frame_buffer_carries_remainder() {
        let first = encode(&[0x00, 1, 2, 3], None);
        let second = encode(&[0x01, 4, 5], None);
        let mut stream = first.clone();
        stream.extend(&second);

        let mut buffer = FrameBuffer::new();
        buffer.give_data(&stream[..first.len() + 1]);
        assert_eq!(
            buffer.decode_frames(None, None).unwrap(),
            vec![vec![0x00, 1, 2, 3]]
        );
        assert_eq!(buffer.buffered(), &second[..1]);

        buffer.give_data(&stream[first.len() + 1..]);
        assert_eq!(
            buffer.decode_frames(None, None).unwrap(),
            vec![vec![0x01, 4, 5]]
        );
        assert!(buffer.buffered().is_empty());
    }

    fn bodies() -> impl Strategy<Value = Vec<Vec<u8>>> {
        prop::collection::vec(prop::collection::vec(any::<u8>(), 1..400), 1..12)
    }

    fn compression() -> impl Strategy<Value = Option<CompressionThreshold>> {
        prop_oneof![Just(None), (0usize..300).prop_map(|t| threshold(t))]
    }

    proptest! {
        #[test]
        fn framing_round_trip(body in prop::collection::vec(any::<u8>(), 1..2000), compression in compression()) {
            let frame = encode(&body, compression);
            let (remaining, frames) = decode(&frame, compression, None).unwrap();
            prop_assert!(remaining.is_empty());
            prop_assert_eq!(frames, vec![body]);
        }

        #[test]
        fn chunking_does_not_change_frames(
            bodies in bodies(),
            compression in compression(),
            cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..16),
        ) {
            let stream: Vec<u8> = bodies.iter().flat_map(|b| encode(b, compression)).collect();

            let mut cut_points: Vec<usize> = cuts.iter().map(|i| i.index(stream.len())).collect();
            cut_points.push(0);
            cut_points.push(stream.len());
            cut_points.sort_unstable();
            cut_points.dedup();

            let mut buffer = FrameBuffer::new();
            let mut frames = Vec::new();
            for window in cut_points.windows(2) {
                buffer.give_data(&stream[window[0]..window[1]]);
                frames.extend(buffer.decode_frames(compression, None).unwrap());
            }

            let (remaining, whole) = decode(&stream, compression, None).unwrap();
            prop_assert!(remaining.is_empty());
            prop_assert!(buffer.buffered().is_empty());
            prop_assert_eq!(&frames, &whole);
            prop_assert_eq!(frames, bodies);
        }
    }
}
