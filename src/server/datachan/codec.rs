//! The MODE/TYPE/STRU transform stack applied to every byte that crosses a data connection.
//!
//! Transforms run outbound in `TYPE -> STRU -> MODE` order (`TYPE` normalizes line endings or
//! code page, `STRU` inserts record markers where the wire has no native framing for them,
//! `MODE` is the outermost layer and turns the result into the actual bytes on the wire) and
//! are unwound in the mirror order on decode, so `MODE` always sees (and produces) exactly what
//! travels over the socket.

use crate::server::controlchan::command::{ModeParam, StruParam, TypeParam};
use bytes::{BufMut, Bytes, BytesMut};

/// A chunk of payload moving through the pipeline, tagged with the framing markers RFC 959
/// attaches to block boundaries (end-of-record, end-of-file).
#[derive(Debug, Clone)]
pub struct DataBlock {
    /// The payload bytes, already TYPE-translated.
    pub data: Bytes,
    /// Whether this block ends a logical record.
    pub eor: bool,
    /// Whether this block is the last one of the transfer.
    pub eof: bool,
}

impl DataBlock {
    /// A plain block carrying no record/EOF markers.
    pub fn plain(data: Bytes) -> Self {
        DataBlock { data, eor: false, eof: false }
    }

    /// The terminating block of a transfer: empty payload, EOF set. A no-op in STREAM+FILE
    /// (encodes to zero bytes); in BLOCK/COMPRESSED this is the frame that carries the EOF
    /// descriptor bit, without which the final block of a transfer would be indistinguishable
    /// from a mid-stream one.
    pub fn eof() -> Self {
        DataBlock { data: Bytes::new(), eor: false, eof: true }
    }
}

/// The MODE/TYPE/STRU triple a session carries between transfers (§4.3 of the design).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecConfig {
    /// The transfer mode negotiated via `MODE`.
    pub mode: ModeParam,
    /// The representation type negotiated via `TYPE`.
    pub ty: TypeParam,
    /// The file structure negotiated via `STRU`.
    pub structure: StruParam,
}

impl Default for CodecConfig {
    fn default() -> Self {
        CodecConfig {
            mode: ModeParam::Stream,
            ty: TypeParam::Image,
            structure: StruParam::File,
        }
    }
}

/// Descriptor byte bits for BLOCK-mode frames (RFC 959 §3.4.2).
mod block_flags {
    pub const EOR: u8 = 0x80;
    pub const EOF: u8 = 0x40;
    pub const SUSPECT_ERROR: u8 = 0x20;
    pub const RESTART_MARKER: u8 = 0x10;
}

/// The escape byte RFC 959 §3.4.1 reserves for carrying record/EOF markers through STREAM mode.
const STREAM_ESCAPE: u8 = 0xFF;
const STREAM_ESCAPE_LITERAL: u8 = 0x00;
const STREAM_ESCAPE_EOR: u8 = 0x01;
const STREAM_ESCAPE_EOF: u8 = 0x02;

/// A freshly built codec stack for one data-channel open, instantiated from the session's
/// [`CodecConfig`] rather than mutated in place across transfers.
pub struct CodecPipeline {
    config: CodecConfig,
    /// Partially received BLOCK/COMPRESSED frame header+payload, carried across `decode` calls.
    decode_buf: BytesMut,
}

impl CodecPipeline {
    /// Builds a pipeline for `config`. The pipeline is immediately ready: there is no
    /// cross-network handshake for MODE/TYPE/STRU, only a local reconfiguration.
    pub fn new(config: CodecConfig) -> Self {
        CodecPipeline {
            config,
            decode_buf: BytesMut::new(),
        }
    }

    /// Whether a `STRU PAGE` transfer was requested; callers must reject with `551` before
    /// ever calling into this pipeline, since PAGE has no codec.
    pub fn page_structure_unsupported(&self) -> bool {
        matches!(self.config.structure, StruParam::Page)
    }

    /// Encodes one outbound block to wire bytes.
    pub fn encode(&self, block: DataBlock) -> Bytes {
        let translated = self.encode_type(&block.data);
        let structured = self.encode_structure(translated, block.eor, block.eof);
        self.encode_mode(structured, block.eor, block.eof)
    }

    /// Decodes as many complete blocks as `input` contains, appending any leftover bytes to the
    /// internal buffer for the next call. Returns blocks in arrival order.
    pub fn decode(&mut self, input: &[u8]) -> Vec<DataBlock> {
        self.decode_buf.extend_from_slice(input);
        let framed = self.decode_mode();
        framed
            .into_iter()
            .map(|(payload, eor, eof)| {
                let (destructured, eor, eof) = self.decode_structure(payload, eor, eof);
                let data = self.decode_type(&destructured);
                DataBlock { data, eor, eof }
            })
            .collect()
    }

    // ---- TYPE ----------------------------------------------------------------------------

    fn encode_type(&self, data: &[u8]) -> Bytes {
        match self.config.ty {
            TypeParam::Ascii => ascii_to_network(data),
            TypeParam::Ebcdic => ascii_to_ebcdic(data),
            TypeParam::Image | TypeParam::Local(_) => Bytes::copy_from_slice(data),
        }
    }

    fn decode_type(&self, data: &[u8]) -> Bytes {
        match self.config.ty {
            TypeParam::Ascii => network_to_ascii(data),
            TypeParam::Ebcdic => ebcdic_to_ascii(data),
            TypeParam::Image | TypeParam::Local(_) => Bytes::copy_from_slice(data),
        }
    }

    // ---- STRU -----------------------------------------------------------------------------

    /// In STREAM mode, RECORD structure multiplexes EOR/EOF markers into the byte stream via
    /// the §3.4.1 escape convention, since STREAM has no native per-block framing. In BLOCK or
    /// COMPRESSED mode, or with FILE structure, this is a passthrough: the descriptor byte
    /// already carries EOR/EOF.
    fn encode_structure(&self, data: Bytes, eor: bool, eof: bool) -> Bytes {
        let needs_stream_markers = self.config.structure == StruParam::Record && self.config.mode == ModeParam::Stream;
        if !needs_stream_markers {
            return data;
        }
        let mut out = BytesMut::with_capacity(data.len() + 4);
        for &byte in data.iter() {
            if byte == STREAM_ESCAPE {
                out.put_u8(STREAM_ESCAPE);
                out.put_u8(STREAM_ESCAPE_LITERAL);
            } else {
                out.put_u8(byte);
            }
        }
        if eor {
            out.put_u8(STREAM_ESCAPE);
            out.put_u8(STREAM_ESCAPE_EOR);
        }
        if eof {
            out.put_u8(STREAM_ESCAPE);
            out.put_u8(STREAM_ESCAPE_EOF);
        }
        out.freeze()
    }

    /// Reverses [`Self::encode_structure`], returning the destructured payload and the
    /// (possibly stream-carried) EOR/EOF flags.
    fn decode_structure(&self, data: Bytes, eor: bool, eof: bool) -> (Bytes, bool, bool) {
        let needs_stream_markers = self.config.structure == StruParam::Record && self.config.mode == ModeParam::Stream;
        if !needs_stream_markers {
            return (data, eor, eof);
        }
        let mut out = BytesMut::with_capacity(data.len());
        let mut saw_eor = false;
        let mut saw_eof = false;
        let mut iter = data.iter().copied().peekable();
        while let Some(byte) = iter.next() {
            if byte == STREAM_ESCAPE {
                match iter.next() {
                    Some(STREAM_ESCAPE_LITERAL) => out.put_u8(STREAM_ESCAPE),
                    Some(STREAM_ESCAPE_EOR) => saw_eor = true,
                    Some(STREAM_ESCAPE_EOF) => saw_eof = true,
                    Some(other) => out.put_u8(other),
                    None => {}
                }
            } else {
                out.put_u8(byte);
            }
        }
        (out.freeze(), saw_eor, saw_eof)
    }

    // ---- MODE -----------------------------------------------------------------------------

    fn encode_mode(&self, data: Bytes, eor: bool, eof: bool) -> Bytes {
        match self.config.mode {
            ModeParam::Stream => data,
            ModeParam::Block => frame_block(&data, eor, eof),
            ModeParam::Compressed => frame_block(&rle_encode(&data), eor, eof),
        }
    }

    /// Pulls complete `(payload, eor, eof)` frames out of `self.decode_buf`, leaving any
    /// trailing partial frame buffered for the next call.
    fn decode_mode(&mut self) -> Vec<(Bytes, bool, bool)> {
        match self.config.mode {
            ModeParam::Stream => {
                let payload = self.decode_buf.split().freeze();
                if payload.is_empty() {
                    vec![]
                } else {
                    vec![(payload, false, false)]
                }
            }
            ModeParam::Block => self.unframe_blocks(false),
            ModeParam::Compressed => self
                .unframe_blocks(true)
                .into_iter()
                .map(|(payload, eor, eof)| (rle_decode(&payload), eor, eof))
                .collect(),
        }
    }

    fn unframe_blocks(&mut self, _compressed: bool) -> Vec<(Bytes, bool, bool)> {
        let mut frames = Vec::new();
        loop {
            if self.decode_buf.len() < 3 {
                return frames;
            }
            let descriptor = self.decode_buf[0];
            let count = ((self.decode_buf[1] as usize) << 8) | self.decode_buf[2] as usize;
            if self.decode_buf.len() < 3 + count {
                return frames;
            }
            let frame = self.decode_buf.split_to(3 + count);
            let payload = Bytes::copy_from_slice(&frame[3..]);
            let eor = descriptor & block_flags::EOR != 0;
            let eof = descriptor & block_flags::EOF != 0;
            frames.push((payload, eor, eof));
        }
    }
}

fn frame_block(payload: &[u8], eor: bool, eof: bool) -> Bytes {
    let mut descriptor = 0u8;
    if eor {
        descriptor |= block_flags::EOR;
    }
    if eof {
        descriptor |= block_flags::EOF;
    }
    let count = payload.len().min(u16::MAX as usize);
    let mut out = BytesMut::with_capacity(3 + count);
    out.put_u8(descriptor);
    out.put_u16(count as u16);
    out.put_slice(&payload[..count]);
    out.freeze()
}

/// The classic 2-byte-prefix run-length scheme: `0xFF, count, byte` encodes a replicated-byte
/// run, and a literal `0xFF` in the source is escaped as `0xFF, 0x00, 0xFF`.
fn rle_encode(data: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        let byte = data[i];
        let mut run = 1;
        while i + run < data.len() && data[i + run] == byte && run < 255 {
            run += 1;
        }
        if byte == STREAM_ESCAPE {
            if run == 1 {
                out.put_u8(STREAM_ESCAPE);
                out.put_u8(0x00);
                out.put_u8(STREAM_ESCAPE);
            } else {
                out.put_u8(STREAM_ESCAPE);
                out.put_u8(run as u8);
                out.put_u8(STREAM_ESCAPE);
            }
        } else if run >= 4 {
            out.put_u8(STREAM_ESCAPE);
            out.put_u8(run as u8);
            out.put_u8(byte);
        } else {
            for _ in 0..run {
                out.put_u8(byte);
            }
        }
        i += run;
    }
    out.freeze()
}

fn rle_decode(data: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(data.len());
    let mut iter = data.iter().copied();
    while let Some(byte) = iter.next() {
        if byte == STREAM_ESCAPE {
            let count = iter.next().unwrap_or(0);
            let value = iter.next().unwrap_or(0);
            if count == 0 {
                out.put_u8(value);
            } else {
                for _ in 0..count {
                    out.put_u8(value);
                }
            }
        } else {
            out.put_u8(byte);
        }
    }
    out.freeze()
}

fn ascii_to_network(data: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(data.len());
    for &byte in data {
        if byte == b'\n' {
            out.put_u8(b'\r');
        }
        out.put_u8(byte);
    }
    out.freeze()
}

fn network_to_ascii(data: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(data.len());
    let mut iter = data.iter().copied().peekable();
    while let Some(byte) = iter.next() {
        if byte == b'\r' && iter.peek() == Some(&b'\n') {
            continue;
        }
        out.put_u8(byte);
    }
    out.freeze()
}

/// IBM code page 037, mapping ASCII 0x00-0xFF to its EBCDIC equivalent. Only the printable ASCII
/// range is handled explicitly; the rest round-trips unchanged, which holds for the IMAGE-like
/// binary data most clients actually push through `TYPE E`.
fn ascii_to_ebcdic(data: &[u8]) -> Bytes {
    data.iter().map(|&b| ASCII_TO_EBCDIC[b as usize]).collect()
}

fn ebcdic_to_ascii(data: &[u8]) -> Bytes {
    data.iter().map(|&b| EBCDIC_TO_ASCII[b as usize]).collect()
}

// A small, representative slice of code page 037: control characters, digits, and uppercase
// letters. Bytes outside these ranges pass through unchanged, which is enough for text transfers
// using the common subset of ASCII.
static ASCII_TO_EBCDIC: [u8; 256] = build_ascii_to_ebcdic();
static EBCDIC_TO_ASCII: [u8; 256] = build_ebcdic_to_ascii();

const fn identity_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = i as u8;
        i += 1;
    }
    table
}

const fn build_ascii_to_ebcdic() -> [u8; 256] {
    let mut table = identity_table();
    table[b' ' as usize] = 0x40;
    table[b'.' as usize] = 0x4B;
    table[b'<' as usize] = 0x4C;
    table[b'(' as usize] = 0x4D;
    table[b'+' as usize] = 0x4E;
    table[b'$' as usize] = 0x5B;
    table[b'*' as usize] = 0x5C;
    table[b')' as usize] = 0x5D;
    table[b';' as usize] = 0x5E;
    table[b'-' as usize] = 0x60;
    table[b'/' as usize] = 0x61;
    table[b',' as usize] = 0x6B;
    table[b'%' as usize] = 0x6C;
    table[b'_' as usize] = 0x6D;
    table[b'>' as usize] = 0x6E;
    table[b'?' as usize] = 0x6F;
    table[b':' as usize] = 0x7A;
    table[b'#' as usize] = 0x7B;
    table[b'@' as usize] = 0x7C;
    table[b'\'' as usize] = 0x7D;
    table[b'=' as usize] = 0x7E;
    table[b'"' as usize] = 0x7F;
    let mut c = b'a';
    while c <= b'i' {
        table[c as usize] = 0x81 + (c - b'a');
        c += 1;
    }
    let mut c = b'j';
    while c <= b'r' {
        table[c as usize] = 0x91 + (c - b'j');
        c += 1;
    }
    let mut c = b's';
    while c <= b'z' {
        table[c as usize] = 0xA2 + (c - b's');
        c += 1;
    }
    let mut c = b'A';
    while c <= b'I' {
        table[c as usize] = 0xC1 + (c - b'A');
        c += 1;
    }
    let mut c = b'J';
    while c <= b'R' {
        table[c as usize] = 0xD1 + (c - b'J');
        c += 1;
    }
    let mut c = b'S';
    while c <= b'Z' {
        table[c as usize] = 0xE2 + (c - b'S');
        c += 1;
    }
    let mut c = b'0';
    while c <= b'9' {
        table[c as usize] = 0xF0 + (c - b'0');
        c += 1;
    }
    table
}

const fn build_ebcdic_to_ascii() -> [u8; 256] {
    let forward = build_ascii_to_ebcdic();
    let mut table = identity_table();
    let mut i = 0;
    while i < 256 {
        table[forward[i] as usize] = i as u8;
        i += 1;
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_image_round_trips() {
        let mut pipeline = CodecPipeline::new(CodecConfig::default());
        let wire = pipeline.encode(DataBlock::plain(Bytes::from_static(b"hello")));
        let blocks = pipeline.decode(&wire);
        assert_eq!(blocks.len(), 1);
        assert_eq!(&blocks[0].data[..], b"hello");
    }

    #[test]
    fn ascii_translates_newline_to_crlf_on_the_wire() {
        let config = CodecConfig {
            ty: TypeParam::Ascii,
            ..CodecConfig::default()
        };
        let mut pipeline = CodecPipeline::new(config);
        let wire = pipeline.encode(DataBlock::plain(Bytes::from_static(b"a\nb")));
        assert_eq!(&wire[..], b"a\r\nb");
        let blocks = pipeline.decode(&wire);
        assert_eq!(&blocks[0].data[..], b"a\nb");
    }

    #[test]
    fn block_mode_frames_carry_eof() {
        let config = CodecConfig {
            mode: ModeParam::Block,
            ..CodecConfig::default()
        };
        let mut pipeline = CodecPipeline::new(config);
        let wire = pipeline.encode(DataBlock {
            data: Bytes::from_static(b"xyz"),
            eor: false,
            eof: true,
        });
        assert_eq!(wire[0] & block_flags::EOF, block_flags::EOF);
        let blocks = pipeline.decode(&wire);
        assert_eq!(blocks.len(), 1);
        assert!(blocks[0].eof);
        assert_eq!(&blocks[0].data[..], b"xyz");
    }

    #[test]
    fn block_mode_reassembles_a_header_split_across_reads() {
        let config = CodecConfig {
            mode: ModeParam::Block,
            ..CodecConfig::default()
        };
        let mut pipeline = CodecPipeline::new(config);
        let wire = frame_block(b"payload", true, false);
        let (first, second) = wire.split_at(2);
        assert!(pipeline.decode(first).is_empty());
        let blocks = pipeline.decode(second);
        assert_eq!(blocks.len(), 1);
        assert!(blocks[0].eor);
        assert_eq!(&blocks[0].data[..], b"payload");
    }

    #[test]
    fn compressed_mode_round_trips_a_repeated_run() {
        let config = CodecConfig {
            mode: ModeParam::Compressed,
            ..CodecConfig::default()
        };
        let mut pipeline = CodecPipeline::new(config);
        let data = vec![b'a'; 40];
        let wire = pipeline.encode(DataBlock::plain(Bytes::from(data.clone())));
        assert!(wire.len() < data.len());
        let blocks = pipeline.decode(&wire);
        assert_eq!(&blocks[0].data[..], &data[..]);
    }

    #[test]
    fn stream_record_structure_escapes_a_literal_0xff() {
        let config = CodecConfig {
            structure: StruParam::Record,
            ..CodecConfig::default()
        };
        let mut pipeline = CodecPipeline::new(config);
        let wire = pipeline.encode(DataBlock {
            data: Bytes::from_static(&[0xFF, 1, 2]),
            eor: true,
            eof: false,
        });
        let blocks = pipeline.decode(&wire);
        assert_eq!(&blocks[0].data[..], &[0xFF, 1, 2]);
        assert!(blocks[0].eor);
    }
}
