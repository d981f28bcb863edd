use crate::buffer::StagedBuffer;
use crate::config::EncoderOptions;
use crate::constellation::ModScheme;
use crate::error::{ModemError, Result};
use crate::fec::{FecCodec, FecScheme};
use crate::framing::{CheckScheme, FrameHeader};
use crate::ofdm::OfdmFrameGen;
use crate::{FRAME_HEADER_SIZE, PREAMBLE_LEN};
use rustfft::num_complex::Complex32;

/// Capabilities the encoder needs from a frame producer
///
/// A generator is Idle until `assemble` queues a frame, Pending while
/// symbols remain, and Idle again once `write_symbols` has emitted them all.
pub trait FrameGenerator {
    /// Build one frame from `chunk`, discarding anything still queued
    fn assemble(&mut self, chunk: &[u8]) -> Result<()>;

    /// Write up to `requested` symbols of the queued frame into `symbols`
    /// (which is reset first) and return how many were written
    fn write_symbols(&mut self, requested: usize, symbols: &mut StagedBuffer<Complex32>) -> usize;

    fn frame_pending(&self) -> bool;

    /// Length of the last assembled frame in generator units
    /// (symbols for single carrier, blocks for OFDM)
    fn frame_length(&self) -> usize;

    /// Symbols a frame carrying `payload_len` bytes would take, found by
    /// building a zero-filled placeholder. Never disturbs a queued frame.
    fn measure(&self, payload_len: usize) -> Result<usize>;

    fn reset(&mut self);
}

/// Frame producer chosen once at construction
pub enum FrameGen {
    SingleCarrier(SingleCarrierFrameGen),
    Ofdm(OfdmFrameGen),
}

impl FrameGen {
    pub fn new(opt: &EncoderOptions) -> Result<Self> {
        let coder = FrameCoder::new(opt)?;
        if opt.is_ofdm {
            Ok(FrameGen::Ofdm(OfdmFrameGen::new(&opt.ofdm, coder)?))
        } else {
            Ok(FrameGen::SingleCarrier(SingleCarrierFrameGen::new(coder)))
        }
    }

    /// Initial symbol scratch size: one OFDM block, nothing for single carrier
    pub fn symbol_block_len(&self) -> usize {
        match self {
            FrameGen::SingleCarrier(_) => 0,
            FrameGen::Ofdm(gen) => gen.block_len(),
        }
    }
}

impl FrameGenerator for FrameGen {
    fn assemble(&mut self, chunk: &[u8]) -> Result<()> {
        match self {
            FrameGen::SingleCarrier(gen) => gen.assemble(chunk),
            FrameGen::Ofdm(gen) => gen.assemble(chunk),
        }
    }

    fn write_symbols(&mut self, requested: usize, symbols: &mut StagedBuffer<Complex32>) -> usize {
        match self {
            FrameGen::SingleCarrier(gen) => gen.write_symbols(requested, symbols),
            FrameGen::Ofdm(gen) => gen.write_symbols(requested, symbols),
        }
    }

    fn frame_pending(&self) -> bool {
        match self {
            FrameGen::SingleCarrier(gen) => gen.frame_pending(),
            FrameGen::Ofdm(gen) => gen.frame_pending(),
        }
    }

    fn frame_length(&self) -> usize {
        match self {
            FrameGen::SingleCarrier(gen) => gen.frame_length(),
            FrameGen::Ofdm(gen) => gen.frame_length(),
        }
    }

    fn measure(&self, payload_len: usize) -> Result<usize> {
        match self {
            FrameGen::SingleCarrier(gen) => gen.measure(payload_len),
            FrameGen::Ofdm(gen) => gen.measure(payload_len),
        }
    }

    fn reset(&mut self) {
        match self {
            FrameGen::SingleCarrier(gen) => gen.reset(),
            FrameGen::Ofdm(gen) => gen.reset(),
        }
    }
}

/// Payload coding shared by both frame variants: checksum, outer FEC, inner FEC
pub struct FrameCoder {
    checksum: CheckScheme,
    outer: FecCodec,
    inner: FecCodec,
    mod_scheme: ModScheme,
}

impl FrameCoder {
    pub fn new(opt: &EncoderOptions) -> Result<Self> {
        Self::with_schemes(
            opt.checksum_scheme,
            opt.inner_fec_scheme,
            opt.outer_fec_scheme,
            opt.mod_scheme,
        )
    }

    pub fn with_schemes(
        checksum: CheckScheme,
        inner: FecScheme,
        outer: FecScheme,
        mod_scheme: ModScheme,
    ) -> Result<Self> {
        Ok(Self {
            checksum,
            outer: FecCodec::new(outer)?,
            inner: FecCodec::new(inner)?,
            mod_scheme,
        })
    }

    pub fn from_header(header: &FrameHeader) -> Result<Self> {
        Self::with_schemes(header.checksum, header.inner_fec, header.outer_fec, header.mod_scheme)
    }

    pub fn mod_scheme(&self) -> ModScheme {
        self.mod_scheme
    }

    pub fn matches(&self, header: &FrameHeader) -> bool {
        self.checksum == header.checksum
            && self.inner.scheme() == header.inner_fec
            && self.outer.scheme() == header.outer_fec
            && self.mod_scheme == header.mod_scheme
    }

    pub fn header(&self, payload_len: usize) -> Result<FrameHeader> {
        let payload_len = u16::try_from(payload_len).map_err(|_| ModemError::InvalidFrameSize)?;
        Ok(FrameHeader {
            payload_len,
            checksum: self.checksum,
            inner_fec: self.inner.scheme(),
            outer_fec: self.outer.scheme(),
            mod_scheme: self.mod_scheme,
        })
    }

    /// Coded byte count for a `payload_len` chunk
    pub fn coded_len(&self, payload_len: usize) -> usize {
        let checked = payload_len + self.checksum.len();
        self.inner
            .scheme()
            .encoded_len(self.outer.scheme().encoded_len(checked))
    }

    /// Payload symbols for a `payload_len` chunk
    pub fn payload_symbols(&self, payload_len: usize) -> usize {
        self.mod_scheme.symbol_count(self.coded_len(payload_len))
    }

    pub fn encode(&self, chunk: &[u8]) -> Result<Vec<u8>> {
        let mut checked = Vec::with_capacity(chunk.len() + self.checksum.len());
        checked.extend_from_slice(chunk);
        self.checksum.append(chunk, &mut checked);

        let mut outer = Vec::with_capacity(self.outer.scheme().encoded_len(checked.len()));
        self.outer.encode(&checked, &mut outer)?;

        let mut coded = Vec::with_capacity(self.coded_len(chunk.len()));
        self.inner.encode(&outer, &mut coded)?;
        Ok(coded)
    }

    pub fn decode(&self, coded: &[u8], payload_len: usize) -> Result<Vec<u8>> {
        let checked_len = payload_len + self.checksum.len();
        let outer_len = self.outer.scheme().encoded_len(checked_len);
        let outer = self.inner.decode(coded, outer_len)?;
        let checked = self.outer.decode(&outer, checked_len)?;
        Ok(self.checksum.verify(&checked)?.to_vec())
    }
}

/// Maximal-length 6-bit LFSR (x^6 + x^5 + 1), period 63
pub struct Lfsr {
    state: u8,
}

impl Lfsr {
    pub fn new(seed: u8) -> Self {
        let state = seed & 0x3F;
        Self {
            state: if state == 0 { 1 } else { state },
        }
    }

    pub fn next_bit(&mut self) -> u8 {
        let bit = ((self.state >> 5) ^ (self.state >> 4)) & 1;
        self.state = ((self.state << 1) | bit) & 0x3F;
        bit
    }

    /// Next value as a BPSK point
    pub fn next_bpsk(&mut self) -> Complex32 {
        ModScheme::Bpsk.map(self.next_bit())
    }
}

/// Known symbols opening every single-carrier frame
pub fn preamble_symbols() -> Vec<Complex32> {
    let mut lfsr = Lfsr::new(1);
    (0..PREAMBLE_LEN).map(|_| lfsr.next_bpsk()).collect()
}

/// Header bytes as BPSK symbols
pub fn header_symbols(header: &FrameHeader, out: &mut Vec<Complex32>) {
    ModScheme::Bpsk.modulate_bytes(&header.to_bytes(), out);
}

pub const HEADER_SYMBOLS: usize = FRAME_HEADER_SIZE * 8;

/// Single-carrier frame producer
///
/// Frame layout: preamble, BPSK header, payload symbols in the configured
/// modulation.
pub struct SingleCarrierFrameGen {
    coder: FrameCoder,
    preamble: Vec<Complex32>,
    frame: Vec<Complex32>,
    position: usize,
    symbols_remaining: usize,
}

impl SingleCarrierFrameGen {
    pub fn new(coder: FrameCoder) -> Self {
        Self {
            coder,
            preamble: preamble_symbols(),
            frame: Vec::new(),
            position: 0,
            symbols_remaining: 0,
        }
    }

    fn build(&self, chunk: &[u8], frame: &mut Vec<Complex32>) -> Result<()> {
        let header = self.coder.header(chunk.len())?;
        let coded = self.coder.encode(chunk)?;

        frame.clear();
        frame.extend_from_slice(&self.preamble);
        header_symbols(&header, frame);
        self.coder.mod_scheme().modulate_bytes(&coded, frame);
        Ok(())
    }
}

impl FrameGenerator for SingleCarrierFrameGen {
    fn assemble(&mut self, chunk: &[u8]) -> Result<()> {
        let mut frame = std::mem::take(&mut self.frame);
        let built = self.build(chunk, &mut frame);
        self.frame = frame;
        self.position = 0;
        self.symbols_remaining = 0;
        built?;

        self.symbols_remaining = self.frame.len();
        log::trace!(
            "assembled single-carrier frame: {} payload bytes, {} symbols",
            chunk.len(),
            self.frame.len()
        );
        Ok(())
    }

    fn write_symbols(&mut self, requested: usize, symbols: &mut StagedBuffer<Complex32>) -> usize {
        let count = requested.min(self.symbols_remaining);
        symbols
            .fill(count)
            .copy_from_slice(&self.frame[self.position..self.position + count]);
        self.position += count;
        self.symbols_remaining -= count;
        count
    }

    fn frame_pending(&self) -> bool {
        self.symbols_remaining > 0
    }

    fn frame_length(&self) -> usize {
        self.frame.len()
    }

    fn measure(&self, payload_len: usize) -> Result<usize> {
        let placeholder = vec![0u8; payload_len];
        let mut frame = Vec::new();
        self.build(&placeholder, &mut frame)?;
        Ok(frame.len())
    }

    fn reset(&mut self) {
        self.frame.clear();
        self.position = 0;
        self.symbols_remaining = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator() -> SingleCarrierFrameGen {
        SingleCarrierFrameGen::new(FrameCoder::new(&EncoderOptions::modem()).unwrap())
    }

    #[test]
    fn test_lfsr_period() {
        let mut lfsr = Lfsr::new(1);
        let first: Vec<u8> = (0..63).map(|_| lfsr.next_bit()).collect();
        let second: Vec<u8> = (0..63).map(|_| lfsr.next_bit()).collect();
        assert_eq!(first, second);
        // maximal length: 32 ones and 31 zeros per period
        assert_eq!(first.iter().filter(|&&b| b == 1).count(), 32);
    }

    #[test]
    fn test_preamble_autocorrelation_is_peaky() {
        let preamble = preamble_symbols();
        let peak: f32 = preamble.iter().map(|s| s.norm_sqr()).sum();
        for shift in 1..PREAMBLE_LEN {
            let side: Complex32 = preamble[shift..]
                .iter()
                .zip(&preamble)
                .map(|(a, b)| a * b.conj())
                .sum();
            assert!(side.norm() < 0.25 * peak, "shift {} sidelobe {}", shift, side.norm());
        }
    }

    #[test]
    fn test_coder_encode_decode() {
        let coder = FrameCoder::new(&EncoderOptions::robust()).unwrap();
        let chunk: Vec<u8> = (0..100).collect();
        let coded = coder.encode(&chunk).unwrap();
        assert_eq!(coded.len(), coder.coded_len(chunk.len()));
        assert_eq!(coder.decode(&coded, chunk.len()).unwrap(), chunk);
    }

    #[test]
    fn test_assemble_then_write_all() {
        let mut gen = generator();
        assert!(!gen.frame_pending());

        let chunk = b"single carrier payload".to_vec();
        gen.assemble(&chunk).unwrap();
        assert!(gen.frame_pending());
        let total = gen.frame_length();
        assert_eq!(
            total,
            PREAMBLE_LEN + HEADER_SYMBOLS + gen.coder.payload_symbols(chunk.len())
        );

        let mut buffer = StagedBuffer::with_capacity(0);
        let mut written = 0;
        while gen.frame_pending() {
            written += gen.write_symbols(10, &mut buffer);
            assert!(buffer.len() <= 10);
        }
        assert_eq!(written, total);
        assert_eq!(gen.write_symbols(10, &mut buffer), 0);
    }

    #[test]
    fn test_symbol_buffer_grows_to_request() {
        let mut gen = generator();
        gen.assemble(&[7u8; 40]).unwrap();
        let mut buffer = StagedBuffer::with_capacity(4);
        let written = gen.write_symbols(100, &mut buffer);
        assert_eq!(written, 100);
        assert!(buffer.capacity() >= 100);
    }

    #[test]
    fn test_measure_matches_assemble() {
        let mut gen = generator();
        for len in [0, 1, 12, 64, 65, 300] {
            let predicted = gen.measure(len).unwrap();
            gen.assemble(&vec![0xA5; len]).unwrap();
            assert_eq!(predicted, gen.frame_length(), "len {}", len);
        }
    }

    #[test]
    fn test_measure_leaves_pending_frame_alone() {
        let mut gen = generator();
        gen.assemble(b"keep me").unwrap();
        let before = gen.frame_length();
        gen.measure(250).unwrap();
        assert!(gen.frame_pending());
        assert_eq!(gen.frame_length(), before);
    }

    #[test]
    fn test_oversized_chunk_rejected() {
        let mut gen = generator();
        assert!(gen.assemble(&vec![0u8; u16::MAX as usize + 1]).is_err());
        assert!(!gen.frame_pending());
    }
}
