use crate::buffer::StagedBuffer;
use crate::config::OfdmOptions;
use crate::constellation::ModScheme;
use crate::error::{ModemError, Result};
use crate::frame::{FrameCoder, FrameGenerator, Lfsr, HEADER_SYMBOLS};
use rustfft::num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use std::f32::consts::FRAC_PI_2;
use std::sync::Arc;

const PREAMBLE_SEED: u8 = 0x2D;
const PILOT_SPACING: i32 = 8;

/// Subcarrier allocation for one OFDM block
///
/// Bins are addressed by signed frequency `k`; the active band is
/// `1 <= |k| <= 0.4 * M`. Active bins on a multiple of the pilot spacing carry
/// a fixed pilot, the rest carry data. DC and the band edges stay empty.
#[derive(Debug, Clone)]
pub struct OfdmLayout {
    size: usize,
    cyclic_prefix_len: usize,
    taper_len: usize,
    /// FFT indices of the data bins, in transmit order
    data: Vec<usize>,
    pilots: Vec<usize>,
    active: Vec<usize>,
}

impl OfdmLayout {
    pub fn new(opt: &OfdmOptions) -> Result<Self> {
        let size = opt.num_subcarriers;
        if opt.cyclic_prefix_len > size {
            return Err(ModemError::InvalidConfig(format!(
                "cyclic prefix {} longer than block of {} subcarriers",
                opt.cyclic_prefix_len, size
            )));
        }

        let edge = (size * 2 / 5) as i32;
        let mut data = Vec::new();
        let mut pilots = Vec::new();
        let mut active = Vec::new();
        for k in (-edge..=edge).filter(|&k| k != 0) {
            let index = (k + size as i32) as usize % size;
            active.push(index);
            if k % PILOT_SPACING == 0 {
                pilots.push(index);
            } else {
                data.push(index);
            }
        }

        if data.is_empty() {
            return Err(ModemError::InvalidConfig(format!(
                "{} subcarriers leave no data bins",
                size
            )));
        }

        Ok(Self {
            size,
            cyclic_prefix_len: opt.cyclic_prefix_len,
            taper_len: opt.taper_len.min(opt.cyclic_prefix_len),
            data,
            pilots,
            active,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn cyclic_prefix_len(&self) -> usize {
        self.cyclic_prefix_len
    }

    /// Time-domain samples per block, prefix included
    pub fn block_len(&self) -> usize {
        self.size + self.cyclic_prefix_len
    }

    pub fn data_bins(&self) -> &[usize] {
        &self.data
    }

    pub fn pilot_bins(&self) -> &[usize] {
        &self.pilots
    }

    /// Blocks needed for `symbol_count` data-bin symbols
    pub fn blocks_for(&self, symbol_count: usize) -> usize {
        symbol_count.div_ceil(self.data.len())
    }

    pub fn header_blocks(&self) -> usize {
        self.blocks_for(HEADER_SYMBOLS)
    }

    /// Amplitude applied after the inverse FFT so a block has unit RMS
    pub fn time_scale(&self) -> f32 {
        1.0 / (self.active.len() as f32).sqrt()
    }

    pub fn pilot_value(&self) -> Complex32 {
        Complex32::new(1.0, 0.0)
    }

    /// Spectrum of the synchronisation block: pseudo-random BPSK on every active bin
    pub fn preamble_spectrum(&self) -> Vec<Complex32> {
        let mut spectrum = vec![Complex32::new(0.0, 0.0); self.size];
        let mut lfsr = Lfsr::new(PREAMBLE_SEED);
        for &bin in &self.active {
            spectrum[bin] = lfsr.next_bpsk();
        }
        spectrum
    }

    /// Preamble block body (prefix excluded) in the time domain
    pub fn preamble_body(&self) -> Vec<Complex32> {
        let mut body = self.preamble_spectrum();
        FftPlanner::new().plan_fft_inverse(self.size).process(&mut body);
        let scale = self.time_scale();
        body.iter_mut().for_each(|x| *x *= scale);
        body
    }

    /// Append spectra for `symbols`, `data.len()` per block, with pilots set
    /// and the last block padded with `pad`
    fn push_blocks(&self, symbols: &[Complex32], pad: Complex32, spectra: &mut Vec<Complex32>) {
        for chunk in symbols.chunks(self.data.len()) {
            let start = spectra.len();
            spectra.resize(start + self.size, Complex32::new(0.0, 0.0));
            let block = &mut spectra[start..];
            for &bin in &self.pilots {
                block[bin] = self.pilot_value();
            }
            for (i, &bin) in self.data.iter().enumerate() {
                block[bin] = chunk.get(i).copied().unwrap_or(pad);
            }
        }
    }

    fn taper_window(&self) -> Vec<f32> {
        let t = self.taper_len;
        (0..t)
            .map(|i| {
                let s = (FRAC_PI_2 * (i + 1) as f32 / (t + 1) as f32).sin();
                s * s
            })
            .collect()
    }
}

/// OFDM frame producer
///
/// A frame is a preamble block, BPSK header blocks and payload blocks; each
/// `write_symbols` call synthesises exactly one block of `M + cp` complex
/// samples. Adjacent blocks are cross-faded over the taper length.
pub struct OfdmFrameGen {
    layout: OfdmLayout,
    coder: FrameCoder,
    ifft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    /// Frequency-domain frame, `M` values per block
    spectra: Vec<Complex32>,
    num_blocks: usize,
    next_block: usize,
    /// Cyclic extension of the previous block, faded into the next prefix
    postfix: Vec<Complex32>,
    scratch: Vec<Complex32>,
}

impl OfdmFrameGen {
    pub fn new(opt: &OfdmOptions, coder: FrameCoder) -> Result<Self> {
        let layout = OfdmLayout::new(opt)?;
        let ifft = FftPlanner::new().plan_fft_inverse(layout.size());
        let window = layout.taper_window();
        log::debug!(
            "OFDM layout: {} subcarriers, {} data, {} pilots, prefix {}, taper {}",
            layout.size(),
            layout.data.len(),
            layout.pilots.len(),
            layout.cyclic_prefix_len,
            layout.taper_len
        );
        Ok(Self {
            postfix: vec![Complex32::new(0.0, 0.0); layout.taper_len],
            scratch: vec![Complex32::new(0.0, 0.0); layout.size()],
            layout,
            coder,
            ifft,
            window,
            spectra: Vec::new(),
            num_blocks: 0,
            next_block: 0,
        })
    }

    pub fn layout(&self) -> &OfdmLayout {
        &self.layout
    }

    pub fn block_len(&self) -> usize {
        self.layout.block_len()
    }

    fn build(&self, chunk: &[u8], spectra: &mut Vec<Complex32>) -> Result<()> {
        let header = self.coder.header(chunk.len())?;
        let coded = self.coder.encode(chunk)?;

        spectra.clear();
        spectra.extend(self.layout.preamble_spectrum());

        let mut symbols = Vec::with_capacity(HEADER_SYMBOLS);
        ModScheme::Bpsk.modulate_bytes(&header.to_bytes(), &mut symbols);
        self.layout
            .push_blocks(&symbols, ModScheme::Bpsk.map(0), spectra);

        let scheme = self.coder.mod_scheme();
        symbols.clear();
        scheme.modulate_bytes(&coded, &mut symbols);
        self.layout.push_blocks(&symbols, scheme.map(0), spectra);
        Ok(())
    }

    fn synthesize(&mut self, block: usize, out: &mut [Complex32]) {
        let size = self.layout.size();
        let cp = self.layout.cyclic_prefix_len;

        self.scratch
            .copy_from_slice(&self.spectra[block * size..(block + 1) * size]);
        self.ifft.process(&mut self.scratch);
        let scale = self.layout.time_scale();
        self.scratch.iter_mut().for_each(|x| *x *= scale);

        out[..cp].copy_from_slice(&self.scratch[size - cp..]);
        out[cp..].copy_from_slice(&self.scratch);

        for (i, &w) in self.window.iter().enumerate() {
            out[i] = out[i] * w + self.postfix[i] * (1.0 - w);
        }
        let taper = self.postfix.len();
        self.postfix.copy_from_slice(&self.scratch[..taper]);
    }
}

impl FrameGenerator for OfdmFrameGen {
    fn assemble(&mut self, chunk: &[u8]) -> Result<()> {
        let mut spectra = std::mem::take(&mut self.spectra);
        let built = self.build(chunk, &mut spectra);
        self.spectra = spectra;
        self.reset_cursor();
        built?;

        self.num_blocks = self.spectra.len() / self.layout.size();
        log::trace!(
            "assembled OFDM frame: {} payload bytes, {} blocks",
            chunk.len(),
            self.num_blocks
        );
        Ok(())
    }

    fn write_symbols(&mut self, _requested: usize, symbols: &mut StagedBuffer<Complex32>) -> usize {
        if !self.frame_pending() {
            symbols.clear();
            return 0;
        }

        let len = self.block_len();
        self.synthesize(self.next_block, symbols.fill(len));
        self.next_block += 1;
        len
    }

    fn frame_pending(&self) -> bool {
        self.next_block < self.num_blocks
    }

    fn frame_length(&self) -> usize {
        self.num_blocks
    }

    fn measure(&self, payload_len: usize) -> Result<usize> {
        let placeholder = vec![0u8; payload_len];
        let mut spectra = Vec::new();
        self.build(&placeholder, &mut spectra)?;
        Ok(spectra.len() / self.layout.size() * self.block_len())
    }

    fn reset(&mut self) {
        self.spectra.clear();
        self.reset_cursor();
    }
}

impl OfdmFrameGen {
    fn reset_cursor(&mut self) {
        self.num_blocks = 0;
        self.next_block = 0;
        self.postfix
            .iter_mut()
            .for_each(|x| *x = Complex32::new(0.0, 0.0));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EncoderOptions;

    fn generator() -> OfdmFrameGen {
        let opt = EncoderOptions::ofdm();
        OfdmFrameGen::new(&opt.ofdm, FrameCoder::new(&opt).unwrap()).unwrap()
    }

    #[test]
    fn test_default_layout() {
        let layout = OfdmLayout::new(&OfdmOptions::default()).unwrap();
        assert_eq!(layout.pilot_bins().len(), 6);
        assert_eq!(layout.data_bins().len(), 44);
        assert_eq!(layout.block_len(), 80);
        assert_eq!(layout.header_blocks(), 2);
        assert!(!layout.data_bins().contains(&0));
    }

    #[test]
    fn test_layout_rejects_tiny_blocks() {
        let opt = OfdmOptions {
            num_subcarriers: 2,
            cyclic_prefix_len: 1,
            taper_len: 0,
        };
        assert!(OfdmLayout::new(&opt).is_err());

        let opt = OfdmOptions {
            num_subcarriers: 16,
            cyclic_prefix_len: 32,
            taper_len: 0,
        };
        assert!(OfdmLayout::new(&opt).is_err());
    }

    #[test]
    fn test_preamble_body_has_unit_rms() {
        let layout = OfdmLayout::new(&OfdmOptions::default()).unwrap();
        let body = layout.preamble_body();
        let power: f32 = body.iter().map(|x| x.norm_sqr()).sum::<f32>() / body.len() as f32;
        assert!((power - 1.0).abs() < 1e-3, "power {}", power);
    }

    #[test]
    fn test_one_block_per_write_regardless_of_hint() {
        let mut gen = generator();
        gen.assemble(&[0x42; 100]).unwrap();
        let blocks = gen.frame_length();
        assert!(blocks > 1 + gen.layout().header_blocks());

        let mut buffer = StagedBuffer::with_capacity(gen.block_len());
        for hint in [1, 1000, 0] {
            assert_eq!(gen.write_symbols(hint, &mut buffer), gen.block_len());
            assert_eq!(buffer.len(), gen.block_len());
        }

        let mut written = 3;
        while gen.frame_pending() {
            gen.write_symbols(1, &mut buffer);
            written += 1;
        }
        assert_eq!(written, blocks);
        assert_eq!(gen.write_symbols(1, &mut buffer), 0);
    }

    #[test]
    fn test_cyclic_prefix_repeats_tail() {
        let mut gen = generator();
        gen.assemble(b"prefix").unwrap();
        let mut buffer = StagedBuffer::with_capacity(0);
        gen.write_symbols(1, &mut buffer);
        gen.write_symbols(1, &mut buffer);

        let block = buffer.pending();
        let size = gen.layout().size();
        let cp = gen.layout().cyclic_prefix_len();
        let taper = gen.postfix.len();
        // samples past the cross-fade are an exact copy of the body tail
        for i in taper..cp {
            assert!((block[i] - block[i + size]).norm() < 1e-5);
        }
    }

    #[test]
    fn test_measure_matches_assemble() {
        let mut gen = generator();
        for len in [0, 1, 43, 44, 400] {
            let predicted = gen.measure(len).unwrap();
            gen.assemble(&vec![0x99; len]).unwrap();
            assert_eq!(predicted, gen.frame_length() * gen.block_len(), "len {}", len);
        }
    }

    #[test]
    fn test_assemble_restarts_taper() {
        let mut a = generator();
        let mut b = generator();
        let mut first = StagedBuffer::with_capacity(0);
        let mut second = StagedBuffer::with_capacity(0);

        a.assemble(b"one").unwrap();
        a.write_symbols(1, &mut first);
        a.write_symbols(1, &mut first);
        a.assemble(b"two").unwrap();
        a.write_symbols(1, &mut first);

        b.assemble(b"two").unwrap();
        b.write_symbols(1, &mut second);
        assert_eq!(first.pending(), second.pending());
    }
}
