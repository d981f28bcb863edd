use crate::config::EncoderOptions;
use crate::constellation::ModScheme;
use crate::error::Result;
use crate::frame::{preamble_symbols, FrameCoder, HEADER_SYMBOLS};
use crate::framing::FrameHeader;
use crate::modulator::rrc_taps;
use crate::ofdm::OfdmLayout;
use crate::resample::Resampler;
use crate::{FRAME_HEADER_SIZE, PREAMBLE_LEN};
use rustfft::num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use std::collections::VecDeque;
use std::f64::consts::PI;
use std::sync::Arc;

/// Normalized correlation a preamble candidate has to reach
const DETECTION_THRESHOLD: f32 = 0.5;

/// Mean power per reference sample below which a window counts as silence
const ENERGY_FLOOR: f32 = 1e-9;

/// Baseband samples kept behind the search position before compacting
const TRIM_THRESHOLD: usize = 1 << 15;

const SCRATCH_LEN: usize = 4096;

#[derive(Debug, Clone, Copy)]
enum RxState {
    /// Looking for a preamble at or after `from`
    Searching { from: usize },
    /// Preamble found; waiting for enough samples to decode the frame
    Locked {
        start: usize,
        gain: Complex32,
        header: Option<FrameHeader>,
    },
}

struct OfdmRx {
    layout: OfdmLayout,
    fft: Arc<dyn Fft<f32>>,
}

/// Loopback receiver for the streams [`crate::Encoder`] produces
///
/// Samples are resampled to the native rate, mixed down to complex baseband
/// and matched-filtered. Frames are found by correlating against the known
/// preamble, which also yields the channel's complex gain. Decoded payloads
/// queue up until [`Decoder::read`] takes them.
pub struct Decoder {
    resampler: Option<Resampler>,
    sps: usize,
    omega: f64,
    phase: f64,
    taps: Vec<f32>,
    /// Latest mixed-down samples, newest first
    mixed: VecDeque<Complex32>,
    /// Matched filter output; index 0 is absolute sample `origin`
    baseband: Vec<Complex32>,
    origin: usize,
    state: RxState,
    reference: Vec<Complex32>,
    reference_energy: f32,
    /// Samples between frame start and the first reference sample
    reference_offset: usize,
    ofdm: Option<OfdmRx>,
    coder: Option<FrameCoder>,
    received: VecDeque<u8>,
    scratch: Vec<f32>,
}

impl Decoder {
    pub fn new(opt: &EncoderOptions) -> Result<Self> {
        let modulation = &opt.modulation;
        let sps = modulation.samples_per_symbol.max(1);
        let taps = rrc_taps(sps, modulation.symbol_delay, modulation.excess_bw);

        let resampler = if opt.needs_resampler() {
            Some(Resampler::new(1.0 / opt.resample_ratio(), &opt.resampler))
        } else {
            None
        };

        let (reference, reference_offset, ofdm) = if opt.is_ofdm {
            let layout = OfdmLayout::new(&opt.ofdm)?;
            let fft = FftPlanner::new().plan_fft_forward(layout.size());
            let offset = layout.cyclic_prefix_len() * sps;
            (layout.preamble_body(), offset, Some(OfdmRx { layout, fft }))
        } else {
            (preamble_symbols(), 0, None)
        };
        let reference_energy = reference.iter().map(|x| x.norm_sqr()).sum();

        log::debug!(
            "Decoder created: {} mode, {} Hz input, {} Hz native",
            if opt.is_ofdm { "OFDM" } else { "single-carrier" },
            opt.sample_rate,
            opt.native_sample_rate
        );

        Ok(Self {
            resampler,
            sps,
            omega: 2.0 * PI * modulation.center_frequency as f64 / opt.native_sample_rate as f64,
            phase: 0.0,
            mixed: VecDeque::from(vec![Complex32::new(0.0, 0.0); taps.len()]),
            taps,
            baseband: Vec::new(),
            origin: 0,
            state: RxState::Searching { from: 0 },
            reference,
            reference_energy,
            reference_offset,
            ofdm,
            coder: None,
            received: VecDeque::new(),
            scratch: vec![0.0; SCRATCH_LEN],
        })
    }

    /// Decoded bytes waiting to be read
    pub fn available(&self) -> usize {
        self.received.len()
    }

    /// Feed received samples; returns how many payload bytes became available
    pub fn recv(&mut self, samples: &[f32]) -> usize {
        let before = self.received.len();
        self.push_input(samples);
        self.process();
        self.received.len() - before
    }

    /// Push silence through the filters so the tail of the stream is decoded;
    /// returns how many payload bytes became available
    pub fn flush(&mut self) -> usize {
        let before = self.received.len();
        if let Some(delay) = self.resampler.as_ref().map(|r| r.delay()) {
            self.push_input(&vec![0.0; delay]);
        }
        let silence = vec![0.0; self.taps.len() + self.sps];
        self.push_native(&silence);
        self.process();
        self.received.len() - before
    }

    /// Move decoded bytes into `buf`, returning the count
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let count = buf.len().min(self.received.len());
        for (slot, byte) in buf.iter_mut().zip(self.received.drain(..count)) {
            *slot = byte;
        }
        count
    }

    fn push_input(&mut self, samples: &[f32]) {
        let Some(mut resampler) = self.resampler.take() else {
            self.push_native(samples);
            return;
        };

        let mut scratch = std::mem::take(&mut self.scratch);
        let mut offset = 0;
        loop {
            let (read, written) = resampler.execute(&samples[offset..], &mut scratch);
            offset += read;
            if read == 0 && written == 0 {
                break;
            }
            self.push_native(&scratch[..written]);
        }
        self.scratch = scratch;
        self.resampler = Some(resampler);
    }

    /// Mix down and matched-filter native-rate samples
    fn push_native(&mut self, samples: &[f32]) {
        self.baseband.reserve(samples.len());
        for &x in samples {
            let (sin, cos) = self.phase.sin_cos();
            let mixed = Complex32::new(2.0 * x * cos as f32, -2.0 * x * sin as f32);
            self.phase += self.omega;
            if self.phase > PI {
                self.phase -= 2.0 * PI;
            }

            self.mixed.pop_back();
            self.mixed.push_front(mixed);
            let filtered = self
                .mixed
                .iter()
                .zip(&self.taps)
                .fold(Complex32::new(0.0, 0.0), |acc, (&y, &h)| acc + y * h);
            self.baseband.push(filtered);
        }
    }

    fn end(&self) -> usize {
        self.origin + self.baseband.len()
    }

    fn sample(&self, index: usize) -> Complex32 {
        self.baseband[index - self.origin]
    }

    fn process(&mut self) {
        loop {
            match self.state {
                RxState::Searching { from } => match self.search(from) {
                    Ok((position, gain)) => {
                        let start = position.saturating_sub(self.reference_offset);
                        log::trace!("Preamble found at sample {}", start);
                        self.state = RxState::Locked {
                            start,
                            gain,
                            header: None,
                        };
                    }
                    Err(next) => {
                        self.state = RxState::Searching { from: next };
                        break;
                    }
                },
                RxState::Locked { start, gain, header } => {
                    let header = match header {
                        Some(header) => header,
                        None => {
                            if self.header_end(start) >= self.end() {
                                break;
                            }
                            match self.decode_header(start, gain) {
                                Ok(header) => header,
                                Err(e) => {
                                    log::warn!("Dropping frame at sample {}: {}", start, e);
                                    self.state = RxState::Searching {
                                        from: start + self.reference_offset + self.sps,
                                    };
                                    continue;
                                }
                            }
                        }
                    };

                    let frame_len = self.frame_symbols(&header);
                    if start + (frame_len - 1) * self.sps >= self.end() {
                        self.state = RxState::Locked {
                            start,
                            gain,
                            header: Some(header),
                        };
                        break;
                    }

                    match self.decode_payload(start, gain, &header) {
                        Ok(payload) => {
                            log::trace!("Decoded frame of {} bytes", payload.len());
                            self.received.extend(payload);
                        }
                        Err(e) => log::warn!("Dropping frame at sample {}: {}", start, e),
                    }
                    self.state = RxState::Searching {
                        from: start + frame_len * self.sps - self.sps / 2,
                    };
                }
            }
        }
        self.trim();
    }

    /// Find the next preamble at or after `from`.
    ///
    /// Returns the position of the first reference sample and the complex gain
    /// applied to it, or the position to resume from once more samples arrive.
    fn search(&self, from: usize) -> std::result::Result<(usize, Complex32), usize> {
        let span = (self.reference.len() - 1) * self.sps;
        let refine = 2 * self.sps;
        let mut n = from.max(self.origin);
        while n + span + refine < self.end() {
            if self.metric(n).0 >= DETECTION_THRESHOLD {
                let (best, correlation) = (n..=n + refine)
                    .map(|m| (m, self.metric(m)))
                    .max_by(|a, b| a.1 .0.total_cmp(&b.1 .0))
                    .map(|(m, (_, c))| (m, c))
                    .unwrap_or((n, Complex32::new(0.0, 0.0)));
                return Ok((best, correlation / self.reference_energy));
            }
            n += 1;
        }
        Err(n)
    }

    /// Normalized correlation and raw correlation at `n`
    fn metric(&self, n: usize) -> (f32, Complex32) {
        let mut correlation = Complex32::new(0.0, 0.0);
        let mut energy = 0.0f32;
        for (i, r) in self.reference.iter().enumerate() {
            let y = self.sample(n + i * self.sps);
            correlation += y * r.conj();
            energy += y.norm_sqr();
        }
        if energy < ENERGY_FLOOR * self.reference.len() as f32 {
            return (0.0, correlation);
        }
        (correlation.norm_sqr() / (self.reference_energy * energy), correlation)
    }

    /// Last sample index the header depends on
    fn header_end(&self, start: usize) -> usize {
        let units = match &self.ofdm {
            Some(rx) => (1 + rx.layout.header_blocks()) * rx.layout.block_len(),
            None => PREAMBLE_LEN + HEADER_SYMBOLS,
        };
        start + (units - 1) * self.sps
    }

    /// Frame length in symbol periods
    fn frame_symbols(&self, header: &FrameHeader) -> usize {
        let payload_symbols = header
            .mod_scheme
            .symbol_count(self.coded_len(header));
        match &self.ofdm {
            Some(rx) => {
                let layout = &rx.layout;
                (1 + layout.header_blocks() + layout.blocks_for(payload_symbols)) * layout.block_len()
            }
            None => PREAMBLE_LEN + HEADER_SYMBOLS + payload_symbols,
        }
    }

    fn coded_len(&self, header: &FrameHeader) -> usize {
        let checked = header.payload_len as usize + header.checksum.len();
        header
            .inner_fec
            .encoded_len(header.outer_fec.encoded_len(checked))
    }

    fn decode_header(&self, start: usize, gain: Complex32) -> Result<FrameHeader> {
        let symbols = match &self.ofdm {
            Some(rx) => {
                let mut symbols = self.ofdm_symbols(rx, start, gain, 1, rx.layout.header_blocks());
                symbols.truncate(HEADER_SYMBOLS);
                symbols
            }
            None => self.symbols_at(start + PREAMBLE_LEN * self.sps, HEADER_SYMBOLS, gain),
        };
        let bytes = ModScheme::Bpsk.demodulate_bytes(&symbols, FRAME_HEADER_SIZE);
        FrameHeader::from_bytes(&bytes)
    }

    fn decode_payload(&mut self, start: usize, gain: Complex32, header: &FrameHeader) -> Result<Vec<u8>> {
        let coded_len = self.coded_len(header);
        let count = header.mod_scheme.symbol_count(coded_len);
        let symbols = match &self.ofdm {
            Some(rx) => {
                let first = 1 + rx.layout.header_blocks();
                let mut symbols = self.ofdm_symbols(rx, start, gain, first, rx.layout.blocks_for(count));
                symbols.truncate(count);
                symbols
            }
            None => self.symbols_at(
                start + (PREAMBLE_LEN + HEADER_SYMBOLS) * self.sps,
                count,
                gain,
            ),
        };
        let coded = header.mod_scheme.demodulate_bytes(&symbols, coded_len);

        let coder = match self.coder.take() {
            Some(coder) if coder.matches(header) => coder,
            _ => FrameCoder::from_header(header)?,
        };
        let decoded = coder.decode(&coded, header.payload_len as usize);
        self.coder = Some(coder);
        decoded
    }

    /// `count` symbols one period apart from `first`, gain removed
    fn symbols_at(&self, first: usize, count: usize, gain: Complex32) -> Vec<Complex32> {
        (0..count)
            .map(|i| self.sample(first + i * self.sps) / gain)
            .collect()
    }

    /// Data-bin values of `count` OFDM blocks starting with block `first`
    fn ofdm_symbols(
        &self,
        rx: &OfdmRx,
        start: usize,
        gain: Complex32,
        first: usize,
        count: usize,
    ) -> Vec<Complex32> {
        let layout = &rx.layout;
        let size = layout.size();
        let scale = 1.0 / (size as f32 * layout.time_scale());
        let mut symbols = Vec::with_capacity(count * layout.data_bins().len());
        let mut spectrum = vec![Complex32::new(0.0, 0.0); size];

        for block in first..first + count {
            let body = start + (block * layout.block_len() + layout.cyclic_prefix_len()) * self.sps;
            for (i, bin) in spectrum.iter_mut().enumerate() {
                *bin = self.sample(body + i * self.sps);
            }
            rx.fft.process(&mut spectrum);
            spectrum.iter_mut().for_each(|x| *x = *x * scale / gain);

            // residual common phase from the pilots
            let pilot_sum: Complex32 = layout
                .pilot_bins()
                .iter()
                .map(|&bin| spectrum[bin] * layout.pilot_value().conj())
                .sum();
            let rotation = if pilot_sum.norm() > 0.0 {
                pilot_sum.conj() / pilot_sum.norm()
            } else {
                Complex32::new(1.0, 0.0)
            };

            symbols.extend(layout.data_bins().iter().map(|&bin| spectrum[bin] * rotation));
        }
        symbols
    }

    fn trim(&mut self) {
        let keep_from = match self.state {
            RxState::Searching { from } => from,
            RxState::Locked { start, .. } => start,
        };
        let stale = keep_from.saturating_sub(self.origin).min(self.baseband.len());
        if stale > TRIM_THRESHOLD {
            self.baseband.drain(..stale);
            self.origin += stale;
        }
    }
}
