use crate::config::ModulatorOptions;
use rustfft::num_complex::Complex32;
use std::collections::VecDeque;
use std::f64::consts::PI;

/// Root-raised-cosine taps, `2 * delay * sps + 1` long, scaled to unit energy
///
/// The receiver's matched filter uses the same taps, so the cascade is a
/// raised-cosine pulse with zero inter-symbol interference at symbol centres.
pub fn rrc_taps(sps: usize, delay: usize, beta: f32) -> Vec<f32> {
    let beta = beta as f64;
    let len = 2 * delay * sps + 1;
    let mut taps: Vec<f64> = (0..len)
        .map(|i| {
            let t = (i as f64 - (delay * sps) as f64) / sps as f64;
            if t.abs() < 1e-9 {
                1.0 - beta + 4.0 * beta / PI
            } else if beta > 0.0 && (1.0 - (4.0 * beta * t).powi(2)).abs() < 1e-9 {
                let arg = PI / (4.0 * beta);
                beta / 2f64.sqrt()
                    * ((1.0 + 2.0 / PI) * arg.sin() + (1.0 - 2.0 / PI) * arg.cos())
            } else {
                let num = (PI * t * (1.0 - beta)).sin() + 4.0 * beta * t * (PI * t * (1.0 + beta)).cos();
                let den = PI * t * (1.0 - (4.0 * beta * t).powi(2));
                num / den
            }
        })
        .collect();

    let energy: f64 = taps.iter().map(|h| h * h).sum();
    let scale = 1.0 / energy.sqrt();
    taps.iter_mut().for_each(|h| *h *= scale);
    taps.into_iter().map(|h| h as f32).collect()
}

/// Pulse-shaping modulator: interpolates symbols with an RRC filter and
/// mixes the complex baseband up to a real carrier.
pub struct Modulator {
    sps: usize,
    delay: usize,
    gain: f32,
    omega: f64,
    phase: f64,
    taps: Vec<f32>,
    /// `history[j]` is the symbol sent `j` symbol periods ago
    history: VecDeque<Complex32>,
}

impl Modulator {
    pub fn new(opt: &ModulatorOptions, native_sample_rate: u32) -> Self {
        let sps = opt.samples_per_symbol.max(1);
        let taps = rrc_taps(sps, opt.symbol_delay, opt.excess_bw);
        let history = VecDeque::from(vec![Complex32::new(0.0, 0.0); 2 * opt.symbol_delay + 1]);
        Self {
            sps,
            delay: opt.symbol_delay,
            gain: opt.gain,
            omega: 2.0 * PI * opt.center_frequency as f64 / native_sample_rate as f64,
            phase: 0.0,
            taps,
            history,
        }
    }

    pub fn samples_per_symbol(&self) -> usize {
        self.sps
    }

    /// Exact number of samples `emit` produces for `symbol_count` symbols
    pub fn sample_len(&self, symbol_count: usize) -> usize {
        symbol_count * self.sps
    }

    /// Symbols that fit in `sample_count` samples, rounded down
    pub fn symbol_len(&self, sample_count: usize) -> usize {
        sample_count / self.sps
    }

    pub fn flush_sample_len(&self) -> usize {
        self.sample_len(2 * self.delay)
    }

    /// Modulate `symbols` into `out`, returning the sample count written
    pub fn emit(&mut self, symbols: &[Complex32], out: &mut [f32]) -> usize {
        debug_assert!(out.len() >= self.sample_len(symbols.len()));
        for (block, &symbol) in out.chunks_exact_mut(self.sps).zip(symbols) {
            self.push_symbol(symbol, block);
        }
        self.sample_len(symbols.len())
    }

    /// Drain the filter tail by sending zero symbols; writes `flush_sample_len` samples
    pub fn flush(&mut self, out: &mut [f32]) -> usize {
        let len = self.flush_sample_len();
        debug_assert!(out.len() >= len);
        for block in out[..len].chunks_exact_mut(self.sps) {
            self.push_symbol(Complex32::new(0.0, 0.0), block);
        }
        len
    }

    pub fn reset(&mut self) {
        self.history.iter_mut().for_each(|s| *s = Complex32::new(0.0, 0.0));
        self.phase = 0.0;
    }

    fn push_symbol(&mut self, symbol: Complex32, block: &mut [f32]) {
        self.history.pop_back();
        self.history.push_front(symbol);

        for (p, sample) in block.iter_mut().enumerate() {
            let mut baseband = Complex32::new(0.0, 0.0);
            for (j, &past) in self.history.iter().enumerate() {
                match self.taps.get(p + j * self.sps) {
                    Some(&tap) => baseband += past * tap,
                    None => break,
                }
            }

            let (sin, cos) = self.phase.sin_cos();
            *sample = self.gain * (baseband.re * cos as f32 - baseband.im * sin as f32);

            self.phase += self.omega;
            if self.phase > PI {
                self.phase -= 2.0 * PI;
            }
        }
    }
}
