use crate::config::ResamplerOptions;
use std::collections::VecDeque;
use std::f64::consts::PI;

/// Streaming arbitrary-rate resampler
///
/// Output sample `k` is the band-limited interpolation of the input at input
/// time `k / rate`, so the output stream is time-aligned with the input. An
/// output is released once every input within `delay` samples of its time has
/// been consumed; pushing `delay` zeros after the last real input releases the
/// rest.
///
/// The interpolation kernel is a Kaiser-windowed sinc stored as a polyphase
/// bank of `filter_bank_size` phases per input sample, with linear
/// interpolation between adjacent phases.
pub struct Resampler {
    rate: f64,
    delay: usize,
    bank_size: usize,
    prototype: Vec<f32>,
    /// Most recent inputs; element `i` is input index `consumed - window.len() + i`
    window: VecDeque<f32>,
    consumed: u64,
    produced: u64,
}

impl Resampler {
    /// `rate` is output rate over input rate
    pub fn new(rate: f64, opt: &ResamplerOptions) -> Self {
        let delay = opt.delay.max(1);
        let bank_size = opt.filter_bank_size.max(1);
        let cutoff = opt.bandwidth as f64 * rate.min(1.0);
        let beta = kaiser_beta(opt.attenuation as f64);

        let len = 2 * delay * bank_size + 1;
        let prototype = (0..len)
            .map(|i| {
                let t = i as f64 / bank_size as f64 - delay as f64;
                let sinc = if t.abs() < 1e-12 {
                    1.0
                } else {
                    let x = PI * 2.0 * cutoff * t;
                    x.sin() / x
                };
                (2.0 * cutoff * sinc * kaiser(t / delay as f64, beta)) as f32
            })
            .collect();

        Self {
            rate,
            delay,
            bank_size,
            prototype,
            window: VecDeque::from(vec![0.0; 2 * delay + 2]),
            consumed: 0,
            produced: 0,
        }
    }

    /// Input samples an output waits for past its own time
    pub fn delay(&self) -> usize {
        self.delay
    }

    /// True when outputs can be produced from input already consumed
    pub fn has_pending_output(&self) -> bool {
        self.next_time() + (self.delay as f64) < self.consumed as f64
    }

    /// Resample as much of `input` as fits into `output`.
    ///
    /// Returns `(read, written)`. Input past `read` was not consumed and must be
    /// offered again; pending outputs are always delivered before more input
    /// is taken.
    pub fn execute(&mut self, input: &[f32], output: &mut [f32]) -> (usize, usize) {
        let mut read = 0;
        let mut written = 0;
        loop {
            while written < output.len() && self.has_pending_output() {
                output[written] = self.interpolate(self.next_time());
                self.produced += 1;
                written += 1;
            }
            if written == output.len() || read == input.len() {
                break;
            }
            self.window.pop_front();
            self.window.push_back(input[read]);
            self.consumed += 1;
            read += 1;
        }
        (read, written)
    }

    pub fn reset(&mut self) {
        self.window.iter_mut().for_each(|x| *x = 0.0);
        self.consumed = 0;
        self.produced = 0;
    }

    fn next_time(&self) -> f64 {
        self.produced as f64 / self.rate
    }

    fn interpolate(&self, time: f64) -> f32 {
        let delay = self.delay as f64;
        let first = (time - delay).ceil() as i64;
        let last = (time + delay).floor() as i64;
        let base = self.consumed as i64 - self.window.len() as i64;

        let mut acc = 0.0f32;
        for j in first..=last {
            let Some(&x) = usize::try_from(j - base).ok().and_then(|i| self.window.get(i)) else {
                continue;
            };
            acc += x * self.kernel(time - j as f64);
        }
        acc
    }

    /// Prototype value at offset `t` input samples, `|t| <= delay`
    fn kernel(&self, t: f64) -> f32 {
        let pos = (t + self.delay as f64) * self.bank_size as f64;
        let last = self.prototype.len() - 1;
        if pos <= 0.0 {
            return self.prototype[0];
        }
        let index = pos.floor() as usize;
        if index >= last {
            return self.prototype[last];
        }
        let frac = (pos - index as f64) as f32;
        self.prototype[index] * (1.0 - frac) + self.prototype[index + 1] * frac
    }
}

fn kaiser_beta(attenuation: f64) -> f64 {
    if attenuation > 50.0 {
        0.1102 * (attenuation - 8.7)
    } else if attenuation > 21.0 {
        0.5842 * (attenuation - 21.0).powf(0.4) + 0.07886 * (attenuation - 21.0)
    } else {
        0.0
    }
}

/// Kaiser window at normalized position `u` in [-1, 1]
fn kaiser(u: f64, beta: f64) -> f64 {
    if u.abs() > 1.0 {
        return 0.0;
    }
    bessel_i0(beta * (1.0 - u * u).sqrt()) / bessel_i0(beta)
}

/// Zeroth-order modified Bessel function of the first kind
fn bessel_i0(x: f64) -> f64 {
    let half = x / 2.0;
    let mut term = 1.0;
    let mut sum = 1.0;
    for k in 1..64 {
        term *= half / k as f64;
        let squared = term * term;
        sum += squared;
        if squared < sum * 1e-16 {
            break;
        }
    }
    sum
}
