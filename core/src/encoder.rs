use crate::buffer::StagedBuffer;
use crate::config::EncoderOptions;
use crate::error::{ModemError, Result};
use crate::frame::{FrameGen, FrameGenerator};
use crate::modulator::Modulator;
use crate::resample::Resampler;
use crate::MAX_FRAME_LEN;
use rustfft::num_complex::Complex32;

/// Streaming transmitter
///
/// Turns a borrowed payload into audio samples on demand. Each call to
/// [`Encoder::emit`] fills as much of the caller's buffer as the message
/// allows; successive calls form one gap-free stream. Samples pass through
/// these stages:
///
/// payload bytes -> frames -> symbols -> native-rate samples -> output-rate samples
///
/// Native-rate samples that did not fit into the caller's buffer stay staged
/// until the next call.
pub struct Encoder<'a> {
    opt: EncoderOptions,
    frame_gen: FrameGen,
    modulator: Modulator,
    resampler: Option<Resampler>,
    resample_rate: f64,
    symbols: StagedBuffer<Complex32>,
    samples: StagedBuffer<f32>,
    payload: &'a [u8],
    has_flushed: bool,
}

impl<'a> Encoder<'a> {
    pub fn new(opt: &EncoderOptions) -> Result<Self> {
        let mut opt = opt.clone();
        opt.frame_len = opt.frame_len.min(MAX_FRAME_LEN);
        opt.is_close_frame = false;

        let frame_gen = FrameGen::new(&opt)?;
        let modulator = Modulator::new(&opt.modulation, opt.native_sample_rate);

        let symbols = StagedBuffer::with_capacity(frame_gen.symbol_block_len());
        let samples = StagedBuffer::with_capacity(modulator.sample_len(symbols.capacity()));

        let (resampler, resample_rate) = if opt.needs_resampler() {
            let rate = opt.resample_ratio();
            (Some(Resampler::new(rate, &opt.resampler)), rate)
        } else {
            (None, 1.0)
        };

        log::debug!(
            "Encoder created: {} mode, frame_len {}, {} Hz output, {} Hz native",
            if opt.is_ofdm { "OFDM" } else { "single-carrier" },
            opt.frame_len,
            opt.sample_rate,
            opt.native_sample_rate
        );

        Ok(Self {
            opt,
            frame_gen,
            modulator,
            resampler,
            resample_rate,
            symbols,
            samples,
            payload: &[],
            has_flushed: true,
        })
    }

    pub fn frame_len(&self) -> usize {
        self.opt.frame_len
    }

    pub fn is_close_frame(&self) -> bool {
        self.opt.is_close_frame
    }

    /// Payload bytes not yet placed into a frame
    pub fn payload_remaining(&self) -> usize {
        self.payload.len()
    }

    /// Arm the encoder with a new message.
    ///
    /// Anything left of the previous message is discarded; returns true when
    /// there was something to discard.
    pub fn set_payload(&mut self, payload: &'a [u8]) -> bool {
        let had_payload = !self.payload.is_empty()
            || self.frame_gen.frame_pending()
            || !self.samples.is_empty()
            || self
                .resampler
                .as_ref()
                .is_some_and(|r| r.has_pending_output());

        if had_payload {
            log::debug!(
                "Discarding {} unsent payload bytes and {} staged samples",
                self.payload.len(),
                self.samples.unread()
            );
        }

        self.payload = payload;
        self.samples.clear();
        self.symbols.clear();
        self.has_flushed = false;

        self.modulator.reset();
        self.frame_gen.reset();
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.reset();
        }

        had_payload
    }

    /// Native-rate samples one frame carrying `data_len` bytes occupies,
    /// excluding the flush tail
    pub fn sample_len(&self, data_len: usize) -> Result<usize> {
        let symbols = self.frame_gen.measure(data_len)?;
        Ok(self.modulator.sample_len(symbols))
    }

    /// Fill `output` with the next samples of the message.
    ///
    /// Returns the count written, at most `output.len()`. Fewer than requested
    /// means the message has ended. In close-frame mode a frame boundary ends
    /// the call instead, and the rest of `output` is zeroed and counted.
    pub fn emit(&mut self, output: &mut [f32]) -> usize {
        let capacity = output.len();
        let mut written = 0;
        let mut frame_closed = false;

        while written < capacity {
            let remaining = capacity - written;

            if self.has_staged_output() {
                written += self.drain(&mut output[written..]);
                continue;
            }

            if !self.frame_gen.frame_pending() {
                let do_close_frame = self.opt.is_close_frame && written > 0;
                if self.payload.is_empty() || do_close_frame {
                    if self.has_flushed {
                        frame_closed = do_close_frame && !self.payload.is_empty();
                        break;
                    }
                    self.stage_flush();
                    continue;
                }
                self.consume();
                continue;
            }

            self.fill(remaining);
        }

        if frame_closed {
            output[written..].fill(0.0);
            written = capacity;
        }
        written
    }

    /// Shrink `frame_len` until one whole frame, flush tail included, fits in
    /// `sample_budget` output samples.
    ///
    /// Puts the encoder into close-frame mode for good: from now on every
    /// frame is flushed on its own. Never grows `frame_len`.
    pub fn clamp_frame_len(&mut self, sample_budget: usize) -> usize {
        self.opt.is_close_frame = true;

        let rate = self.resample_rate;
        let delay = self.resampler.as_ref().map_or(0, |r| r.delay());
        let tail = self.modulator.flush_sample_len() + delay;

        let native_budget = (sample_budget as f64 / rate).ceil() + rate.ceil();
        let native_budget = (native_budget as usize).saturating_sub(tail);

        let fits = |frame_len: usize| {
            self.sample_len(frame_len).is_ok_and(|projected| {
                projected <= native_budget && self.output_len(projected + tail) <= sample_budget
            })
        };

        if fits(self.opt.frame_len) {
            return self.opt.frame_len;
        }

        // max is known too long, min is known to fit
        let mut max_frame_len = self.opt.frame_len;
        let mut min_frame_len = 0;
        let mut frame_len = max_frame_len / 2;
        while max_frame_len - min_frame_len > 1 {
            if fits(frame_len) {
                min_frame_len = frame_len;
            } else {
                max_frame_len = frame_len;
            }
            frame_len = (max_frame_len - min_frame_len) / 2 + min_frame_len;
        }

        if frame_len == 0 {
            log::warn!(
                "Budget of {} samples cannot hold any payload; frames will be empty",
                sample_budget
            );
        }
        log::debug!(
            "Clamped frame_len from {} to {} for a {} sample budget",
            self.opt.frame_len,
            frame_len,
            sample_budget
        );
        self.opt.frame_len = frame_len;
        frame_len
    }

    /// Upper bound on the output samples `native_len` staged samples release
    fn output_len(&self, native_len: usize) -> usize {
        if self.resampler.is_none() {
            return native_len;
        }
        // one extra for an output landing exactly on the last input
        (native_len as f64 * self.resample_rate).floor() as usize + 1
    }

    fn has_staged_output(&self) -> bool {
        !self.samples.is_empty()
            || self
                .resampler
                .as_ref()
                .is_some_and(|r| r.has_pending_output())
    }

    /// Move staged samples into `output`, resampling on the way if needed
    fn drain(&mut self, output: &mut [f32]) -> usize {
        match self.resampler.as_mut() {
            Some(resampler) => {
                let (read, written) = resampler.execute(self.samples.pending(), output);
                self.samples.consume(read);
                written
            }
            None => {
                let count = self.samples.unread().min(output.len());
                output[..count].copy_from_slice(&self.samples.pending()[..count]);
                self.samples.consume(count);
                count
            }
        }
    }

    /// Stage the modulator tail plus enough silence to push the last real
    /// samples out of the resampler
    fn stage_flush(&mut self) {
        let delay = self.resampler.as_ref().map_or(0, |r| r.delay());
        let tail = self.modulator.flush_sample_len();

        let staged = self.samples.fill(tail + delay);
        let flushed = self.modulator.flush(staged);
        staged[flushed..].fill(0.0);
        self.samples.truncate(flushed + delay);

        self.has_flushed = true;
    }

    /// Assemble the next frame from at most `frame_len` payload bytes
    fn consume(&mut self) {
        let len = self.opt.frame_len.min(self.payload.len());
        let (chunk, rest) = self.payload.split_at(len);
        self.payload = rest;

        if let Err(e) = self.frame_gen.assemble(chunk) {
            log::error!(
                "Failed to assemble frame of {} bytes: {}; dropping {} remaining bytes",
                len,
                e,
                self.payload.len()
            );
            self.payload = &[];
        }
    }

    /// Modulate enough symbols of the pending frame to cover `remaining`
    /// output samples
    fn fill(&mut self, remaining: usize) {
        let sps = self.modulator.samples_per_symbol();
        let wanted = (remaining as f64 / self.resample_rate).ceil() as usize;
        let mut symbols_wanted = self.modulator.symbol_len(wanted);
        if wanted % sps != 0 {
            symbols_wanted += 1;
        }

        let symbol_count = self.frame_gen.write_symbols(symbols_wanted, &mut self.symbols);
        let needed = self.modulator.sample_len(symbol_count);
        let staged = self.samples.fill(needed);
        let produced = self.modulator.emit(self.symbols.pending(), staged);
        self.samples.truncate(produced);
        self.symbols.clear();

        self.has_flushed = false;
    }
}

/// Build an encoder, failing when no options are given
pub fn create<'a>(opt: Option<&EncoderOptions>) -> Result<Encoder<'a>> {
    match opt {
        Some(opt) => Encoder::new(opt),
        None => Err(ModemError::MissingOptions),
    }
}

/// [`Encoder::emit`] that does nothing without an encoder
pub fn emit(encoder: Option<&mut Encoder>, output: &mut [f32]) -> usize {
    encoder.map_or(0, |e| e.emit(output))
}

/// [`Encoder::clamp_frame_len`] that does nothing without an encoder
pub fn clamp_frame_len(encoder: Option<&mut Encoder>, sample_budget: usize) -> usize {
    encoder.map_or(0, |e| e.clamp_frame_len(sample_budget))
}

/// Release an encoder and everything it owns
pub fn destroy(encoder: Option<Encoder>) {
    drop(encoder);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emit_all(encoder: &mut Encoder, chunk: usize) -> Vec<f32> {
        let mut out = Vec::new();
        let mut buf = vec![0.0; chunk];
        loop {
            let n = encoder.emit(&mut buf);
            out.extend_from_slice(&buf[..n]);
            if n < chunk {
                break;
            }
        }
        out
    }

    #[test]
    fn test_create_requires_options() {
        assert!(matches!(create(None), Err(ModemError::MissingOptions)));
        assert!(create(Some(&EncoderOptions::modem())).is_ok());
    }

    #[test]
    fn test_absent_encoder_is_noop() {
        let mut buf = [1.0f32; 16];
        assert_eq!(emit(None, &mut buf), 0);
        assert_eq!(clamp_frame_len(None, 4096), 0);
        destroy(None);
        assert!(buf.iter().all(|&s| s == 1.0));
    }

    #[test]
    fn test_new_encoder_is_silent() {
        let mut encoder = Encoder::new(&EncoderOptions::modem()).unwrap();
        let mut buf = vec![0.0; 256];
        assert_eq!(encoder.emit(&mut buf), 0);
    }

    #[test]
    fn test_set_payload_reports_discarded_state() {
        let payload = vec![0x5A; 500];
        let mut encoder = Encoder::new(&EncoderOptions::modem()).unwrap();
        assert!(!encoder.set_payload(&payload));

        let mut buf = vec![0.0; 128];
        encoder.emit(&mut buf);
        assert!(encoder.set_payload(&payload));

        emit_all(&mut encoder, 4096);
        assert!(!encoder.set_payload(&payload));
    }

    #[test]
    fn test_chunking_does_not_change_stream() {
        let payload: Vec<u8> = (0..700).map(|i| (i * 7) as u8).collect();
        for opt in [
            EncoderOptions::modem(),
            EncoderOptions::ofdm().with_sample_rate(48000),
        ] {
            let mut a = Encoder::new(&opt).unwrap();
            a.set_payload(&payload);
            let whole = emit_all(&mut a, 1 << 16);

            let mut b = Encoder::new(&opt).unwrap();
            b.set_payload(&payload);
            let pieces = emit_all(&mut b, 333);

            assert_eq!(whole.len(), pieces.len());
            assert_eq!(whole, pieces);
        }
    }

    #[test]
    fn test_emit_never_exceeds_capacity() {
        let payload = vec![0xC3; 300];
        let mut encoder = Encoder::new(&EncoderOptions::robust().with_sample_rate(48000)).unwrap();
        encoder.set_payload(&payload);
        for capacity in [1, 2, 7, 100, 1000, 3] {
            let mut buf = vec![0.0; capacity];
            assert!(encoder.emit(&mut buf) <= capacity);
        }
    }

    #[test]
    fn test_stream_length_matches_prediction() {
        let payload = vec![0x11; 250];
        let opt = EncoderOptions::modem();
        let mut encoder = Encoder::new(&opt).unwrap();
        encoder.set_payload(&payload);
        let predicted = encoder.sample_len(payload.len()).unwrap();
        let flush = encoder.modulator.flush_sample_len();

        let stream = emit_all(&mut encoder, 1000);
        assert_eq!(stream.len(), predicted + flush);
    }

    #[test]
    fn test_clamp_never_grows() {
        let mut encoder = Encoder::new(&EncoderOptions::modem()).unwrap();
        let start = encoder.frame_len();

        let roomy = encoder.clamp_frame_len(1 << 20);
        assert_eq!(roomy, start);
        assert!(encoder.is_close_frame());

        let first = encoder.clamp_frame_len(16384);
        let second = encoder.clamp_frame_len(8192);
        assert!(first <= start);
        assert!(second <= first);
        assert_eq!(encoder.clamp_frame_len(1 << 20), second);
    }

    #[test]
    fn test_clamped_frame_fits_budget() {
        let budget = 12000;
        let opt = EncoderOptions::robust().with_sample_rate(48000);
        let payload = vec![0xEE; 1000];
        let mut encoder = Encoder::new(&opt).unwrap();
        let frame_len = encoder.clamp_frame_len(budget);
        assert!(frame_len > 0);
        encoder.set_payload(&payload);

        let mut buf = vec![1.0; budget];
        let mut frames = 0;
        let mut total = 0;
        loop {
            let n = encoder.emit(&mut buf);
            if n == 0 {
                break;
            }
            frames += 1;
            total += n;
            if n < budget {
                break;
            }
        }
        assert_eq!(frames, payload.len().div_ceil(frame_len));
        assert!(total > 0);
    }

    #[test]
    fn test_close_frame_pads_with_zeros() {
        let opt = EncoderOptions::modem();
        let payload = vec![0x3C; 200];
        let mut encoder = Encoder::new(&opt).unwrap();
        encoder.clamp_frame_len(16384);
        let frame_len = encoder.clamp_frame_len(8000);
        assert!(frame_len < payload.len());
        encoder.set_payload(&payload);

        let mut buf = vec![1.0; 8000];
        let n = encoder.emit(&mut buf);
        assert_eq!(n, buf.len());

        // the frame and its flush tail end before the budget does
        let frame_samples = encoder.sample_len(frame_len).unwrap()
            + encoder.modulator.flush_sample_len();
        assert!(frame_samples < buf.len());
        assert!(buf[frame_samples..].iter().all(|&s| s == 0.0));
        assert_eq!(encoder.payload_remaining(), payload.len() - frame_len);
    }

    #[test]
    fn test_huge_capacity_is_filled_in_one_call() {
        let payload = vec![0x77; 2000];
        let opt = EncoderOptions::modem();

        let mut small = Encoder::new(&opt).unwrap();
        small.set_payload(&payload);
        let reference = emit_all(&mut small, 512);

        let mut big = Encoder::new(&opt).unwrap();
        big.set_payload(&payload);
        let mut buf = vec![0.0; reference.len() * 4];
        let n = big.emit(&mut buf);
        assert_eq!(n, reference.len());
        assert_eq!(&buf[..n], &reference[..]);
    }

    #[test]
    fn test_resampler_flush_adds_delay_padding() {
        let payload = vec![0x42; 40];
        let native = EncoderOptions::modem();
        let resampled = EncoderOptions::modem().with_sample_rate(48000);

        let mut a = Encoder::new(&native).unwrap();
        a.set_payload(&payload);
        let native_len = emit_all(&mut a, 4096).len();

        let mut b = Encoder::new(&resampled).unwrap();
        b.set_payload(&payload);
        let out_len = emit_all(&mut b, 4096).len();

        let expected = native_len as f64 * resampled.resample_ratio();
        assert!((out_len as f64 - expected).abs() <= 2.0, "{} vs {}", out_len, expected);
    }

    #[test]
    fn test_frame_len_capped_at_construction() {
        let mut opt = EncoderOptions::modem();
        opt.frame_len = 1 << 20;
        let encoder = Encoder::new(&opt).unwrap();
        assert_eq!(encoder.frame_len(), MAX_FRAME_LEN);
    }
}
