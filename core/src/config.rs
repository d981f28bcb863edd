use crate::constellation::ModScheme;
use crate::fec::FecScheme;
use crate::framing::CheckScheme;
use crate::NATIVE_SAMPLE_RATE;

/// OFDM block layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfdmOptions {
    /// FFT size; every block carries this many subcarriers (null, pilot or data)
    pub num_subcarriers: usize,
    /// Samples copied from the block tail to its front
    pub cyclic_prefix_len: usize,
    /// Cross-fade length between adjacent blocks, at most `cyclic_prefix_len`
    pub taper_len: usize,
}

impl Default for OfdmOptions {
    fn default() -> Self {
        Self {
            num_subcarriers: 64,
            cyclic_prefix_len: 16,
            taper_len: 4,
        }
    }
}

/// Pulse shaping and carrier settings shared by transmitter and receiver
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModulatorOptions {
    pub samples_per_symbol: usize,
    /// Root-raised-cosine semi-length, in symbols
    pub symbol_delay: usize,
    /// Root-raised-cosine roll-off in (0, 1]
    pub excess_bw: f32,
    /// Carrier frequency in Hz at the native rate
    pub center_frequency: f32,
    pub gain: f32,
}

impl Default for ModulatorOptions {
    fn default() -> Self {
        Self {
            samples_per_symbol: 8,
            symbol_delay: 4,
            excess_bw: 0.35,
            center_frequency: 9200.0,
            gain: 1.0,
        }
    }
}

/// Arbitrary-rate resampler settings, used only when the output rate differs
/// from the native rate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResamplerOptions {
    /// Filter semi-length in input samples; also the flush padding length
    pub delay: usize,
    /// Normalized cutoff in (0, 0.5)
    pub bandwidth: f32,
    /// Stop-band attenuation in dB
    pub attenuation: f32,
    /// Polyphase filters per input sample
    pub filter_bank_size: usize,
}

impl Default for ResamplerOptions {
    fn default() -> Self {
        Self {
            delay: 13,
            bandwidth: 0.45,
            attenuation: 60.0,
            filter_bank_size: 64,
        }
    }
}

/// Built-in profiles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    Ofdm,
    Modem,
    Robust,
}

impl Profile {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "ofdm" => Some(Profile::Ofdm),
            "modem" => Some(Profile::Modem),
            "robust" => Some(Profile::Robust),
            _ => None,
        }
    }
}

/// Configuration snapshot consumed by [`crate::Encoder`] and [`crate::Decoder`]
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderOptions {
    /// Rate the caller wants samples delivered at
    pub sample_rate: u32,
    /// Rate modulation and filtering run at
    pub native_sample_rate: u32,
    /// Largest payload chunk per frame; only ever shrinks once clamping runs
    pub frame_len: usize,
    pub checksum_scheme: CheckScheme,
    pub inner_fec_scheme: FecScheme,
    pub outer_fec_scheme: FecScheme,
    pub mod_scheme: ModScheme,
    pub is_ofdm: bool,
    pub ofdm: OfdmOptions,
    pub modulation: ModulatorOptions,
    pub resampler: ResamplerOptions,
    pub(crate) is_close_frame: bool,
}

impl EncoderOptions {
    pub fn profile(profile: Profile) -> Self {
        match profile {
            Profile::Ofdm => Self::ofdm(),
            Profile::Modem => Self::modem(),
            Profile::Robust => Self::robust(),
        }
    }

    /// OFDM, QPSK on 44 data subcarriers
    pub fn ofdm() -> Self {
        Self {
            frame_len: 400,
            checksum_scheme: CheckScheme::Crc32,
            inner_fec_scheme: FecScheme::None,
            outer_fec_scheme: FecScheme::ReedSolomon8,
            mod_scheme: ModScheme::Qpsk,
            is_ofdm: true,
            ofdm: OfdmOptions::default(),
            modulation: ModulatorOptions {
                samples_per_symbol: 6,
                symbol_delay: 4,
                excess_bw: 0.25,
                center_frequency: 9200.0,
                gain: 0.5,
            },
            ..Self::modem()
        }
    }

    /// Single carrier QPSK
    pub fn modem() -> Self {
        Self {
            sample_rate: NATIVE_SAMPLE_RATE,
            native_sample_rate: NATIVE_SAMPLE_RATE,
            frame_len: 300,
            checksum_scheme: CheckScheme::Crc32,
            inner_fec_scheme: FecScheme::None,
            outer_fec_scheme: FecScheme::ReedSolomon16,
            mod_scheme: ModScheme::Qpsk,
            is_ofdm: false,
            ofdm: OfdmOptions::default(),
            modulation: ModulatorOptions::default(),
            resampler: ResamplerOptions::default(),
            is_close_frame: false,
        }
    }

    /// Single carrier BPSK, slower symbols and a lower carrier
    pub fn robust() -> Self {
        Self {
            frame_len: 160,
            checksum_scheme: CheckScheme::Crc16,
            inner_fec_scheme: FecScheme::Hamming74,
            outer_fec_scheme: FecScheme::ReedSolomon16,
            mod_scheme: ModScheme::Bpsk,
            modulation: ModulatorOptions {
                samples_per_symbol: 12,
                symbol_delay: 3,
                excess_bw: 0.5,
                center_frequency: 4800.0,
                gain: 1.0,
            },
            ..Self::modem()
        }
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Set once adaptive clamping has run; never cleared
    pub fn is_close_frame(&self) -> bool {
        self.is_close_frame
    }

    /// Output rate over native rate
    pub fn resample_ratio(&self) -> f64 {
        self.sample_rate as f64 / self.native_sample_rate as f64
    }

    pub fn needs_resampler(&self) -> bool {
        self.sample_rate != self.native_sample_rate
    }
}

impl Default for EncoderOptions {
    fn default() -> Self {
        Self::modem()
    }
}
