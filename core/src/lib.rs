//! Streaming acoustic modem transmitter
//!
//! Turns byte payloads into audio samples: payloads are cut into
//! checksummed, FEC-protected frames, mapped to single-carrier or OFDM
//! symbols, pulse-shaped onto a carrier and optionally resampled to the
//! caller's output rate. A loopback [`Decoder`] recovers the payload.

pub mod buffer;
pub mod config;
pub mod constellation;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod fec;
pub mod frame;
pub mod framing;
pub mod modulator;
pub mod ofdm;
pub mod resample;

pub use config::{EncoderOptions, ModulatorOptions, OfdmOptions, Profile, ResamplerOptions};
pub use decoder::Decoder;
pub use encoder::Encoder;
pub use error::{ModemError, Result};

// Sample rate modulation and filtering run at
pub const NATIVE_SAMPLE_RATE: u32 = 44100;

// Frame configuration
pub const FRAME_HEADER_SIZE: usize = 8; // payload length (2) + scheme ids (4) + CRC-16 (2)
pub const PREAMBLE_LEN: usize = 63; // symbols, one period of a 6-bit LFSR
pub const MAX_FRAME_LEN: usize = u16::MAX as usize;

// FEC configuration
pub const RS_DATA_BYTES: usize = 64;
