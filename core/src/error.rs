use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModemError {
    #[error("Encoder options are missing")]
    MissingOptions,

    #[error("CRC mismatch in frame header")]
    HeaderCrcMismatch,

    #[error("Checksum mismatch in frame payload")]
    PayloadChecksumMismatch,

    #[error("FEC decode failure")]
    FecDecodeFailure,

    #[error("Invalid frame size")]
    InvalidFrameSize,

    #[error("Unknown {kind} identifier: {id}")]
    UnknownScheme { kind: &'static str, id: u8 },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("FEC error: {0}")]
    FecError(String),
}

pub type Result<T> = std::result::Result<T, ModemError>;
