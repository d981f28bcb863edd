use crate::constellation::ModScheme;
use crate::error::{ModemError, Result};
use crate::fec::FecScheme;
use crate::FRAME_HEADER_SIZE;

/// CRC-16-CCITT for header integrity verification
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u32 = 0xFFFF;
    for &byte in data {
        crc ^= (byte as u32) << 8;
        for _ in 0..8 {
            crc <<= 1;
            if crc & 0x10000 != 0 {
                crc ^= 0x1021;
            }
        }
    }
    (crc & 0xFFFF) as u16
}

/// CRC-8 using polynomial 0xD5 (x^8 + x^7 + x^6 + x^4 + x^2 + 1)
pub fn crc8(data: &[u8]) -> u8 {
    const POLYNOMIAL: u8 = 0xD5;
    let mut crc = 0u8;

    for &byte in data {
        crc ^= byte;
        for _ in 0..8 {
            if (crc & 0x80) != 0 {
                crc = (crc << 1) ^ POLYNOMIAL;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// CRC-32 (IEEE 802.3, reflected)
pub fn crc32(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for &byte in data {
        crc ^= byte as u32;
        for _ in 0..8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (0xEDB8_8320 & mask);
        }
    }
    !crc
}

/// Payload integrity check appended after each frame's payload chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckScheme {
    None,
    Crc8,
    Crc16,
    Crc32,
}

impl CheckScheme {
    pub fn id(self) -> u8 {
        match self {
            CheckScheme::None => 0,
            CheckScheme::Crc8 => 1,
            CheckScheme::Crc16 => 2,
            CheckScheme::Crc32 => 3,
        }
    }

    pub fn from_id(id: u8) -> Result<Self> {
        match id {
            0 => Ok(CheckScheme::None),
            1 => Ok(CheckScheme::Crc8),
            2 => Ok(CheckScheme::Crc16),
            3 => Ok(CheckScheme::Crc32),
            _ => Err(ModemError::UnknownScheme { kind: "checksum", id }),
        }
    }

    pub fn len(self) -> usize {
        match self {
            CheckScheme::None => 0,
            CheckScheme::Crc8 => 1,
            CheckScheme::Crc16 => 2,
            CheckScheme::Crc32 => 4,
        }
    }

    /// Append the big-endian checksum of `data` to `out`
    pub fn append(self, data: &[u8], out: &mut Vec<u8>) {
        match self {
            CheckScheme::None => {}
            CheckScheme::Crc8 => out.push(crc8(data)),
            CheckScheme::Crc16 => out.extend_from_slice(&crc16(data).to_be_bytes()),
            CheckScheme::Crc32 => out.extend_from_slice(&crc32(data).to_be_bytes()),
        }
    }

    /// Split `data ++ checksum` and verify, returning the payload
    pub fn verify(self, checked: &[u8]) -> Result<&[u8]> {
        let split = checked
            .len()
            .checked_sub(self.len())
            .ok_or(ModemError::InvalidFrameSize)?;
        let (payload, received) = checked.split_at(split);
        let mut expected = Vec::with_capacity(self.len());
        self.append(payload, &mut expected);
        if expected != received {
            return Err(ModemError::PayloadChecksumMismatch);
        }
        Ok(payload)
    }
}

/// Per-frame header: tells the receiver how the payload that follows is coded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub payload_len: u16,
    pub checksum: CheckScheme,
    pub inner_fec: FecScheme,
    pub outer_fec: FecScheme,
    pub mod_scheme: ModScheme,
}

impl FrameHeader {
    /// Layout: payload length (2, BE), checksum id, inner FEC id, outer FEC id,
    /// modulation id, CRC-16 of the preceding six bytes (2, BE)
    pub fn to_bytes(&self) -> [u8; FRAME_HEADER_SIZE] {
        let mut header = [0u8; FRAME_HEADER_SIZE];
        header[0] = (self.payload_len >> 8) as u8;
        header[1] = self.payload_len as u8;
        header[2] = self.checksum.id();
        header[3] = self.inner_fec.id();
        header[4] = self.outer_fec.id();
        header[5] = self.mod_scheme.id();
        let crc = crc16(&header[..6]);
        header[6] = (crc >> 8) as u8;
        header[7] = crc as u8;
        header
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < FRAME_HEADER_SIZE {
            return Err(ModemError::InvalidFrameSize);
        }

        let expected_crc = ((data[6] as u16) << 8) | (data[7] as u16);
        if crc16(&data[..6]) != expected_crc {
            return Err(ModemError::HeaderCrcMismatch);
        }

        Ok(Self {
            payload_len: ((data[0] as u16) << 8) | (data[1] as u16),
            checksum: CheckScheme::from_id(data[2])?,
            inner_fec: FecScheme::from_id(data[3])?,
            outer_fec: FecScheme::from_id(data[4])?,
            mod_scheme: ModScheme::from_id(data[5])?,
        })
    }
}
