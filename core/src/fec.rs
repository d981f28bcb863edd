use crate::error::{ModemError, Result};
use crate::RS_DATA_BYTES;
use reed_solomon_erasure::galois_8::Field;
use reed_solomon_erasure::ReedSolomon;

/// Forward error correction applied to a frame's checked payload
///
/// Each frame runs its payload through the outer scheme first and the inner
/// scheme second; the receiver undoes them in reverse order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FecScheme {
    None,
    /// Three copies of the data, bitwise majority on decode
    Repeat3,
    /// Hamming(7,4) per nibble, corrects one bit per codeword
    Hamming74,
    /// Shortened Reed-Solomon, 8 parity bytes per 64 data bytes.
    ///
    /// Error positions are unknown to the receiver and the codec only
    /// reconstructs erasures, so decoding detects corrupted blocks without
    /// correcting them.
    ReedSolomon8,
    /// Shortened Reed-Solomon, 16 parity bytes per 64 data bytes; detection
    /// only, like [`FecScheme::ReedSolomon8`]
    ReedSolomon16,
}

impl FecScheme {
    pub fn id(self) -> u8 {
        match self {
            FecScheme::None => 0,
            FecScheme::Repeat3 => 1,
            FecScheme::Hamming74 => 2,
            FecScheme::ReedSolomon8 => 3,
            FecScheme::ReedSolomon16 => 4,
        }
    }

    pub fn from_id(id: u8) -> Result<Self> {
        match id {
            0 => Ok(FecScheme::None),
            1 => Ok(FecScheme::Repeat3),
            2 => Ok(FecScheme::Hamming74),
            3 => Ok(FecScheme::ReedSolomon8),
            4 => Ok(FecScheme::ReedSolomon16),
            _ => Err(ModemError::UnknownScheme { kind: "FEC", id }),
        }
    }

    fn parity_bytes(self) -> usize {
        match self {
            FecScheme::ReedSolomon8 => 8,
            FecScheme::ReedSolomon16 => 16,
            _ => 0,
        }
    }

    /// Coded length of `data_len` input bytes
    pub fn encoded_len(self, data_len: usize) -> usize {
        match self {
            FecScheme::None => data_len,
            FecScheme::Repeat3 => data_len * 3,
            FecScheme::Hamming74 => (data_len * 14).div_ceil(8),
            FecScheme::ReedSolomon8 | FecScheme::ReedSolomon16 => {
                data_len + data_len.div_ceil(RS_DATA_BYTES) * self.parity_bytes()
            }
        }
    }
}

/// Encoder/decoder for one [`FecScheme`]
pub struct FecCodec {
    scheme: FecScheme,
    rs: Option<ReedSolomon<Field>>,
}

impl FecCodec {
    pub fn new(scheme: FecScheme) -> Result<Self> {
        let rs = match scheme.parity_bytes() {
            0 => None,
            parity => Some(ReedSolomon::new(RS_DATA_BYTES, parity).map_err(|_| {
                ModemError::InvalidConfig("Failed to create RS codec".to_string())
            })?),
        };
        Ok(Self { scheme, rs })
    }

    pub fn scheme(&self) -> FecScheme {
        self.scheme
    }

    /// Append the coded form of `data` to `out`
    pub fn encode(&self, data: &[u8], out: &mut Vec<u8>) -> Result<()> {
        match (self.scheme, &self.rs) {
            (FecScheme::None, _) => out.extend_from_slice(data),
            (FecScheme::Repeat3, _) => {
                for _ in 0..3 {
                    out.extend_from_slice(data);
                }
            }
            (FecScheme::Hamming74, _) => {
                let mut writer = BitWriter::new(out);
                for &byte in data {
                    writer.push(hamming74_encode(byte >> 4), 7);
                    writer.push(hamming74_encode(byte & 0x0F), 7);
                }
                writer.finish();
            }
            (_, Some(rs)) => {
                for chunk in data.chunks(RS_DATA_BYTES) {
                    let shards = rs_encode_block(rs, chunk, self.scheme.parity_bytes())?;
                    out.extend_from_slice(chunk);
                    out.extend(shards[RS_DATA_BYTES..].iter().map(|shard| shard[0]));
                }
            }
            (_, None) => return Err(ModemError::FecError("RS codec missing".to_string())),
        }
        Ok(())
    }

    /// Recover `data_len` bytes from their coded form
    pub fn decode(&self, coded: &[u8], data_len: usize) -> Result<Vec<u8>> {
        if coded.len() < self.scheme.encoded_len(data_len) {
            return Err(ModemError::InvalidFrameSize);
        }

        match (self.scheme, &self.rs) {
            (FecScheme::None, _) => Ok(coded[..data_len].to_vec()),
            (FecScheme::Repeat3, _) => Ok((0..data_len)
                .map(|i| {
                    let (a, b, c) = (coded[i], coded[data_len + i], coded[2 * data_len + i]);
                    (a & b) | (a & c) | (b & c)
                })
                .collect()),
            (FecScheme::Hamming74, _) => {
                let mut reader = BitReader::new(coded);
                Ok((0..data_len)
                    .map(|_| {
                        let hi = hamming74_decode(reader.pull(7));
                        let lo = hamming74_decode(reader.pull(7));
                        (hi << 4) | lo
                    })
                    .collect())
            }
            (_, Some(rs)) => {
                let parity = self.scheme.parity_bytes();
                let mut decoded = Vec::with_capacity(data_len);
                let mut pos = 0;
                while decoded.len() < data_len {
                    let chunk_len = (data_len - decoded.len()).min(RS_DATA_BYTES);
                    let chunk = &coded[pos..pos + chunk_len];
                    let received = &coded[pos + chunk_len..pos + chunk_len + parity];

                    // recompute parity and reject the block on any mismatch
                    let shards = rs_encode_block(rs, chunk, parity)?;
                    let consistent = shards[RS_DATA_BYTES..]
                        .iter()
                        .map(|shard| shard[0])
                        .eq(received.iter().copied());
                    if !consistent {
                        return Err(ModemError::FecDecodeFailure);
                    }

                    decoded.extend_from_slice(chunk);
                    pos += chunk_len + parity;
                }
                Ok(decoded)
            }
            (_, None) => Err(ModemError::FecError("RS codec missing".to_string())),
        }
    }
}

/// Shortened RS: zero-prefix the chunk to a full block, then compute parity.
/// Returns one single-byte shard per data and parity position.
fn rs_encode_block(rs: &ReedSolomon<Field>, chunk: &[u8], parity: usize) -> Result<Vec<Vec<u8>>> {
    let padding = RS_DATA_BYTES - chunk.len();
    let mut shards: Vec<Vec<u8>> = (0..RS_DATA_BYTES + parity)
        .map(|i| {
            if i >= padding && i < RS_DATA_BYTES {
                vec![chunk[i - padding]]
            } else {
                vec![0u8]
            }
        })
        .collect();

    rs.encode(&mut shards)
        .map_err(|e| ModemError::FecError(format!("Failed to encode with RS: {:?}", e)))?;
    Ok(shards)
}

/// Hamming(7,4) codeword, bit positions 1..=7 stored MSB-first as
/// p1 p2 d0 p3 d1 d2 d3
fn hamming74_encode(nibble: u8) -> u8 {
    let d0 = (nibble >> 3) & 1;
    let d1 = (nibble >> 2) & 1;
    let d2 = (nibble >> 1) & 1;
    let d3 = nibble & 1;
    let p1 = d0 ^ d1 ^ d3;
    let p2 = d0 ^ d2 ^ d3;
    let p3 = d1 ^ d2 ^ d3;
    (p1 << 6) | (p2 << 5) | (d0 << 4) | (p3 << 3) | (d1 << 2) | (d2 << 1) | d3
}

fn hamming74_decode(codeword: u8) -> u8 {
    let mut bits = [0u8; 8];
    for (pos, bit) in bits.iter_mut().enumerate().skip(1) {
        *bit = (codeword >> (7 - pos)) & 1;
    }
    let s1 = bits[1] ^ bits[3] ^ bits[5] ^ bits[7];
    let s2 = bits[2] ^ bits[3] ^ bits[6] ^ bits[7];
    let s3 = bits[4] ^ bits[5] ^ bits[6] ^ bits[7];
    let syndrome = (s1 | (s2 << 1) | (s3 << 2)) as usize;
    if syndrome != 0 {
        bits[syndrome] ^= 1;
    }
    (bits[3] << 3) | (bits[5] << 2) | (bits[6] << 1) | bits[7]
}

struct BitWriter<'a> {
    out: &'a mut Vec<u8>,
    acc: u32,
    filled: u32,
}

impl<'a> BitWriter<'a> {
    fn new(out: &'a mut Vec<u8>) -> Self {
        Self { out, acc: 0, filled: 0 }
    }

    fn push(&mut self, value: u8, bits: u32) {
        self.acc = (self.acc << bits) | (value as u32 & ((1 << bits) - 1));
        self.filled += bits;
        while self.filled >= 8 {
            self.filled -= 8;
            self.out.push((self.acc >> self.filled) as u8);
        }
        self.acc &= (1 << self.filled) - 1;
    }

    fn finish(self) {
        if self.filled > 0 {
            self.out.push((self.acc << (8 - self.filled)) as u8);
        }
    }
}

struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn pull(&mut self, bits: usize) -> u8 {
        let mut value = 0u8;
        for _ in 0..bits {
            let bit = self
                .data
                .get(self.pos / 8)
                .map_or(0, |byte| (byte >> (7 - self.pos % 8)) & 1);
            value = (value << 1) | bit;
            self.pos += 1;
        }
        value
    }
}
