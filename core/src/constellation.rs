use crate::error::{ModemError, Result};
use rustfft::num_complex::Complex32;
use std::f32::consts::{FRAC_1_SQRT_2, PI};

/// Modulation alphabet used for frame payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModScheme {
    Bpsk,
    Qpsk,
    Psk8,
    Qam16,
}

/// Gray order around the 8-PSK circle
const PSK8_GRAY: [u8; 8] = [0, 1, 3, 2, 6, 7, 5, 4];

/// Gray-coded amplitude levels for one QAM16 axis, indexed by the two bits
const QAM16_LEVELS: [f32; 4] = [-3.0, -1.0, 3.0, 1.0];

impl ModScheme {
    pub fn id(self) -> u8 {
        match self {
            ModScheme::Bpsk => 1,
            ModScheme::Qpsk => 2,
            ModScheme::Psk8 => 3,
            ModScheme::Qam16 => 4,
        }
    }

    pub fn from_id(id: u8) -> Result<Self> {
        match id {
            1 => Ok(ModScheme::Bpsk),
            2 => Ok(ModScheme::Qpsk),
            3 => Ok(ModScheme::Psk8),
            4 => Ok(ModScheme::Qam16),
            _ => Err(ModemError::UnknownScheme {
                kind: "modulation",
                id,
            }),
        }
    }

    pub fn bits_per_symbol(self) -> usize {
        match self {
            ModScheme::Bpsk => 1,
            ModScheme::Qpsk => 2,
            ModScheme::Psk8 => 3,
            ModScheme::Qam16 => 4,
        }
    }

    /// Symbols needed to carry `num_bytes`, the last one zero-padded
    pub fn symbol_count(self, num_bytes: usize) -> usize {
        (num_bytes * 8).div_ceil(self.bits_per_symbol())
    }

    /// Map the low `bits_per_symbol` bits of `value` to a unit-power point
    pub fn map(self, value: u8) -> Complex32 {
        match self {
            ModScheme::Bpsk => {
                if value & 1 == 0 {
                    Complex32::new(1.0, 0.0)
                } else {
                    Complex32::new(-1.0, 0.0)
                }
            }
            ModScheme::Qpsk => {
                let i = if value & 0b10 == 0 { 1.0 } else { -1.0 };
                let q = if value & 0b01 == 0 { 1.0 } else { -1.0 };
                Complex32::new(i * FRAC_1_SQRT_2, q * FRAC_1_SQRT_2)
            }
            ModScheme::Psk8 => {
                let position = PSK8_GRAY
                    .iter()
                    .position(|&g| g == value & 0b111)
                    .unwrap_or(0);
                Complex32::from_polar(1.0, 2.0 * PI * position as f32 / 8.0)
            }
            ModScheme::Qam16 => {
                let scale = 1.0 / 10f32.sqrt();
                let i = QAM16_LEVELS[((value >> 2) & 0b11) as usize];
                let q = QAM16_LEVELS[(value & 0b11) as usize];
                Complex32::new(i * scale, q * scale)
            }
        }
    }

    /// Hard decision: the value whose point is nearest to `symbol`
    pub fn demap(self, symbol: Complex32) -> u8 {
        let points = 1u8 << self.bits_per_symbol();
        (0..points)
            .min_by(|&a, &b| {
                let da = (self.map(a) - symbol).norm_sqr();
                let db = (self.map(b) - symbol).norm_sqr();
                da.total_cmp(&db)
            })
            .unwrap_or(0)
    }

    /// Map bytes MSB-first, appending to `out`
    pub fn modulate_bytes(self, bytes: &[u8], out: &mut Vec<Complex32>) {
        let bps = self.bits_per_symbol();
        let total_bits = bytes.len() * 8;
        let mut bit = 0;
        while bit < total_bits {
            let mut value = 0u8;
            for i in 0..bps {
                let pos = bit + i;
                let b = if pos < total_bits {
                    (bytes[pos / 8] >> (7 - pos % 8)) & 1
                } else {
                    0
                };
                value = (value << 1) | b;
            }
            out.push(self.map(value));
            bit += bps;
        }
    }

    /// Inverse of [`ModScheme::modulate_bytes`]; padding bits are dropped
    pub fn demodulate_bytes(self, symbols: &[Complex32], num_bytes: usize) -> Vec<u8> {
        let bps = self.bits_per_symbol();
        let mut bytes = vec![0u8; num_bytes];
        let total_bits = num_bytes * 8;
        for (n, &symbol) in symbols.iter().enumerate() {
            let value = self.demap(symbol);
            for i in 0..bps {
                let pos = n * bps + i;
                if pos >= total_bits {
                    break;
                }
                let b = (value >> (bps - 1 - i)) & 1;
                bytes[pos / 8] |= b << (7 - pos % 8);
            }
        }
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [ModScheme; 4] = [ModScheme::Bpsk, ModScheme::Qpsk, ModScheme::Psk8, ModScheme::Qam16];

    #[test]
    fn test_unit_average_power() {
        for scheme in ALL {
            let points = 1u8 << scheme.bits_per_symbol();
            let power: f32 = (0..points).map(|v| scheme.map(v).norm_sqr()).sum::<f32>() / points as f32;
            assert!((power - 1.0).abs() < 1e-5, "{:?} power {}", scheme, power);
        }
    }

    #[test]
    fn test_demap_recovers_every_point() {
        for scheme in ALL {
            for value in 0..(1u8 << scheme.bits_per_symbol()) {
                assert_eq!(scheme.demap(scheme.map(value)), value);
            }
        }
    }

    #[test]
    fn test_gray_neighbours_differ_by_one_bit() {
        for k in 0..8 {
            let a = PSK8_GRAY[k];
            let b = PSK8_GRAY[(k + 1) % 8];
            assert_eq!((a ^ b).count_ones(), 1);
        }
    }

    #[test]
    fn test_bytes_through_constellation() {
        let data = b"\x00\xffTonelink\x5a";
        for scheme in ALL {
            let mut symbols = Vec::new();
            scheme.modulate_bytes(data, &mut symbols);
            assert_eq!(symbols.len(), scheme.symbol_count(data.len()));
            assert_eq!(scheme.demodulate_bytes(&symbols, data.len()), data);
        }
    }

    #[test]
    fn test_scheme_ids() {
        for scheme in ALL {
            assert_eq!(ModScheme::from_id(scheme.id()).unwrap(), scheme);
        }
        assert!(ModScheme::from_id(0).is_err());
    }
}
