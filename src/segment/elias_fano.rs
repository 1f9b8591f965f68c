//! Elias-Fano encoding for sorted doc id sequences
//!
//! Each value is split into `l` low bits, stored densely, and high bits,
//! stored in unary in a bit vector. Space is about `2n + n*l` bits with
//! `l = floor(log2(universe / n))`.

use std::io;

use super::types::{read_u32, read_u64};

/// Elias-Fano encoded monotone sequence
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EliasFano {
    lower_bits: Vec<u64>,
    upper_bits: Vec<u64>,
    len: u32,
    lower_bit_width: u8,
}

impl EliasFano {
    /// Encode a sorted slice
    pub fn from_sorted(values: &[u32]) -> Self {
        let Some(&max_val) = values.last() else {
            return Self {
                lower_bits: Vec::new(),
                upper_bits: Vec::new(),
                len: 0,
                lower_bit_width: 0,
            };
        };

        let n = values.len() as u64;
        let universe = max_val as u64 + 1;
        let ratio = universe / n;
        let lower_bit_width = if ratio <= 1 {
            0
        } else {
            (63 - ratio.leading_zeros()) as u8
        };
        let width = lower_bit_width as usize;

        let mut lower_bits = vec![0u64; (values.len() * width).div_ceil(64)];
        let upper_len = n + ((max_val as u64) >> lower_bit_width) + 1;
        let mut upper_bits = vec![0u64; (upper_len as usize).div_ceil(64)];
        let lower_mask = if width == 0 { 0 } else { (1u64 << width) - 1 };

        for (i, &val) in values.iter().enumerate() {
            let val = val as u64;

            if width > 0 {
                let bit_pos = i * width;
                let word = bit_pos / 64;
                let offset = bit_pos % 64;
                lower_bits[word] |= (val & lower_mask) << offset;
                if offset + width > 64 {
                    lower_bits[word + 1] |= (val & lower_mask) >> (64 - offset);
                }
            }

            let upper_pos = i as u64 + (val >> lower_bit_width);
            upper_bits[(upper_pos / 64) as usize] |= 1u64 << (upper_pos % 64);
        }

        Self {
            lower_bits,
            upper_bits,
            len: values.len() as u32,
            lower_bit_width,
        }
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn lower(&self, i: usize) -> u64 {
        let width = self.lower_bit_width as usize;
        if width == 0 {
            return 0;
        }
        let bit_pos = i * width;
        let word = bit_pos / 64;
        let offset = bit_pos % 64;
        let mask = (1u64 << width) - 1;
        let mut val = self.lower_bits[word] >> offset;
        if offset + width > 64 {
            val |= self.lower_bits[word + 1] << (64 - offset);
        }
        val & mask
    }

    /// Iterate the values in order
    pub fn iter(&self) -> EliasFanoIter<'_> {
        EliasFanoIter {
            ef: self,
            index: 0,
            word_idx: 0,
            current: self.upper_bits.first().copied().unwrap_or(0),
        }
    }

    /// Decode every value
    pub fn to_vec(&self) -> Vec<u32> {
        let mut out = Vec::with_capacity(self.len());
        out.extend(self.iter());
        out
    }

    /// Encoded size in bytes
    pub fn encoded_len(&self) -> usize {
        13 + 8 * (self.lower_bits.len() + self.upper_bits.len())
    }

    /// Serialize: len, lower width, word counts, then both word arrays
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.len.to_le_bytes());
        out.push(self.lower_bit_width);
        out.extend_from_slice(&(self.lower_bits.len() as u32).to_le_bytes());
        out.extend_from_slice(&(self.upper_bits.len() as u32).to_le_bytes());
        for word in self.lower_bits.iter().chain(&self.upper_bits) {
            out.extend_from_slice(&word.to_le_bytes());
        }
    }

    /// Deserialize, returning the sequence and the bytes consumed
    pub fn decode(bytes: &[u8]) -> io::Result<(Self, usize)> {
        if bytes.len() < 13 {
            return Err(truncated());
        }
        let len = read_u32(bytes, 0);
        let lower_bit_width = bytes[4];
        let lower_words = read_u32(bytes, 5) as usize;
        let upper_words = read_u32(bytes, 9) as usize;
        let total = 13 + 8 * (lower_words + upper_words);
        if bytes.len() < total || lower_bit_width > 32 {
            return Err(truncated());
        }

        let words: Vec<u64> = (0..lower_words + upper_words)
            .map(|i| read_u64(bytes, 13 + i * 8))
            .collect();
        let (lower, upper) = words.split_at(lower_words);

        // Every value needs one set bit in the upper array
        let ones: u64 = upper.iter().map(|w| w.count_ones() as u64).sum();
        if ones != len as u64 || lower.len() < (len as usize * lower_bit_width as usize).div_ceil(64) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Elias-Fano bit counts do not match length",
            ));
        }

        Ok((
            Self {
                lower_bits: lower.to_vec(),
                upper_bits: upper.to_vec(),
                len,
                lower_bit_width,
            },
            total,
        ))
    }
}

fn truncated() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "Truncated Elias-Fano sequence")
}

/// Sequential decoder over set bits of the upper array
pub struct EliasFanoIter<'a> {
    ef: &'a EliasFano,
    index: usize,
    word_idx: usize,
    current: u64,
}

impl Iterator for EliasFanoIter<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        if self.index >= self.ef.len() {
            return None;
        }
        while self.current == 0 {
            self.word_idx += 1;
            self.current = *self.ef.upper_bits.get(self.word_idx)?;
        }
        let bit = self.current.trailing_zeros() as u64;
        self.current &= self.current - 1;

        let upper_pos = self.word_idx as u64 * 64 + bit;
        let high = upper_pos - self.index as u64;
        let value = (high << self.ef.lower_bit_width) | self.ef.lower(self.index);
        self.index += 1;
        Some(value as u32)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.ef.len() - self.index;
        (remaining, Some(remaining))
    }
}
