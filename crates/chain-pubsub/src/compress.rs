//! LZW compression for broadcast frames, LSB-first bit packing, adaptive
//! code width from 9 up to 12 bits. The framing layer only keeps a
//! compressed frame when it is strictly smaller than the input.

use std::collections::HashMap;

const CLEAR_CODE: u32 = 256;
const STOP_CODE: u32 = 257;
const FIRST_FREE_CODE: u32 = 258;
const MIN_WIDTH: u8 = 9;
const MAX_WIDTH: u8 = 12;
const MAX_DICT_SIZE: u32 = 1 << MAX_WIDTH;

struct BitWriter {
    buf: Vec<u8>,
    acc: u32,
    bits: u8,
}

impl BitWriter {
    fn new() -> Self {
        Self { buf: Vec::new(), acc: 0, bits: 0 }
    }

    fn write(&mut self, code: u32, width: u8) {
        self.acc |= code << self.bits;
        self.bits += width;
        while self.bits >= 8 {
            self.buf.push((self.acc & 0xff) as u8);
            self.acc >>= 8;
            self.bits -= 8;
        }
    }

    fn finish(mut self) -> Vec<u8> {
        if self.bits > 0 {
            self.buf.push((self.acc & 0xff) as u8);
        }
        self.buf
    }
}

struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
    acc: u32,
    bits: u8,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0, acc: 0, bits: 0 }
    }

    fn read(&mut self, width: u8) -> Option<u32> {
        while self.bits < width {
            let byte = *self.data.get(self.pos)?;
            self.pos += 1;
            self.acc |= (byte as u32) << self.bits;
            self.bits += 8;
        }
        let mask = (1u32 << width) - 1;
        let code = self.acc & mask;
        self.acc >>= width;
        self.bits -= width;
        Some(code)
    }
}

/// Encode `data` with a fresh dictionary seeded with all single-byte
/// strings. Emits a leading clear code and a trailing stop code so the
/// decoder never has to guess length from byte alignment.
pub fn compress(data: &[u8]) -> Vec<u8> {
    let mut dict: HashMap<Vec<u8>, u32> = (0u32..256).map(|b| (vec![b as u8], b)).collect();
    let mut next_code = FIRST_FREE_CODE;
    let mut width = MIN_WIDTH;
    let mut writer = BitWriter::new();
    writer.write(CLEAR_CODE, width);

    if data.is_empty() {
        writer.write(STOP_CODE, width);
        return writer.finish();
    }

    let mut current: Vec<u8> = vec![data[0]];
    for &byte in &data[1..] {
        let mut candidate = current.clone();
        candidate.push(byte);
        if dict.contains_key(&candidate) {
            current = candidate;
            continue;
        }
        writer.write(*dict.get(&current).expect("current is always interned"), width);
        if next_code < MAX_DICT_SIZE {
            dict.insert(candidate, next_code);
            next_code += 1;
            if next_code > (1 << width) && width < MAX_WIDTH {
                width += 1;
            }
        }
        current = vec![byte];
    }
    writer.write(*dict.get(&current).expect("current is always interned"), width);
    writer.write(STOP_CODE, width);
    writer.finish()
}

/// Inverse of [`compress`]. Returns `None` on any malformed stream rather
/// than panicking, since frame bytes arrive over the wire.
pub fn decompress(data: &[u8]) -> Option<Vec<u8>> {
    let mut reader = BitReader::new(data);
    let mut width = MIN_WIDTH;
    let mut dict: Vec<Vec<u8>> = (0u32..256).map(|b| vec![b as u8]).collect();
    dict.push(Vec::new()); // CLEAR_CODE placeholder
    dict.push(Vec::new()); // STOP_CODE placeholder

    match reader.read(width) {
        Some(code) if code == CLEAR_CODE => {}
        _ => return None,
    }

    let mut out = Vec::new();
    let mut previous: Option<Vec<u8>> = None;

    loop {
        let code = reader.read(width)?;
        if code == STOP_CODE {
            break;
        }
        if code == CLEAR_CODE {
            dict.truncate(258);
            width = MIN_WIDTH;
            previous = None;
            continue;
        }

        let entry = if (code as usize) < dict.len() {
            dict[code as usize].clone()
        } else if code as usize == dict.len() {
            let mut prev = previous.clone()?;
            let first = prev.first().copied()?;
            prev.push(first);
            prev
        } else {
            return None;
        };

        out.extend_from_slice(&entry);

        if let Some(prev) = previous {
            if (dict.len() as u32) < MAX_DICT_SIZE {
                let mut joined = prev;
                joined.push(*entry.first()?);
                dict.push(joined);
                if (dict.len() as u32) > (1 << width) && width < MAX_WIDTH {
                    width += 1;
                }
            }
        }
        previous = Some(entry);
    }

    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_arbitrary_bytes() {
        let data = b"the quick brown fox jumps over the lazy dog the quick brown fox";
        let compressed = compress(data);
        assert_eq!(decompress(&compressed).unwrap(), data);
    }

    #[test]
    fn round_trips_empty_input() {
        let compressed = compress(b"");
        assert_eq!(decompress(&compressed).unwrap(), b"");
    }

    #[test]
    fn compresses_repetitive_input_smaller() {
        let data = vec![b'a'; 4096];
        let compressed = compress(&data);
        assert!(compressed.len() < data.len());
        assert_eq!(decompress(&compressed).unwrap(), data);
    }

    #[test]
    fn rejects_truncated_stream() {
        assert_eq!(decompress(&[]), None);
    }
}
