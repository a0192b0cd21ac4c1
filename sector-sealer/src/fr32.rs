use std::cmp::min;
use std::io::{self, Read};

/// The number of Frs per Block.
const NUM_FRS_PER_BLOCK: usize = 4;
/// The amount of bits in an Fr when not padded.
const IN_BITS_FR: usize = 254;
/// The amount of bits in an Fr when padded.
const OUT_BITS_FR: usize = 256;

pub const NUM_BYTES_IN_BLOCK: usize = NUM_FRS_PER_BLOCK * IN_BITS_FR / 8;
pub const NUM_BYTES_OUT_BLOCK: usize = NUM_FRS_PER_BLOCK * OUT_BITS_FR / 8;

const NUM_U128S_PER_BLOCK: usize = NUM_BYTES_OUT_BLOCK / 16;

const MASK_SKIP_HIGH_2: u128 = u128::MAX >> 2;

macro_rules! process_fr {
    (
        $in_buffer:expr,
        $out0:expr,
        $out1:expr,
        $bit_offset:expr
    ) => {{
        $out0 = $in_buffer[0] >> 128 - $bit_offset;
        $out0 |= $in_buffer[1] << $bit_offset;
        $out1 = $in_buffer[1] >> 128 - $bit_offset;
        $out1 |= $in_buffer[2] << $bit_offset;
        $out1 &= MASK_SKIP_HIGH_2; // zero high 2 bits
    }};
}

/// Pads a single 127 byte block into 128 bytes: four 254 bit values, each zero extended to 256
/// bits.
pub fn pad_block(input: &[u8; NUM_BYTES_IN_BLOCK]) -> [u8; NUM_BYTES_OUT_BLOCK] {
    let mut in_bytes = [0u8; NUM_BYTES_OUT_BLOCK];
    in_bytes[..NUM_BYTES_IN_BLOCK].copy_from_slice(input);

    let mut in_buffer = [0u128; NUM_U128S_PER_BLOCK];
    for (word, chunk) in in_buffer.iter_mut().zip(in_bytes.chunks_exact(16)) {
        let mut le = [0u8; 16];
        le.copy_from_slice(chunk);
        *word = u128::from_le_bytes(le);
    }

    let mut out = [0u128; NUM_U128S_PER_BLOCK];
    // 0..254
    out[0] = in_buffer[0];
    out[1] = in_buffer[1] & MASK_SKIP_HIGH_2;
    // 254..508
    process_fr!(&in_buffer[1..], out[2], out[3], 2);
    // 508..762
    process_fr!(&in_buffer[3..], out[4], out[5], 4);
    // 762..1016
    process_fr!(&in_buffer[5..], out[6], out[7], 6);

    let mut padded = [0u8; NUM_BYTES_OUT_BLOCK];
    for (chunk, word) in padded.chunks_exact_mut(16).zip(out.iter()) {
        chunk.copy_from_slice(&word.to_le_bytes());
    }
    padded
}

/// An `io::Read` that converts unpadded input into fr32 padded output.
///
/// A trailing partial block is zero extended to the next full Fr.
pub struct Fr32Reader<R> {
    source: R,
    in_buffer: [u8; NUM_BYTES_IN_BLOCK],
    out_buffer: [u8; NUM_BYTES_OUT_BLOCK],
    out_offset: usize,
    /// Padded bytes of `out_buffer` not handed out yet.
    available: usize,
    done: bool,
}

/// Division of x by y, rounding up.
/// x must be > 0
#[inline]
const fn div_ceil(x: usize, y: usize) -> usize {
    1 + ((x - 1) / y)
}

impl<R: Read> Fr32Reader<R> {
    pub fn new(source: R) -> Self {
        Fr32Reader {
            source,
            in_buffer: [0; NUM_BYTES_IN_BLOCK],
            out_buffer: [0; NUM_BYTES_OUT_BLOCK],
            out_offset: 0,
            available: 0,
            done: false,
        }
    }

    fn fill_in_buffer(&mut self) -> io::Result<usize> {
        let mut bytes_read = 0;
        let mut buf = &mut self.in_buffer[..];

        while !buf.is_empty() {
            match self.source.read(buf) {
                Ok(0) => break,
                Ok(n) => {
                    buf = &mut buf[n..];
                    bytes_read += n;
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }

        // Clear unfilled memory.
        for val in &mut self.in_buffer[bytes_read..] {
            *val = 0;
        }

        Ok(bytes_read)
    }
}

impl<R: Read> Read for Fr32Reader<R> {
    fn read(&mut self, target: &mut [u8]) -> io::Result<usize> {
        let mut written = 0;

        while written < target.len() && !self.done {
            if self.available == 0 {
                let bytes_read = self.fill_in_buffer()?;
                if bytes_read == 0 {
                    self.done = true;
                    break;
                }

                self.out_buffer = pad_block(&self.in_buffer);
                self.out_offset = 0;
                self.available = div_ceil(bytes_read * 8, IN_BITS_FR) * (OUT_BITS_FR / 8);
            }

            let len = min(self.available, target.len() - written);
            target[written..written + len]
                .copy_from_slice(&self.out_buffer[self.out_offset..self.out_offset + len]);
            written += len;
            self.out_offset += len;
            self.available -= len;
        }

        Ok(written)
    }
}
