//! Flat binary loader.
//!
//! Programs are headerless little-endian byte images loaded at a fixed base address through a
//! memory port's synchronous helpers.

use crate::port::MemoryPort;
use log::debug;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("failed to read program image: {0}")]
    Io(#[from] std::io::Error),
    #[error("program image is empty")]
    Empty,
}

/// Load a flat binary file into memory at `base_addr`.
///
/// Returns the number of bytes read from the file (not the number of words written).
pub fn load_flat_bin(
    path: impl AsRef<Path>,
    mem: &mut dyn MemoryPort,
    base_addr: u32,
) -> Result<u32, LoadError> {
    let bytes = fs::read(path.as_ref())?;
    if bytes.is_empty() {
        return Err(LoadError::Empty);
    }
    debug!(
        "loading flat binary {:?} ({} bytes) at {:#010x}",
        path.as_ref(),
        bytes.len(),
        base_addr
    );
    Ok(load_image(mem, base_addr, &bytes))
}

/// Load a byte image into memory at `base_addr`, packing 4 bytes at a time LSB-first into 32-bit
/// words written via `write32`. A final partial word is padded with zeros on the high side and
/// written as well.
///
/// Returns the number of bytes in the image.
pub fn load_image(mem: &mut dyn MemoryPort, base_addr: u32, bytes: &[u8]) -> u32 {
    let mut addr = base_addr;
    let mut chunks = bytes.chunks_exact(4);
    for chunk in &mut chunks {
        let word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        mem.write32(addr, word);
        addr = addr.wrapping_add(4);
    }
    let tail = chunks.remainder();
    if !tail.is_empty() {
        let mut word = 0u32;
        for (i, byte) in tail.iter().enumerate() {
            word |= u32::from(*byte) << (8 * i);
        }
        mem.write32(addr, word);
    }
    bytes.len() as u32
}

/// Write a program given as 32-bit words to consecutive word addresses starting at `base_addr`.
pub fn load_words(mem: &mut dyn MemoryPort, base_addr: u32, words: &[u32]) {
    let mut addr = base_addr;
    for word in words {
        mem.write32(addr, *word);
        addr = addr.wrapping_add(4);
    }
}
