use std::mem::size_of;

use crate::util;

pub const WORD_SIZE: usize = size_of::<usize>();

// Minimal block size and block alignment. Must be a power of 2.
pub const MIN_BLOCK_SIZE: usize = 32;

pub const CHUNK_SIZE: usize = 1 << 16;
pub const SHRINK_THRESHOLD: usize = 1 << 14;

// Low three tag bits are reserved for flags; only bit 0 is used.
pub const STATUS_MASK: usize = 0x7;
pub const SIZE_MASK: usize = !STATUS_MASK;

const _: () = assert!(WORD_SIZE == 8);
const _: () = assert!(util::bits::is_power_of_2(MIN_BLOCK_SIZE));
const _: () = assert!(util::bits::is_aligned(CHUNK_SIZE, MIN_BLOCK_SIZE));
const _: () = assert!(util::bits::is_aligned(SHRINK_THRESHOLD, MIN_BLOCK_SIZE));
