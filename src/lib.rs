mod allocator;
mod internal;
pub mod sys;
mod util;

pub use crate::allocator::{init, Heap, Policy};
pub use crate::internal::layout::constants::{CHUNK_SIZE, MIN_BLOCK_SIZE};
pub use crate::sys::ptr::{AnyMutPtr, AnyNonNullPtr};
pub use crate::sys::{new_segment, LinuxDataSegment, SegmentConfig, SegmentSource};
