use log::{debug, info, warn};

use crate::internal::layout::block::{self, BlockPtr, Status};
use crate::internal::layout::constants::{
    CHUNK_SIZE, MIN_BLOCK_SIZE, SHRINK_THRESHOLD, WORD_SIZE,
};
use crate::internal::layout::freelist::FreeList;
use crate::sys::ptr::{AnyMutPtr, AnyNonNullPtr};
use crate::sys::SegmentSource;
use crate::util;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    Implicit,
    Explicit,
}

#[derive(Debug)]
pub struct HeapCore {
    heap_start: AnyMutPtr,
    heap_end: AnyMutPtr,
    policy: Policy,
    freelist: FreeList,
}

// Payload plus two tag words, rounded up to the block alignment.
fn block_size_for(payload: usize) -> usize {
    util::bits::round_up(payload + 2 * WORD_SIZE, MIN_BLOCK_SIZE).max(MIN_BLOCK_SIZE)
}

impl HeapCore {
    pub unsafe fn init<Env: SegmentSource>(env: &mut Env, policy: Policy) -> HeapCore {
        info!("init({:?})", policy);

        let page_size = env.page_size();
        let (seg_start, seg_end) = env.bounds();

        if seg_start.is_null() {
            panic!("data segment not initialized");
        }
        if seg_start != seg_end {
            panic!("heap not clean at initialization");
        }
        if page_size == 0 {
            panic!("reported page size is zero");
        }
        assert!(util::bits::is_aligned(CHUNK_SIZE, page_size));
        assert!(util::bits::is_aligned(seg_start.addr(), MIN_BLOCK_SIZE));

        let seg_end = match env.extend(CHUNK_SIZE) {
            Some(end) => end,
            None => panic!("segment provider refused the initial chunk"),
        };

        let heap_start = seg_start.add(MIN_BLOCK_SIZE);
        let heap_end = seg_end.sub(MIN_BLOCK_SIZE);
        block::put_sentinel(heap_start.sub(WORD_SIZE));
        block::put_sentinel(heap_end);

        let first = BlockPtr::at_header(heap_start);
        first.write_tags(CHUNK_SIZE - 2 * MIN_BLOCK_SIZE, Status::Free);

        let mut freelist = FreeList::new();
        if policy == Policy::Explicit {
            freelist.seed(first);
        }

        debug!(
            "  heap_start {:#x}, heap_end {:#x}, first free block {} bytes",
            heap_start.addr(),
            heap_end.addr(),
            CHUNK_SIZE - 2 * MIN_BLOCK_SIZE
        );

        HeapCore {
            heap_start,
            heap_end,
            policy,
            freelist,
        }
    }

    #[inline]
    pub fn policy(&self) -> Policy {
        self.policy
    }

    #[cfg(test)]
    pub(crate) fn bounds(&self) -> (AnyMutPtr, AnyMutPtr) {
        (self.heap_start, self.heap_end)
    }

    #[cfg(test)]
    pub(crate) fn blocks(&self) -> Blocks {
        Blocks {
            cur: self.heap_start,
            end: self.heap_end.addr(),
        }
    }

    #[cfg(test)]
    pub(crate) fn free_blocks(&self) -> crate::internal::layout::freelist::Iter {
        self.freelist.iter()
    }

    pub unsafe fn allocate<Env: SegmentSource>(
        &mut self,
        env: &mut Env,
        size: usize,
    ) -> Option<AnyNonNullPtr> {
        info!("allocate({:#x} ({}))", size, size);

        if size == 0 {
            return None;
        }

        let asize = block_size_for(size);
        let block = self.find_fit(env, asize)?;
        self.place(block, asize);

        debug!(
            "  allocated block at {:#x}, size {}",
            block.header().addr(),
            asize
        );
        Some(block.payload())
    }

    pub unsafe fn zero_allocate<Env: SegmentSource>(
        &mut self,
        env: &mut Env,
        nmemb: usize,
        size: usize,
    ) -> Option<AnyNonNullPtr> {
        info!("zero_allocate({:#x}, {:#x})", nmemb, size);

        let total = nmemb.checked_mul(size)?;
        let payload = self.allocate(env, total)?;
        std::ptr::write_bytes(payload.as_ptr::<u8>(), 0, total);
        Some(payload)
    }

    pub unsafe fn free<Env: SegmentSource>(&mut self, env: &mut Env, ptr: Option<AnyNonNullPtr>) {
        info!("free({:?})", ptr.map(|p| p.addr()));

        let Some(payload) = ptr else {
            debug!("  null pointer, nothing to do");
            return;
        };

        let block = BlockPtr::from_payload(payload);
        if block.is_free() {
            panic!("double free of payload at {:#x}", payload.addr());
        }

        let merged = self.coalesce(block);
        if self.policy == Policy::Explicit {
            self.freelist.push_front(merged);
        }
        debug!(
            "  free block at {:#x}, size {}",
            merged.header().addr(),
            merged.size()
        );

        self.shrink_heap(env);
    }

    pub unsafe fn resize<Env: SegmentSource>(
        &mut self,
        env: &mut Env,
        ptr: Option<AnyNonNullPtr>,
        size: usize,
    ) -> Option<AnyNonNullPtr> {
        info!("resize({:?}, {:#x} ({}))", ptr.map(|p| p.addr()), size, size);

        let Some(payload) = ptr else {
            debug!("  null pointer, allocating fresh");
            return self.allocate(env, size);
        };
        if size == 0 {
            debug!("  zero size, freeing");
            self.free(env, Some(payload));
            return None;
        }

        let block = BlockPtr::from_payload(payload);
        let cur_size = block.size();
        let asize = block_size_for(size);

        if asize <= cur_size {
            // Shrink in place. The remainder's left neighbor is this
            // block, rewritten allocated first, so the coalesce below can
            // only merge rightward.
            block.write_tags(asize, Status::Allocated);
            let remainder = cur_size - asize;
            if remainder >= MIN_BLOCK_SIZE {
                let rest = block.next_in_heap();
                rest.write_tags(remainder, Status::Free);
                let merged = self.coalesce(rest);
                if self.policy == Policy::Explicit {
                    self.freelist.push_front(merged);
                }
                debug!(
                    "  shrunk in place, free block at {:#x}, size {}",
                    merged.header().addr(),
                    merged.size()
                );
            }
            return Some(payload);
        }

        let next = block.next_in_heap();
        if next.status() == Status::Free && cur_size + next.size() >= asize {
            // Grow into the free right neighbor.
            let total = cur_size + next.size();
            if self.policy == Policy::Explicit {
                self.freelist.unlink(next);
            }
            let remainder = total - asize;
            if remainder >= MIN_BLOCK_SIZE {
                block.write_tags(asize, Status::Allocated);
                let rest = block.next_in_heap();
                rest.write_tags(remainder, Status::Free);
                if self.policy == Policy::Explicit {
                    self.freelist.push_front(rest);
                }
            } else {
                block.write_tags(total, Status::Allocated);
            }
            debug!("  grew into free neighbor, block now {} bytes", block.size());
            return Some(payload);
        }

        // Relocate. On allocation failure the original block is untouched.
        let new_payload = self.allocate(env, size)?;
        std::ptr::copy_nonoverlapping(
            payload.as_ptr::<u8>(),
            new_payload.as_ptr::<u8>(),
            cur_size - 2 * WORD_SIZE,
        );
        self.free(env, Some(payload));
        debug!("  relocated payload to {:#x}", new_payload.addr());
        Some(new_payload)
    }

    // The loop terminates: every round either returns a fit or strictly
    // grows the heap, and the provider eventually refuses.
    unsafe fn find_fit<Env: SegmentSource>(
        &mut self,
        env: &mut Env,
        asize: usize,
    ) -> Option<BlockPtr> {
        loop {
            let fit = match self.policy {
                Policy::Implicit => self.search_implicit(asize),
                Policy::Explicit => self.search_explicit(asize),
            };
            if fit.is_some() {
                return fit;
            }
            if !self.extend_heap(env) {
                warn!("  no block of size {} and the segment refused to grow", asize);
                return None;
            }
        }
    }

    unsafe fn search_implicit(&self, asize: usize) -> Option<BlockPtr> {
        let mut best: Option<BlockPtr> = None;
        let mut best_size = usize::MAX;

        let mut block = BlockPtr::at_header(self.heap_start);
        while block.header().addr() < self.heap_end.addr() {
            let size = block.size();
            if block.is_free() && size >= asize {
                if size == asize {
                    return Some(block);
                }
                if size < best_size {
                    best = Some(block);
                    best_size = size;
                }
            }
            block = block.next_in_heap();
        }
        best
    }

    unsafe fn search_explicit(&self, asize: usize) -> Option<BlockPtr> {
        let mut best: Option<BlockPtr> = None;
        let mut best_size = usize::MAX;

        for block in self.freelist.iter() {
            let size = block.size();
            if size >= asize {
                if size == asize {
                    return Some(block);
                }
                if size < best_size {
                    best = Some(block);
                    best_size = size;
                }
            }
        }
        best
    }

    unsafe fn place(&mut self, block: BlockPtr, asize: usize) {
        let old_size = block.size();
        debug_assert!(block.is_free());
        debug_assert!(old_size >= asize);

        let remainder = old_size - asize;
        if remainder >= MIN_BLOCK_SIZE {
            block.write_tags(asize, Status::Allocated);
            let rest = block.next_in_heap();
            rest.write_tags(remainder, Status::Free);
            debug!(
                "  split off free block at {:#x}, size {}",
                rest.header().addr(),
                remainder
            );
            if self.policy == Policy::Explicit {
                self.freelist.replace(block, rest);
            }
        } else {
            if remainder != 0 {
                panic!("block split remainder {} below minimal block size", remainder);
            }
            block.write_tags(old_size, Status::Allocated);
            if self.policy == Policy::Explicit {
                self.freelist.unlink(block);
            }
        }
    }

    // Absorbed neighbors leave the free list; the merged block is not
    // reinserted, its position is the caller's choice.
    unsafe fn coalesce(&mut self, block: BlockPtr) -> BlockPtr {
        let prev_free = block.prev_status() == Status::Free;
        let next = block.next_in_heap();
        let next_free = next.status() == Status::Free;

        let mut size = block.size();
        let merged;

        if !prev_free && !next_free {
            merged = block;
        } else if prev_free && !next_free {
            let prev = block.prev_in_heap();
            if self.policy == Policy::Explicit {
                self.freelist.unlink(prev);
            }
            size += prev.size();
            merged = prev;
        } else if !prev_free && next_free {
            if self.policy == Policy::Explicit {
                self.freelist.unlink(next);
            }
            size += next.size();
            merged = block;
        } else {
            let prev = block.prev_in_heap();
            if self.policy == Policy::Explicit {
                self.freelist.unlink(prev);
                self.freelist.unlink(next);
            }
            size += prev.size() + next.size();
            merged = prev;
        }

        merged.write_tags(size, Status::Free);
        merged
    }

    unsafe fn extend_heap<Env: SegmentSource>(&mut self, env: &mut Env) -> bool {
        debug!("  extending heap by {:#x} bytes", CHUNK_SIZE);

        let Some(seg_end) = env.extend(CHUNK_SIZE) else {
            return false;
        };

        let old_end = BlockPtr::at_header(self.heap_end);
        self.heap_end = seg_end.sub(MIN_BLOCK_SIZE);
        block::put_sentinel(self.heap_end);

        if old_end.prev_status() == Status::Free {
            let tail = old_end.prev_in_heap();
            let new_size = tail.size() + CHUNK_SIZE;
            tail.write_tags(new_size, Status::Free);
            // Explicit policy: the fused block's header did not move, so
            // its list node is already in place.
            debug!(
                "  fused new chunk into tail block at {:#x}, now {} bytes",
                tail.header().addr(),
                new_size
            );
        } else {
            let fresh = old_end;
            fresh.write_tags(CHUNK_SIZE, Status::Free);
            if self.policy == Policy::Explicit {
                self.freelist.push_front(fresh);
            }
            debug!(
                "  new free block at {:#x}, size {}",
                fresh.header().addr(),
                CHUNK_SIZE
            );
        }
        true
    }

    // The tail block shrinks in place, so its header (and, under the
    // explicit policy, its list node) never moves.
    unsafe fn shrink_heap<Env: SegmentSource>(&mut self, env: &mut Env) {
        let end = BlockPtr::at_header(self.heap_end);
        if end.prev_status() != Status::Free {
            return;
        }

        let tail = end.prev_in_heap();
        let tail_size = tail.size();
        let release =
            util::bits::round_down(tail_size.saturating_sub(SHRINK_THRESHOLD), CHUNK_SIZE);
        if release == 0 {
            return;
        }
        if !env.shrink(release) {
            warn!("  segment refused to shrink by {:#x} bytes", release);
            return;
        }

        self.heap_end = self.heap_end.sub(release);
        block::put_sentinel(self.heap_end);
        tail.write_tags(tail_size - release, Status::Free);
        debug!(
            "  released {:#x} trailing bytes, tail block now {} bytes",
            release,
            tail_size - release
        );
    }

    pub unsafe fn check(&self) {
        println!("{:-<41} check {:-<41}", "", "");
        println!("  heap_start:             {:#x}", self.heap_start.addr());
        println!("  heap_end:               {:#x}", self.heap_end.addr());
        println!("  free list policy:       {:?}", self.policy);
        println!();

        let (size, status) = block::peek(self.heap_start.sub(WORD_SIZE));
        println!(
            "  initial sentinel:       size: {:6}, status: {:?}",
            size, status
        );
        if size != 0 || status != Status::Allocated {
            panic!("initial sentinel corrupted");
        }
        let (size, status) = block::peek(self.heap_end);
        println!(
            "  end sentinel:           size: {:6}, status: {:?}",
            size, status
        );
        if size != 0 || status != Status::Allocated {
            panic!("end sentinel corrupted");
        }
        println!();

        println!("  blocks:");
        match self.policy {
            Policy::Implicit => println!(
                "    {:<14}  {:>8}  {:>10}  {:>8}  {}",
                "address", "offset", "size", "payload", "status"
            ),
            Policy::Explicit => println!(
                "    {:<14}  {:>8}  {:>10}  {:>8}  {:<14}  {:<14}  {}",
                "address", "offset", "size", "payload", "next", "prev", "status"
            ),
        }

        let mut free_blocks = 0usize;
        let mut prev_was_free = false;
        let mut block = BlockPtr::at_header(self.heap_start);

        while block.header().addr() < self.heap_end.addr() {
            let size = block.size();
            let status = block.status();
            let offset = block.header().addr() - self.heap_start.addr();

            if size < MIN_BLOCK_SIZE || !util::bits::is_aligned(size, MIN_BLOCK_SIZE) {
                panic!(
                    "block at {:#x} has invalid size {}",
                    block.header().addr(),
                    size
                );
            }

            match self.policy {
                Policy::Implicit => println!(
                    "    {:<#14x}  {:>#8x}  {:>10}  {:>8}  {:?}",
                    block.header().addr(),
                    offset,
                    size,
                    size - 2 * WORD_SIZE,
                    status
                ),
                Policy::Explicit => {
                    let link = |b: Option<BlockPtr>| match b {
                        Some(b) => format!("{:#x}", b.header().addr()),
                        None => "-".to_string(),
                    };
                    let (next, prev) = if status == Status::Free {
                        (link(block.next_free()), link(block.prev_free()))
                    } else {
                        ("-".to_string(), "-".to_string())
                    };
                    println!(
                        "    {:<#14x}  {:>#8x}  {:>10}  {:>8}  {:<14}  {:<14}  {:?}",
                        block.header().addr(),
                        offset,
                        size,
                        size - 2 * WORD_SIZE,
                        next,
                        prev,
                        status
                    );
                }
            }

            if block.header_tag() != block.footer_tag() {
                panic!(
                    "block at {:#x}: footer does not match header (size {}, status {:?})",
                    block.header().addr(),
                    size,
                    status
                );
            }
            if status == Status::Free {
                if prev_was_free {
                    panic!(
                        "adjacent free blocks at {:#x}",
                        block.header().addr()
                    );
                }
                free_blocks += 1;
            }
            prev_was_free = status == Status::Free;

            block = block.next_in_heap();
        }

        if block.header().addr() != self.heap_end.addr() {
            panic!("heap traversal overran the end sentinel");
        }

        if self.policy == Policy::Explicit {
            let mut listed = 0usize;
            let mut prev: Option<BlockPtr> = None;
            for node in self.freelist.iter() {
                listed += 1;
                if listed > free_blocks {
                    panic!("free list longer than the number of free blocks");
                }
                if !node.is_free() {
                    panic!(
                        "free list entry at {:#x} is not a free block",
                        node.header().addr()
                    );
                }
                if node.prev_free() != prev {
                    panic!(
                        "free list entry at {:#x} has a broken prev link",
                        node.header().addr()
                    );
                }
                prev = Some(node);
            }
            if listed != free_blocks {
                panic!(
                    "free list holds {} entries but the heap has {} free blocks",
                    listed, free_blocks
                );
            }
        }

        println!();
        println!("  block structure coherent.");
        println!("{:-<89}", "");
    }
}

#[cfg(test)]
pub(crate) struct Blocks {
    cur: AnyMutPtr,
    end: usize,
}

#[cfg(test)]
impl Iterator for Blocks {
    type Item = BlockPtr;

    fn next(&mut self) -> Option<BlockPtr> {
        if self.cur.addr() >= self.end {
            return None;
        }
        let block = BlockPtr::at_header(self.cur);
        self.cur = unsafe { block.next_in_heap().header() };
        Some(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sys::testing::TestSegment;

    const USABLE: usize = CHUNK_SIZE - 2 * MIN_BLOCK_SIZE;

    fn new_core(policy: Policy, chunks: usize) -> (TestSegment, HeapCore) {
        let mut env = TestSegment::new(chunks * CHUNK_SIZE);
        let core = unsafe { HeapCore::init(&mut env, policy) };
        (env, core)
    }

    // Walk the block structure and the free list, asserting the heap
    // invariants the public operations must preserve.
    unsafe fn audit(core: &HeapCore) {
        let (start, end) = core.bounds();

        let mut total = 0usize;
        let mut free_blocks = Vec::new();
        let mut prev_was_free = false;

        for block in core.blocks() {
            let size = block.size();
            assert!(size >= MIN_BLOCK_SIZE, "I4: size below minimum");
            assert!(
                util::bits::is_aligned(size, MIN_BLOCK_SIZE),
                "I4: size not a multiple of 32"
            );
            assert_eq!(block.header_tag(), block.footer_tag(), "I2: tag mismatch");
            if block.is_free() {
                assert!(!prev_was_free, "I3: adjacent free blocks");
                free_blocks.push(block);
            }
            prev_was_free = block.is_free();
            total += size;
        }
        assert_eq!(total, end.addr() - start.addr(), "I1: sizes do not sum up");

        if core.policy() == Policy::Explicit {
            let listed: Vec<BlockPtr> = core.free_blocks().collect();
            assert_eq!(listed.len(), free_blocks.len(), "I5: list length");
            for node in &listed {
                assert!(node.is_free(), "I5: allocated block on the free list");
                assert!(free_blocks.contains(node), "I5: unknown list entry");
                if let Some(next) = node.next_free() {
                    assert_eq!(next.prev_free(), Some(*node), "I5: asymmetric links");
                }
            }
            if let Some(head) = listed.first() {
                assert_eq!(head.prev_free(), None, "I5: head has a prev link");
            }
        }
    }

    #[test]
    fn init_emits_one_free_block() {
        for policy in [Policy::Implicit, Policy::Explicit] {
            let (_env, core) = new_core(policy, 4);
            unsafe {
                audit(&core);
                let blocks: Vec<BlockPtr> = core.blocks().collect();
                assert_eq!(blocks.len(), 1);
                assert_eq!(blocks[0].size(), USABLE);
                assert!(blocks[0].is_free());
            }
        }
    }

    #[test]
    fn allocate_splits_and_free_restores() {
        for policy in [Policy::Implicit, Policy::Explicit] {
            let (mut env, mut core) = new_core(policy, 4);
            unsafe {
                let p = core.allocate(&mut env, 100).expect("allocate");
                audit(&core);

                let blocks: Vec<BlockPtr> = core.blocks().collect();
                assert_eq!(blocks.len(), 2);
                assert_eq!(blocks[0].size(), block_size_for(100));
                assert!(!blocks[0].is_free());
                assert!(blocks[1].is_free());

                core.free(&mut env, Some(p));
                audit(&core);
                let blocks: Vec<BlockPtr> = core.blocks().collect();
                assert_eq!(blocks.len(), 1);
                assert_eq!(blocks[0].size(), USABLE);
            }
        }
    }

    #[test]
    fn exact_fit_consumes_whole_block() {
        for policy in [Policy::Implicit, Policy::Explicit] {
            let (mut env, mut core) = new_core(policy, 1);
            unsafe {
                // Whole usable region in one request, no growth possible.
                let p = core.allocate(&mut env, USABLE - 2 * WORD_SIZE);
                assert!(p.is_some());
                audit(&core);
                let blocks: Vec<BlockPtr> = core.blocks().collect();
                assert_eq!(blocks.len(), 1);
                assert!(!blocks[0].is_free());
            }
        }
    }

    #[test]
    fn free_coalesces_all_four_cases() {
        for policy in [Policy::Implicit, Policy::Explicit] {
            let (mut env, mut core) = new_core(policy, 4);
            unsafe {
                let a = core.allocate(&mut env, 16).expect("a");
                let b = core.allocate(&mut env, 16).expect("b");
                let c = core.allocate(&mut env, 16).expect("c");

                // Both neighbors allocated.
                core.free(&mut env, Some(b));
                audit(&core);

                // Next free (b), previous allocated.
                core.free(&mut env, Some(a));
                audit(&core);

                // Previous free (a+b), next free (the tail).
                core.free(&mut env, Some(c));
                audit(&core);

                let blocks: Vec<BlockPtr> = core.blocks().collect();
                assert_eq!(blocks.len(), 1);
                assert_eq!(blocks[0].size(), USABLE);
            }
        }
    }

    #[test]
    fn growth_fuses_free_tail() {
        for policy in [Policy::Implicit, Policy::Explicit] {
            let (mut env, mut core) = new_core(policy, 4);
            unsafe {
                // First chunk leaves a free tail; the second request does
                // not fit it, so the heap grows and the tail fuses.
                let a = core.allocate(&mut env, 60000).expect("a");
                let b = core.allocate(&mut env, 60000).expect("b");
                assert_ne!(a, b);
                audit(&core);

                let free: Vec<BlockPtr> =
                    core.blocks().filter(|b| b.is_free()).collect();
                assert_eq!(free.len(), 1);
            }
        }
    }

    #[test]
    fn growth_emits_fresh_block_after_allocated_tail() {
        for policy in [Policy::Implicit, Policy::Explicit] {
            let (mut env, mut core) = new_core(policy, 4);
            unsafe {
                // Consume the whole first chunk so the block before the
                // end sentinel is allocated when the heap grows.
                let a = core.allocate(&mut env, USABLE - 2 * WORD_SIZE).expect("a");
                let b = core.allocate(&mut env, 16).expect("b");
                assert_ne!(a, b);
                audit(&core);

                let blocks: Vec<BlockPtr> = core.blocks().collect();
                assert_eq!(blocks.len(), 3);
                assert_eq!(blocks[1].size(), MIN_BLOCK_SIZE);
            }
        }
    }

    #[test]
    fn allocation_larger_than_chunk_extends_repeatedly() {
        for policy in [Policy::Implicit, Policy::Explicit] {
            let (mut env, mut core) = new_core(policy, 8);
            unsafe {
                let p = core.allocate(&mut env, 3 * CHUNK_SIZE);
                assert!(p.is_some());
                audit(&core);
            }
        }
    }

    #[test]
    fn out_of_memory_returns_none_and_preserves_heap() {
        for policy in [Policy::Implicit, Policy::Explicit] {
            let (mut env, mut core) = new_core(policy, 1);
            unsafe {
                assert!(core.allocate(&mut env, CHUNK_SIZE).is_none());
                audit(&core);
                // The heap is still serviceable.
                assert!(core.allocate(&mut env, 64).is_some());
                audit(&core);
            }
        }
    }

    #[test]
    fn resize_shrinks_in_place_and_coalesces_remainder() {
        for policy in [Policy::Implicit, Policy::Explicit] {
            let (mut env, mut core) = new_core(policy, 4);
            unsafe {
                let p = core.allocate(&mut env, 256).expect("allocate");
                let q = core.resize(&mut env, Some(p), 64).expect("resize");
                assert_eq!(p, q);
                audit(&core);

                // The remainder merged with the free tail: still a
                // two-block heap.
                let blocks: Vec<BlockPtr> = core.blocks().collect();
                assert_eq!(blocks.len(), 2);
                assert_eq!(blocks[0].size(), block_size_for(64));
            }
        }
    }

    #[test]
    fn resize_grows_into_free_neighbor() {
        for policy in [Policy::Implicit, Policy::Explicit] {
            let (mut env, mut core) = new_core(policy, 4);
            unsafe {
                let a = core.allocate(&mut env, 64).expect("a");
                let b = core.allocate(&mut env, 64).expect("b");
                core.free(&mut env, Some(b));

                let r = core.resize(&mut env, Some(a), 120).expect("resize");
                assert_eq!(a, r);
                audit(&core);
            }
        }
    }

    #[test]
    fn resize_relocates_past_allocated_neighbor() {
        for policy in [Policy::Implicit, Policy::Explicit] {
            let (mut env, mut core) = new_core(policy, 4);
            unsafe {
                let a = core.allocate(&mut env, 64).expect("a");
                let _barrier = core.allocate(&mut env, 64).expect("barrier");

                for i in 0..64usize {
                    *a.as_ptr::<u8>().add(i) = i as u8;
                }

                let r = core.resize(&mut env, Some(a), 1024).expect("resize");
                assert_ne!(a, r);
                for i in 0..64usize {
                    assert_eq!(*r.as_ptr::<u8>().add(i), i as u8);
                }
                audit(&core);
            }
        }
    }

    #[test]
    fn shrink_releases_whole_trailing_chunks() {
        for policy in [Policy::Implicit, Policy::Explicit] {
            let (mut env, mut core) = new_core(policy, 8);
            unsafe {
                let a = core.allocate(&mut env, 3 * CHUNK_SIZE).expect("a");
                core.free(&mut env, Some(a));
                audit(&core);

                // The tail kept at most THRESHOLD + CHUNK - 32 bytes.
                let tail: Vec<BlockPtr> = core.blocks().collect();
                assert_eq!(tail.len(), 1);
                assert!(tail[0].size() < SHRINK_THRESHOLD + CHUNK_SIZE);
            }
        }
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn double_free_panics_implicit() {
        let (mut env, mut core) = new_core(Policy::Implicit, 4);
        unsafe {
            let p = core.allocate(&mut env, 48).expect("allocate");
            core.free(&mut env, Some(p));
            core.free(&mut env, Some(p));
        }
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn double_free_panics_explicit() {
        let (mut env, mut core) = new_core(Policy::Explicit, 4);
        unsafe {
            let p = core.allocate(&mut env, 48).expect("allocate");
            core.free(&mut env, Some(p));
            core.free(&mut env, Some(p));
        }
    }

    #[test]
    fn best_fit_prefers_smallest_adequate_block() {
        for policy in [Policy::Implicit, Policy::Explicit] {
            let (mut env, mut core) = new_core(policy, 4);
            unsafe {
                // Carve out free holes of 96 and 64 payload-capable
                // blocks separated by allocated barriers.
                let h1 = core.allocate(&mut env, 96).expect("h1");
                let _b1 = core.allocate(&mut env, 16).expect("b1");
                let h2 = core.allocate(&mut env, 48).expect("h2");
                let _b2 = core.allocate(&mut env, 16).expect("b2");
                core.free(&mut env, Some(h1));
                core.free(&mut env, Some(h2));
                audit(&core);

                // 40 bytes fit both holes; best fit takes the smaller.
                let p = core.allocate(&mut env, 40).expect("p");
                assert_eq!(p, h2);
                audit(&core);
            }
        }
    }

    #[test]
    fn check_passes_on_a_busy_heap() {
        for policy in [Policy::Implicit, Policy::Explicit] {
            let (mut env, mut core) = new_core(policy, 4);
            unsafe {
                let a = core.allocate(&mut env, 100).expect("a");
                let b = core.allocate(&mut env, 200).expect("b");
                let _c = core.zero_allocate(&mut env, 8, 16).expect("c");
                core.free(&mut env, Some(a));
                let _ = core.resize(&mut env, Some(b), 400).expect("resize");
                core.check();
                audit(&core);
            }
        }
    }
}
