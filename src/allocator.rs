use std::error::Error;
use std::result::Result;

use log::LevelFilter;

use crate::internal::allocator::HeapCore;
use crate::sys::ptr::AnyNonNullPtr;
use crate::sys::{LinuxDataSegment, SegmentConfig, SegmentSource};

pub use crate::internal::allocator::Policy;

pub unsafe fn init(
    config: SegmentConfig,
    policy: Policy,
) -> Result<Heap<LinuxDataSegment>, Box<dyn Error>> {
    let env = crate::sys::new_segment(config)?;
    Ok(Heap::init(env, policy))
}

#[derive(Debug)]
pub struct Heap<Env> {
    env: Env,
    core: HeapCore,
}

impl<Env> Heap<Env>
where
    Env: SegmentSource,
{
    pub unsafe fn init(mut env: Env, policy: Policy) -> Heap<Env> {
        let core = HeapCore::init(&mut env, policy);
        Heap { env, core }
    }

    pub unsafe fn allocate(&mut self, size: usize) -> Option<AnyNonNullPtr> {
        self.core.allocate(&mut self.env, size)
    }

    pub unsafe fn zero_allocate(&mut self, nmemb: usize, size: usize) -> Option<AnyNonNullPtr> {
        self.core.zero_allocate(&mut self.env, nmemb, size)
    }

    pub unsafe fn resize(
        &mut self,
        ptr: Option<AnyNonNullPtr>,
        size: usize,
    ) -> Option<AnyNonNullPtr> {
        self.core.resize(&mut self.env, ptr, size)
    }

    pub unsafe fn free(&mut self, ptr: Option<AnyNonNullPtr>) {
        self.core.free(&mut self.env, ptr)
    }

    // 0: off; 1: operations; 2 and above: per-operation detail.
    pub fn set_log_level(&self, level: i32) {
        let filter = if level <= 0 {
            LevelFilter::Off
        } else if level == 1 {
            LevelFilter::Info
        } else {
            LevelFilter::Debug
        };
        log::set_max_level(filter);
    }

    pub unsafe fn check(&self) {
        self.core.check()
    }

    pub fn policy(&self) -> Policy {
        self.core.policy()
    }
}
