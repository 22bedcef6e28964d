use std::error::Error;
use std::result::Result;

use log::{Metadata, Record};

use tagheap::{Policy, SegmentConfig};

struct StdoutLogger;

impl log::Log for StdoutLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        println!("{}", record.args());
    }

    fn flush(&self) {}
}

static LOGGER: StdoutLogger = StdoutLogger;

fn main() {
    unsafe { main_try() }.unwrap();
}

unsafe fn main_try() -> Result<(), Box<dyn Error>> {
    log::set_logger(&LOGGER)?;

    let policy = match std::env::args().nth(1).as_deref() {
        Some("implicit") => Policy::Implicit,
        _ => Policy::Explicit,
    };

    let mut heap = tagheap::init(
        SegmentConfig {
            max_heap_size: 8 << 20,
        },
        policy,
    )?;
    heap.set_log_level(2);

    let a = heap.allocate(48).ok_or("out of memory")?;
    let item: *mut usize = a.as_ptr();
    *item = 0xDEAD_BEEF;
    println!("{:#x}", *item);

    let b = heap.zero_allocate(16, 8).ok_or("out of memory")?;
    println!("{}", *b.as_ptr::<usize>());

    let a = heap.resize(Some(a), 4096).ok_or("out of memory")?;
    println!("{:#x}", *a.as_ptr::<usize>());

    heap.free(Some(b));
    heap.check();
    heap.free(Some(a));
    heap.check();

    Ok(())
}
