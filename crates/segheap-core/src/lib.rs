//! # segheap-core
//!
//! Segregated free-list heap manager. Memory is claimed from the operating
//! system one page at a time and carved into blocks, each preceded by an
//! in-band header that records the payload size and, while the block is free,
//! the link to the next free block of its size class.
//!
//! Only the modules that touch raw memory opt out of the crate-wide
//! `unsafe_code` denial.
//!
//! The heap is single-threaded: callers that share one across threads must
//! serialize access themselves.

#![deny(unsafe_code)]

#[allow(unsafe_code)]
pub mod block;
pub mod config;
pub mod error;
pub mod free_list;
#[allow(unsafe_code)]
pub mod heap;
pub mod lifecycle;
#[allow(unsafe_code)]
pub mod page;
pub mod size_class;
pub mod stats;
#[allow(unsafe_code)]
pub mod verify;

pub use block::{ALIGNMENT, HEADER_SIZE};
pub use config::{CoalescePolicy, HeapConfig};
pub use error::HeapError;
pub use heap::Heap;
pub use lifecycle::{CounterSnapshot, HeapLogLevel, HeapLogRecord, LifecycleLog};
pub use page::{MmapPages, PAGE_PAYLOAD_CAPACITY, PAGE_SIZE, PageError, PageSource, RegionPages};
pub use size_class::{BIN_COUNT, bin_of};
pub use stats::HeapStats;
pub use verify::{BlockInfo, HeapWalk, IntegrityError};
