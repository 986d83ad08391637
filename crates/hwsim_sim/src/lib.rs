//! Discrete-event runtime for elaborated hwsim component trees.
//!
//! This crate executes a [`SimTree`] produced by the elaborator. Everything
//! runs on one thread: tasks are plain futures multiplexed by the
//! [`Timebase`], which orders wakeups by simulated time, delta step and
//! insertion order.
//!
//! # Architecture
//!
//! Each component instance keeps its signals in a [`StateCell`]. Sync
//! processes stage their writes there and commit together once every process
//! of an edge has run; comb processes write through and re-run their
//! watchers before the write returns. Free-running processes are tasks that
//! suspend on waits, channels, locks and events.
//!
//! # Usage
//!
//! ```ignore
//! use hwsim_sim::{SimOptions, Simulation, Timebase};
//!
//! let sim = Simulation::new(tree, timebase, SimOptions::default())?;
//! sim.start()?;
//! sim.drive_clock("clock", 10 * hwsim_sim::FS_PER_NS)?;
//! sim.run_until(200 * hwsim_sim::FS_PER_NS)?;
//! println!("count = {}", sim.get_output("count")?);
//! ```
//!
//! # Modules
//!
//! - `time`: femtosecond time with delta steps
//! - `timebase`: scheduler and cooperative executor
//! - `eval_state`: current/next signal maps and watchers
//! - `channel`, `lock`, `event`: task synchronization primitives
//! - `memory`, `regfile`, `address_space`: addressable storage
//! - `tree`: the elaborated component tree
//! - `engine`: the [`Simulation`] driver

#![warn(missing_docs)]

pub mod address_space;
pub mod channel;
pub mod engine;
pub mod error;
pub mod eval_state;
mod evaluator;
pub mod event;
pub mod lock;
pub mod memory;
pub mod ops;
pub mod regfile;
pub mod time;
pub mod timebase;
pub mod tracer;
pub mod tree;
pub mod value;

pub use address_space::{
    AddrHandle, AddressSpace, Region, RegionStorage, SharedAddressSpace, SharedMemory,
    SharedRegFile,
};
pub use channel::{Channel, GetEnd, PutEnd};
pub use engine::{SimOptions, Simulation, DEFAULT_MAX_COMB_DEPTH};
pub use error::SimError;
pub use eval_state::StateCell;
pub use event::{Event, EventCallback};
pub use lock::Lock;
pub use memory::Memory;
pub use regfile::RegFile;
pub use time::{SimTime, FS_PER_MS, FS_PER_NS, FS_PER_PS, FS_PER_US};
pub use timebase::{TaskHandle, Timebase};
pub use tracer::{LogTracer, MemoryTracer, SignalTracer, TracedChange, TracedSignal};
pub use tree::{CompId, CompInstance, EventHookup, FieldSlot, RegionInfo, SimTree, Storage};
pub use value::{Handle, Value};
