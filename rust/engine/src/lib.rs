//! Heap Transfer Benchmark - Engine
//!
//! Moves a filled heap from a parent into its freshly forked child with one
//! of eight strategies and validates the result in the child. Linux only:
//! the strategies rely on `process_vm_readv`/`process_vm_writev`, shared file
//! mappings, `MAP_FIXED_NOREPLACE` and POSIX AIO.

pub mod backing;
pub mod orchestrator;
pub mod platform;
pub mod region;
pub mod remote;
pub mod rendezvous;
pub mod strategy;
pub mod tracker;

pub use backing::{map_heap_file, BackingFile};
pub use orchestrator::Orchestrator;
pub use platform::{PlatformUtils, HEAP_ALIGNMENT};
pub use region::{HeapBuffer, ReceivedHeap, ReservedRegion};
pub use remote::RemoteProcess;
pub use rendezvous::{channel, ChildLink, ChildSignal, ParentLink, ParentSignal};
pub use strategy::{strategy_for, ChildContext, ParentContext, TransferStrategy};
pub use tracker::{CallbackTracker, SignalTracker};
