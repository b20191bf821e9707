//! Threads and loops the pipeline runs on: reader threads multiplexing device
//! descriptors and the owning thread's main loop with its serialized action queue.

pub mod main_loop;
pub mod multiplexer;
pub mod reader;

pub use main_loop::{MainLoop, MainLoopContext, ServerAction, ServerActionQueue};
pub use multiplexer::{Dispatchable, MultiplexingDispatchable, WatchKey};
pub use reader::ReaderThread;
