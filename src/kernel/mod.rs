pub mod barrier;
pub mod context;
pub mod ipc;
pub mod kernel;
pub mod memory;
pub mod pcb;
pub mod process;
pub mod processor;
pub mod resource_manager;
pub mod scheduler;
pub mod semaphore;
pub mod stats;
pub mod template;

/// Process identifier. Pid 0 is the kernel itself, the parent of every
/// top-level process.
pub type Pid = u32;

pub const KERNEL_ID: Pid = 0;
