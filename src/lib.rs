//! A deterministic, cycle-driven operating-system simulator: pluggable
//! per-core scheduling policies, banker's-algorithm resource control,
//! demand-paged memory, semaphore-guarded critical sections, and
//! template-driven process workloads with fork and IPC.

pub mod error;
pub mod io;
pub mod kernel;

pub use error::{SimError, SimResult, TemplateError};
pub use kernel::context::{SimConfig, SimContext};
pub use kernel::kernel::{Kernel, KernelSnapshot, PauseHandle};
pub use kernel::scheduler::SchedulerKind;
pub use kernel::{Pid, KERNEL_ID};
