pub mod immediate;
pub mod main_thread;
pub mod metrics;
pub mod virtual_time;
pub mod worker_pool;

pub use immediate::ImmediateScheduler;
pub use main_thread::{MainRunLoop, MainThreadScheduler, ThreadRunLoop};
pub use metrics::SchedulerMetrics;
pub use virtual_time::{VirtualTimeScheduler, DISTANT_FUTURE};
pub use worker_pool::WorkerPoolScheduler;
