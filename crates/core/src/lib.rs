pub mod config;
pub mod disposable;
pub mod error;
pub mod scheduler;

pub use config::{CadenceConfig, QueueKind, VirtualTimeConfig, WorkerPoolConfig};
pub use disposable::{
    ActionDisposable, CompositeDisposable, CompositeKey, Disposable, DisposableRef,
    ScopedDisposable, SerialDisposable, SimpleDisposable,
};
pub use error::*;
pub use scheduler::{Action, DateScheduler, DateSchedulerExt, RepeatingAction, Scheduler, SchedulerExt};
