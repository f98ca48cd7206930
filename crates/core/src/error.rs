use thiserror::Error;

/// Errors surfaced while building or configuring schedulers.
///
/// Scheduling calls themselves never fail: work submitted to a torn-down
/// scheduler is dropped and the caller receives an already-disposed handle.
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("config error: {0}")]
    Config(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config I/O error: {0}")]
    ConfigIo(#[from] std::io::Error),

    #[error("run loop is closed")]
    RunLoopClosed,

    #[error("failed to build worker pool: {0}")]
    PoolBuild(String),
}
