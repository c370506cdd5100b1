//! Cancellation and progress reporting, grounded on
//! `pbs_tools::task::WorkerTaskContext`: a tiny trait operations take so
//! they can be told to abort between chunks/batches/commits and can emit
//! progress without depending on any particular logging/UI backend.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Error};

pub trait TaskContext: Send + Sync {
    /// Operations call this between chunks/batches/commits. Implementations
    /// that want to cancel a running operation fail this call.
    fn check_abort(&self) -> Result<(), Error>;

    /// Emit a progress/log line at the given level.
    fn log(&self, level: log::Level, message: &std::fmt::Arguments);
}

impl<T: TaskContext + ?Sized> TaskContext for Arc<T> {
    fn check_abort(&self) -> Result<(), Error> {
        <T as TaskContext>::check_abort(self)
    }

    fn log(&self, level: log::Level, message: &std::fmt::Arguments) {
        <T as TaskContext>::log(self, level, message)
    }
}

#[macro_export]
macro_rules! task_log {
    ($ctx:expr, $level:expr, $($fmt:tt)+) => {{
        $ctx.log($level, &format_args!($($fmt)+));
    }};
}

#[macro_export]
macro_rules! task_info {
    ($ctx:expr, $($fmt:tt)+) => {
        $crate::task_log!($ctx, log::Level::Info, $($fmt)+)
    };
}

#[macro_export]
macro_rules! task_warn {
    ($ctx:expr, $($fmt:tt)+) => {
        $crate::task_log!($ctx, log::Level::Warn, $($fmt)+)
    };
}

/// Default context: logs through the `log` crate, never aborts.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTaskContext;

impl TaskContext for LogTaskContext {
    fn check_abort(&self) -> Result<(), Error> {
        Ok(())
    }

    fn log(&self, level: log::Level, message: &std::fmt::Arguments) {
        log::log!(level, "{}", message);
    }
}

/// Test/CLI-friendly context: aborts once `cancel` is flipped.
#[derive(Clone)]
pub struct CancelTaskContext {
    cancel: Arc<AtomicBool>,
}

impl CancelTaskContext {
    pub fn new() -> Self {
        Self {
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }
}

impl Default for CancelTaskContext {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskContext for CancelTaskContext {
    fn check_abort(&self) -> Result<(), Error> {
        if self.cancel.load(Ordering::SeqCst) {
            bail!("operation aborted");
        }
        Ok(())
    }

    fn log(&self, level: log::Level, message: &std::fmt::Arguments) {
        log::log!(level, "{}", message);
    }
}
