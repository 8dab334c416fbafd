//! Logging macros gated by a module-level `ENABLE_LOGS` flag.
//!
//! Stage modules emit progress lines on every run; flipping the flag to
//! `false` silences one module without touching `RUST_LOG` globally.
//!
//! ```ignore
//! const ENABLE_LOGS: bool = true;
//!
//! use crate::{log_info, log_warn};
//!
//! log_info!("extracted {} rows", rows.len());
//! ```

/// Forwards to `log::log!` at `$level` when the caller's `ENABLE_LOGS` is set.
#[macro_export]
macro_rules! log_gated {
    ($level:expr, $($arg:tt)*) => {
        if ENABLE_LOGS {
            log::log!($level, $($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::log_gated!(log::Level::Info, $($arg)*)
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::log_gated!(log::Level::Warn, $($arg)*)
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::log_gated!(log::Level::Error, $($arg)*)
    };
}
