//! Internal logging helpers for structured engine events.

/// Single logging target for the engine.
pub(crate) const LOG_TARGET: &str = "canopy";

macro_rules! engine_log {
    ($level:expr, $event:expr, $fmt:expr $(, $args:expr)* $(,)?) => {{
        if log::log_enabled!($level) {
            log::log!(
                target: crate::logging::LOG_TARGET,
                $level,
                "event={} {}",
                $event,
                format_args!($fmt $(, $args)*)
            );
        }
    }};
}

pub(crate) use engine_log;
