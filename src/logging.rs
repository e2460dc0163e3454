//! Logging setup and chunk-scoped log helpers.
//!
//! env_logger formats each record into its own buffer and writes it under the
//! stderr lock, so lines from concurrent workers never interleave.

use std::io::Write;

/// Initialize the global logger (Info unless `RUST_LOG` says otherwise).
pub fn init(verbose: bool) {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    let _ = env_logger::Builder::from_default_env()
        .filter_level(level)
        .parse_default_env()
        .format(|buf, record| {
            let thread = std::thread::current();
            writeln!(
                buf,
                "[{} {:<5} {}] {}",
                buf.timestamp_millis(),
                record.level(),
                thread.name().unwrap_or("main"),
                record.args()
            )
        })
        .try_init();
}

/// Log at info level with a `[chunk_id]` prefix.
#[macro_export]
macro_rules! chunk_info {
    ($chunk_id:expr, $($arg:tt)+) => {
        log::info!("[{}] {}", $chunk_id, format_args!($($arg)+))
    };
}

/// Log at debug level with a `[chunk_id]` prefix.
#[macro_export]
macro_rules! chunk_debug {
    ($chunk_id:expr, $($arg:tt)+) => {
        log::debug!("[{}] {}", $chunk_id, format_args!($($arg)+))
    };
}

/// Log at warn level with a `[chunk_id]` prefix.
#[macro_export]
macro_rules! chunk_warn {
    ($chunk_id:expr, $($arg:tt)+) => {
        log::warn!("[{}] {}", $chunk_id, format_args!($($arg)+))
    };
}

/// First `max_chars` characters of `s`, with an ellipsis if truncated.
pub fn preview(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}
