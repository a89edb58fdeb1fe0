//! Logging infrastructure - structured tracing throughout runtime
//!
//! Design: Uses `tracing` for structured, contextual logging with:
//! - Configurable log levels per module
//! - Zero-cost when disabled
//! - Console output (plain or JSON) and optional file output

use once_cell::sync::OnceCell;
use std::ffi::OsStr;
use std::io;
use std::path::Path;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

// Re-export tracing macros for use throughout the runtime
pub use tracing::{debug, error, info, trace, warn, Level};

/// Global logging state
static LOGGER_INITIALIZED: OnceCell<()> = OnceCell::new();

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default log level
    pub level: Level,
    /// Enable file logging
    pub file_output: bool,
    /// Log file path (if file_output enabled)
    pub log_path: Option<String>,
    /// Enable JSON format (vs human-readable)
    pub json_format: bool,
    /// Show span events (enter/exit)
    pub show_spans: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::WARN,
            file_output: false,
            log_path: None,
            json_format: false,
            show_spans: false,
        }
    }
}

impl LogConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // MANV_LOG_LEVEL: trace, debug, info, warn, error
        if let Ok(level_str) = std::env::var("MANV_LOG_LEVEL") {
            config.level = match level_str.to_lowercase().as_str() {
                "trace" => Level::TRACE,
                "debug" => Level::DEBUG,
                "info" => Level::INFO,
                "warn" => Level::WARN,
                "error" => Level::ERROR,
                _ => Level::WARN,
            };
        }

        // MANV_LOG_FILE: path to log file
        if let Ok(path) = std::env::var("MANV_LOG_FILE") {
            config.file_output = true;
            config.log_path = Some(path);
        }

        // MANV_LOG_JSON: enable JSON format
        config.json_format = std::env::var("MANV_LOG_JSON").is_ok();

        // MANV_LOG_SPANS: show span events
        config.show_spans = std::env::var("MANV_LOG_SPANS").is_ok();

        config
    }

    /// Create high-performance config (minimal logging)
    pub fn performance() -> Self {
        Self {
            level: Level::ERROR,
            ..Self::default()
        }
    }

    /// Create debug config (verbose logging)
    pub fn debug() -> Self {
        Self {
            level: Level::TRACE,
            file_output: true,
            log_path: Some("manv_runtime.log".to_string()),
            json_format: false,
            show_spans: true,
        }
    }
}

/// Initialize logging with configuration from the environment
pub fn init() {
    init_with_config(LogConfig::from_env());
}

/// Initialize logging with custom configuration
///
/// Only the first call has any effect. If another global subscriber is
/// already installed it is left in place.
pub fn init_with_config(config: LogConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("manv_runtime={}", config.level.as_str().to_lowercase()))
        });

        let span_events = if config.show_spans {
            FmtSpan::ENTER | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };

        let (plain, json) = if config.json_format {
            let layer = fmt::layer()
                .json()
                .with_writer(io::stderr)
                .with_span_events(span_events.clone());
            (None, Some(layer))
        } else {
            let layer = fmt::layer()
                .with_writer(io::stderr)
                .with_span_events(span_events.clone())
                .with_target(true)
                .with_line_number(cfg!(debug_assertions));
            (Some(layer), None)
        };

        let file = config
            .log_path
            .as_deref()
            .filter(|_| config.file_output)
            .map(|path| {
                let path = Path::new(path);
                let dir = path
                    .parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .unwrap_or_else(|| Path::new("."));
                let name = path.file_name().unwrap_or_else(|| OsStr::new("manv_runtime.log"));

                fmt::layer()
                    .with_writer(tracing_appender::rolling::never(dir, name))
                    .with_ansi(false)
                    .with_span_events(span_events.clone())
            });

        tracing_subscriber::registry()
            .with(env_filter)
            .with(plain)
            .with(json)
            .with(file)
            .try_init()
            .ok(); // Ignore error if a subscriber is already installed
    });
}

/// Check if logging is initialized
pub fn is_initialized() -> bool {
    LOGGER_INITIALIZED.get().is_some()
}

// ============================================================================
// Runtime-specific logging functions
// ============================================================================

/// Log an OS mapping
#[inline]
pub fn log_mapping(size: usize, base: *const u8) {
    trace!(event = "map", size_bytes = size, address = ?base, "Memory mapped");
}

/// Log an OS unmapping
#[inline]
pub fn log_unmapping(size: usize, base: *const u8) {
    trace!(event = "unmap", size_bytes = size, address = ?base, "Memory unmapped");
}

/// Log a GC allocation
#[inline]
pub fn log_allocation(size: usize, type_id: u64, ptr: *const u8) {
    trace!(
        event = "allocation",
        size_bytes = size,
        type_id,
        address = ?ptr,
        "Object allocated"
    );
}

/// Log an arena chaining a new block
pub fn log_arena_growth(block_capacity: usize, total_capacity: usize, growth_count: usize) {
    debug!(
        event = "arena_growth",
        block_capacity,
        total_capacity,
        growth_count,
        "Arena chained a new block"
    );
}

/// Log the GC heap mapping a new segment
pub fn log_heap_growth(segment_size: usize, heap_size: usize) {
    info!(
        event = "heap_growth",
        segment_size,
        heap_size,
        "GC heap mapped a new segment"
    );
}

/// Log GC cycle start
pub fn log_gc_start(allocated_bytes: usize, object_count: usize) {
    debug!(
        event = "gc_start",
        allocated_bytes,
        objects = object_count,
        "Starting garbage collection cycle"
    );
}

/// Log GC mark phase
pub fn log_gc_mark(marked: usize, overflow_rescans: usize) {
    debug!(
        event = "gc_mark",
        objects_marked = marked,
        overflow_rescans,
        "GC mark phase complete"
    );
}

/// Log GC sweep phase
pub fn log_gc_sweep(swept: usize, bytes_reclaimed: usize) {
    debug!(
        event = "gc_sweep",
        objects_swept = swept,
        bytes_reclaimed,
        "GC sweep phase complete"
    );
}

/// Log GC cycle completion
pub fn log_gc_complete(duration_us: u64, collected: usize, remaining: usize) {
    info!(
        event = "gc_complete",
        objects_collected = collected,
        objects_remaining = remaining,
        duration_us,
        "Garbage collection cycle complete"
    );
}

/// Log misuse the runtime detected and refused
pub fn log_misuse(operation: &str, detail: &str) {
    warn!(event = "misuse", operation, detail, "Runtime misuse rejected");
}

/// Log runtime initialization
pub fn log_runtime_init() {
    info!(event = "runtime_init", "ManV runtime initializing");
}

/// Log runtime shutdown
pub fn log_runtime_shutdown() {
    info!(event = "runtime_shutdown", "ManV runtime shutting down");
}
