//! Runtime configuration
//!
//! Defaults suit small compiled programs; every knob can be overridden
//! from the environment before the runtime is initialized.

use crate::allocator::DEFAULT_ALIGNMENT;

/// Garbage collector configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcConfig {
    /// Size of the first heap segment
    pub initial_heap_size: usize,
    /// Upper bound on the total size of all heap segments
    pub max_heap_size: usize,
    /// Outstanding bytes that trigger a collection before the next allocation
    pub threshold: usize,
    /// Entries in the mark stack before overflow handling kicks in
    pub mark_stack_capacity: usize,
    /// Reuse reclaimed slots of matching size
    pub recycle_slots: bool,
}

impl GcConfig {
    pub const DEFAULT_HEAP_SIZE: usize = 1024 * 1024; // 1MB
    pub const DEFAULT_MAX_HEAP_SIZE: usize = 64 * 1024 * 1024; // 64MB
    pub const DEFAULT_THRESHOLD: usize = 256 * 1024; // 256KB
    pub const DEFAULT_MARK_STACK: usize = 4096;

    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // MANV_GC_HEAP_SIZE: first segment size in bytes
        if let Some(size) = env_usize("MANV_GC_HEAP_SIZE") {
            config.initial_heap_size = size;
        }

        // MANV_GC_MAX_HEAP: total heap limit in bytes
        if let Some(size) = env_usize("MANV_GC_MAX_HEAP") {
            config.max_heap_size = size;
        }

        // MANV_GC_THRESHOLD: collection trigger in bytes
        if let Some(threshold) = env_usize("MANV_GC_THRESHOLD") {
            config.threshold = threshold;
        }

        // MANV_GC_MARK_STACK: mark stack entries
        if let Some(entries) = env_usize("MANV_GC_MARK_STACK") {
            config.mark_stack_capacity = entries.max(1);
        }

        // MANV_GC_RECYCLE: 0/false disables slot reuse
        if let Some(flag) = env_bool("MANV_GC_RECYCLE") {
            config.recycle_slots = flag;
        }

        config.max_heap_size = config.max_heap_size.max(config.initial_heap_size);
        config
    }

    /// Single fixed-size heap that never grows
    pub fn fixed(heap_size: usize) -> Self {
        Self {
            initial_heap_size: heap_size,
            max_heap_size: heap_size,
            ..Self::default()
        }
    }
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            initial_heap_size: Self::DEFAULT_HEAP_SIZE,
            max_heap_size: Self::DEFAULT_MAX_HEAP_SIZE,
            threshold: Self::DEFAULT_THRESHOLD,
            mark_stack_capacity: Self::DEFAULT_MARK_STACK,
            recycle_slots: true,
        }
    }
}

/// Arena configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaConfig {
    /// Default alignment for allocations and capacity rounding
    pub alignment: usize,
    /// Chain new blocks when capacity runs out
    pub can_grow: bool,
    /// Print a one-time diagnostic on the first growth
    pub warn_on_growth: bool,
}

impl ArenaConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // MANV_ARENA_ALIGN: power-of-two default alignment
        if let Some(align) = env_usize("MANV_ARENA_ALIGN") {
            if align.is_power_of_two() {
                config.alignment = align;
            }
        }

        // MANV_ARENA_GROW: 0/false disables growth
        if let Some(flag) = env_bool("MANV_ARENA_GROW") {
            config.can_grow = flag;
        }

        config
    }

    /// Arena that fails instead of growing
    pub fn fixed() -> Self {
        Self {
            can_grow: false,
            warn_on_growth: false,
            ..Self::default()
        }
    }
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            alignment: DEFAULT_ALIGNMENT,
            can_grow: true,
            warn_on_growth: true,
        }
    }
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok()?.trim().parse().ok()
}

fn env_bool(key: &str) -> Option<bool> {
    let value = std::env::var(key).ok()?;
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
