use std::path::Path;

use tracing_subscriber::EnvFilter;

use crate::engine::{Engine, EngineConfig};

/// Initialize a tracing subscriber controlled by `RUST_LOG`.
/// Safe to call multiple times — only the first call takes effect.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Threshold large enough that nothing ever flushes on its own.
pub fn memtable_only_config(dir: &Path) -> EngineConfig {
    init_tracing();
    EngineConfig {
        data_dir: dir.to_path_buf(),
        flush_threshold_bytes: 64 * 1024 * 1024,
    }
}

/// Small threshold that trips the overflow latch after a handful of
/// writes.
pub fn small_buffer_config(dir: &Path) -> EngineConfig {
    init_tracing();
    EngineConfig {
        data_dir: dir.to_path_buf(),
        flush_threshold_bytes: 512,
    }
}

pub fn open_memtable_only(dir: &Path) -> Engine {
    Engine::open(memtable_only_config(dir)).expect("open engine")
}

pub fn open_small_buffer(dir: &Path) -> Engine {
    Engine::open(small_buffer_config(dir)).expect("open engine")
}

/// Zero-padded key helper so insertion order matches key order.
pub fn key(i: u32) -> Vec<u8> {
    format!("key-{i:06}").into_bytes()
}

pub fn value(i: u32) -> Vec<u8> {
    format!("value-{i}").into_bytes()
}
