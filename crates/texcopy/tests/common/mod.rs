//! Shared helpers for `texcopy` integration tests.

#![allow(dead_code)]

use std::sync::{Mutex, MutexGuard, OnceLock};

use texcopy::{EngineError, WgpuEngine};

pub fn require_webgpu() -> bool {
    let Ok(raw) = std::env::var("TEXCOPY_REQUIRE_WEBGPU") else {
        return false;
    };

    let v = raw.trim();
    v == "1"
        || v.eq_ignore_ascii_case("true")
        || v.eq_ignore_ascii_case("yes")
        || v.eq_ignore_ascii_case("on")
}

pub fn skip_or_panic(test_name: &str, reason: &str) {
    if require_webgpu() {
        panic!("TEXCOPY_REQUIRE_WEBGPU is enabled but {test_name} cannot run: {reason}");
    }
    eprintln!("skipping {test_name}: {reason}");
}

/// Return a shared, leaked wgpu engine for this integration-test binary.
///
/// Some drivers crash when many `wgpu::Device`s are created and dropped in one process, so every
/// test in the binary reuses a single device.
pub fn wgpu_engine(test_name: &str) -> Option<MutexGuard<'static, WgpuEngine>> {
    static ENGINE: OnceLock<Option<&'static Mutex<WgpuEngine>>> = OnceLock::new();

    let engine = ENGINE.get_or_init(|| {
        let engine = match pollster::block_on(WgpuEngine::new_headless()) {
            Ok(engine) => engine,
            Err(EngineError::AdapterNotFound) => return None,
            Err(err) => panic!("failed to create wgpu engine: {err}"),
        };
        Some(Box::leak(Box::new(Mutex::new(engine))))
    });

    let Some(engine) = engine.as_ref() else {
        skip_or_panic(test_name, "wgpu adapter not found");
        return None;
    };
    Some(engine.lock().unwrap_or_else(|poisoned| poisoned.into_inner()))
}
