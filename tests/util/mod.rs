#![allow(dead_code)]

use std::sync::Once;

/// Initializes `env_logger` once per test binary, matching the teacher's
/// own `tests/util/mod.rs::init`.
pub fn init() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = env_logger::try_init();
    });
}
