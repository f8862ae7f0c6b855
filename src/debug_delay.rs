//! Jitter around compare-and-swap points, so that tests run through
//! more thread interleavings than the scheduler would produce alone.

use std::{sync::OnceLock, thread, time::Duration};

use rand::Rng;

/// Upper bound, in microseconds, for the occasional sleep.
const INTENSITY_VAR: &str = "BLINKMAP_LOCK_FREE_DELAY_INTENSITY";

/// Sleeps about once per thousand calls and otherwise yields half the
/// time. Compiled in only for tests and the `lock_free_delays` feature.
pub(crate) fn debug_delay() {
    static INTENSITY: OnceLock<u32> = OnceLock::new();

    let intensity = *INTENSITY.get_or_init(|| {
        std::env::var(INTENSITY_VAR)
            .ok()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(100)
    });

    let mut rng = rand::rng();
    if rng.random_ratio(1, 1000) {
        let micros = rng.random_range(0..intensity.max(1));
        thread::sleep(Duration::from_micros(u64::from(micros)));
    } else if rng.random_bool(0.5) {
        thread::yield_now();
    }
}
