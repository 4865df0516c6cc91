// Not every test uses every helper.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use probelink::config::{RetryPolicy, SessionConfig, Target};
use probelink::probe::fake_probe::fake_chip_family;
use probelink::{FakeProbe, FakeTarget, Probe, Session};

/// The `FAKE_M4` target, which matches [`FakeTarget::cortex_m4`].
pub fn fake_m4() -> Target {
    let family = fake_chip_family();
    Target::new(&family, &family.variants[0]).unwrap()
}

/// A session connected to a fresh fake Cortex-M4.
pub fn connected_session(config: &SessionConfig) -> (Session, Arc<Mutex<FakeTarget>>) {
    let fake = FakeProbe::new();
    let target = fake.target();
    let session = Session::attach(Probe::new(fake), fake_m4(), config).unwrap();

    (session, target)
}

/// Retry WAIT responses `max_retries` times, without noticeable delays.
pub fn fast_retries(max_retries: u32) -> SessionConfig {
    let mut config = SessionConfig::default();
    config.access.retry = RetryPolicy {
        max_retries,
        initial_backoff: Duration::from_micros(1),
        max_backoff: Duration::from_micros(10),
    };
    config
}
