//! Production clock backed by the operating system.

use std::time::SystemTime;

use roomcast_core::Clock;

/// Wall clock reading `SystemTime::now()`.
///
/// Not monotonic: event timestamps follow whatever the host clock does.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[allow(clippy::disallowed_methods)]
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}
