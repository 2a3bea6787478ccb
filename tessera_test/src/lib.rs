use std::{
    sync::Once,
    time::{Duration, Instant},
};

use tessera_shared::{log, spin_sleep};

static LOGGER: Once = Once::new();

/// Installs a logger for tests. Can be called from every test; only the first call has an effect.
pub fn setup_logger() {
    LOGGER.call_once(|| {
        simple_logger::SimpleLogger::new()
            .with_level(log::LevelFilter::Trace)
            .init()
            .expect("failed to initialize the test logger");
    });
}

/// Calls `f` until it returns `Some` or the `timeout` elapses.
///
/// # Panics
///
/// When `f` didn't return `Some` within the `timeout`.
pub fn poll_until<T>(timeout: Duration, mut f: impl FnMut() -> Option<T>) -> T {
    let start = Instant::now();
    loop {
        if let Some(value) = f() {
            return value;
        }
        if start.elapsed() > timeout {
            panic!("condition was not met within {timeout:?}");
        }
        spin_sleep::sleep(Duration::from_micros(200));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_logger_twice() {
        setup_logger();
        setup_logger();
    }

    #[test]
    fn poll_until_returns_value() {
        let mut counter = 0;
        let value = poll_until(Duration::from_secs(1), || {
            counter += 1;
            (counter == 3).then_some(counter)
        });
        assert_eq!(value, 3);
    }

    #[test]
    #[should_panic]
    fn poll_until_times_out() {
        poll_until::<()>(Duration::from_millis(5), || None);
    }
}
