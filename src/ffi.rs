//! Internal helpers for passing strongly-typed timeout values to the
//! OS-expected `u32` millisecond fields.

use std::time::Duration;

use log::warn;

/// Extension trait for [`Option<Duration>`] timeouts: converts a `Some`
/// duration to milliseconds, truncating to `u32::MAX` with a warning (via
/// [log::warn], tracking the caller) if necessary, and converts `None` to the
/// caller-provided sentinel (usbfs uses 0 for "no timeout").
pub(crate) trait OptDurationExt {
    #[track_caller]
    fn as_millis_truncated_or(self, sentinel: u32) -> u32;
}

impl OptDurationExt for Option<Duration> {
    #[track_caller]
    fn as_millis_truncated_or(self, sentinel: u32) -> u32 {
        match self {
            Some(duration) => {
                if duration.as_millis() > u32::MAX as u128 {
                    // Use the caller of this function as the log target, as
                    // that will be far more relevant to the user.
                    let caller = std::panic::Location::caller().file();
                    warn!(
                        target: caller,
                        "A wildly long timeout ({}s) was truncated to u32::MAX ({}ms)",
                        duration.as_secs_f64(),
                        u32::MAX,
                    );
                    u32::MAX
                } else {
                    duration.as_millis() as u32
                }
            }
            None => sentinel,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_and_truncates() {
        assert_eq!(Some(Duration::from_millis(1500)).as_millis_truncated_or(0), 1500);
        assert_eq!(None.as_millis_truncated_or(0), 0);
        assert_eq!(
            Some(Duration::from_secs(86400 * 365 * 1000)).as_millis_truncated_or(0),
            u32::MAX,
        );
    }
}
