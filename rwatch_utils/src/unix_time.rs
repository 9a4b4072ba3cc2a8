use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::error;

/// Current wall-clock time in unix seconds, signed to match the timestamp
/// type carried by measurement results.
pub fn unix_now() -> Result<i64, TimeError> {
    let elapsed = SystemTime::now().duration_since(UNIX_EPOCH).map_err(|e| {
        error!("System clock reads before the unix epoch: {e:?}");
        TimeError::BeforeEpoch
    })?;

    Ok(elapsed.as_secs() as i64)
}

/// Failure reading the wall clock.
#[derive(Error, Debug)]
pub enum TimeError {
    /// The system clock is set before 1970, so nothing can be stamped.
    #[error("system clock reads before the unix epoch")]
    BeforeEpoch,
}

#[cfg(test)]
mod tests {
    use super::unix_now;

    #[test]
    fn now_is_well_past_the_epoch() {
        // 2023-01-01; anything earlier means the clock or the conversion
        // is broken.
        assert!(unix_now().expect("clock readable") > 1_672_500_000);
    }
}
