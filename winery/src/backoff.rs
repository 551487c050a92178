//! Exponential backoff shared by the packer, image manager, and cleaner
//! daemon loops between empty polls of the catalog.

use tokio::time::Duration;

const MIN: Duration = Duration::from_millis(200);
const MAX: Duration = Duration::from_secs(30);
const FACTOR: u32 = 2;

pub fn delay_for_attempt(attempt: u32) -> Duration {
    let factor = FACTOR.saturating_pow(attempt.min(16));
    MIN.saturating_mul(factor).min(MAX)
}

pub async fn wait(attempt: u32) {
    tokio::time::sleep(delay_for_attempt(attempt)).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_grows_and_caps() {
        assert_eq!(delay_for_attempt(0), MIN);
        assert!(delay_for_attempt(1) > delay_for_attempt(0));
        assert_eq!(delay_for_attempt(100), MAX);
    }
}
