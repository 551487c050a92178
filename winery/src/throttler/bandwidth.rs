//! 60-slot ring buffer tracking bytes moved per wall-clock second.

use tokio::time::Instant;

const SLOTS: usize = 60;

pub struct BandwidthCalculator {
    slots: [u64; SLOTS],
    slot_second: [u64; SLOTS],
    start: Instant,
}

impl BandwidthCalculator {
    pub fn new() -> Self {
        Self {
            slots: [0; SLOTS],
            slot_second: [0; SLOTS],
            start: Instant::now(),
        }
    }

    fn current_second(&self) -> u64 {
        self.start.elapsed().as_secs()
    }

    /// Record `n` bytes moved right now, into the slot for the current
    /// second. A slot last touched in an earlier second is reset first.
    pub fn record(&mut self, n: u64) {
        let second = self.current_second();
        let idx = (second % SLOTS as u64) as usize;

        if self.slot_second[idx] != second {
            self.slots[idx] = 0;
            self.slot_second[idx] = second;
        }

        self.slots[idx] += n;
    }

    /// Mean bytes/sec across the slots touched within the trailing window.
    pub fn mean(&self) -> f64 {
        let now = self.current_second();
        let mut sum = 0u64;
        let mut count = 0u64;

        for i in 0..SLOTS {
            if now.saturating_sub(self.slot_second[i]) < SLOTS as u64 {
                sum += self.slots[i];
                count += 1;
            }
        }

        if count == 0 {
            0.0
        } else {
            sum as f64 / count as f64
        }
    }
}

impl Default for BandwidthCalculator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_calculator_has_zero_mean() {
        assert_eq!(BandwidthCalculator::new().mean(), 0.0);
    }

    #[test]
    fn test_record_contributes_to_mean() {
        let mut calc = BandwidthCalculator::new();
        calc.record(1000);
        calc.record(500);
        assert_eq!(calc.mean(), 1500.0);
    }
}
