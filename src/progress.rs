//! Progress accounting in aligned query base-pairs.

use indicatif::{ProgressBar, ProgressStyle};

/// A meter over the total aligned bp, computed by the mapping pre-scan.
/// Cloneable and thread-safe; every worker advances it by the query span
/// of each task it finishes.
#[derive(Clone)]
pub struct ProgressMeter {
    bar: ProgressBar,
}

impl ProgressMeter {
    pub fn new(total_bp: u64, message: &str, quiet: bool) -> Self {
        let bar = if quiet {
            ProgressBar::hidden()
        } else {
            let bar = ProgressBar::new(total_bp);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("{msg} [{bar:40}] {pos}/{len} bp ({eta})")
                    .unwrap(),
            );
            bar.set_message(message.to_string());
            bar
        };
        ProgressMeter { bar }
    }

    pub fn inc(&self, bp: u64) {
        self.bar.inc(bp);
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    pub fn finish(&self) {
        self.bar.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hidden_meter_still_counts() {
        let meter = ProgressMeter::new(100, "aligned", true);
        meter.inc(30);
        meter.inc(12);
        assert_eq!(meter.position(), 42);
        meter.finish();
    }
}
