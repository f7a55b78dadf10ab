//! Named-section stopwatch for measurement passes.

use std::time::Instant;

use fnv::FnvHashMap as HashMap;

/// Accumulates wall time per named section, in milliseconds. At most one
/// section is active at a time; starting a new section discards an
/// unfinished one.
#[derive(Debug, Default)]
pub struct SectionTimer {
    timings: HashMap<String, f64>,
    current: Option<(String, Instant)>,
}

impl SectionTimer {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn start(&mut self, section: &str) {
        self.current = Some((section.to_owned(), Instant::now()));
    }

    /// Close the active section and add its elapsed time to the
    /// accumulated total. A stop without a matching start is a no-op.
    pub fn stop(&mut self) {
        if let Some((section, started)) = self.current.take() {
            let ms = started.elapsed().as_secs_f64() * 1e3;
            *self.timings.entry(section).or_insert(0.0) += ms;
        }
    }

    pub fn reset(&mut self) {
        self.timings.clear();
        self.current = None;
    }

    /// Accumulated milliseconds for a section, 0 if it never ran.
    pub fn elapsed_ms(&self, section: &str) -> f64 {
        self.timings.get(section).copied().unwrap_or(0.0)
    }

    pub fn timings(&self) -> impl Iterator<Item = (&str, f64)> {
        self.timings.iter().map(|(k, &v)| (k.as_str(), v))
    }
}

/// Wall clock in microseconds since the Unix epoch, for report stamps
/// that outlive one substrate session.
pub fn now_us() -> f64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as f64
}

impl std::fmt::Display for SectionTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut entries: Vec<_> = self.timings.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        for (section, ms) in entries {
            writeln!(f, "{}: {:.3} ms", section, ms)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_across_start_stop_pairs() {
        let mut t = SectionTimer::new();
        t.start("probe");
        std::thread::sleep(std::time::Duration::from_millis(2));
        t.stop();
        let first = t.elapsed_ms("probe");
        assert!(first >= 2.0);

        t.start("probe");
        std::thread::sleep(std::time::Duration::from_millis(2));
        t.stop();
        assert!(t.elapsed_ms("probe") >= first + 2.0);
    }

    #[test]
    fn unknown_section_is_zero() {
        let t = SectionTimer::new();
        assert_eq!(t.elapsed_ms("nope"), 0.0);
    }

    #[test]
    fn stop_without_start_is_noop() {
        let mut t = SectionTimer::new();
        t.stop();
        assert_eq!(t.timings().count(), 0);
    }

    #[test]
    fn now_us_advances() {
        let a = now_us();
        std::thread::sleep(std::time::Duration::from_millis(1));
        assert!(now_us() > a);
    }

    #[test]
    fn reset_clears() {
        let mut t = SectionTimer::new();
        t.start("a");
        t.stop();
        t.reset();
        assert_eq!(t.elapsed_ms("a"), 0.0);
    }
}
