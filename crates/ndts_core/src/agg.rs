//! Online aggregators over a sliding window.
//!
//! Every aggregator exposes `add(x) -> Option<f64>`: the output is defined
//! once `period` observations have accumulated, and each `add` is amortized
//! O(1). `reset` returns the aggregator to its initial state.

use std::collections::BTreeMap;
use std::collections::VecDeque;

pub trait Aggregator {
    fn add(&mut self, x: f64) -> Option<f64>;
    fn reset(&mut self);
}

/// Simple moving average: ring buffer plus a running sum.
pub struct Sma {
    period: usize,
    ring: Vec<f64>,
    head: usize,
    count: usize,
    sum: f64,
}

impl Sma {
    pub fn new(period: usize) -> Self {
        assert!(period >= 1, "period must be at least 1");
        Sma {
            period,
            ring: vec![0.0; period],
            head: 0,
            count: 0,
            sum: 0.0,
        }
    }
}

impl Aggregator for Sma {
    fn add(&mut self, x: f64) -> Option<f64> {
        self.sum += x - self.ring[self.head];
        self.ring[self.head] = x;
        self.head = (self.head + 1) % self.period;
        self.count += 1;
        (self.count >= self.period).then(|| self.sum / self.period as f64)
    }

    fn reset(&mut self) {
        self.ring.fill(0.0);
        self.head = 0;
        self.count = 0;
        self.sum = 0.0;
    }
}

/// Windowed population standard deviation from running `Σx` and `Σx²`.
///
/// The two-moment identity is adequate for financial price ranges; switch
/// to Welford's recurrence if `|x|` grows large enough to cancel.
pub struct StdDev {
    period: usize,
    ring: Vec<f64>,
    head: usize,
    count: usize,
    sum: f64,
    sum_sq: f64,
}

impl StdDev {
    pub fn new(period: usize) -> Self {
        assert!(period >= 1, "period must be at least 1");
        StdDev {
            period,
            ring: vec![0.0; period],
            head: 0,
            count: 0,
            sum: 0.0,
            sum_sq: 0.0,
        }
    }
}

impl Aggregator for StdDev {
    fn add(&mut self, x: f64) -> Option<f64> {
        let evicted = self.ring[self.head];
        self.sum += x - evicted;
        self.sum_sq += x * x - evicted * evicted;
        self.ring[self.head] = x;
        self.head = (self.head + 1) % self.period;
        self.count += 1;
        (self.count >= self.period).then(|| {
            let n = self.period as f64;
            let mean = self.sum / n;
            (self.sum_sq / n - mean * mean).max(0.0).sqrt()
        })
    }

    fn reset(&mut self) {
        self.ring.fill(0.0);
        self.head = 0;
        self.count = 0;
        self.sum = 0.0;
        self.sum_sq = 0.0;
    }
}

/// Exponential moving average, `α = 2 / (period + 1)`, seeded with the
/// simple average of the first `period` inputs.
pub struct Ema {
    period: usize,
    alpha: f64,
    seed_sum: f64,
    count: usize,
    value: f64,
}

impl Ema {
    pub fn new(period: usize) -> Self {
        assert!(period >= 1, "period must be at least 1");
        Ema {
            period,
            alpha: 2.0 / (period as f64 + 1.0),
            seed_sum: 0.0,
            count: 0,
            value: 0.0,
        }
    }
}

impl Aggregator for Ema {
    fn add(&mut self, x: f64) -> Option<f64> {
        self.count += 1;
        if self.count < self.period {
            self.seed_sum += x;
            return None;
        }
        if self.count == self.period {
            self.seed_sum += x;
            self.value = self.seed_sum / self.period as f64;
        } else {
            self.value = self.alpha * x + (1.0 - self.alpha) * self.value;
        }
        Some(self.value)
    }

    fn reset(&mut self) {
        self.seed_sum = 0.0;
        self.count = 0;
        self.value = 0.0;
    }
}

/// Rolling extremum over a monotonic deque of `(sequence, value)` pairs.
struct MonotonicWindow {
    period: u64,
    deque: VecDeque<(u64, f64)>,
    seq: u64,
    /// `Less` keeps a minimum, `Greater` a maximum.
    keep: std::cmp::Ordering,
}

impl MonotonicWindow {
    fn new(period: usize, keep: std::cmp::Ordering) -> Self {
        assert!(period >= 1, "period must be at least 1");
        MonotonicWindow {
            period: period as u64,
            deque: VecDeque::new(),
            seq: 0,
            keep,
        }
    }

    fn add(&mut self, x: f64) -> Option<f64> {
        let s = self.seq;
        self.seq += 1;
        while self
            .deque
            .front()
            .is_some_and(|&(pos, _)| pos + self.period <= s)
        {
            self.deque.pop_front();
        }
        while self
            .deque
            .back()
            .is_some_and(|&(_, v)| v.partial_cmp(&x) != Some(self.keep))
        {
            self.deque.pop_back();
        }
        self.deque.push_back((s, x));
        (self.seq >= self.period).then(|| self.deque.front().map(|&(_, v)| v))?
    }

    fn reset(&mut self) {
        self.deque.clear();
        self.seq = 0;
    }
}

pub struct RollingMin(MonotonicWindow);

impl RollingMin {
    pub fn new(period: usize) -> Self {
        RollingMin(MonotonicWindow::new(period, std::cmp::Ordering::Less))
    }
}

impl Aggregator for RollingMin {
    fn add(&mut self, x: f64) -> Option<f64> {
        self.0.add(x)
    }

    fn reset(&mut self) {
        self.0.reset()
    }
}

pub struct RollingMax(MonotonicWindow);

impl RollingMax {
    pub fn new(period: usize) -> Self {
        RollingMax(MonotonicWindow::new(period, std::cmp::Ordering::Greater))
    }
}

impl Aggregator for RollingMax {
    fn add(&mut self, x: f64) -> Option<f64> {
        self.0.add(x)
    }

    fn reset(&mut self) {
        self.0.reset()
    }
}

/// Named composition: one input fans out to every sub-aggregator, and each
/// `add` returns the currently defined outputs keyed by name.
pub struct StreamingAggregator {
    aggs: Vec<(String, Box<dyn Aggregator>)>,
}

impl StreamingAggregator {
    pub fn new() -> Self {
        StreamingAggregator { aggs: Vec::new() }
    }

    pub fn with(mut self, name: impl Into<String>, agg: Box<dyn Aggregator>) -> Self {
        self.aggs.push((name.into(), agg));
        self
    }

    pub fn add(&mut self, x: f64) -> BTreeMap<String, f64> {
        let mut out = BTreeMap::new();
        for (name, agg) in &mut self.aggs {
            if let Some(y) = agg.add(x) {
                out.insert(name.clone(), y);
            }
        }
        out
    }

    pub fn reset(&mut self) {
        for (_, agg) in &mut self.aggs {
            agg.reset();
        }
    }
}

impl Default for StreamingAggregator {
    fn default() -> Self {
        StreamingAggregator::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sma() {
        let mut sma = Sma::new(3);
        assert_eq!(sma.add(1.0), None);
        assert_eq!(sma.add(2.0), None);
        assert_eq!(sma.add(3.0), Some(2.0));
        assert_eq!(sma.add(4.0), Some(3.0));
        assert_eq!(sma.add(10.0), Some(17.0 / 3.0));
    }

    #[test]
    fn test_sma_period_one() {
        let mut sma = Sma::new(1);
        assert_eq!(sma.add(5.0), Some(5.0));
        assert_eq!(sma.add(-1.0), Some(-1.0));
    }

    #[test]
    fn test_stddev() {
        let mut sd = StdDev::new(2);
        assert_eq!(sd.add(1.0), None);
        // Window [1, 3]: mean 2, variance 1.
        assert_eq!(sd.add(3.0), Some(1.0));
        // Window [3, 3]: variance 0.
        assert_eq!(sd.add(3.0), Some(0.0));
    }

    #[test]
    fn test_ema_seeded_with_simple_average() {
        let mut ema = Ema::new(2);
        assert_eq!(ema.add(1.0), None);
        assert_eq!(ema.add(2.0), Some(1.5));
        // α = 2/3: 2/3·3 + 1/3·1.5
        assert_eq!(ema.add(3.0), Some(2.5));
    }

    #[test]
    fn test_rolling_min_max() {
        let mut lo = RollingMin::new(3);
        let mut hi = RollingMax::new(3);
        let inputs = [5.0, 1.0, 4.0, 2.0, 0.0, 9.0];
        let mins: Vec<_> = inputs.iter().map(|&x| lo.add(x)).collect();
        let maxs: Vec<_> = inputs.iter().map(|&x| hi.add(x)).collect();
        assert_eq!(
            mins,
            vec![None, None, Some(1.0), Some(1.0), Some(0.0), Some(0.0)]
        );
        assert_eq!(
            maxs,
            vec![None, None, Some(5.0), Some(4.0), Some(4.0), Some(9.0)]
        );
    }

    #[test]
    fn test_rolling_max_with_duplicates() {
        let mut hi = RollingMax::new(2);
        assert_eq!(hi.add(3.0), None);
        assert_eq!(hi.add(3.0), Some(3.0));
        assert_eq!(hi.add(1.0), Some(3.0));
        assert_eq!(hi.add(0.0), Some(1.0));
    }

    #[test]
    fn test_reset() {
        let mut sma = Sma::new(2);
        sma.add(10.0);
        sma.add(20.0);
        sma.reset();
        assert_eq!(sma.add(1.0), None);
        assert_eq!(sma.add(3.0), Some(2.0));
    }

    #[test]
    fn test_streaming_aggregator_composition() {
        let mut agg = StreamingAggregator::new()
            .with("sma2", Box::new(Sma::new(2)))
            .with("max3", Box::new(RollingMax::new(3)));

        assert!(agg.add(1.0).is_empty());
        let out = agg.add(2.0);
        assert_eq!(out.get("sma2"), Some(&1.5));
        assert_eq!(out.get("max3"), None);
        let out = agg.add(3.0);
        assert_eq!(out.get("sma2"), Some(&2.5));
        assert_eq!(out.get("max3"), Some(&3.0));

        agg.reset();
        assert!(agg.add(7.0).is_empty());
    }
}
