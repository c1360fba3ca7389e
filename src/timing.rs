use std::time::Duration;

// 制御器・推定器の呼び出し時間の統計
// プラントの前進は「真値」の生成であり制御コストではないので計時しない
#[derive(Debug, Clone, Default)]
pub struct LatencyStats {
    samples: Vec<f64>,
}

impl LatencyStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, elapsed: Duration) {
        self.samples.push(elapsed.as_secs_f64());
    }

    pub fn record_secs(&mut self, secs: f64) {
        self.samples.push(secs);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn mean(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    // 標本分散
    pub fn variance(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let mean = self.mean();
        self.samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / self.samples.len() as f64
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn report(&self, name: &str) {
        println!(
            "{}: n = {}, mean {:7.3} ms, std {:7.3} ms",
            name,
            self.len(),
            self.mean() * 1e3,
            self.std_dev() * 1e3
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_equal(a: f64, b: f64, epsilon: f64) -> bool {
        (a - b).abs() < epsilon
    }

    #[test]
    fn empty_stats_are_zero() {
        let s = LatencyStats::new();
        assert!(s.is_empty());
        assert_eq!(s.mean(), 0.0);
        assert_eq!(s.variance(), 0.0);
    }

    #[test]
    fn mean_and_variance_on_known_samples() {
        let mut s = LatencyStats::new();
        for v in [0.1, 0.2, 0.3, 0.4] {
            s.record_secs(v);
        }
        assert_eq!(s.len(), 4);
        assert!(approx_equal(s.mean(), 0.25, 1e-12));
        assert!(approx_equal(s.variance(), 0.0125, 1e-12));
        assert!(approx_equal(s.std_dev(), 0.0125f64.sqrt(), 1e-12));
    }

    #[test]
    fn record_duration() {
        let mut s = LatencyStats::new();
        s.record(Duration::from_millis(250));
        assert!(approx_equal(s.mean(), 0.25, 1e-9));
    }
}
