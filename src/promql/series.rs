use crate::prom::Labels;

/// Raw `(timestamp ms, value)` samples for one label set, in time order.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSeries {
    pub labels: Labels,
    pub samples: Vec<(i64, f64)>,
}

impl RawSeries {
    pub fn new(labels: Labels, samples: Vec<(i64, f64)>) -> Self {
        Self { labels, samples }
    }

    /// Replace each value with the running sum of values so far.
    ///
    /// Negative values are not added, which keeps the result monotone.
    pub fn accumulate(&mut self) {
        let mut total = 0.0;
        for (_, value) in self.samples.iter_mut() {
            if *value > 0.0 {
                total += *value;
            }
            *value = total;
        }
    }

    /// Samples in the left-open window `(end - range, end]`.
    pub fn window(&self, end_ms: i64, range_ms: i64) -> &[(i64, f64)] {
        let lo = self.samples.partition_point(|(ts, _)| *ts <= end_ms - range_ms);
        let hi = self.samples.partition_point(|(ts, _)| *ts <= end_ms);
        &self.samples[lo..hi.max(lo)]
    }
}

/// Increase across samples, treating any decrease as a counter reset.
pub fn counter_increase(samples: &[(i64, f64)]) -> f64 {
    let mut increase = 0.0;
    for pair in samples.windows(2) {
        let (prev, curr) = (pair[0].1, pair[1].1);
        if curr >= prev {
            increase += curr - prev;
        } else {
            increase += curr;
        }
    }
    increase
}

/// Per-second average rate over the span between the first and last sample.
///
/// `None` with fewer than two samples.
pub fn counter_rate(samples: &[(i64, f64)]) -> Option<f64> {
    if samples.len() < 2 {
        return None;
    }
    let span = (samples[samples.len() - 1].0 - samples[0].0) as f64 / 1000.0;
    if span <= 0.0 {
        return None;
    }
    Some(counter_increase(samples) / span)
}

/// Per-second rate from the last two samples.
pub fn instant_rate(samples: &[(i64, f64)]) -> Option<f64> {
    let [.., (t0, v0), (t1, v1)] = samples else {
        return None;
    };
    let dt = (t1 - t0) as f64 / 1000.0;
    if dt <= 0.0 {
        return None;
    }
    let delta = if v1 >= v0 { v1 - v0 } else { *v1 };
    Some(delta / dt)
}
