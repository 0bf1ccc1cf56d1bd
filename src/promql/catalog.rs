//! The fixed synthetic dataset behind the loopback engine.

use super::labels::{matches_all, LabelMatcher, METRIC_NAME};
use super::series::RawSeries;
use crate::prom::Labels;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;

const NAMESPACES: &[&str] = &["staging", "production", "rc"];
const CLUSTERS: &[&str] = &["us-central", "us-west"];
const SERVICES: &[&str] = &["orders", "payments"];
const GRPC_CODES: &[&str] = &["OK", "DeadlineExceeded"];

/// Per-second rate of the error-code Poisson series.
const ERROR_RATE: f64 = 0.1;

/// gRPC methods a service handles.
fn served(service: &str) -> &'static [&'static str] {
    match service {
        "orders" => &["OrdersService.ListOrders", "OrdersService.CreateOrder"],
        "payments" => &["PaymentsService.CreatePayment"],
        _ => &[],
    }
}

/// gRPC methods a service calls on others.
fn called(service: &str) -> &'static [&'static str] {
    match service {
        "orders" => &["PaymentsService.CreatePayment"],
        _ => &[],
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SineParams {
    pub scale: f64,
    /// Radians.
    pub phase: f64,
    /// Seconds.
    pub period: f64,
    pub bias: f64,
}

impl SineParams {
    /// Stable choice of parameters from the hash of a label set.
    pub fn from_hash(hash: u64) -> Self {
        const SCALES: [f64; 4] = [1.0, 2.0, 3.0, 10.0];
        const PHASES: [f64; 3] = [30.0, 60.0, 120.0];
        const PERIODS: [f64; 3] = [30.0 * 60.0, 5.0 * 60.0, 150.0 * 60.0];
        const BIASES: [f64; 3] = [0.0, 0.5, 4.0];

        Self {
            scale: SCALES[(hash % 4) as usize],
            phase: PHASES[((hash / 4) % 3) as usize].to_radians(),
            period: PERIODS[((hash / 12) % 3) as usize],
            bias: BIASES[((hash / 36) % 3) as usize],
        }
    }

    pub fn value(&self, unix_secs: f64) -> f64 {
        self.scale * (2.0 * PI * unix_secs / self.period + self.phase).sin() + self.bias + self.scale
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Generator {
    Sine(SineParams),
    /// Events per second.
    Poisson { rate: f64 },
}

impl Generator {
    /// Deterministic value at `ts_ms`. `interval_secs` is the sample spacing
    /// and scales the Poisson mean.
    pub fn sample(&self, ts_ms: i64, interval_secs: f64) -> f64 {
        match self {
            Generator::Sine(params) => params.value(ts_ms as f64 / 1000.0),
            Generator::Poisson { rate } => {
                let mut rng = StdRng::seed_from_u64(ts_ms.div_euclid(1000) as u64);
                poisson(&mut rng, rate * interval_secs)
            }
        }
    }
}

/// Knuth's method; fine for the small means used here.
fn poisson(rng: &mut StdRng, mean: f64) -> f64 {
    if mean <= 0.0 {
        return 0.0;
    }
    let limit = (-mean).exp();
    let mut k = 0u32;
    let mut p = 1.0;
    loop {
        p *= rng.gen::<f64>();
        if p <= limit {
            return k as f64;
        }
        k += 1;
    }
}

/// One synthetic series definition.
#[derive(Debug, Clone)]
pub struct SyntheticMetric {
    pub labels: Labels,
    pub generator: Generator,
    pub is_gauge: bool,
}

impl SyntheticMetric {
    fn sine(labels: Labels, is_gauge: bool) -> Self {
        let generator = Generator::Sine(SineParams::from_hash(fnv1a(&labels)));
        Self {
            labels,
            generator,
            is_gauge,
        }
    }

    pub fn name(&self) -> &str {
        self.labels.get(METRIC_NAME).map(String::as_str).unwrap_or("")
    }

    /// Samples at `start, start + step, ..` up to `end`; counters are running
    /// sums of the generated increments.
    pub fn render(&self, start_ms: i64, end_ms: i64, step_ms: i64) -> RawSeries {
        let interval = step_ms as f64 / 1000.0;
        let mut samples = Vec::new();
        let mut ts = start_ms;
        while ts <= end_ms {
            samples.push((ts, self.generator.sample(ts, interval)));
            ts += step_ms;
        }

        let mut series = RawSeries::new(self.labels.clone(), samples);
        if !self.is_gauge {
            series.accumulate();
        }
        series
    }
}

/// 64-bit FNV-1a over the sorted `name=value` pairs.
pub fn fnv1a(labels: &Labels) -> u64 {
    const OFFSET: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;

    let mut hash = OFFSET;
    let mut feed = |bytes: &[u8]| {
        for b in bytes {
            hash ^= *b as u64;
            hash = hash.wrapping_mul(PRIME);
        }
    };
    for (k, v) in labels {
        feed(k.as_bytes());
        feed(b"=");
        feed(v.as_bytes());
        feed(b",");
    }
    hash
}

fn labels(pairs: &[(&str, &str)]) -> Labels {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

#[derive(Debug, Clone)]
pub struct Catalog {
    metrics: Vec<SyntheticMetric>,
}

impl Catalog {
    pub fn new(metrics: Vec<SyntheticMetric>) -> Self {
        Self { metrics }
    }

    /// The container and gRPC dataset the loopback engine serves.
    pub fn synthetic() -> Self {
        let mut metrics = Vec::new();
        for namespace in NAMESPACES {
            for cluster in CLUSTERS {
                for service in SERVICES {
                    let base = [("service", *service), ("namespace", *namespace), ("cluster", *cluster)];

                    let mut cpu = labels(&base);
                    cpu.insert(METRIC_NAME.into(), "container_cpu_usage_seconds_total".into());
                    metrics.push(SyntheticMetric::sine(cpu, false));

                    let mut memory = labels(&base);
                    memory.insert(METRIC_NAME.into(), "container_memory_usage_bytes".into());
                    metrics.push(SyntheticMetric::sine(memory, true));

                    let grpc = [
                        ("grpc_server_handled_total", served(service)),
                        ("grpc_client_handled_total", called(service)),
                    ];
                    for (name, methods) in grpc {
                        for method in methods {
                            for code in GRPC_CODES {
                                let mut l = labels(&base);
                                l.insert(METRIC_NAME.into(), name.into());
                                l.insert("grpc_method".into(), method.to_string());
                                l.insert("grpc_code".into(), code.to_string());
                                if *code == "OK" {
                                    metrics.push(SyntheticMetric::sine(l, false));
                                } else {
                                    metrics.push(SyntheticMetric {
                                        labels: l,
                                        generator: Generator::Poisson { rate: ERROR_RATE },
                                        is_gauge: false,
                                    });
                                }
                            }
                        }
                    }
                }
            }
        }
        Self { metrics }
    }

    pub fn metrics(&self) -> &[SyntheticMetric] {
        &self.metrics
    }

    pub fn matching<'a>(&'a self, matchers: &'a [LabelMatcher]) -> impl Iterator<Item = &'a SyntheticMetric> + 'a {
        self.metrics.iter().filter(move |m| matches_all(matchers, &m.labels))
    }

    /// One sample per step in `[start, end]` for every matching metric.
    pub fn select(&self, matchers: &[LabelMatcher], start_ms: i64, end_ms: i64, step_ms: i64) -> Vec<RawSeries> {
        self.matching(matchers)
            .map(|m| m.render(start_ms, end_ms, step_ms))
            .collect()
    }

    pub fn label_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .metrics
            .iter()
            .flat_map(|m| m.labels.keys().cloned())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    pub fn label_values(&self, name: &str) -> Vec<String> {
        let mut values: Vec<String> = self
            .metrics
            .iter()
            .filter_map(|m| m.labels.get(name).cloned())
            .collect();
        values.sort();
        values.dedup();
        values
    }
}
