//! Step-wise evaluation of a parsed expression over the synthetic catalog.
//!
//! Every expression evaluates to values at all grid points at once: a vector
//! holds one optional point per step for each series.

use super::catalog::Catalog;
use super::labels::{project, without_name, METRIC_NAME};
use super::parser::{AggregationOp, BinaryOp, Expr, Grouping, Selector, VectorMatching};
use super::series::{counter_rate, instant_rate, RawSeries};
use super::{QueryError, MAX_RAW_SAMPLES};
use crate::prom::{Labels, RangeSeries, Sample};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};

/// Evaluation timestamps `start + i * step` for `i < points`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grid {
    pub start_ms: i64,
    pub step_ms: i64,
    pub points: usize,
}

impl Grid {
    pub fn instant(time_ms: i64) -> Self {
        Self {
            start_ms: time_ms,
            step_ms: 1,
            points: 1,
        }
    }

    pub fn time(&self, i: usize) -> i64 {
        self.start_ms + i as i64 * self.step_ms
    }

    pub fn end_ms(&self) -> i64 {
        self.time(self.points.saturating_sub(1))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepSeries {
    pub labels: Labels,
    pub points: Vec<Option<f64>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(Vec<f64>),
    Vector(Vec<StepSeries>),
    String(String),
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Value::Scalar(_) => "scalar",
            Value::Vector(_) => "instant vector",
            Value::String(_) => "string",
        }
    }
}

/// PromQL evaluator
pub struct Evaluator<'a> {
    catalog: &'a Catalog,
    grid: Grid,
    /// Spacing of raw samples; evaluation timestamps fall on this grid.
    resolution_ms: i64,
    lookback_ms: i64,
}

impl<'a> Evaluator<'a> {
    pub fn new(catalog: &'a Catalog, grid: Grid, resolution_ms: i64, lookback_ms: i64) -> Self {
        Self {
            catalog,
            grid,
            resolution_ms: resolution_ms.max(1),
            lookback_ms,
        }
    }

    pub fn eval(&self, expr: &Expr) -> Result<Value, QueryError> {
        match expr {
            Expr::Number(n) => Ok(Value::Scalar(vec![*n; self.grid.points])),
            Expr::String(s) => Ok(Value::String(s.clone())),
            Expr::Paren(inner) => self.eval(inner),
            Expr::Selector(selector) => Ok(Value::Vector(self.eval_selector(selector)?)),
            Expr::RangeSelector { .. } => Err(QueryError::Eval(
                "range vector must be passed to a function that accepts one".into(),
            )),
            Expr::Negate(inner) => match self.eval(inner)? {
                Value::Scalar(values) => Ok(Value::Scalar(values.into_iter().map(|v| -v).collect())),
                Value::Vector(series) => Ok(Value::Vector(map_series(series, |v| -v))),
                Value::String(_) => Err(QueryError::Eval("unary minus is not defined on strings".into())),
            },
            Expr::Binary {
                op,
                lhs,
                rhs,
                return_bool,
                matching,
            } => {
                let lhs = self.eval(lhs)?;
                let rhs = self.eval(rhs)?;
                self.eval_binary(*op, lhs, rhs, *return_bool, matching.as_ref())
            }
            Expr::Aggregation {
                op,
                expr,
                param,
                grouping,
            } => {
                let input = self.expect_vector(expr)?;
                let param = match param {
                    Some(p) => Some(self.expect_scalar(p)?),
                    None => None,
                };
                Ok(Value::Vector(self.eval_aggregation(*op, input, param, grouping.as_ref())))
            }
            Expr::Call { name, args } => self.eval_call(name, args),
        }
    }

    /// Raw samples for `selector`, reaching back `window_ms` before the
    /// first evaluation point.
    fn fetch(&self, selector: &Selector, window_ms: i64) -> Result<Vec<RawSeries>, QueryError> {
        let res = self.resolution_ms;
        let out_of_bounds = || QueryError::InvalidRange("selector range or offset is out of bounds".into());
        let first = self.grid.start_ms.checked_sub(selector.offset_ms).ok_or_else(out_of_bounds)?;
        let last = self.grid.end_ms().checked_sub(selector.offset_ms).ok_or_else(out_of_bounds)?;
        let back = window_ms.checked_add(res - 1).ok_or_else(out_of_bounds)? / res * res;
        let from = first.checked_sub(back).ok_or_else(out_of_bounds)?;
        if [from, last].iter().any(|t| DateTime::<Utc>::from_timestamp_millis(*t).is_none()) {
            return Err(out_of_bounds());
        }
        let samples = last.checked_sub(from).ok_or_else(out_of_bounds)? / res + 1;
        if samples > MAX_RAW_SAMPLES {
            return Err(QueryError::InvalidRange(format!(
                "selector would read {samples} samples per series, more than {MAX_RAW_SAMPLES}"
            )));
        }
        Ok(self.catalog.select(&selector.matchers, from, last, res))
    }

    fn eval_selector(&self, selector: &Selector) -> Result<Vec<StepSeries>, QueryError> {
        Ok(self
            .fetch(selector, self.lookback_ms)?
            .into_iter()
            .map(|raw| {
                let points = (0..self.grid.points)
                    .map(|i| {
                        let t = self.grid.time(i) - selector.offset_ms;
                        raw.window(t, self.lookback_ms).last().map(|(_, v)| *v)
                    })
                    .collect();
                StepSeries {
                    labels: raw.labels,
                    points,
                }
            })
            .collect())
    }

    /// Samples of a top-level range selector at the single evaluation point.
    pub fn eval_raw_range(&self, selector: &Selector, range_ms: i64) -> Result<Vec<RangeSeries>, QueryError> {
        let series = self.fetch(selector, range_ms)?;
        let t = self.grid.start_ms - selector.offset_ms;
        Ok(series
            .into_iter()
            .filter_map(|raw| {
                let values: Vec<Sample> = raw
                    .window(t, range_ms)
                    .iter()
                    .map(|(ts, v)| Sample::new(*ts as f64 / 1000.0, *v))
                    .collect();
                (!values.is_empty()).then(|| RangeSeries {
                    metric: raw.labels.clone(),
                    values,
                })
            })
            .collect())
    }

    fn expect_vector(&self, expr: &Expr) -> Result<Vec<StepSeries>, QueryError> {
        match self.eval(expr)? {
            Value::Vector(series) => Ok(series),
            other => Err(QueryError::Eval(format!(
                "expected instant vector, got {}",
                other.kind()
            ))),
        }
    }

    fn expect_scalar(&self, expr: &Expr) -> Result<Vec<f64>, QueryError> {
        match self.eval(expr)? {
            Value::Scalar(values) => Ok(values),
            other => Err(QueryError::Eval(format!("expected scalar, got {}", other.kind()))),
        }
    }

    fn eval_call(&self, name: &str, args: &[Expr]) -> Result<Value, QueryError> {
        let arity = |expected: std::ops::RangeInclusive<usize>| {
            if expected.contains(&args.len()) {
                Ok(())
            } else {
                Err(QueryError::Eval(format!(
                    "wrong number of arguments for {name}(): got {}",
                    args.len()
                )))
            }
        };

        match name {
            "rate" | "irate" | "increase" | "delta" | "idelta" | "avg_over_time" | "sum_over_time"
            | "min_over_time" | "max_over_time" | "count_over_time" | "last_over_time" => {
                arity(1..=1)?;
                self.eval_range_function(name, &args[0])
            }
            "abs" | "ceil" | "floor" | "exp" | "ln" | "log2" | "log10" | "sqrt" => {
                arity(1..=1)?;
                let f: fn(f64) -> f64 = match name {
                    "abs" => f64::abs,
                    "ceil" => f64::ceil,
                    "floor" => f64::floor,
                    "exp" => f64::exp,
                    "ln" => f64::ln,
                    "log2" => f64::log2,
                    "log10" => f64::log10,
                    _ => f64::sqrt,
                };
                Ok(Value::Vector(map_series(self.expect_vector(&args[0])?, f)))
            }
            "round" => {
                arity(1..=2)?;
                let input = self.expect_vector(&args[0])?;
                let nearest = match args.get(1) {
                    Some(arg) => self.expect_scalar(arg)?,
                    None => vec![1.0; self.grid.points],
                };
                Ok(Value::Vector(map_series_at(input, |i, v| {
                    let inverse = 1.0 / nearest[i];
                    (v * inverse + 0.5).floor() / inverse
                })))
            }
            "clamp" => {
                arity(3..=3)?;
                let input = self.expect_vector(&args[0])?;
                let min = self.expect_scalar(&args[1])?;
                let max = self.expect_scalar(&args[2])?;
                let series = filter_series_at(input, |i, v| (min[i] <= max[i]).then(|| v.max(min[i]).min(max[i])));
                Ok(Value::Vector(series))
            }
            "clamp_min" | "clamp_max" => {
                arity(2..=2)?;
                let input = self.expect_vector(&args[0])?;
                let bound = self.expect_scalar(&args[1])?;
                let lower = name == "clamp_min";
                Ok(Value::Vector(map_series_at(input, |i, v| {
                    if lower {
                        v.max(bound[i])
                    } else {
                        v.min(bound[i])
                    }
                })))
            }
            "scalar" => {
                arity(1..=1)?;
                let input = self.expect_vector(&args[0])?;
                let values = (0..self.grid.points)
                    .map(|i| {
                        let mut present = input.iter().filter_map(|s| s.points[i]);
                        match (present.next(), present.next()) {
                            (Some(v), None) => v,
                            _ => f64::NAN,
                        }
                    })
                    .collect();
                Ok(Value::Scalar(values))
            }
            "vector" => {
                arity(1..=1)?;
                let values = self.expect_scalar(&args[0])?;
                Ok(Value::Vector(vec![StepSeries {
                    labels: Labels::new(),
                    points: values.into_iter().map(Some).collect(),
                }]))
            }
            "time" => {
                arity(0..=0)?;
                let values = (0..self.grid.points)
                    .map(|i| self.grid.time(i) as f64 / 1000.0)
                    .collect();
                Ok(Value::Scalar(values))
            }
            "sort" | "sort_desc" => {
                arity(1..=1)?;
                let mut input = self.expect_vector(&args[0])?;
                if self.grid.points == 1 {
                    let key = |s: &StepSeries| s.points[0].unwrap_or(f64::NAN);
                    input.sort_by(|a, b| key(a).total_cmp(&key(b)));
                    if name == "sort_desc" {
                        input.reverse();
                    }
                }
                Ok(Value::Vector(input))
            }
            other => Err(QueryError::Unsupported(format!("function {other}()"))),
        }
    }

    fn eval_range_function(&self, name: &str, arg: &Expr) -> Result<Value, QueryError> {
        let Expr::RangeSelector { selector, range_ms } = arg else {
            return Err(QueryError::Eval(format!("{name}() expects a range vector argument")));
        };
        let range_ms = *range_ms;
        let range_secs = range_ms as f64 / 1000.0;

        let f: Box<dyn Fn(&[(i64, f64)]) -> Option<f64>> = match name {
            "rate" => Box::new(counter_rate),
            "increase" => Box::new(move |w| counter_rate(w).map(|r| r * range_secs)),
            "irate" => Box::new(instant_rate),
            "delta" => Box::new(move |w| {
                let ((t0, v0), (t1, v1)) = (w.first()?, w.last()?);
                let span = (t1 - t0) as f64 / 1000.0;
                (w.len() >= 2 && span > 0.0).then(|| (v1 - v0) / span * range_secs)
            }),
            "idelta" => Box::new(|w| match w {
                [.., (_, v0), (_, v1)] => Some(v1 - v0),
                _ => None,
            }),
            "avg_over_time" => Box::new(|w| {
                (!w.is_empty()).then(|| w.iter().map(|(_, v)| v).sum::<f64>() / w.len() as f64)
            }),
            "sum_over_time" => Box::new(|w| (!w.is_empty()).then(|| w.iter().map(|(_, v)| v).sum())),
            "min_over_time" => Box::new(|w| w.iter().map(|(_, v)| *v).reduce(f64::min)),
            "max_over_time" => Box::new(|w| w.iter().map(|(_, v)| *v).reduce(f64::max)),
            "count_over_time" => Box::new(|w| (!w.is_empty()).then(|| w.len() as f64)),
            "last_over_time" => Box::new(|w| w.last().map(|(_, v)| *v)),
            other => return Err(QueryError::Unsupported(format!("function {other}()"))),
        };
        let keep_name = name == "last_over_time";
        let series = self
            .fetch(selector, range_ms)?
            .into_iter()
            .map(|raw| {
                let points = (0..self.grid.points)
                    .map(|i| {
                        let t = self.grid.time(i) - selector.offset_ms;
                        f(raw.window(t, range_ms))
                    })
                    .collect();
                let labels = if keep_name { raw.labels } else { without_name(&raw.labels) };
                StepSeries { labels, points }
            })
            .collect();
        Ok(Value::Vector(series))
    }

    fn eval_binary(
        &self,
        op: BinaryOp,
        lhs: Value,
        rhs: Value,
        return_bool: bool,
        matching: Option<&VectorMatching>,
    ) -> Result<Value, QueryError> {
        match (lhs, rhs) {
            (Value::Scalar(a), Value::Scalar(b)) => {
                if op.is_set() {
                    return Err(QueryError::Eval(format!("set operator {op:?} not allowed between scalars")));
                }
                if op.is_comparison() && !return_bool {
                    return Err(QueryError::Eval(
                        "comparisons between scalars must use the bool modifier".into(),
                    ));
                }
                Ok(Value::Scalar(
                    a.iter()
                        .zip(&b)
                        .map(|(x, y)| arithmetic(op, *x, *y).unwrap_or_else(|| bool_value(compare(op, *x, *y))))
                        .collect(),
                ))
            }
            (Value::Vector(series), Value::Scalar(scalar)) => {
                if op.is_set() {
                    return Err(QueryError::Eval(format!("set operator {op:?} needs vectors on both sides")));
                }
                Ok(Value::Vector(vector_scalar(op, series, &scalar, return_bool, false)))
            }
            (Value::Scalar(scalar), Value::Vector(series)) => {
                if op.is_set() {
                    return Err(QueryError::Eval(format!("set operator {op:?} needs vectors on both sides")));
                }
                Ok(Value::Vector(vector_scalar(op, series, &scalar, return_bool, true)))
            }
            (Value::Vector(lhs), Value::Vector(rhs)) => {
                if op.is_set() {
                    Ok(Value::Vector(self.set_operation(op, lhs, rhs, matching)))
                } else {
                    Ok(Value::Vector(vector_vector(op, lhs, rhs, return_bool, matching)?))
                }
            }
            (l, r) => Err(QueryError::Eval(format!(
                "binary operator {op:?} not defined between {} and {}",
                l.kind(),
                r.kind()
            ))),
        }
    }

    fn set_operation(
        &self,
        op: BinaryOp,
        lhs: Vec<StepSeries>,
        rhs: Vec<StepSeries>,
        matching: Option<&VectorMatching>,
    ) -> Vec<StepSeries> {
        let points = self.grid.points;
        let present_at = |side: &[StepSeries]| -> HashMap<Labels, Vec<bool>> {
            let mut present: HashMap<Labels, Vec<bool>> = HashMap::new();
            for s in side {
                let entry = present.entry(signature(&s.labels, matching)).or_insert_with(|| vec![false; points]);
                for (i, p) in s.points.iter().enumerate() {
                    entry[i] |= p.is_some();
                }
            }
            present
        };
        let rhs_present = present_at(&rhs);

        match op {
            BinaryOp::And | BinaryOp::Unless => {
                let keep_when = op == BinaryOp::And;
                lhs.into_iter()
                    .map(|mut s| {
                        let present = rhs_present.get(&signature(&s.labels, matching));
                        for (i, p) in s.points.iter_mut().enumerate() {
                            let matched = present.map(|v| v[i]).unwrap_or(false);
                            if matched != keep_when {
                                *p = None;
                            }
                        }
                        s
                    })
                    .collect()
            }
            _ => {
                let lhs_present = present_at(&lhs);
                let mut out = lhs;
                for mut s in rhs {
                    if let Some(present) = lhs_present.get(&signature(&s.labels, matching)) {
                        for (i, p) in s.points.iter_mut().enumerate() {
                            if present[i] {
                                *p = None;
                            }
                        }
                    }
                    out.push(s);
                }
                out
            }
        }
    }

    fn eval_aggregation(
        &self,
        op: AggregationOp,
        input: Vec<StepSeries>,
        param: Option<Vec<f64>>,
        grouping: Option<&Grouping>,
    ) -> Vec<StepSeries> {
        let points = self.grid.points;
        let mut groups: BTreeMap<Labels, Vec<usize>> = BTreeMap::new();
        for (idx, s) in input.iter().enumerate() {
            let key = match grouping {
                Some(g) => project(&s.labels, &g.labels, g.by),
                None => Labels::new(),
            };
            groups.entry(key).or_default().push(idx);
        }
        let param = param.unwrap_or_else(|| vec![f64::NAN; points]);

        if matches!(op, AggregationOp::TopK | AggregationOp::BottomK) {
            let mut selected = vec![vec![false; points]; input.len()];
            for members in groups.values() {
                for i in 0..points {
                    let k = param[i];
                    if !(k >= 1.0) {
                        continue;
                    }
                    let mut candidates: Vec<(usize, f64)> = members
                        .iter()
                        .filter_map(|idx| input[*idx].points[i].map(|v| (*idx, v)))
                        .collect();
                    candidates.sort_by(|a, b| b.1.total_cmp(&a.1));
                    if op == AggregationOp::BottomK {
                        candidates.reverse();
                    }
                    for (idx, _) in candidates.into_iter().take(k as usize) {
                        selected[idx][i] = true;
                    }
                }
            }
            return input
                .into_iter()
                .zip(selected)
                .map(|(mut s, keep)| {
                    for (p, keep) in s.points.iter_mut().zip(keep) {
                        if !keep {
                            *p = None;
                        }
                    }
                    s
                })
                .collect();
        }

        groups
            .into_iter()
            .map(|(labels, members)| {
                let points = (0..points)
                    .map(|i| {
                        let values: Vec<f64> = members.iter().filter_map(|idx| input[*idx].points[i]).collect();
                        aggregate(op, &values, param[i])
                    })
                    .collect();
                StepSeries { labels, points }
            })
            .collect()
    }
}

fn aggregate(op: AggregationOp, values: &[f64], param: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = || values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

    Some(match op {
        AggregationOp::Sum => values.iter().sum(),
        AggregationOp::Avg => mean,
        AggregationOp::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
        AggregationOp::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        AggregationOp::Count => n,
        AggregationOp::Group => 1.0,
        AggregationOp::Stdvar => variance(),
        AggregationOp::Stddev => variance().sqrt(),
        AggregationOp::Quantile => quantile(param, values),
        AggregationOp::TopK | AggregationOp::BottomK => return None,
    })
}

/// Linear interpolation between the closest ranks.
pub fn quantile(q: f64, values: &[f64]) -> f64 {
    if values.is_empty() || q.is_nan() {
        return f64::NAN;
    }
    if q < 0.0 {
        return f64::NEG_INFINITY;
    }
    if q > 1.0 {
        return f64::INFINITY;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let rank = q * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let weight = rank - lower as f64;
    sorted[lower] * (1.0 - weight) + sorted[upper] * weight
}

fn arithmetic(op: BinaryOp, a: f64, b: f64) -> Option<f64> {
    Some(match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        BinaryOp::Mod => a % b,
        BinaryOp::Pow => a.powf(b),
        BinaryOp::Atan2 => a.atan2(b),
        _ => return None,
    })
}

fn compare(op: BinaryOp, a: f64, b: f64) -> bool {
    match op {
        BinaryOp::Equal => a == b,
        BinaryOp::NotEqual => a != b,
        BinaryOp::Less => a < b,
        BinaryOp::LessOrEqual => a <= b,
        BinaryOp::Greater => a > b,
        BinaryOp::GreaterOrEqual => a >= b,
        _ => false,
    }
}

fn bool_value(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

/// Combine one sample pair; `None` drops the point from a filtering
/// comparison.
fn combine(op: BinaryOp, a: f64, b: f64, keep: f64, return_bool: bool) -> Option<f64> {
    if let Some(v) = arithmetic(op, a, b) {
        return Some(v);
    }
    let result = compare(op, a, b);
    if return_bool {
        Some(bool_value(result))
    } else {
        result.then_some(keep)
    }
}

fn vector_scalar(
    op: BinaryOp,
    series: Vec<StepSeries>,
    scalar: &[f64],
    return_bool: bool,
    scalar_on_left: bool,
) -> Vec<StepSeries> {
    let drop_name = !op.is_comparison() || return_bool;
    series
        .into_iter()
        .map(|s| {
            let points = s
                .points
                .iter()
                .enumerate()
                .map(|(i, p)| {
                    let v = (*p)?;
                    let (a, b) = if scalar_on_left { (scalar[i], v) } else { (v, scalar[i]) };
                    combine(op, a, b, v, return_bool)
                })
                .collect();
            let labels = if drop_name { without_name(&s.labels) } else { s.labels };
            StepSeries { labels, points }
        })
        .collect()
}

fn signature(labels: &Labels, matching: Option<&VectorMatching>) -> Labels {
    match matching {
        Some(m) => project(labels, &m.labels, m.on),
        None => without_name(labels),
    }
}

fn vector_vector(
    op: BinaryOp,
    lhs: Vec<StepSeries>,
    rhs: Vec<StepSeries>,
    return_bool: bool,
    matching: Option<&VectorMatching>,
) -> Result<Vec<StepSeries>, QueryError> {
    let mut by_signature: HashMap<Labels, usize> = HashMap::new();
    for (idx, s) in rhs.iter().enumerate() {
        if by_signature.insert(signature(&s.labels, matching), idx).is_some() {
            return Err(QueryError::Eval(
                "many-to-many matching not allowed: found duplicate series on the right-hand side".into(),
            ));
        }
    }

    let drop_name = !op.is_comparison() || return_bool;
    let mut matched_lhs: HashMap<Labels, ()> = HashMap::new();
    let mut out = Vec::new();
    for s in lhs {
        let sig = signature(&s.labels, matching);
        let Some(&idx) = by_signature.get(&sig) else {
            continue;
        };
        if matched_lhs.insert(sig.clone(), ()).is_some() {
            return Err(QueryError::Eval(
                "multiple matches for labels: many-to-one matching must be explicit".into(),
            ));
        }
        let other = &rhs[idx];
        let points = s
            .points
            .iter()
            .zip(&other.points)
            .map(|(a, b)| match (a, b) {
                (Some(a), Some(b)) => combine(op, *a, *b, *a, return_bool),
                _ => None,
            })
            .collect();

        let mut labels = s.labels;
        if drop_name {
            labels.remove(METRIC_NAME);
        }
        match matching {
            Some(m) if m.on => labels = project(&labels, &m.labels, true),
            Some(m) => {
                for name in &m.labels {
                    labels.remove(name);
                }
            }
            None => {}
        }
        out.push(StepSeries { labels, points });
    }
    Ok(out)
}

fn map_series(series: Vec<StepSeries>, f: impl Fn(f64) -> f64) -> Vec<StepSeries> {
    map_series_at(series, |_, v| f(v))
}

fn map_series_at(series: Vec<StepSeries>, f: impl Fn(usize, f64) -> f64) -> Vec<StepSeries> {
    filter_series_at(series, |i, v| Some(f(i, v)))
}

/// Apply `f` to every present point and drop the metric name.
fn filter_series_at(series: Vec<StepSeries>, f: impl Fn(usize, f64) -> Option<f64>) -> Vec<StepSeries> {
    series
        .into_iter()
        .map(|s| StepSeries {
            labels: without_name(&s.labels),
            points: s
                .points
                .iter()
                .enumerate()
                .map(|(i, p)| p.and_then(|v| f(i, v)))
                .collect(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::promql::catalog::{Generator, SineParams, SyntheticMetric};
    use crate::promql::parser::parse;

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    /// Two constant gauges and one counter growing by 1 per sample.
    fn catalog() -> Catalog {
        let constant = |value: f64| {
            Generator::Sine(SineParams {
                scale: 0.0,
                phase: 0.0,
                period: 60.0,
                bias: value,
            })
        };
        Catalog::new(vec![
            SyntheticMetric {
                labels: labels(&[("__name__", "temp"), ("zone", "a"), ("job", "x")]),
                generator: constant(10.0),
                is_gauge: true,
            },
            SyntheticMetric {
                labels: labels(&[("__name__", "temp"), ("zone", "b"), ("job", "x")]),
                generator: constant(30.0),
                is_gauge: true,
            },
            SyntheticMetric {
                labels: labels(&[("__name__", "hits_total"), ("zone", "a"), ("job", "x")]),
                generator: constant(1.0),
                is_gauge: false,
            },
        ])
    }

    fn eval(query: &str, points: usize) -> Value {
        let catalog = catalog();
        let grid = Grid {
            start_ms: 600_000,
            step_ms: 60_000,
            points,
        };
        Evaluator::new(&catalog, grid, 60_000, 300_000)
            .eval(&parse(query).unwrap())
            .unwrap()
    }

    fn vector(value: Value) -> Vec<StepSeries> {
        match value {
            Value::Vector(series) => series,
            other => panic!("expected vector, got {}", other.kind()),
        }
    }

    #[test]
    fn test_selector_keeps_name() {
        let series = vector(eval("temp", 3));
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].labels["__name__"], "temp");
        assert_eq!(series[0].points, vec![Some(10.0); 3]);
    }

    #[test]
    fn test_rate_of_counter() {
        let series = vector(eval("rate(hits_total[2m])", 2));
        assert_eq!(series.len(), 1);
        assert!(!series[0].labels.contains_key("__name__"));
        for p in &series[0].points {
            assert!((p.unwrap() - 1.0 / 60.0).abs() < 1e-12);
        }
        let increase = vector(eval("increase(hits_total[2m])", 1));
        assert!((increase[0].points[0].unwrap() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_aggregations() {
        let by_job = vector(eval("sum by (job) (temp)", 1));
        assert_eq!(by_job.len(), 1);
        assert_eq!(by_job[0].labels, labels(&[("job", "x")]));
        assert_eq!(by_job[0].points[0], Some(40.0));

        let avg = vector(eval("avg(temp)", 1));
        assert_eq!(avg[0].labels, Labels::new());
        assert_eq!(avg[0].points[0], Some(20.0));

        let without = vector(eval("max without (zone) (temp)", 1));
        assert_eq!(without[0].labels, labels(&[("job", "x")]));
        assert_eq!(without[0].points[0], Some(30.0));

        let top = vector(eval("topk(1, temp)", 1));
        let kept: Vec<_> = top.iter().filter(|s| s.points[0].is_some()).collect();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].labels["zone"], "b");

        let q = vector(eval("quantile(0.5, temp)", 1));
        assert_eq!(q[0].points[0], Some(20.0));

        let sd = vector(eval("stddev(temp)", 1));
        assert_eq!(sd[0].points[0], Some(10.0));
    }

    #[test]
    fn test_binary_operations() {
        let scaled = vector(eval("temp * 2", 1));
        assert_eq!(scaled[1].points[0], Some(60.0));
        assert!(!scaled[0].labels.contains_key("__name__"));

        let filtered = vector(eval("temp > 20", 1));
        assert_eq!(filtered[0].points[0], None);
        assert_eq!(filtered[1].points[0], Some(30.0));
        assert_eq!(filtered[1].labels["__name__"], "temp");

        let flags = vector(eval("temp > bool 20", 1));
        assert_eq!(flags[0].points[0], Some(0.0));

        let ratio = vector(eval("temp / on(zone) temp", 1));
        assert_eq!(ratio.len(), 2);
        assert_eq!(ratio[0].labels, labels(&[("zone", "a")]));
        assert_eq!(ratio[0].points[0], Some(1.0));

        assert!(matches!(eval("1 + 2 * 3", 1), Value::Scalar(v) if v == vec![7.0]));
        assert!(matches!(eval("-2 ^ 2", 1), Value::Scalar(v) if v == vec![-4.0]));
    }

    #[test]
    fn test_set_operations() {
        let and = vector(eval(r#"temp and on(zone) hits_total"#, 1));
        assert_eq!(and.iter().filter(|s| s.points[0].is_some()).count(), 1);

        let unless = vector(eval(r#"temp unless on(zone) hits_total"#, 1));
        let kept: Vec<_> = unless.iter().filter(|s| s.points[0].is_some()).collect();
        assert_eq!(kept[0].labels["zone"], "b");

        let or = vector(eval(r#"temp{zone="a"} or temp"#, 1));
        assert_eq!(or.iter().filter(|s| s.points[0].is_some()).count(), 2);
    }

    #[test]
    fn test_functions() {
        let clamped = vector(eval("clamp_max(temp, 15)", 1));
        assert_eq!(clamped[1].points[0], Some(15.0));

        assert!(matches!(eval("scalar(temp)", 1), Value::Scalar(v) if v[0].is_nan()));
        assert!(matches!(eval(r#"scalar(temp{zone="a"})"#, 1), Value::Scalar(v) if v == vec![10.0]));
        assert!(matches!(eval("time()", 2), Value::Scalar(v) if v == vec![600.0, 660.0]));

        let sorted = vector(eval("sort_desc(temp)", 1));
        assert_eq!(sorted[0].labels["zone"], "b");

        let avg = vector(eval("avg_over_time(temp[5m])", 1));
        assert_eq!(avg[0].points[0], Some(10.0));
        let count = vector(eval("count_over_time(temp[5m])", 1));
        assert_eq!(count[0].points[0], Some(5.0));
    }

    #[test]
    fn test_eval_errors() {
        let catalog = catalog();
        let ev = Evaluator::new(&catalog, Grid::instant(600_000), 60_000, 300_000);
        assert!(ev.eval(&parse("rate(temp)").unwrap()).is_err());
        assert!(ev.eval(&parse("temp[5m]").unwrap()).is_err());
        assert!(ev.eval(&parse("1 > 2").unwrap()).is_err());
        assert!(ev.eval(&parse("temp + on(job) temp").unwrap()).is_err());
    }

    #[test]
    fn test_quantile() {
        assert_eq!(quantile(0.5, &[1.0, 2.0, 3.0, 4.0]), 2.5);
        assert_eq!(quantile(1.5, &[1.0]), f64::INFINITY);
        assert!(quantile(0.5, &[]).is_nan());
    }
}
