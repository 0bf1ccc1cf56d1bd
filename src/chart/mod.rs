//! Line charts of Prometheus matrices, rendered to PNG.

use crate::client::ClientProvider;
use crate::error::ToolError;
use crate::prom::{QueryValue, Range, RangeSeries};
use crate::session::Session;
use chrono::{DateTime, Duration, Utc};
use plotters::prelude::*;
use ringlog::*;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Family name fonts are registered under.
const FONT_FAMILY: &str = "chart";

static FONT_REGISTERED: AtomicBool = AtomicBool::new(false);

#[derive(Debug, Error)]
pub enum ChartError {
    #[error("invalid chart size {0}x{1}")]
    InvalidSize(u32, u32),
    #[error("failed to load font {path}: {reason}")]
    Font { path: String, reason: String },
    #[error("failed to draw chart: {0}")]
    Draw(String),
    #[error("failed to encode png: {0}")]
    Encode(String),
}

impl From<ChartError> for ToolError {
    fn from(e: ChartError) -> Self {
        ToolError::Internal(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartOptions {
    pub width: u32,
    pub height: u32,
    pub title: String,
}

impl Default for ChartOptions {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 768,
            title: String::new(),
        }
    }
}

/// Load the font used for axis labels, captions and legends.
///
/// Charts drawn before a font is registered carry no text.
pub fn register_font(path: &Path) -> Result<(), ChartError> {
    let font_error = |reason: String| ChartError::Font {
        path: path.display().to_string(),
        reason,
    };
    let bytes = std::fs::read(path).map_err(|e| font_error(e.to_string()))?;
    // the registry holds fonts for the life of the process
    let bytes: &'static [u8] = Box::leak(bytes.into_boxed_slice());
    plotters::style::register_font(FONT_FAMILY, FontStyle::Normal, bytes)
        .map_err(|_| font_error("not a usable TrueType or OpenType font".into()))?;
    FONT_REGISTERED.store(true, Ordering::Release);
    info!("registered chart font from {}", path.display());
    Ok(())
}

fn has_font() -> bool {
    FONT_REGISTERED.load(Ordering::Acquire)
}

/// `|`-joined label values of a series.
pub fn legend(series: &RangeSeries) -> String {
    series.metric.values().cloned().collect::<Vec<_>>().join("|")
}

/// Bounds of the plot: minutes since the first sample on x, values on y with
/// 20% of the span as headroom above the largest.
fn bounds(matrix: &[RangeSeries]) -> (f64, (f64, f64), (f64, f64)) {
    let samples = || matrix.iter().flat_map(|s| s.values.iter()).filter(|s| s.value.is_finite());
    let t0 = samples().map(|s| s.timestamp).fold(f64::INFINITY, f64::min);
    if !t0.is_finite() {
        return (0.0, (0.0, 1.0), (0.0, 1.0));
    }
    let x_max = samples().map(|s| (s.timestamp - t0) / 60.0).fold(0.0, f64::max);
    let max = samples().map(|s| s.value).fold(f64::NEG_INFINITY, f64::max);
    let y_min = samples().map(|s| s.value).fold(0.0, f64::min);
    let y_max = max + 0.2 * (max - y_min).abs();

    let x_max = if x_max > 0.0 { x_max } else { 1.0 };
    let y_max = if y_max > y_min { y_max } else { y_min + 1.0 };
    (t0, (0.0, x_max), (y_min, y_max))
}

pub fn render_matrix(matrix: &[RangeSeries], options: &ChartOptions) -> Result<Vec<u8>, ChartError> {
    let (width, height) = (options.width, options.height);
    if width == 0 || height == 0 {
        return Err(ChartError::InvalidSize(width, height));
    }
    let draw = |e: &dyn std::fmt::Display| ChartError::Draw(e.to_string());
    let text = has_font();
    let (t0, x_range, y_range) = bounds(matrix);

    let mut pixels = vec![0u8; width as usize * height as usize * 3];
    {
        let root = BitMapBackend::with_buffer(&mut pixels, (width, height)).into_drawing_area();
        root.fill(&WHITE).map_err(|e| draw(&e))?;

        let mut builder = ChartBuilder::on(&root);
        builder.margin(16);
        if text {
            builder
                .caption(&options.title, (FONT_FAMILY, 20))
                .x_label_area_size(40)
                .y_label_area_size(70);
        }
        let mut chart = builder
            .build_cartesian_2d(x_range.0..x_range.1, y_range.0..y_range.1)
            .map_err(|e| draw(&e))?;

        if text {
            chart
                .configure_mesh()
                .x_desc("minutes")
                .label_style((FONT_FAMILY, 12))
                .draw()
                .map_err(|e| draw(&e))?;
        }

        for (i, series) in matrix.iter().enumerate() {
            let color = Palette99::pick(i).to_rgba();
            let points = series
                .values
                .iter()
                .filter(|s| s.value.is_finite())
                .map(|s| ((s.timestamp - t0) / 60.0, s.value));
            let anno = chart
                .draw_series(LineSeries::new(points, color.stroke_width(2)))
                .map_err(|e| draw(&e))?;
            if text {
                anno.label(legend(series))
                    .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
            }
        }

        if text && !matrix.is_empty() {
            chart
                .configure_series_labels()
                .label_font((FONT_FAMILY, 12))
                .background_style(WHITE.mix(0.8))
                .border_style(BLACK)
                .draw()
                .map_err(|e| draw(&e))?;
        }
        root.present().map_err(|e| draw(&e))?;
    }

    encode_png(&pixels, width, height)
}

fn encode_png(rgb: &[u8], width: u32, height: u32) -> Result<Vec<u8>, ChartError> {
    let mut out = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut out, width, height);
        encoder.set_color(png::ColorType::Rgb);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder
            .write_header()
            .map_err(|e| ChartError::Encode(e.to_string()))?;
        writer
            .write_image_data(rgb)
            .map_err(|e| ChartError::Encode(e.to_string()))?;
    }
    Ok(out)
}

/// Run `query` over `[start, end]` at a one minute step and chart the result.
pub async fn render_query(
    clients: &ClientProvider,
    session: &Session,
    query: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    options: &ChartOptions,
) -> Result<Vec<u8>, ToolError> {
    let output = clients
        .prometheus_data(session)
        .query_range(query, Range::new(start, end, Duration::seconds(60)))
        .await?;
    match output.value {
        QueryValue::Matrix(matrix) => Ok(render_matrix(&matrix, options)?),
        other => Err(ToolError::type_mismatch("query", other.kind(), "matrix")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prom::{Labels, Sample};

    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];

    fn series(cluster: &str, values: &[f64]) -> RangeSeries {
        RangeSeries {
            metric: Labels::from([
                ("cluster".to_string(), cluster.to_string()),
                ("service".to_string(), "orders".to_string()),
            ]),
            values: values
                .iter()
                .enumerate()
                .map(|(i, v)| Sample::new(1_600_000_000.0 + 60.0 * i as f64, *v))
                .collect(),
        }
    }

    #[test]
    fn test_render_matrix_png() {
        let matrix = vec![series("us-west", &[1.0, 2.0, 3.0]), series("us-central", &[2.0, 1.0, f64::NAN])];
        let options = ChartOptions {
            width: 320,
            height: 200,
            ..Default::default()
        };
        let png = render_matrix(&matrix, &options).unwrap();
        assert!(png.starts_with(PNG_MAGIC));
        // IHDR carries the canvas size
        assert_eq!(&png[16..20], &320u32.to_be_bytes());
        assert_eq!(&png[20..24], &200u32.to_be_bytes());
    }

    #[test]
    fn test_empty_and_invalid() {
        assert!(render_matrix(&[], &ChartOptions::default())
            .unwrap()
            .starts_with(PNG_MAGIC));
        let options = ChartOptions {
            width: 0,
            ..Default::default()
        };
        assert!(matches!(render_matrix(&[], &options), Err(ChartError::InvalidSize(0, 768))));
    }

    #[test]
    fn test_bounds_and_legend() {
        let matrix = vec![series("us-west", &[1.0, 5.0])];
        let (t0, x, y) = bounds(&matrix);
        assert_eq!(t0, 1_600_000_000.0);
        assert_eq!(x, (0.0, 1.0));
        assert_eq!(y, (0.0, 6.0));
        assert_eq!(legend(&matrix[0]), "us-west|orders");
    }

    #[test]
    fn test_bounds_negative_values_keep_headroom() {
        let matrix = vec![series("us-west", &[-10.0, -5.0])];
        let (_, _, (y_min, y_max)) = bounds(&matrix);
        assert_eq!(y_min, -10.0);
        assert_eq!(y_max, -4.0);

        let flat = vec![series("us-west", &[0.0, 0.0])];
        assert_eq!(bounds(&flat).2, (0.0, 1.0));
    }

    #[tokio::test]
    async fn test_render_query_loopback() {
        let clients = ClientProvider::loopback("https://example.invalid").unwrap();
        let session = Session::background();
        let end = Utc::now();
        let options = ChartOptions {
            width: 200,
            height: 100,
            ..Default::default()
        };
        let png = render_query(
            &clients,
            &session,
            "container_memory_usage_bytes",
            end - Duration::minutes(30),
            end,
            &options,
        )
        .await
        .unwrap();
        assert!(png.starts_with(PNG_MAGIC));
    }
}
