//! PNG rendering of variability reports and embeddings.
//!
//! All drawing state lives in an explicit [`RenderContext`]; every function
//! opens, draws and presents its own bitmap.

use std::error::Error;
use std::path::Path;

use ndarray::{ArrayView1, ArrayView2, Axis};
use plotters::prelude::*;

use crate::color::{generate_palette, sequential, sequential_step, ColorMap};
use crate::embedding::{GlobalEmbedding, Trajectory};
use crate::variability::{VariabilityReport, VariabilitySignal};

pub type RenderResult = Result<(), Box<dyn Error>>;

/// Bitmap size and caption font for one artifact.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderContext {
    pub width: u32,
    pub height: u32,
    pub font_size: u32,
}

impl Default for RenderContext {
    fn default() -> Self {
        Self {
            width: 1200,
            height: 800,
            font_size: 22,
        }
    }
}

impl RenderContext {
    fn caption_style(&self) -> (&'static str, f64) {
        ("sans-serif", self.font_size as f64)
    }

    fn panel_caption_style(&self) -> (&'static str, f64) {
        ("sans-serif", self.font_size as f64 * 0.75)
    }
}

/// Padded (min, max) of the finite values, never empty.
fn bounds<'a>(values: impl IntoIterator<Item = &'a f64>) -> (f64, f64) {
    let (lo, hi) = values
        .into_iter()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    if !lo.is_finite() {
        return (0.0, 1.0);
    }
    let pad = if hi - lo < f64::EPSILON { 0.5 } else { (hi - lo) * 0.05 };
    (lo - pad, hi + pad)
}

// ---------------------------------------------------------------------------
// Variability
// ---------------------------------------------------------------------------

/// Global mode: one line. Cohort mode: one panel per cohort.
pub fn variability_plot(ctx: &RenderContext, report: &VariabilityReport, path: &Path) -> RenderResult {
    let root = BitMapBackend::new(path, (ctx.width, ctx.height)).into_drawing_area();
    root.fill(&WHITE)?;
    let times: Vec<f64> = report.time.labels().map(|t| t as f64).collect();
    let (t0, t1) = bounds(&times);

    match &report.signal {
        VariabilitySignal::Global(values) => {
            let (lo, hi) = bounds(values.iter());
            let mut chart = ChartBuilder::on(&root)
                .caption("Variability", ctx.caption_style())
                .margin(10)
                .x_label_area_size(40)
                .y_label_area_size(60)
                .build_cartesian_2d(t0..t1, lo..hi)?;
            chart.configure_mesh().x_desc("time").y_desc("std").draw()?;
            chart.draw_series(LineSeries::new(finite_points(&times, values.view()), &BLUE))?;
        }
        VariabilitySignal::Cohorts(curves) => {
            let cols = curves.len().clamp(1, 2);
            let rows = curves.len().div_ceil(cols).max(1);
            let panels = root.split_evenly((rows, cols));
            let palette = generate_palette(curves.len());
            for ((panel, curve), color) in panels.iter().zip(curves).zip(palette) {
                let (lo, hi) = bounds(curve.values.iter());
                let mut chart = ChartBuilder::on(panel)
                    .caption(
                        format!("{} (n = {})", curve.group_name(), curve.subjects),
                        ctx.panel_caption_style(),
                    )
                    .margin(8)
                    .x_label_area_size(30)
                    .y_label_area_size(50)
                    .build_cartesian_2d(t0..t1, lo..hi)?;
                chart.configure_mesh().x_desc("time").y_desc("std").draw()?;
                chart.draw_series(LineSeries::new(
                    finite_points(&times, curve.values.view()),
                    &color,
                ))?;
            }
        }
    }

    root.present()?;
    Ok(())
}

fn finite_points(times: &[f64], values: ArrayView1<'_, f64>) -> Vec<(f64, f64)> {
    times
        .iter()
        .copied()
        .zip(values.iter().copied())
        .filter(|(_, v)| v.is_finite())
        .collect()
}

// ---------------------------------------------------------------------------
// Embeddings
// ---------------------------------------------------------------------------

/// One subject's trajectory, points coloured by time.
pub fn trajectory_plot(ctx: &RenderContext, trajectory: &Trajectory, title: &str, path: &Path) -> RenderResult {
    let coords = trajectory.coordinates.view();
    let n = coords.nrows();
    let colors: Vec<RGBColor> = (0..n).map(|i| sequential_step(i, n)).collect();
    match trajectory.dimension() {
        3 => draw_3d(ctx, title, coords, &colors, &[(0, n)], path),
        _ => draw_2d(ctx, title, coords, &colors, &[(0, n)], &[], path),
    }
}

/// Every subject of a joint fit. Points are coloured by subject, or by time
/// step for time-major (tensor) embeddings; 2D plots join each subject's
/// consecutive points.
pub fn global_plot(ctx: &RenderContext, global: &GlobalEmbedding, title: &str, path: &Path) -> RenderResult {
    // Reorder rows subject by subject so each trajectory is contiguous.
    let mut subjects: Vec<i64> = global.index.iter().map(|o| o.subject).collect();
    subjects.sort_unstable();
    subjects.dedup();

    let mut order = Vec::with_capacity(global.index.len());
    let mut runs = Vec::with_capacity(subjects.len());
    for &id in &subjects {
        let rows = global.rows_of(id);
        runs.push((order.len(), rows.len()));
        order.extend(rows);
    }
    let coords = global.coordinates.select(Axis(0), &order);

    let (colors, legend): (Vec<RGBColor>, _) = if global.time_major {
        let colors = order
            .iter()
            .map(|&r| sequential_step(global.index[r].step, global.time.len))
            .collect();
        (colors, Vec::new())
    } else {
        let map = ColorMap::for_subjects(&subjects);
        let colors = order
            .iter()
            .map(|&r| map.subject_color(global.index[r].subject))
            .collect();
        (colors, map.legend_entries())
    };

    match coords.ncols() {
        3 => draw_3d(ctx, title, coords.view(), &colors, &[], path),
        _ => draw_2d(ctx, title, coords.view(), &colors, &runs, &legend, path),
    }
}

/// 2-D histogram of all points of a joint fit.
pub fn density_plot(
    ctx: &RenderContext,
    global: &GlobalEmbedding,
    bins: usize,
    title: &str,
    path: &Path,
) -> RenderResult {
    let coords = global.coordinates.view();
    let bins = bins.max(1);
    let (x0, x1) = bounds(coords.column(0));
    let (y0, y1) = bounds(coords.column(1));
    let (wx, wy) = ((x1 - x0) / bins as f64, (y1 - y0) / bins as f64);

    let mut counts = vec![vec![0usize; bins]; bins];
    for row in coords.rows() {
        if !(row[0].is_finite() && row[1].is_finite()) {
            continue;
        }
        let i = (((row[0] - x0) / wx) as usize).min(bins - 1);
        let j = (((row[1] - y0) / wy) as usize).min(bins - 1);
        counts[i][j] += 1;
    }
    let max = counts.iter().flatten().copied().max().unwrap_or(0).max(1) as f64;

    let root = BitMapBackend::new(path, (ctx.width, ctx.height)).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(title, ctx.caption_style())
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(x0..x1, y0..y1)?;
    chart.configure_mesh().disable_mesh().x_desc("x").y_desc("y").draw()?;

    chart.draw_series(counts.iter().enumerate().flat_map(|(i, col)| {
        col.iter().enumerate().filter(|(_, c)| **c > 0).map(move |(j, &c)| {
            let (ax, ay) = (x0 + i as f64 * wx, y0 + j as f64 * wy);
            Rectangle::new(
                [(ax, ay), (ax + wx, ay + wy)],
                sequential(c as f64 / max).filled(),
            )
        })
    }))?;

    root.present()?;
    Ok(())
}

/// Scatter of (n × 2) points; each `(start, len)` run is also drawn as a
/// connected path. A non-empty `legend` adds one labelled swatch per entry.
fn draw_2d(
    ctx: &RenderContext,
    title: &str,
    coords: ArrayView2<'_, f64>,
    colors: &[RGBColor],
    runs: &[(usize, usize)],
    legend: &[(String, RGBColor)],
    path: &Path,
) -> RenderResult {
    let (x0, x1) = bounds(coords.column(0));
    let (y0, y1) = bounds(coords.column(1));
    let points: Vec<(f64, f64)> = coords.rows().into_iter().map(|r| (r[0], r[1])).collect();

    let root = BitMapBackend::new(path, (ctx.width, ctx.height)).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(title, ctx.caption_style())
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(x0..x1, y0..y1)?;
    chart.configure_mesh().x_desc("x").y_desc("y").draw()?;

    for &(start, len) in runs {
        let segment = points[start..start + len].to_vec();
        let color = colors.get(start).copied().unwrap_or(BLACK);
        chart.draw_series(std::iter::once(PathElement::new(segment, color.mix(0.4))))?;
    }
    chart.draw_series(
        points
            .iter()
            .zip(colors)
            .map(|(&p, &c)| Circle::new(p, 3, c.filled())),
    )?;

    if !legend.is_empty() {
        for (label, color) in legend {
            let color = *color;
            chart
                .draw_series(std::iter::empty::<Circle<(f64, f64), i32>>())?
                .label(format!("subject {label}"))
                .legend(move |(x, y)| Circle::new((x + 8, y), 4, color.filled()));
        }
        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()?;
    }

    root.present()?;
    Ok(())
}

fn draw_3d(
    ctx: &RenderContext,
    title: &str,
    coords: ArrayView2<'_, f64>,
    colors: &[RGBColor],
    runs: &[(usize, usize)],
    path: &Path,
) -> RenderResult {
    let (x0, x1) = bounds(coords.column(0));
    let (y0, y1) = bounds(coords.column(1));
    let (z0, z1) = bounds(coords.column(2));
    let points: Vec<(f64, f64, f64)> = coords.rows().into_iter().map(|r| (r[0], r[1], r[2])).collect();

    let root = BitMapBackend::new(path, (ctx.width, ctx.height)).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(title, ctx.caption_style())
        .margin(10)
        .build_cartesian_3d(x0..x1, y0..y1, z0..z1)?;
    chart.with_projection(|mut pb| {
        pb.yaw = 0.6;
        pb.pitch = 0.3;
        pb.scale = 0.85;
        pb.into_matrix()
    });
    chart.configure_axes().draw()?;

    for &(start, len) in runs {
        let segment = points[start..start + len].to_vec();
        let color = colors.get(start).copied().unwrap_or(BLACK);
        chart.draw_series(LineSeries::new(segment, color.mix(0.4)))?;
    }
    chart.draw_series(
        points
            .iter()
            .zip(colors)
            .map(|(&p, &c)| Circle::new(p, 3, c.filled())),
    )?;

    root.present()?;
    Ok(())
}
