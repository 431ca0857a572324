//! Report generator: renders the session's measurements as a chart artifact.
//!
//! The chart mirrors the operator's mental model of the run: hole identifiers
//! along the x-axis in capture order, one line series per sample. It is drawn
//! with the raster primitives from [`crate::render`] onto a fixed-size RGBA
//! canvas and written as a PNG, whose path is returned for display.

use crate::error::{AppResult, WizardError};
use crate::render;
use crate::results::Measurement;
use crate::session::{HoleId, SampleIndex};
use image::{Rgba, RgbaImage};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

const WIDTH: u32 = 800;
const HEIGHT: u32 = 600;
const MARGIN_LEFT: i64 = 80;
const MARGIN_RIGHT: i64 = 170;
const MARGIN_TOP: i64 = 60;
const MARGIN_BOTTOM: i64 = 70;

const BACKGROUND: Rgba<u8> = Rgba([255, 255, 255, 255]);
const AXIS: Rgba<u8> = Rgba([40, 40, 40, 255]);
const GRID: Rgba<u8> = Rgba([225, 225, 225, 255]);
const TEXT: Rgba<u8> = Rgba([40, 40, 40, 255]);

/// Distinct series colors, cycled when there are more samples than entries.
const PALETTE: [Rgba<u8>; 8] = [
    Rgba([31, 119, 180, 255]),
    Rgba([255, 127, 14, 255]),
    Rgba([44, 160, 44, 255]),
    Rgba([214, 39, 40, 255]),
    Rgba([148, 103, 189, 255]),
    Rgba([140, 86, 75, 255]),
    Rgba([227, 119, 194, 255]),
    Rgba([127, 127, 127, 255]),
];

#[derive(Debug, Default)]
pub struct ReportGenerator;

impl ReportGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Renders the chart for the given rows and writes it to `path`.
    ///
    /// Fails with `EmptyDataset` when there are no rows. Returns the artifact
    /// path for display to the operator.
    pub fn generate(&self, rows: &[Measurement], path: &Path) -> AppResult<PathBuf> {
        let chart = self.render(rows)?;
        chart.save(path)?;
        log::info!("Wrote report chart '{}'", path.display());
        Ok(path.to_path_buf())
    }

    /// Renders the chart without touching the filesystem.
    pub fn render(&self, rows: &[Measurement]) -> AppResult<RgbaImage> {
        if rows.is_empty() {
            return Err(WizardError::EmptyDataset);
        }

        // Holes in first-appearance (capture) order; samples ascending.
        let mut holes: Vec<HoleId> = Vec::new();
        for m in rows {
            if !holes.contains(&m.hole) {
                holes.push(m.hole);
            }
        }
        let samples: BTreeSet<SampleIndex> = rows.iter().map(|m| m.sample).collect();

        let (y_min, y_max) = value_range(rows);
        let mut img = RgbaImage::from_pixel(WIDTH, HEIGHT, BACKGROUND);

        let plot_w = WIDTH as i64 - MARGIN_LEFT - MARGIN_RIGHT;
        let plot_h = HEIGHT as i64 - MARGIN_TOP - MARGIN_BOTTOM;
        let x_of = |idx: usize| -> i64 {
            if holes.len() == 1 {
                MARGIN_LEFT + plot_w / 2
            } else {
                MARGIN_LEFT + idx as i64 * plot_w / (holes.len() as i64 - 1)
            }
        };
        let y_of = |value: f64| -> i64 {
            let frac = (value - y_min) / (y_max - y_min);
            MARGIN_TOP + plot_h - (frac * plot_h as f64).round() as i64
        };

        render::draw_text_centered(&mut img, WIDTH as i64 / 2, 18, "TORQUE TEST RESULTS", 2, TEXT);
        render::draw_text(&mut img, 8, MARGIN_TOP - 18, "TORQUE (NCM)", 1, TEXT);
        render::draw_text_centered(
            &mut img,
            MARGIN_LEFT + plot_w / 2,
            HEIGHT as i64 - 20,
            "HOLE",
            1,
            TEXT,
        );

        // Horizontal grid and y tick labels
        for tick in 0..=4 {
            let value = y_min + (y_max - y_min) * tick as f64 / 4.0;
            let y = y_of(value);
            render::draw_line(
                &mut img,
                (MARGIN_LEFT, y),
                (MARGIN_LEFT + plot_w, y),
                GRID,
            );
            let label = format!("{value:.1}");
            render::draw_text(
                &mut img,
                MARGIN_LEFT - render::text_width(&label, 1) as i64 - 8,
                y - 3,
                &label,
                1,
                TEXT,
            );
        }

        // Axes
        render::draw_line(
            &mut img,
            (MARGIN_LEFT, MARGIN_TOP),
            (MARGIN_LEFT, MARGIN_TOP + plot_h),
            AXIS,
        );
        render::draw_line(
            &mut img,
            (MARGIN_LEFT, MARGIN_TOP + plot_h),
            (MARGIN_LEFT + plot_w, MARGIN_TOP + plot_h),
            AXIS,
        );

        // X ticks: one per hole
        for (i, hole) in holes.iter().enumerate() {
            let x = x_of(i);
            render::draw_line(
                &mut img,
                (x, MARGIN_TOP + plot_h),
                (x, MARGIN_TOP + plot_h + 4),
                AXIS,
            );
            render::draw_text_centered(
                &mut img,
                x,
                MARGIN_TOP + plot_h + 10,
                &hole.to_string(),
                1,
                TEXT,
            );
        }

        // One polyline + markers per sample
        for (series, sample) in samples.iter().enumerate() {
            let color = PALETTE[series % PALETTE.len()];
            let mut prev: Option<(i64, i64)> = None;
            for (i, hole) in holes.iter().enumerate() {
                let Some(row) = rows
                    .iter()
                    .find(|m| m.sample == *sample && m.hole == *hole)
                else {
                    continue;
                };
                let point = (x_of(i), y_of(row.torque_ncm));
                if let Some(prev) = prev {
                    render::draw_line(&mut img, prev, point, color);
                }
                render::draw_disc(&mut img, point.0, point.1, 3, color);
                prev = Some(point);
            }

            // Legend entry
            let ly = MARGIN_TOP + series as i64 * 16;
            let lx = WIDTH as i64 - MARGIN_RIGHT + 20;
            render::draw_disc(&mut img, lx, ly + 3, 4, color);
            render::draw_text(&mut img, lx + 10, ly, &format!("SAMPLE {sample}"), 1, TEXT);
        }

        Ok(img)
    }
}

/// Value range with headroom; degenerate (flat) data gets a fixed band.
fn value_range(rows: &[Measurement]) -> (f64, f64) {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for m in rows {
        min = min.min(m.torque_ncm);
        max = max.max(m.torque_ncm);
    }
    if (max - min).abs() < f64::EPSILON {
        (min - 1.0, max + 1.0)
    } else {
        let pad = (max - min) * 0.1;
        (min - pad, max + pad)
    }
}
