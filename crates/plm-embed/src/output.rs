//! Projection output: a `protein,x,y` table and an optional scatter plot.
use crate::error::PipelineResult;
use crate::projector::ProjectionPoint;
use itertools::{Itertools, MinMaxResult};
use polars::prelude::*;
use std::fs::File;
use std::path::Path;
use svg::node::element::{Circle, Group, Rectangle};
use svg::Document;

const PLOT_SIZE: f64 = 600.0;
const PLOT_MARGIN: f64 = 20.0;

fn to_dataframe(points: &[ProjectionPoint]) -> PolarsResult<DataFrame> {
    let proteins: Vec<&str> = points.iter().map(|p| p.protein.as_str()).collect();
    let xs: Vec<f32> = points.iter().map(|p| p.x).collect();
    let ys: Vec<f32> = points.iter().map(|p| p.y).collect();
    DataFrame::new(vec![
        Column::new("protein".into(), proteins),
        Column::new("x".into(), xs),
        Column::new("y".into(), ys),
    ])
}

/// Write one row per point under the header `protein,x,y`, replacing any existing file.
pub fn write_projection<P: AsRef<Path>>(path: P, points: &[ProjectionPoint]) -> PipelineResult<()> {
    let path = path.as_ref();
    let mut df = to_dataframe(points)?;
    let mut file = File::create(path)?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .with_separator(b',')
        .finish(&mut df)?;
    tracing::info!(path = %path.display(), rows = points.len(), "wrote projection");
    Ok(())
}

/// Maps data coordinates into the plot's viewBox, keeping the aspect ratio.
struct Scale {
    min: (f64, f64),
    factor: f64,
}

fn bounds(values: impl Iterator<Item = f64>) -> (f64, f64) {
    match values.minmax() {
        MinMaxResult::NoElements => (0.0, 0.0),
        MinMaxResult::OneElement(v) => (v, v),
        MinMaxResult::MinMax(lo, hi) => (lo, hi),
    }
}

impl Scale {
    fn fit(points: &[ProjectionPoint]) -> Self {
        let (min_x, max_x) = bounds(points.iter().map(|p| p.x as f64));
        let (min_y, max_y) = bounds(points.iter().map(|p| p.y as f64));
        let extent = (max_x - min_x).max(max_y - min_y);
        let factor = if extent > 0.0 {
            (PLOT_SIZE - 2.0 * PLOT_MARGIN) / extent
        } else {
            1.0
        };
        Self {
            min: (min_x, min_y),
            factor,
        }
    }
    fn apply(&self, p: &ProjectionPoint) -> (f64, f64) {
        (
            PLOT_MARGIN + (p.x as f64 - self.min.0) * self.factor,
            // svg y grows downwards
            PLOT_SIZE - PLOT_MARGIN - (p.y as f64 - self.min.1) * self.factor,
        )
    }
}

pub fn scatter_document(points: &[ProjectionPoint]) -> Document {
    let scale = Scale::fit(points);
    let mut group = Group::new().set("class", "points");
    for point in points {
        let (cx, cy) = scale.apply(point);
        let circle = Circle::new()
            .set("cx", cx)
            .set("cy", cy)
            .set("r", 3.0)
            .set("fill", "rgba(0, 0, 255, 0.5)")
            .set("stroke", "blue")
            .set("stroke-width", 0.5);
        group = group.add(circle);
    }
    let background = Rectangle::new()
        .set("width", PLOT_SIZE)
        .set("height", PLOT_SIZE)
        .set("fill", "white");
    Document::new()
        .set("width", PLOT_SIZE)
        .set("height", PLOT_SIZE)
        .set("viewBox", (0.0, 0.0, PLOT_SIZE, PLOT_SIZE))
        .add(background)
        .add(group)
}

/// Unlabeled scatter plot of the projection.
pub fn render_scatter<P: AsRef<Path>>(path: P, points: &[ProjectionPoint]) -> PipelineResult<()> {
    let path = path.as_ref();
    svg::save(path, &scatter_document(points))?;
    tracing::info!(path = %path.display(), points = points.len(), "wrote scatter plot");
    Ok(())
}
