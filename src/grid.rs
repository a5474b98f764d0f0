//! Derived coverages: a model evaluated pixel by pixel over aligned grids.

use rayon::prelude::*;
use tracing::{info, warn};

use crate::descriptor::Descriptor;
use crate::error::{ModelError, Result};
use crate::model::Model;

pub const NODATA_VALUE: f32 = -9999.0;

/// Row-major raster band.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    pub rows: usize,
    pub cols: usize,
    pub values: Vec<f32>,
}

impl Grid {
    pub fn new(rows: usize, cols: usize, values: Vec<f32>) -> Self {
        debug_assert_eq!(values.len(), rows * cols);
        Self { rows, cols, values }
    }

    pub fn filled(rows: usize, cols: usize, value: f32) -> Self {
        Self::new(rows, cols, vec![value; rows * cols])
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }
}

#[derive(Debug, Clone)]
pub struct GridConfig {
    /// Normalize input values before evaluating.
    pub normalize: bool,
    pub nodata: f32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            normalize: true,
            nodata: NODATA_VALUE,
        }
    }
}

/// Evaluates `model` at every pixel. `layers[i]` holds the values of
/// `model.descriptors()[i]`.
///
/// Pixels where an input is NODATA, or where the result is not finite, are NODATA.
pub fn evaluate_grid<D, T>(model: &Model<D, T>, layers: &[Grid], config: &GridConfig) -> Result<Grid>
where
    D: Descriptor + Send + Sync,
    T: Sync,
{
    let descriptors = model.descriptors();
    if layers.len() != descriptors.len() {
        return Err(ModelError::LayerCountMismatch {
            expected: descriptors.len(),
            actual: layers.len(),
        });
    }

    let (rows, cols) = match layers.first() {
        Some(first) => first.shape(),
        None => return Err(ModelError::NoLayers),
    };
    for (layer, descriptor) in layers.iter().zip(descriptors) {
        if layer.shape() != (rows, cols) {
            return Err(ModelError::ShapeMismatch {
                layer: descriptor.name().to_string(),
                rows,
                cols,
                actual_rows: layer.rows,
                actual_cols: layer.cols,
            });
        }
        if layer.values.len() != rows * cols {
            return Err(ModelError::ValueCountMismatch {
                layer: descriptor.name().to_string(),
                expected: rows * cols,
                actual: layer.values.len(),
            });
        }
    }

    info!(
        "Evaluating model over {} x {} pixels from {} layers",
        cols,
        rows,
        layers.len()
    );

    let mut output = Grid::filled(rows, cols, config.nodata);
    if cols == 0 {
        return Ok(output);
    }

    let non_finite: usize = output
        .values
        .par_chunks_mut(cols)
        .enumerate()
        .map(|(row, out)| {
            let mut values = vec![0.0f64; layers.len()];
            let mut non_finite = 0;
            for (col, pixel) in out.iter_mut().enumerate() {
                let offset = row * cols + col;
                let mut missing = false;
                for (value, layer) in values.iter_mut().zip(layers) {
                    let raw = layer.values[offset];
                    if raw == config.nodata {
                        missing = true;
                        break;
                    }
                    *value = f64::from(raw);
                }
                if missing {
                    continue;
                }
                if config.normalize {
                    model.normalize(&mut values);
                }
                let result = model.evaluate(&values) as f32;
                if result.is_finite() {
                    *pixel = result;
                } else {
                    non_finite += 1;
                }
            }
            non_finite
        })
        .sum();

    if non_finite > 0 {
        warn!("{} pixels produced non-finite values", non_finite);
    }

    Ok(output)
}

/// Smallest and largest valid value, `None` if every pixel is NODATA.
pub fn value_range(grid: &Grid, nodata: f32) -> Option<(f32, f32)> {
    let mut min_value = f32::INFINITY;
    let mut max_value = f32::NEG_INFINITY;

    for &value in &grid.values {
        if value != nodata {
            min_value = min_value.min(value);
            max_value = max_value.max(value);
        }
    }

    if min_value > max_value {
        None
    } else {
        Some((min_value, max_value))
    }
}
