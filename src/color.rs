use std::collections::{BTreeMap, BTreeSet};

use palette::{Hsl, IntoColor, LinSrgb, Mix, Srgb};
use plotters::style::RGBColor;

use crate::data::MetadataValue;

// ---------------------------------------------------------------------------
// Color palette generator
// ---------------------------------------------------------------------------

fn to_rgb(rgb: Srgb) -> RGBColor {
    let rgb: Srgb<u8> = rgb.into_format();
    RGBColor(rgb.red, rgb.green, rgb.blue)
}

/// Generates `n` visually distinct colours using evenly spaced hues.
pub fn generate_palette(n: usize) -> Vec<RGBColor> {
    if n == 0 {
        return Vec::new();
    }
    (0..n)
        .map(|i| {
            let hue = (i as f32 / n as f32) * 360.0;
            let hsl = Hsl::new(hue, 0.75, 0.55);
            to_rgb(hsl.into_color())
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Sequential gradient for time
// ---------------------------------------------------------------------------

/// Viridis control points.
const VIRIDIS: [(u8, u8, u8); 5] = [
    (68, 1, 84),
    (59, 82, 139),
    (33, 145, 140),
    (94, 201, 98),
    (253, 231, 37),
];

/// Colour for position `t` in [0, 1] along a viridis-like gradient,
/// interpolated in linear RGB.
pub fn sequential(t: f64) -> RGBColor {
    let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.0 } as f32;
    let segments = (VIRIDIS.len() - 1) as f32;
    let scaled = t * segments;
    let i = (scaled.floor() as usize).min(VIRIDIS.len() - 2);
    let frac = scaled - i as f32;

    let stop = |(r, g, b): (u8, u8, u8)| -> LinSrgb {
        Srgb::new(r, g, b).into_format::<f32>().into_linear()
    };
    let mixed = stop(VIRIDIS[i]).mix(stop(VIRIDIS[i + 1]), frac);
    to_rgb(Srgb::from_linear(mixed))
}

/// Colour of step `i` out of `n` on the sequential gradient.
pub fn sequential_step(i: usize, n: usize) -> RGBColor {
    if n <= 1 {
        return sequential(0.0);
    }
    sequential(i as f64 / (n - 1) as f64)
}

// ---------------------------------------------------------------------------
// Color mapping: metadata value → RGBColor
// ---------------------------------------------------------------------------

/// Maps unique metadata values (cohort labels, subject ids) to distinct
/// colours.
#[derive(Debug, Clone)]
pub struct ColorMap {
    mapping: BTreeMap<MetadataValue, RGBColor>,
    default_color: RGBColor,
}

impl ColorMap {
    pub fn new(unique_values: &BTreeSet<MetadataValue>) -> Self {
        let palette = generate_palette(unique_values.len());
        let mapping = unique_values.iter().cloned().zip(palette).collect();
        ColorMap {
            mapping,
            default_color: RGBColor(128, 128, 128),
        }
    }

    /// One colour per subject id.
    pub fn for_subjects(ids: &[i64]) -> Self {
        let values: BTreeSet<MetadataValue> =
            ids.iter().map(|&id| MetadataValue::Integer(id)).collect();
        Self::new(&values)
    }

    pub fn color_for(&self, value: &MetadataValue) -> RGBColor {
        self.mapping.get(value).copied().unwrap_or(self.default_color)
    }

    pub fn subject_color(&self, id: i64) -> RGBColor {
        self.color_for(&MetadataValue::Integer(id))
    }

    /// Legend entries (value label → colour).
    pub fn legend_entries(&self) -> Vec<(String, RGBColor)> {
        self.mapping.iter().map(|(v, c)| (v.to_string(), *c)).collect()
    }
}
