//! Raw measurements entered during calibration and the values derived from them.

/// Physical width of the printed calibration marker, in the same unit the
/// user measures the marker distance in.
pub const MARKER_WIDTH: f64 = 6.0;

/// Reference numerator of the pixels-per-lens formula.
pub const PIXELS_PER_LENS_REFERENCE: f64 = 500.0;

pub const DEFAULT_INDEX_OF_REFRACTION: f64 = 1.5;

/// User and detector supplied inputs of one wizard run.
///
/// Values are overwritten field by field as the wizard advances; nothing is
/// cleared between runs.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct WorkingParameters {
    pub marker_distance: f64,
    pub marker_inverse_proportion: f64,
    pub lenticule_density: f64,
    pub green_to_red_distance: f64,
}

/// The values persisted to disk and forwarded to the renderer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DerivedParameters {
    pub fov_deg: f64,
    pub pixels_per_lens: f64,
    pub index_of_refraction: f64,
}

impl Default for DerivedParameters {
    fn default() -> Self {
        Self {
            fov_deg: 0.0,
            pixels_per_lens: 0.0,
            index_of_refraction: DEFAULT_INDEX_OF_REFRACTION,
        }
    }
}

/// Camera field of view from the marker's angular size at a known distance,
/// scaled by how many marker widths fit across the frame.
pub fn field_of_view_deg(marker_distance: f64, inverse_proportion: f64) -> f64 {
    let marker_angle = (MARKER_WIDTH / 2.0).atan2(marker_distance) * 2.0;
    marker_angle.to_degrees() * inverse_proportion
}

pub fn pixels_per_lens(green_to_red_distance: f64, lenticule_density: f64) -> f64 {
    PIXELS_PER_LENS_REFERENCE / green_to_red_distance / lenticule_density
}
