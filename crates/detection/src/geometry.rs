//! Frame-space geometry shared by the detection strategies.

/// Offset of a pixel from the frame centre as a proportion of the half-frame.
pub fn offset_from_center(x: f32, y: f32, width: u32, height: u32) -> (f64, f64) {
    let half_w = f64::from(width) / 2.0;
    let half_h = f64::from(height) / 2.0;
    if half_w <= 0.0 || half_h <= 0.0 {
        return (0.0, 0.0);
    }
    (
        (f64::from(x) - half_w) / half_w,
        (f64::from(y) - half_h) / half_h,
    )
}

/// Frame width divided by the marker's apparent width.
///
/// `corners` are in detector order (top-left, top-right, bottom-right,
/// bottom-left); the apparent width is the mean of the top and bottom edges.
/// Returns `None` for degenerate quads.
pub fn marker_inverse_proportion(frame_width: u32, corners: &[(f32, f32); 4]) -> Option<f64> {
    let edge = |a: (f32, f32), b: (f32, f32)| {
        let dx = f64::from(b.0 - a.0);
        let dy = f64::from(b.1 - a.1);
        (dx * dx + dy * dy).sqrt()
    };
    let top = edge(corners[0], corners[1]);
    let bottom = edge(corners[3], corners[2]);
    let width_px = (top + bottom) / 2.0;
    if !width_px.is_finite() || width_px < 1.0 {
        return None;
    }
    Some(f64::from(frame_width) / width_px)
}
