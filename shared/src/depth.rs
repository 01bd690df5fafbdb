/*!
Depth lookup for detections.

Depth frames arrive as row-major raw sensor units; a detection's depth is
the mean over the centre of its bounding box.
*/

use crate::telemetry::ScreenDetection;

/// Row-major depth frame in raw sensor units
#[derive(Debug, Clone, Copy)]
pub struct DepthImage<'a> {
    pub data: &'a [u16],
    pub width: usize,
    pub height: usize,
    /// Meters per raw unit
    pub scale: f32,
}

impl DepthImage<'_> {
    /// Mean depth in meters over the centre tenth of a bounding box.
    ///
    /// The window spans `[45%, 55%)` of the box on each axis, clipped to
    /// the image. Zero samples carry no depth and are skipped; `None` when
    /// nothing is left.
    pub fn estimate_depth(&self, screen: &ScreenDetection) -> Option<f32> {
        let window = |start: i32, extent: i32, limit: usize| {
            let lo = start as f64 + extent as f64 * 0.45;
            let hi = start as f64 + extent as f64 * 0.55;
            let lo = lo.max(0.0) as usize;
            let hi = (hi.max(0.0) as usize).min(limit);
            lo..hi
        };

        let cols = window(screen.x, screen.width, self.width);
        let rows = window(screen.y, screen.height, self.height);

        let mut sum = 0.0f64;
        let mut count = 0usize;
        for row in rows {
            let line = self.data.get(row * self.width..(row + 1) * self.width)?;
            for &raw in line.get(cols.clone()).unwrap_or(&[]) {
                if raw != 0 {
                    sum += raw as f64 * self.scale as f64;
                    count += 1;
                }
            }
        }

        (count > 0).then(|| (sum / count as f64) as f32)
    }
}
