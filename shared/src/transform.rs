/*!
Camera-relative to field-relative coordinate transform.

The camera frame has x to the right, y forward along the optical axis and
z up. [`rotation_matrix`] turns such a vector into field axes given the
robot's azimuth, elevation and twist.
*/

use crate::error::{Result, SharedError};
use crate::offset::{CameraOffset, OffsetRecord, OffsetStore};
use crate::telemetry::{FieldDetection, Position, ScreenDetection};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Row-major 3x3 matrix
pub type Matrix3 = [[f64; 3]; 3];

/// Rotation from camera/robot axes to field axes; angles in radians
pub fn rotation_matrix(azimuth: f64, elevation: f64, twist: f64) -> Matrix3 {
    let (sp, cp) = azimuth.sin_cos();
    let (st, ct) = elevation.sin_cos();
    let (ss, cs) = twist.sin_cos();

    [
        [cp * cs + sp * st * ss, sp * ct, cp * ss - sp * st * cs],
        [-sp * cs + cp * st * ss, cp * ct, -sp * ss - cp * st * cs],
        [-ct * ss, st, ct * cs],
    ]
}

/// `m * v`
pub fn rotate(m: &Matrix3, v: [f64; 3]) -> [f64; 3] {
    let mut out = [0.0; 3];
    for (row, o) in m.iter().zip(out.iter_mut()) {
        *o = row[0] * v[0] + row[1] * v[1] + row[2] * v[2];
    }
    out
}

/// Calibration of the camera producing the detections
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraIntrinsics {
    /// Half the frame width in pixels
    pub half_width: f64,
    /// Half the frame height in pixels
    pub half_height: f64,
    /// Focal length in pixels
    pub focal_length_px: f64,
}

impl CameraIntrinsics {
    /// Reject calibrations that cannot project anything
    pub fn validate(&self) -> Result<()> {
        let valid = |v: f64| v.is_finite() && v > 0.0;
        if !(valid(self.half_width) && valid(self.half_height) && valid(self.focal_length_px)) {
            return Err(SharedError::config(format!(
                "camera calibration must be positive, got {}x{} half-size, focal length {}",
                self.half_width, self.half_height, self.focal_length_px
            )));
        }
        Ok(())
    }

    /// Vector from the camera to a point seen at pixel `(cx, cy)` at `depth` meters
    pub fn camera_vector(&self, cx: f64, cy: f64, depth: f64) -> [f64; 3] {
        [
            depth * (cx - self.half_width) / self.focal_length_px,
            depth,
            depth * (self.half_height - cy) / self.focal_length_px,
        ]
    }
}

impl Default for CameraIntrinsics {
    fn default() -> Self {
        // 640x480 stream of the depth camera
        Self {
            half_width: 320.0,
            half_height: 240.0,
            focal_length_px: 610.98,
        }
    }
}

/// Projects screen detections onto the field using the robot's pose
pub struct FieldMapper {
    intrinsics: CameraIntrinsics,
    offset: Mutex<CameraOffset>,
    store: Option<Arc<dyn OffsetStore>>,
}

impl FieldMapper {
    pub fn new(intrinsics: CameraIntrinsics, offset: CameraOffset) -> Self {
        Self {
            intrinsics,
            offset: Mutex::new(offset),
            store: None,
        }
    }

    /// Persist every offset update through `store`
    pub fn with_store(mut self, store: Arc<dyn OffsetStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn intrinsics(&self) -> &CameraIntrinsics {
        &self.intrinsics
    }

    pub fn offset(&self) -> CameraOffset {
        *self.offset.lock()
    }

    /// Replace the camera offset.
    ///
    /// The record is persisted before it takes effect: an invalid unit or a
    /// failed save leaves the current offset in place.
    pub fn update_offset(&self, record: &OffsetRecord) -> Result<()> {
        let offset = record.to_camera_offset()?;
        if let Some(store) = &self.store {
            store.save(record)?;
        }

        *self.offset.lock() = offset;
        info!(
            "📐 Camera offset set to ({:.3}, {:.3}, {:.3}) m, heading {}°, elevation {}°",
            offset.mount.x, offset.mount.y, offset.mount.z, offset.mount.heading_offset, offset.elevation_offset
        );
        Ok(())
    }

    /// Field position of a point seen at pixel `(cx, cy)`, `depth` meters away
    pub fn field_position(&self, cx: f64, cy: f64, depth: f64, position: &Position) -> [f64; 3] {
        let offset = self.offset();

        let rot = rotation_matrix(
            (position.azimuth as f64 - offset.mount.heading_offset).to_radians(),
            (position.elevation as f64 - offset.elevation_offset).to_radians(),
            (position.rotation as f64).to_radians(),
        );

        let relative = rotate(&rot, self.intrinsics.camera_vector(cx, cy, depth));
        let mount = rotate(&rot, [offset.mount.x, offset.mount.y, offset.mount.z]);

        // camera sits above the robot's reference point: z offset is inverted
        [
            relative[0] + position.x as f64 + mount[0],
            relative[1] + position.y as f64 + mount[1],
            relative[2] + position.z as f64 - mount[2],
        ]
    }

    /// Field location of a bounding box's centre
    pub fn locate(&self, screen: &ScreenDetection, depth: f32, position: &Position) -> FieldDetection {
        let (cx, cy) = screen.center();
        let [x, y, z] = self.field_position(cx, cy, depth as f64, position);
        FieldDetection::new(x as f32, y as f32, z as f32)
    }
}

impl Default for FieldMapper {
    fn default() -> Self {
        Self::new(CameraIntrinsics::default(), CameraOffset::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offset::JsonOffsetStore;
    use std::f64::consts::FRAC_PI_2;

    const EPS: f64 = 1e-9;

    fn assert_vec_close(actual: [f64; 3], expected: [f64; 3]) {
        for i in 0..3 {
            assert!(
                (actual[i] - expected[i]).abs() < EPS,
                "component {}: {} != {}",
                i,
                actual[i],
                expected[i]
            );
        }
    }

    fn pose(x: f32, y: f32, z: f32, azimuth: f32) -> Position {
        Position {
            x,
            y,
            z,
            azimuth,
            ..Position::default()
        }
    }

    #[test]
    fn test_identity_at_zero_angles() {
        let m = rotation_matrix(0.0, 0.0, 0.0);
        let identity = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
        for r in 0..3 {
            assert_vec_close(m[r], identity[r]);
        }
    }

    #[test]
    fn test_quarter_turn_maps_forward_to_lateral() {
        let m = rotation_matrix(FRAC_PI_2, 0.0, 0.0);
        assert_vec_close(rotate(&m, [0.0, 1.0, 0.0]), [1.0, 0.0, 0.0]);
        assert_vec_close(rotate(&m, [1.0, 0.0, 0.0]), [0.0, -1.0, 0.0]);
        assert_vec_close(rotate(&m, [0.0, 0.0, 1.0]), [0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_elevation_tilts_forward_axis_up() {
        let m = rotation_matrix(0.0, FRAC_PI_2, 0.0);
        assert_vec_close(rotate(&m, [0.0, 1.0, 0.0]), [0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_rotation_is_orthonormal() {
        let m = rotation_matrix(0.3, -0.7, 1.1);
        for i in 0..3 {
            for j in 0..3 {
                let dot: f64 = (0..3).map(|k| m[i][k] * m[j][k]).sum();
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((dot - expected).abs() < EPS);
            }
        }
    }

    #[test]
    fn test_screen_center_projects_straight_ahead() {
        let mapper = FieldMapper::default();
        let position = pose(1.0, 2.0, 0.0, 0.0);
        let out = mapper.field_position(320.0, 240.0, 5.0, &position);
        assert_vec_close(out, [1.0, 7.0, 0.0]);

        let det = mapper.locate(&ScreenDetection::new(300, 220, 40, 40), 5.0, &position);
        assert_eq!(det, FieldDetection::new(1.0, 7.0, 0.0));
    }

    #[test]
    fn test_off_center_pixel_scales_with_depth() {
        let intrinsics = CameraIntrinsics::default();
        let v = intrinsics.camera_vector(320.0 + 61.098, 240.0 - 61.098, 10.0);
        assert_vec_close(v, [1.0, 10.0, 1.0]);
    }

    #[test]
    fn test_robot_heading_rotates_detection() {
        let mapper = FieldMapper::default();
        let out = mapper.field_position(320.0, 240.0, 2.0, &pose(0.5, 0.5, 0.0, 90.0));
        assert_vec_close(out, [2.5, 0.5, 0.0]);
    }

    #[test]
    fn test_heading_offset_cancels_azimuth() {
        let mapper = FieldMapper::default();
        let record = OffsetRecord {
            heading_offset: 90.0,
            elevation_offset: Some(0.0),
            ..OffsetRecord::gps_default()
        };
        mapper.update_offset(&record).unwrap();
        let out = mapper.field_position(320.0, 240.0, 3.0, &pose(0.0, 0.0, 0.0, 90.0));
        assert_vec_close(out, [0.0, 3.0, 0.0]);
    }

    #[test]
    fn test_mount_offset_applied_with_inverted_z() {
        let mapper = FieldMapper::default();
        let record = OffsetRecord {
            x: 10.0,
            y: 20.0,
            z: 30.0,
            unit: "cm".to_string(),
            heading_offset: 0.0,
            elevation_offset: Some(0.0),
        };
        mapper.update_offset(&record).unwrap();
        let out = mapper.field_position(320.0, 240.0, 1.0, &pose(0.0, 0.0, 0.5, 0.0));
        assert_vec_close(out, [0.1, 1.2, 0.2]);
    }

    #[test]
    fn test_invalid_unit_keeps_previous_offset() {
        let mapper = FieldMapper::default();
        let record = OffsetRecord {
            x: 1.0,
            unit: "yards".to_string(),
            ..OffsetRecord::camera_default()
        };
        assert!(matches!(mapper.update_offset(&record), Err(SharedError::InvalidUnit(_))));
        assert_eq!(mapper.offset(), CameraOffset::default());
    }

    #[test]
    fn test_update_persists_through_store() {
        struct Recorder(Mutex<Vec<OffsetRecord>>);
        impl OffsetStore for Recorder {
            fn save(&self, record: &OffsetRecord) -> Result<()> {
                self.0.lock().push(record.clone());
                Ok(())
            }
        }

        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let mapper = FieldMapper::default().with_store(recorder.clone());
        let record = OffsetRecord {
            x: 2.0,
            unit: "in".to_string(),
            ..OffsetRecord::camera_default()
        };
        mapper.update_offset(&record).unwrap();

        assert_eq!(recorder.0.lock().as_slice(), &[record]);

        let bad = OffsetRecord {
            unit: "parsecs".to_string(),
            ..OffsetRecord::camera_default()
        };
        assert!(mapper.update_offset(&bad).is_err());
        assert_eq!(recorder.0.lock().len(), 1);
    }

    #[test]
    fn test_failed_save_keeps_previous_offset() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonOffsetStore::new(dir.path().join("missing").join("camera.json")));
        let mapper = FieldMapper::default().with_store(store);

        let record = OffsetRecord {
            x: 1.0,
            ..OffsetRecord::camera_default()
        };
        assert!(matches!(mapper.update_offset(&record), Err(SharedError::Io(_))));
        assert_eq!(mapper.offset(), CameraOffset::default());
    }

    #[test]
    fn test_intrinsics_validation() {
        assert!(CameraIntrinsics::default().validate().is_ok());

        let zero_focal = CameraIntrinsics {
            focal_length_px: 0.0,
            ..CameraIntrinsics::default()
        };
        assert!(matches!(zero_focal.validate(), Err(SharedError::Config(_))));

        let nan_width = CameraIntrinsics {
            half_width: f64::NAN,
            ..CameraIntrinsics::default()
        };
        assert!(nan_width.validate().is_err());
    }
}
