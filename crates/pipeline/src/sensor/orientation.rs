use glam::Quat;

/// Device rotation as reported by platforms without a quaternion channel.
/// Radians: yaw is alpha, pitch is beta, roll is gamma.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EulerAngles {
    pub yaw: f32,
    pub pitch: f32,
    pub roll: f32,
}

impl EulerAngles {
    pub fn new(yaw: f32, pitch: f32, roll: f32) -> Self {
        Self { yaw, pitch, roll }
    }
}

/// Half-angle composition of yaw, pitch and roll.
///
/// The axis order and signs follow what devices have historically reported
/// through this path and have not been checked against ground truth, so
/// treat the result as good enough for storage and logging only.
pub fn euler_to_quaternion(angles: EulerAngles) -> Quat {
    let (sy, cy) = (angles.yaw * 0.5).sin_cos();
    let (sp, cp) = (angles.pitch * 0.5).sin_cos();
    let (sr, cr) = (angles.roll * 0.5).sin_cos();

    let w = cr * cp * cy + sr * sp * sy;
    let x = sr * cp * cy - cr * sp * sy;
    let y = cr * sp * cy + sr * cp * sy;
    let z = cr * cp * sy - sr * sp * cy;

    Quat::from_xyzw(x, y, z, w)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    #[test]
    fn test_rest_is_identity() {
        let q = euler_to_quaternion(EulerAngles::default());
        assert_eq!([q.w, q.x, q.y, q.z], [1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_result_is_unit_length() {
        let q = euler_to_quaternion(EulerAngles::new(0.7, -1.2, 2.9));
        assert!((q.length() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_pure_yaw_rotates_about_z() {
        let q = euler_to_quaternion(EulerAngles::new(FRAC_PI_2, 0.0, 0.0));
        let half = std::f32::consts::FRAC_1_SQRT_2;
        assert!((q.w - half).abs() < 1e-6);
        assert!((q.z - half).abs() < 1e-6);
        assert!(q.x.abs() < 1e-6 && q.y.abs() < 1e-6);
    }
}
