use glam::{Mat4, Vec3};

/// Perspective camera described by position, yaw and pitch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    pub yaw: f32,
    pub pitch: f32,
    /// Vertical field of view in radians.
    pub fov: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 4.0, 8.0),
            yaw: -90.0_f32.to_radians(),
            pitch: -25.0_f32.to_radians(),
            fov: 60.0_f32.to_radians(),
            near: 0.1,
            far: 500.0,
        }
    }
}

impl Camera {
    pub fn forward(&self) -> Vec3 {
        Vec3::new(
            self.yaw.cos() * self.pitch.cos(),
            self.pitch.sin(),
            self.yaw.sin() * self.pitch.cos(),
        )
        .normalize()
    }

    /// Turn to face `target`.
    pub fn look_at(&mut self, target: Vec3) {
        let dir = (target - self.position).normalize_or_zero();
        if dir == Vec3::ZERO {
            return;
        }
        self.pitch = dir.y.clamp(-1.0, 1.0).asin().clamp(-89.0_f32.to_radians(), 89.0_f32.to_radians());
        self.yaw = dir.z.atan2(dir.x);
    }

    /// Circle `center` at the current distance and height.
    pub fn orbit(&mut self, center: Vec3, angle: f32) {
        let offset = self.position - center;
        let radius = Vec3::new(offset.x, 0.0, offset.z).length();
        self.position = center + Vec3::new(radius * angle.cos(), offset.y, radius * angle.sin());
        self.look_at(center);
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.position + self.forward(), Vec3::Y)
    }

    pub fn projection_matrix(&self, aspect: f32) -> Mat4 {
        Mat4::perspective_rh(self.fov, aspect, self.near, self.far)
    }

    pub fn view_projection(&self, aspect: f32) -> Mat4 {
        self.projection_matrix(aspect) * self.view_matrix()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_camera_is_finite() {
        let vp = Camera::default().view_projection(16.0 / 9.0);
        assert!(vp.is_finite());
    }

    #[test]
    fn look_at_faces_target() {
        let mut cam = Camera {
            position: Vec3::new(0.0, 0.0, 5.0),
            ..Camera::default()
        };
        cam.look_at(Vec3::ZERO);
        assert!(cam.forward().abs_diff_eq(Vec3::NEG_Z, 1e-5));
    }

    #[test]
    fn orbit_keeps_radius_and_height() {
        let mut cam = Camera {
            position: Vec3::new(3.0, 2.0, 4.0),
            ..Camera::default()
        };
        cam.orbit(Vec3::ZERO, 1.0);
        let flat = Vec3::new(cam.position.x, 0.0, cam.position.z);
        assert!((flat.length() - 5.0).abs() < 1e-4);
        assert_eq!(cam.position.y, 2.0);
    }
}
