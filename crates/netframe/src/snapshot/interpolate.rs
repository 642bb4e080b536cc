use glam::Vec3;

use crate::Frame;

/// A value tagged with the simulation frame it describes.
pub trait Framed {
    fn frame(&self) -> Frame;
}

/// Blends two states of the same type into a caller-owned output, so a
/// per-frame lookup does not have to allocate.
pub trait Interpolate {
    fn interpolate(from: &Self, to: &Self, t: f32, out: &mut Self);
}

impl Interpolate for f32 {
    fn interpolate(from: &Self, to: &Self, t: f32, out: &mut Self) {
        *out = from + (to - from) * t;
    }
}

impl Interpolate for Vec3 {
    fn interpolate(from: &Self, to: &Self, t: f32, out: &mut Self) {
        *out = from.lerp(*to, t);
    }
}

impl Interpolate for [f32; 3] {
    fn interpolate(from: &Self, to: &Self, t: f32, out: &mut Self) {
        *out = Vec3::from(*from).lerp(Vec3::from(*to), t).into();
    }
}

/// Interpolates an angle in radians along the shorter arc.
pub fn lerp_angle(from: f32, to: f32, t: f32) -> f32 {
    let two_pi = std::f32::consts::TAU;
    let mut delta = (to - from) % two_pi;
    if delta > std::f32::consts::PI {
        delta -= two_pi;
    } else if delta < -std::f32::consts::PI {
        delta += two_pi;
    }
    from + delta * t
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_and_vector_midpoints() {
        let mut scalar = 0.0;
        f32::interpolate(&2.0, &6.0, 0.5, &mut scalar);
        assert_eq!(scalar, 4.0);

        let mut vector = [0.0; 3];
        <[f32; 3]>::interpolate(&[0.0, 10.0, -4.0], &[10.0, 20.0, 4.0], 0.5, &mut vector);
        assert_eq!(vector, [5.0, 15.0, 0.0]);
    }

    #[test]
    fn angle_takes_short_way_round() {
        let from = std::f32::consts::PI - 0.1;
        let to = -std::f32::consts::PI + 0.1;

        let mid = lerp_angle(from, to, 0.5);
        assert!((mid.abs() - std::f32::consts::PI).abs() < 0.001);
    }
}
