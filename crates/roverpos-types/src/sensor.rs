//! Raw sensor samples as delivered by the hardware drivers.

use serde::{Deserialize, Serialize};

use crate::math::Vector;

/// One 9-axis inertial sample.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NineDoFData {
    /// Accelerometer reading (g).
    pub acceleration: Vector,
    /// Gyroscope reading (rad/s).
    pub angular_velocity: Vector,
    /// Magnetometer reading (any consistent unit).
    pub magnetic_field: Vector,
    /// Die temperature (°C).
    pub temperature: f64,
}

/// A position reported by a Decawave DWM1001 module.
///
/// Coordinates are integer millimetres in the anchor network's frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DwmPosition {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    /// Module-reported confidence, 0–100.
    pub quality_factor: u8,
}

impl DwmPosition {
    pub fn new(x: i32, y: i32, z: i32, quality_factor: u8) -> Self {
        Self {
            x,
            y,
            z,
            quality_factor,
        }
    }

    /// The raw coordinates as a [`Vector`], still in millimetres.
    pub fn to_vector(self) -> Vector {
        Vector::new(f64::from(self.x), f64::from(self.y), f64::from(self.z))
    }
}

/// Range to a single anchor together with that anchor's surveyed position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DwmDistanceAndPosition {
    /// UWB short address of the anchor.
    pub address: u16,
    /// Measured range (mm).
    pub distance: u32,
    pub distance_quality: u8,
    pub position: DwmPosition,
}

/// Response to a `dwm_loc_get` request: the tag's computed position plus the
/// ranges it was computed from.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DwmLocationResponse {
    pub tag_position: DwmPosition,
    pub anchors: Vec<DwmDistanceAndPosition>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dwm_position_to_vector_keeps_millimetres() {
        let v = DwmPosition::new(1000, -2000, 3000, 90).to_vector();
        assert_eq!(v, Vector::new(1000.0, -2000.0, 3000.0));
    }

    #[test]
    fn location_response_json_roundtrip() {
        let response = DwmLocationResponse {
            tag_position: DwmPosition::new(1, 2, 3, 4),
            anchors: vec![DwmDistanceAndPosition {
                address: 0x1c2d,
                distance: 4200,
                distance_quality: 100,
                position: DwmPosition::new(0, 0, 1500, 100),
            }],
        };
        let json = serde_json::to_string(&response).unwrap();
        let back: DwmLocationResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(response, back);
    }
}
