//! Adapters between sensor, attitude and position data.

use roverpos_perception::{AnchorRange, DecawaveRangeScaler, MIN_ANCHORS, trilaterate};
use roverpos_types::{
    AttitudeOutput, DwmLocationResponse, DwmPosition, PositionInput, RoverError, TimestampedValue, Vector,
};
use tracing::debug;

use crate::filter::{Chain, DataFilter, FilterCore};

// ────────────────────────────────────────────────────────────────────────────
// Decawave ranges → tag position
// ────────────────────────────────────────────────────────────────────────────

/// Replaces the module's own tag position with a least-squares fix from the
/// corrected anchor ranges.
///
/// Anchors reporting a zero range are ignored. With fewer than
/// [`MIN_ANCHORS`] usable ranges the module's position passes through
/// unchanged. An anchor layout that cannot be solved is a
/// [`RoverError::Validation`] and the response is not forwarded.
pub struct DecawaveTrilaterationFilter {
    core: FilterCore<DwmLocationResponse>,
    scaler: DecawaveRangeScaler,
    tag_temperature: f64,
    anchor_temperature: f64,
}

impl DecawaveTrilaterationFilter {
    /// Temperatures start at the scaler's reference, so no drift applies.
    pub fn new(scaler: DecawaveRangeScaler) -> Self {
        Self {
            core: FilterCore::new("trilateration"),
            tag_temperature: scaler.reference_temperature,
            anchor_temperature: scaler.reference_temperature,
            scaler,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.core.rename(name);
        self
    }

    pub fn with_temperatures(mut self, tag: f64, anchor: f64) -> Self {
        self.set_temperatures(tag, anchor);
        self
    }

    pub fn set_temperatures(&mut self, tag: f64, anchor: f64) {
        self.tag_temperature = tag;
        self.anchor_temperature = anchor;
    }

    fn ranges(&self, response: &DwmLocationResponse) -> Vec<AnchorRange> {
        response
            .anchors
            .iter()
            .filter(|anchor| anchor.distance > 0)
            .map(|anchor| {
                let range = self
                    .scaler
                    .scale(f64::from(anchor.distance), self.tag_temperature, self.anchor_temperature);
                AnchorRange::new(anchor.position.to_vector(), range)
            })
            .collect()
    }
}

impl DataFilter<DwmLocationResponse> for DecawaveTrilaterationFilter {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn receive(&mut self, data: &TimestampedValue<DwmLocationResponse>) -> Result<(), RoverError> {
        self.core.ensure_open()?;
        let ranges = self.ranges(data.value());
        if ranges.len() < MIN_ANCHORS {
            debug!(filter = self.core.name(), anchors = ranges.len(), "too few ranges, keeping module fix");
            return self.core.send(data);
        }
        let fix = trilaterate(&ranges)?;
        let solved = data.map(|response| DwmLocationResponse {
            tag_position: DwmPosition::new(
                fix.x.round() as i32,
                fix.y.round() as i32,
                fix.z.round() as i32,
                response.tag_position.quality_factor,
            ),
            anchors: response.anchors.clone(),
        });
        self.core.send(&solved)
    }

    fn close(&mut self) {
        self.core.close();
    }

    fn is_closed(&self) -> bool {
        self.core.is_closed()
    }
}

impl Chain<DwmLocationResponse> for DecawaveTrilaterationFilter {
    fn add_downstream(&mut self, filter: Box<dyn DataFilter<DwmLocationResponse>>) {
        self.core.downstream.add(filter);
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Decawave response → position vector
// ────────────────────────────────────────────────────────────────────────────

/// Extracts the tag position from a location response and scales it, by
/// default from millimetres to metres.
pub struct DecawaveToVectorFilter {
    core: FilterCore<Vector>,
    scale: Vector,
}

impl DecawaveToVectorFilter {
    pub fn new() -> Self {
        Self::with_scale(Vector::new(0.001, 0.001, 0.001))
    }

    pub fn with_scale(scale: Vector) -> Self {
        Self {
            core: FilterCore::new("decawave_to_vector"),
            scale,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.core.rename(name);
        self
    }
}

impl Default for DecawaveToVectorFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl DataFilter<DwmLocationResponse> for DecawaveToVectorFilter {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn receive(&mut self, data: &TimestampedValue<DwmLocationResponse>) -> Result<(), RoverError> {
        self.core.ensure_open()?;
        let position = data.map(|response| response.tag_position.to_vector().scale(self.scale));
        self.core.send(&position)
    }

    fn close(&mut self) {
        self.core.close();
    }

    fn is_closed(&self) -> bool {
        self.core.is_closed()
    }
}

impl Chain<Vector> for DecawaveToVectorFilter {
    fn add_downstream(&mut self, filter: Box<dyn DataFilter<Vector>>) {
        self.core.downstream.add(filter);
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Attitude → position input
// ────────────────────────────────────────────────────────────────────────────

/// Wraps an attitude output as a [`PositionInput`], converting the
/// acceleration from g to m/s².
pub struct AttitudeOutputToPositionInputFilter {
    core: FilterCore<PositionInput>,
    g: f64,
}

impl AttitudeOutputToPositionInputFilter {
    pub fn new(g: f64) -> Self {
        Self {
            core: FilterCore::new("attitude_to_position_input"),
            g,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.core.rename(name);
        self
    }
}

impl DataFilter<AttitudeOutput> for AttitudeOutputToPositionInputFilter {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn receive(&mut self, data: &TimestampedValue<AttitudeOutput>) -> Result<(), RoverError> {
        self.core.ensure_open()?;
        let attitude = data.map(|output| AttitudeOutput {
            acceleration: output.acceleration * self.g,
            ..*output
        });
        let input = TimestampedValue::new(PositionInput::from_attitude(attitude), data.timestamp());
        self.core.send(&input)
    }

    fn close(&mut self) {
        self.core.close();
    }

    fn is_closed(&self) -> bool {
        self.core.is_closed()
    }
}

impl Chain<PositionInput> for AttitudeOutputToPositionInputFilter {
    fn add_downstream(&mut self, filter: Box<dyn DataFilter<PositionInput>>) {
        self.core.downstream.add(filter);
    }
}

// ────────────────────────────────────────────────────────────────────────────
// UWB fix → position input
// ────────────────────────────────────────────────────────────────────────────

/// Wraps an absolute position fix as a [`PositionInput`].
pub struct DecawaveToPositionInputFilter {
    core: FilterCore<PositionInput>,
}

impl DecawaveToPositionInputFilter {
    pub fn new() -> Self {
        Self {
            core: FilterCore::new("decawave_to_position_input"),
        }
    }
}

impl Default for DecawaveToPositionInputFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl DataFilter<Vector> for DecawaveToPositionInputFilter {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn receive(&mut self, data: &TimestampedValue<Vector>) -> Result<(), RoverError> {
        self.core.ensure_open()?;
        let input = TimestampedValue::new(PositionInput::from_position(*data), data.timestamp());
        self.core.send(&input)
    }

    fn close(&mut self) {
        self.core.close();
    }

    fn is_closed(&self) -> bool {
        self.core.is_closed()
    }
}

impl Chain<PositionInput> for DecawaveToPositionInputFilter {
    fn add_downstream(&mut self, filter: Box<dyn DataFilter<PositionInput>>) {
        self.core.downstream.add(filter);
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Attitude → heading frame
// ────────────────────────────────────────────────────────────────────────────

/// Heading telemetry frame, big-endian:
///
/// | Offset | Field | Type |
/// |---|---|---|
/// | 0 | roll (rad) | `f32` |
/// | 4 | pitch (rad) | `f32` |
/// | 8 | yaw (rad) | `f32` |
/// | 12 | status | `u8` |
/// | 13 | timestamp (s) | `f32` |
pub type HeadingFrame = [u8; 17];

pub struct AttitudeToHeadingBytesFilter {
    core: FilterCore<HeadingFrame>,
}

impl AttitudeToHeadingBytesFilter {
    pub fn new() -> Self {
        Self {
            core: FilterCore::new("heading_bytes"),
        }
    }

    pub fn encode(output: &AttitudeOutput, timestamp: f64) -> HeadingFrame {
        let angles = output.attitude.to_tait_bryan();
        let mut frame = [0u8; 17];
        frame[0..4].copy_from_slice(&(angles.roll as f32).to_be_bytes());
        frame[4..8].copy_from_slice(&(angles.pitch as f32).to_be_bytes());
        frame[8..12].copy_from_slice(&(angles.yaw as f32).to_be_bytes());
        frame[12] = u8::from(output.status);
        frame[13..17].copy_from_slice(&(timestamp as f32).to_be_bytes());
        frame
    }
}

impl Default for AttitudeToHeadingBytesFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl DataFilter<AttitudeOutput> for AttitudeToHeadingBytesFilter {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn receive(&mut self, data: &TimestampedValue<AttitudeOutput>) -> Result<(), RoverError> {
        self.core.ensure_open()?;
        let frame = data.map(|output| Self::encode(output, data.timestamp()));
        self.core.send(&frame)
    }

    fn close(&mut self) {
        self.core.close();
    }

    fn is_closed(&self) -> bool {
        self.core.is_closed()
    }
}

impl Chain<HeadingFrame> for AttitudeToHeadingBytesFilter {
    fn add_downstream(&mut self, filter: Box<dyn DataFilter<HeadingFrame>>) {
        self.core.downstream.add(filter);
    }
}
