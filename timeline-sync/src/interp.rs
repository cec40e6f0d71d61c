//! Interpolation modes for a keyframe segment.

/// How a key's value blends into the next key's value across its segment.
///
/// Any byte read from a file or the wire that doesn't match one of these four
/// values is treated as [`Interp::Step`] (constant 0 delta, i.e. the segment's
/// start value is held unchanged) — see [`Interp::from`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
pub enum Interp {
    #[default]
    Step = 0,
    Linear = 1,
    Smoothstep = 2,
    RampUp = 3,
}

impl Interp {
    /// Transform the segment-local `x ∈ [0, 1]` per this mode's curve.
    pub fn transform(self, x: f32) -> f32 {
        match self {
            Interp::Linear => x,
            Interp::Smoothstep => x * x * (3.0 - 2.0 * x),
            Interp::RampUp => x * x,
            Interp::Step => 0.0,
        }
    }

    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

impl From<u8> for Interp {
    fn from(byte: u8) -> Self {
        match byte {
            1 => Interp::Linear,
            2 => Interp::Smoothstep,
            3 => Interp::RampUp,
            _ => Interp::Step,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_byte_is_step() {
        assert_eq!(Interp::from(0), Interp::Step);
        assert_eq!(Interp::from(4), Interp::Step);
        assert_eq!(Interp::from(255), Interp::Step);
    }

    #[test]
    fn known_bytes_round_trip() {
        for interp in [Interp::Step, Interp::Linear, Interp::Smoothstep, Interp::RampUp] {
            assert_eq!(Interp::from(interp.to_byte()), interp);
        }
    }

    #[test]
    fn transform_endpoints() {
        assert_eq!(Interp::Linear.transform(0.0), 0.0);
        assert_eq!(Interp::Linear.transform(1.0), 1.0);
        assert_eq!(Interp::Smoothstep.transform(0.0), 0.0);
        assert_eq!(Interp::Smoothstep.transform(1.0), 1.0);
        assert_eq!(Interp::Smoothstep.transform(0.5), 0.5);
        assert_eq!(Interp::RampUp.transform(0.5), 0.25);
        assert_eq!(Interp::Step.transform(0.5), 0.0);
    }
}
