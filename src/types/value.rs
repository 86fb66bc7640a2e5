//! Register value model.
//!
//! Device state comes from an external data store that does not know about
//! IEC 104 encodings, so a register only holds a loosely typed value. The
//! register's category decides how that value is packed into an information
//! element (see [`Element::for_category`](super::Element::for_category)).

use serde::{Deserialize, Serialize};

use super::DoublePointValue;

/// Current value of a register.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PointValue {
    /// Boolean state
    Bool(bool),
    /// Integer value (step positions, double-point states, scaled values, bitstrings)
    Int(i64),
    /// Floating point value
    Float(f64),
}

impl PointValue {
    /// Interpret as a boolean (nonzero is `true`).
    #[inline]
    pub fn as_bool(&self) -> bool {
        match self {
            Self::Bool(v) => *v,
            Self::Int(v) => *v != 0,
            Self::Float(v) => *v != 0.0,
        }
    }

    /// Interpret as an integer (floats are truncated toward zero).
    #[inline]
    pub fn as_i64(&self) -> i64 {
        match self {
            Self::Bool(v) => i64::from(*v),
            Self::Int(v) => *v,
            Self::Float(v) => *v as i64,
        }
    }

    /// Interpret as a float.
    #[inline]
    pub fn as_f64(&self) -> f64 {
        match self {
            Self::Bool(v) => {
                if *v {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Int(v) => *v as f64,
            Self::Float(v) => *v,
        }
    }

    /// Interpret as a double-point state.
    ///
    /// Booleans map to determined ON/OFF; numbers use their lower two bits as
    /// the DPI code.
    pub fn as_double_point(&self) -> DoublePointValue {
        match self {
            Self::Bool(true) => DoublePointValue::On,
            Self::Bool(false) => DoublePointValue::Off,
            other => DoublePointValue::from_u8((other.as_i64() & 0x03) as u8),
        }
    }

    /// Saturating conversion to a 16-bit scaled value.
    pub fn as_scaled(&self) -> i16 {
        self.as_i64().clamp(i16::MIN as i64, i16::MAX as i64) as i16
    }

    /// Conversion to a normalized value (NVA).
    ///
    /// Floats are read as the fraction in [-1, 1); integers are taken as the
    /// raw 16-bit representation.
    pub fn as_normalized(&self) -> i16 {
        match self {
            Self::Float(v) => (v * 32768.0).clamp(i16::MIN as f64, i16::MAX as f64) as i16,
            other => other.as_scaled(),
        }
    }

    /// Conversion to a step position (VTI value range -64..=63).
    pub fn as_step_position(&self) -> i8 {
        self.as_i64().clamp(-64, 63) as i8
    }
}

impl std::fmt::Display for PointValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{}", v),
            Self::Int(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
        }
    }
}

impl From<bool> for PointValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for PointValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for PointValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversions() {
        assert!(PointValue::Int(3).as_bool());
        assert!(!PointValue::Float(0.0).as_bool());
        assert_eq!(PointValue::Bool(true).as_i64(), 1);
        assert_eq!(PointValue::Float(-2.9).as_i64(), -2);
        assert_eq!(PointValue::Bool(false).as_f64(), 0.0);
    }

    #[test]
    fn test_double_point_mapping() {
        assert_eq!(PointValue::Bool(true).as_double_point(), DoublePointValue::On);
        assert_eq!(PointValue::Bool(false).as_double_point(), DoublePointValue::Off);
        assert_eq!(PointValue::Int(1).as_double_point(), DoublePointValue::Off);
        assert_eq!(PointValue::Int(2).as_double_point(), DoublePointValue::On);
        assert_eq!(
            PointValue::Int(7).as_double_point(),
            DoublePointValue::IndeterminateOrFaulty
        );
    }

    #[test]
    fn test_saturating_conversions() {
        assert_eq!(PointValue::Int(100_000).as_scaled(), i16::MAX);
        assert_eq!(PointValue::Int(-100_000).as_scaled(), i16::MIN);
        assert_eq!(PointValue::Int(99).as_step_position(), 63);
        assert_eq!(PointValue::Int(-99).as_step_position(), -64);
        assert_eq!(PointValue::Float(0.5).as_normalized(), 16384);
        assert_eq!(PointValue::Float(1.0).as_normalized(), i16::MAX);
    }

    #[test]
    fn test_untagged_deserialize() {
        let values: Vec<PointValue> = serde_json::from_str("[true, 12, 1.5]").unwrap();
        assert_eq!(
            values,
            vec![
                PointValue::Bool(true),
                PointValue::Int(12),
                PointValue::Float(1.5)
            ]
        );
    }
}
