//! Minimal physical units for quantity converters.
//!
//! Instruments talk in a fixed base unit per command (`Hz`, `V`, `A`, ...).
//! Applications hand in quantities in whatever unit is convenient, so a
//! quantity write converts to the command unit before the magnitude goes on
//! the wire. Only linear units are supported; every unit is a scale factor on
//! the coherent SI unit of its dimension.
//!
//! SI prefixes are accepted when parsing unit symbols (`mHz`, `kV`, `uA`) but
//! commands always declare an unprefixed base unit. SCPI parsers are case
//! insensitive, so `m` and `M` would be ambiguous on the wire.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConversionError;

/// Physical dimension of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    /// Plain number.
    Dimensionless,
    /// Seconds.
    Time,
    /// Hertz.
    Frequency,
    /// Metres.
    Length,
    /// Volts.
    Voltage,
    /// Amperes.
    Current,
    /// Watts.
    Power,
    /// Ohms.
    Resistance,
    /// Farads.
    Capacitance,
    /// Radians.
    Angle,
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Dimension::Dimensionless => "dimensionless",
            Dimension::Time => "time",
            Dimension::Frequency => "frequency",
            Dimension::Length => "length",
            Dimension::Voltage => "voltage",
            Dimension::Current => "current",
            Dimension::Power => "power",
            Dimension::Resistance => "resistance",
            Dimension::Capacitance => "capacitance",
            Dimension::Angle => "angle",
        };
        f.write_str(name)
    }
}

// (symbol, dimension, scale to coherent SI unit)
const BASE_UNITS: &[(&str, Dimension, f64)] = &[
    ("s", Dimension::Time, 1.0),
    ("Hz", Dimension::Frequency, 1.0),
    ("m", Dimension::Length, 1.0),
    ("V", Dimension::Voltage, 1.0),
    ("A", Dimension::Current, 1.0),
    ("W", Dimension::Power, 1.0),
    ("Ohm", Dimension::Resistance, 1.0),
    ("Ω", Dimension::Resistance, 1.0),
    ("F", Dimension::Capacitance, 1.0),
    ("rad", Dimension::Angle, 1.0),
    ("deg", Dimension::Angle, std::f64::consts::PI / 180.0),
];

const PREFIXES: &[(&str, f64)] = &[
    ("p", 1e-12),
    ("n", 1e-9),
    ("u", 1e-6),
    ("µ", 1e-6),
    ("m", 1e-3),
    ("k", 1e3),
    ("M", 1e6),
    ("G", 1e9),
];

/// A linear unit: a symbol, its dimension, and its scale to the SI unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Unit {
    symbol: String,
    dimension: Dimension,
    scale: f64,
}

impl Unit {
    /// Parse a unit symbol, with an optional SI prefix.
    ///
    /// Unprefixed symbols win, so `"m"` is a metre and `"min"` is rejected
    /// rather than read as milli-inch.
    pub fn parse(symbol: &str) -> Result<Self, ConversionError> {
        let symbol = symbol.trim();
        if let Some(unit) = lookup_base(symbol) {
            return Ok(unit);
        }
        for (prefix, factor) in PREFIXES {
            if let Some(rest) = symbol.strip_prefix(prefix) {
                if let Some(base) = lookup_base(rest) {
                    return Ok(Unit {
                        symbol: symbol.to_string(),
                        dimension: base.dimension,
                        scale: base.scale * factor,
                    });
                }
            }
        }
        Err(ConversionError::parse(symbol, "a unit symbol"))
    }

    /// The symbol as written, e.g. `"mHz"`.
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// The physical dimension.
    pub fn dimension(&self) -> Dimension {
        self.dimension
    }

    /// Factor converting a magnitude in this unit to the coherent SI unit.
    pub fn scale(&self) -> f64 {
        self.scale
    }
}

fn lookup_base(symbol: &str) -> Option<Unit> {
    BASE_UNITS
        .iter()
        .find(|(s, _, _)| *s == symbol)
        .map(|(s, dimension, scale)| Unit {
            symbol: (*s).to_string(),
            dimension: *dimension,
            scale: *scale,
        })
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.symbol)
    }
}

/// A magnitude tagged with a unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Quantity {
    magnitude: f64,
    unit: Unit,
}

impl Quantity {
    /// Build a quantity from a magnitude and a parsed unit.
    pub fn new(magnitude: f64, unit: Unit) -> Self {
        Self { magnitude, unit }
    }

    /// Build a quantity from a magnitude and a unit symbol such as `"mHz"`.
    pub fn parse_unit(magnitude: f64, symbol: &str) -> Result<Self, ConversionError> {
        Ok(Self::new(magnitude, Unit::parse(symbol)?))
    }

    /// Parse `"<number> <unit>"` (the space is optional: `"100mHz"`).
    pub fn parse(text: &str) -> Result<Self, ConversionError> {
        let text = text.trim();
        let split = text
            .char_indices()
            .find(|(_, c)| !(c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E')))
            .map(|(i, _)| i)
            .ok_or_else(|| ConversionError::parse(text, "a quantity"))?;
        let (number, symbol) = text.split_at(split);
        let magnitude = number
            .trim()
            .parse::<f64>()
            .map_err(|_| ConversionError::parse(text, "a quantity"))?;
        Self::parse_unit(magnitude, symbol)
    }

    /// Magnitude in this quantity's own unit.
    pub fn magnitude(&self) -> f64 {
        self.magnitude
    }

    /// The unit the magnitude is expressed in.
    pub fn unit(&self) -> &Unit {
        &self.unit
    }

    /// Dimension of the unit.
    pub fn dimension(&self) -> Dimension {
        self.unit.dimension
    }

    /// Express this quantity in `target`.
    ///
    /// Fails with `UnitMismatch` if the dimensions differ.
    pub fn to(&self, target: &Unit) -> Result<Quantity, ConversionError> {
        if self.unit.dimension != target.dimension {
            return Err(ConversionError::UnitMismatch {
                expected: target.dimension,
                found: Some(self.unit.dimension),
            });
        }
        let magnitude = if self.unit.scale == target.scale {
            self.magnitude
        } else {
            self.magnitude * (self.unit.scale / target.scale)
        };
        Ok(Quantity::new(magnitude, target.clone()))
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.magnitude, self.unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixed_units() {
        let mhz = Unit::parse("mHz").unwrap();
        assert_eq!(mhz.dimension(), Dimension::Frequency);
        assert_eq!(mhz.scale(), 1e-3);

        let kv = Unit::parse("kV").unwrap();
        assert_eq!(kv.dimension(), Dimension::Voltage);
        assert_eq!(kv.scale(), 1e3);
    }

    #[test]
    fn test_bare_symbol_wins_over_prefix() {
        let metre = Unit::parse("m").unwrap();
        assert_eq!(metre.dimension(), Dimension::Length);
        assert_eq!(metre.scale(), 1.0);
    }

    #[test]
    fn test_unknown_unit() {
        assert!(Unit::parse("furlong").is_err());
        assert!(Unit::parse("").is_err());
    }

    #[test]
    fn test_conversion_to_base_unit() {
        let q = Quantity::parse_unit(100.0, "mHz").unwrap();
        let hz = Unit::parse("Hz").unwrap();
        assert_eq!(q.to(&hz).unwrap().magnitude(), 0.1);
    }

    #[test]
    fn test_conversion_dimension_mismatch() {
        let q = Quantity::parse_unit(3.0, "mm").unwrap();
        let hz = Unit::parse("Hz").unwrap();
        let err = q.to(&hz).unwrap_err();
        assert_eq!(
            err,
            ConversionError::UnitMismatch {
                expected: Dimension::Frequency,
                found: Some(Dimension::Length),
            }
        );
    }

    #[test]
    fn test_parse_quantity_text() {
        let q = Quantity::parse("100 mHz").unwrap();
        assert_eq!(q.magnitude(), 100.0);
        assert_eq!(q.unit().symbol(), "mHz");

        let q = Quantity::parse("2.5V").unwrap();
        assert_eq!(q.magnitude(), 2.5);
        assert_eq!(q.dimension(), Dimension::Voltage);

        assert!(Quantity::parse("12").is_err());
        assert!(Quantity::parse("Hz").is_err());
    }
}
