//! `*IDN?` reply parsing.

use std::fmt;

use crate::error::ConversionError;

/// Manufacturer strings as reported by instruments, and the short names we
/// use instead.
const MANUFACTURER_NAMES: &[(&str, &str)] = &[
    ("HEWLETT-PACKARD", "HP"),
    ("AGILENT TECHNOLOGIES", "Agilent"),
    ("KEYSIGHT TECHNOLOGIES", "Keysight"),
    ("MAGNA-POWER ELECTRONICS INC.", "Magna-Power"),
    ("TEKTRONIX", "Tektronix"),
    ("RIGOL TECHNOLOGIES", "Rigol"),
];

/// Parsed identification string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Normalised manufacturer name.
    pub manufacturer: String,
    /// Model number.
    pub model: String,
    /// Serial number, prefix stripped. May be `"0"` on instruments that
    /// do not store one.
    pub serial: String,
    /// Firmware revision field, verbatim.
    pub firmware: String,
}

impl Identity {
    /// Parse `manufacturer,model,serial,firmware`.
    pub fn parse(reply: &str) -> Result<Identity, ConversionError> {
        let fields: Vec<&str> = reply.trim().splitn(4, ',').map(str::trim).collect();
        let [manufacturer, model, serial, firmware] = fields[..] else {
            return Err(ConversionError::parse(reply, "an identification string"));
        };
        if manufacturer.is_empty() || model.is_empty() {
            return Err(ConversionError::parse(reply, "an identification string"));
        }

        Ok(Identity {
            manufacturer: normalise_manufacturer(manufacturer),
            model: model.to_string(),
            serial: strip_serial_prefix(serial).to_string(),
            firmware: firmware.to_string(),
        })
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} (serial {}, firmware {})",
            self.manufacturer, self.model, self.serial, self.firmware
        )
    }
}

fn normalise_manufacturer(raw: &str) -> String {
    MANUFACTURER_NAMES
        .iter()
        .find(|(reported, _)| reported.eq_ignore_ascii_case(raw))
        .map(|(_, short)| short.to_string())
        .unwrap_or_else(|| raw.to_string())
}

fn strip_serial_prefix(raw: &str) -> &str {
    match raw.split_once(':') {
        Some((prefix, rest)) if prefix.trim().eq_ignore_ascii_case("S/N") => rest.trim(),
        _ => raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hp_identity() {
        let id = Identity::parse("HEWLETT-PACKARD,33120A,0,7.0-5.0-1.0\n").unwrap();
        assert_eq!(id.manufacturer, "HP");
        assert_eq!(id.model, "33120A");
        assert_eq!(id.serial, "0");
        assert_eq!(id.firmware, "7.0-5.0-1.0");
    }

    #[test]
    fn test_serial_prefix_stripped() {
        let id =
            Identity::parse("Magna-Power Electronics Inc., SL60-25, S/N:1164-2572, F/W:8.7")
                .unwrap();
        assert_eq!(id.manufacturer, "Magna-Power");
        assert_eq!(id.serial, "1164-2572");
        assert_eq!(id.firmware, "F/W:8.7");
    }

    #[test]
    fn test_unknown_manufacturer_kept() {
        let id = Identity::parse("ACME,X1,42,1.0").unwrap();
        assert_eq!(id.manufacturer, "ACME");
    }

    #[test]
    fn test_malformed_identity() {
        assert!(Identity::parse("ACME,X1").is_err());
        assert!(Identity::parse(",,,").is_err());
    }
}
