//! Attention keys the emulator accepts.

use std::fmt;
use tn3270_common::{EmulatorError, EmulatorResult};

/// An attention (AID) key: Enter, Tab, or one of the 24 program-function
/// keys. Anything else is rejected before a command is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AidKey {
    Enter,
    Tab,
    /// PF1 through PF24.
    Pf(u8),
}

impl AidKey {
    /// Parses a key name as it appears in workflow input: `Enter`, `Tab`,
    /// or `PF1`..`PF24`.
    pub fn parse(name: &str) -> EmulatorResult<Self> {
        match name {
            "Enter" => Ok(Self::Enter),
            "Tab" => Ok(Self::Tab),
            _ => {
                if let Some(num) = name.strip_prefix("PF") {
                    if let Ok(n) = num.parse::<u8>() {
                        if (1..=24).contains(&n) {
                            return Ok(Self::Pf(n));
                        }
                    }
                }
                Err(EmulatorError::invalid_key(name))
            }
        }
    }
}

impl fmt::Display for AidKey {
    /// Renders the key as the scripting dialect expects it on the wire.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AidKey::Enter => write!(f, "Enter"),
            AidKey::Tab => write!(f, "Tab"),
            AidKey::Pf(n) => write!(f, "PF({n})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_named_keys() {
        assert_eq!(AidKey::parse("Enter").unwrap(), AidKey::Enter);
        assert_eq!(AidKey::parse("Tab").unwrap(), AidKey::Tab);
    }

    #[test]
    fn test_parse_all_pf_keys() {
        for n in 1..=24u8 {
            let key = AidKey::parse(&format!("PF{n}")).unwrap();
            assert_eq!(key, AidKey::Pf(n));
        }
    }

    #[test]
    fn test_rejects_out_of_range_and_unknown() {
        for bad in ["PF0", "PF25", "F25", "PA1", "Clear", "enter", ""] {
            assert!(AidKey::parse(bad).is_err(), "{bad} should be invalid");
        }
    }

    #[test]
    fn test_wire_rendering() {
        assert_eq!(AidKey::Enter.to_string(), "Enter");
        assert_eq!(AidKey::Tab.to_string(), "Tab");
        assert_eq!(AidKey::Pf(7).to_string(), "PF(7)");
        assert_eq!(AidKey::Pf(24).to_string(), "PF(24)");
    }
}
