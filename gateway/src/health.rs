//! Health state model

/// Aggregate health of the gateway or a single camera device.
///
/// Ordering follows the numeric telemetry encoding: `Critical < Warning <
/// Good`, so `state < HealthState::Good` selects any degraded state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HealthState {
    Critical = 0,
    Warning = 1,
    Good = 2,
}

impl HealthState {
    /// Numeric value sent in heartbeat telemetry.
    pub fn value(&self) -> u8 {
        *self as u8
    }

    /// Decode the numeric encoding; anything out of range degrades to
    /// Critical.
    pub fn from_value(value: u8) -> Self {
        match value {
            2 => HealthState::Good,
            1 => HealthState::Warning,
            _ => HealthState::Critical,
        }
    }

    /// Lowercase name used on the health endpoint.
    pub fn name(&self) -> &'static str {
        match self {
            HealthState::Critical => "critical",
            HealthState::Warning => "warning",
            HealthState::Good => "good",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_matches_telemetry_encoding() {
        assert!(HealthState::Critical < HealthState::Warning);
        assert!(HealthState::Warning < HealthState::Good);
        assert_eq!(HealthState::Critical.value(), 0);
        assert_eq!(HealthState::Warning.value(), 1);
        assert_eq!(HealthState::Good.value(), 2);
    }

    #[test]
    fn test_degraded_comparison() {
        assert!(HealthState::Warning < HealthState::Good);
        assert!(!(HealthState::Good < HealthState::Good));
    }

    #[test]
    fn test_value_round_trip() {
        for state in [
            HealthState::Critical,
            HealthState::Warning,
            HealthState::Good,
        ] {
            assert_eq!(HealthState::from_value(state.value()), state);
        }
        assert_eq!(HealthState::from_value(42), HealthState::Critical);
    }
}
