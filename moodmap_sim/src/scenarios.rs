//! Chaos engineering scenarios for DST.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// DST-001: Steady stream, wandering device, clustering and nearby checks
    HappyPath,

    /// DST-002: Repeated disconnects and outages while the collection changes
    ReconnectStorm,

    /// DST-003: A day without updates from some writers
    StaleEviction,

    /// DST-004: Malformed documents and location samples mixed into valid ones
    PoisonPill,

    /// DST-005: Unbounded collection against a small index cap
    CapacityFlood,

    /// DST-006: Continuous write burst against the render debounce
    BurstDebounce,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::HappyPath,
            ScenarioId::ReconnectStorm,
            ScenarioId::StaleEviction,
            ScenarioId::PoisonPill,
            ScenarioId::CapacityFlood,
            ScenarioId::BurstDebounce,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::HappyPath => "happy_path",
            ScenarioId::ReconnectStorm => "reconnect_storm",
            ScenarioId::StaleEviction => "stale_eviction",
            ScenarioId::PoisonPill => "poison_pill",
            ScenarioId::CapacityFlood => "capacity_flood",
            ScenarioId::BurstDebounce => "burst_debounce",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::HappyPath => "Live stream and random-walk device; index mirrors the collection",
            ScenarioId::ReconnectStorm => "Disconnects, failed resubscribes and edits while offline; state converges",
            ScenarioId::StaleEviction => "25 hours of virtual time; silent writers age out, self survives",
            ScenarioId::PoisonPill => "Malformed payloads and samples are rejected without collateral damage",
            ScenarioId::CapacityFlood => "Writes past max_records evict the oldest remote records",
            ScenarioId::BurstDebounce => "Render rate stays bounded during a burst and catches up after",
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "happy_path" | "happypath" | "dst-001" => Ok(ScenarioId::HappyPath),
            "reconnect_storm" | "reconnectstorm" | "dst-002" => Ok(ScenarioId::ReconnectStorm),
            "stale_eviction" | "staleeviction" | "dst-003" => Ok(ScenarioId::StaleEviction),
            "poison_pill" | "poisonpill" | "dst-004" => Ok(ScenarioId::PoisonPill),
            "capacity_flood" | "capacityflood" | "dst-005" => Ok(ScenarioId::CapacityFlood),
            "burst_debounce" | "burstdebounce" | "dst-006" => Ok(ScenarioId::BurstDebounce),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip_through_from_str() {
        for id in ScenarioId::all() {
            assert_eq!(id.name().parse::<ScenarioId>().unwrap(), id);
            assert!(!id.description().is_empty());
        }
        assert_eq!("DST-004".parse::<ScenarioId>().unwrap(), ScenarioId::PoisonPill);
        assert!("split_brain".parse::<ScenarioId>().is_err());
    }
}
