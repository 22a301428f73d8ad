use hvmon_proto::Category;
use serde::{Deserialize, Serialize};

/// Which categories may raise an alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmMode {
    PersonOnly,
    VehicleOnly,
    #[default]
    PersonAndVehicle,
}

impl AlarmMode {
    pub fn accepts(self, category: &Category) -> bool {
        match self {
            AlarmMode::PersonOnly => matches!(category, Category::Person),
            AlarmMode::VehicleOnly => matches!(category, Category::Vehicle),
            AlarmMode::PersonAndVehicle => category.is_target(),
        }
    }
}

impl std::fmt::Display for AlarmMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            AlarmMode::PersonOnly => "person only",
            AlarmMode::VehicleOnly => "vehicle only",
            AlarmMode::PersonAndVehicle => "person and vehicle",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acceptance_table() {
        let other = Category::Other("dog".into());
        assert!(AlarmMode::PersonOnly.accepts(&Category::Person));
        assert!(!AlarmMode::PersonOnly.accepts(&Category::Vehicle));
        assert!(AlarmMode::VehicleOnly.accepts(&Category::Vehicle));
        assert!(!AlarmMode::VehicleOnly.accepts(&Category::Person));
        assert!(AlarmMode::PersonAndVehicle.accepts(&Category::Person));
        assert!(AlarmMode::PersonAndVehicle.accepts(&Category::Vehicle));
        for mode in [AlarmMode::PersonOnly, AlarmMode::VehicleOnly, AlarmMode::PersonAndVehicle] {
            assert!(!mode.accepts(&other));
        }
    }
}
