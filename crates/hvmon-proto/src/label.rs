use serde::{Deserialize, Serialize};

pub const PERSON_LABELS: &[&str] = &["person"];
pub const VEHICLE_LABELS: &[&str] = &["car", "motorcycle", "bicycle", "bus", "truck", "vehicle"];

/// Semantic category a detector label belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Person,
    Vehicle,
    Other(String),
}

impl Category {
    /// Person labels match exactly; vehicle labels match by substring
    /// ("pickup truck" is a vehicle).
    pub fn classify(label: &str) -> Category {
        let norm = normalize(label);
        if PERSON_LABELS.contains(&norm.as_str()) {
            Category::Person
        } else if VEHICLE_LABELS.iter().any(|v| norm.contains(v)) {
            Category::Vehicle
        } else {
            Category::Other(norm)
        }
    }

    pub fn is_target(&self) -> bool {
        !matches!(self, Category::Other(_))
    }

    pub fn name(&self) -> &str {
        match self {
            Category::Person => "person",
            Category::Vehicle => "vehicle",
            Category::Other(l) => l.as_str(),
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

pub fn normalize(label: &str) -> String {
    label.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_normalizes_labels() {
        assert_eq!(Category::classify("  Person "), Category::Person);
        assert_eq!(Category::classify("TRUCK"), Category::Vehicle);
        assert_eq!(Category::classify("pickup truck"), Category::Vehicle);
        assert_eq!(Category::classify("dog"), Category::Other("dog".into()));
    }

    #[test]
    fn person_requires_exact_match() {
        assert_eq!(Category::classify("personal item"), Category::Other("personal item".into()));
    }
}
