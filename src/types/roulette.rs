use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Highest number on a single-zero wheel.
pub const MAX_NUMBER: u8 = 36;

/// Numbers printed on red pockets.
pub const RED_NUMBERS: [u8; 18] = [
    1, 3, 5, 7, 9, 12, 14, 16, 18, 19, 21, 23, 25, 27, 30, 32, 34, 36,
];

/// Pocket color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpinColor {
    Red,
    Black,
    Green,
}

impl SpinColor {
    /// Color of the pocket holding `number`.
    pub fn for_number(number: u8) -> Self {
        if number == 0 {
            SpinColor::Green
        } else if RED_NUMBERS.contains(&number) {
            SpinColor::Red
        } else {
            SpinColor::Black
        }
    }

    /// Parse a loosely formatted color label ("red", "R", "Black", "verde"...).
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "red" | "r" | "rosso" | "rojo" => Some(SpinColor::Red),
            "black" | "b" | "nero" | "negro" => Some(SpinColor::Black),
            "green" | "g" | "zero" | "verde" => Some(SpinColor::Green),
            _ => None,
        }
    }
}

impl fmt::Display for SpinColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpinColor::Red => write!(f, "red"),
            SpinColor::Black => write!(f, "black"),
            SpinColor::Green => write!(f, "green"),
        }
    }
}

/// One reported outcome of a roulette table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpinResult {
    pub number: u8,
    pub color: SpinColor,
    /// Server time of the spin. The cache stamps bare numbers with the time it
    /// first observed them; freshly normalized bare numbers have none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Id of the roulette this result belongs to.
    pub source_entity_id: String,
}

impl SpinResult {
    /// Build a result, deriving the color from the number.
    ///
    /// Returns `None` for numbers outside the wheel.
    pub fn new(
        number: u8,
        timestamp: Option<DateTime<Utc>>,
        source_entity_id: impl Into<String>,
    ) -> Option<Self> {
        if number > MAX_NUMBER {
            return None;
        }
        Some(Self {
            number,
            color: SpinColor::for_number(number),
            timestamp,
            source_entity_id: source_entity_id.into(),
        })
    }

    /// Override the derived color with a color reported by the server.
    pub fn with_color(mut self, color: SpinColor) -> Self {
        self.color = color;
        self
    }

    /// Identity used for deduplication: number plus timestamp.
    pub fn same_spin(&self, other: &SpinResult) -> bool {
        self.number == other.number && self.timestamp == other.timestamp
    }
}

/// One monitored roulette table with its bounded history (newest first).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouletteEntity {
    pub id: String,
    pub display_name: String,
    pub is_active: bool,
    pub history: Vec<SpinResult>,
}

impl RouletteEntity {
    /// Normalized form of the display name.
    pub fn name_key(&self) -> String {
        normalize_name(&self.display_name)
    }
}

/// Lowercase, trimmed, whitespace-collapsed form of a roulette name.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .map(|part| part.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Restricts a subscription to a set of roulettes, matched by id or name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityFilter {
    keys: HashSet<String>,
}

impl EntityFilter {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            keys: keys
                .into_iter()
                .map(|k| normalize_name(k.as_ref()))
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    pub fn matches(&self, entity: &RouletteEntity) -> bool {
        self.matches_identity(&entity.id, &entity.display_name)
    }

    /// Match against an id and display name without a full entity.
    pub fn matches_identity(&self, id: &str, display_name: &str) -> bool {
        self.keys.contains(&normalize_name(id)) || self.keys.contains(&normalize_name(display_name))
    }

    /// Keep only the entities this filter accepts.
    pub fn apply(&self, entities: &[RouletteEntity]) -> Vec<RouletteEntity> {
        entities.iter().filter(|e| self.matches(e)).cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_for_number() {
        assert_eq!(SpinColor::for_number(0), SpinColor::Green);
        assert_eq!(SpinColor::for_number(1), SpinColor::Red);
        assert_eq!(SpinColor::for_number(2), SpinColor::Black);
        assert_eq!(SpinColor::for_number(19), SpinColor::Red);
        assert_eq!(SpinColor::for_number(20), SpinColor::Black);
        assert_eq!(SpinColor::for_number(36), SpinColor::Red);
    }

    #[test]
    fn test_color_parse() {
        assert_eq!(SpinColor::parse(" RED "), Some(SpinColor::Red));
        assert_eq!(SpinColor::parse("b"), Some(SpinColor::Black));
        assert_eq!(SpinColor::parse("green"), Some(SpinColor::Green));
        assert_eq!(SpinColor::parse("purple"), None);
    }

    #[test]
    fn test_spin_result_rejects_out_of_range() {
        assert!(SpinResult::new(36, None, "a").is_some());
        assert!(SpinResult::new(37, None, "a").is_none());
    }

    #[test]
    fn test_same_spin_uses_number_and_timestamp() {
        let t = Utc::now();
        let a = SpinResult::new(7, Some(t), "a").unwrap();
        let b = SpinResult::new(7, Some(t), "b").unwrap().with_color(SpinColor::Black);
        let c = SpinResult::new(7, None, "a").unwrap();

        assert!(a.same_spin(&b));
        assert!(!a.same_spin(&c));
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("  Lightning   Roulette "), "lightning roulette");
        assert_eq!(normalize_name(""), "");
    }

    #[test]
    fn test_filter_matches_by_id_or_name() {
        let entity = RouletteEntity {
            id: "r-1".to_string(),
            display_name: "Immersive Roulette".to_string(),
            is_active: true,
            history: vec![],
        };

        assert!(EntityFilter::new(["r-1"]).matches(&entity));
        assert!(EntityFilter::new(["IMMERSIVE roulette"]).matches(&entity));
        assert!(!EntityFilter::new(["r-2"]).matches(&entity));
        assert!(EntityFilter::new(Vec::<String>::new()).is_empty());
    }

    #[test]
    fn test_spin_result_serialization() {
        let spin = SpinResult::new(0, None, "r-1").unwrap();
        let json = serde_json::to_string(&spin).unwrap();
        assert!(json.contains("\"color\":\"green\""));
        assert!(json.contains("\"sourceEntityId\":\"r-1\""));
        assert!(!json.contains("timestamp"));
    }
}
