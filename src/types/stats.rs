use super::{RouletteEntity, SpinColor, SpinResult, MAX_NUMBER};
use serde::{Deserialize, Serialize};

/// How many numbers to report as hot or cold.
const HOT_COLD_COUNT: usize = 5;

/// Aggregate statistics over a spin history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpinStats {
    pub total: usize,
    pub red: usize,
    pub black: usize,
    pub zero: usize,
    pub even: usize,
    pub odd: usize,
    /// Numbers 1-18.
    pub low: usize,
    /// Numbers 19-36.
    pub high: usize,
    /// Most frequent numbers, most frequent first.
    pub hot_numbers: Vec<u8>,
    /// Least frequent numbers (including never seen), least frequent first.
    pub cold_numbers: Vec<u8>,
    /// Occurrence count per number, indexed by number.
    pub frequencies: Vec<usize>,
}

impl SpinStats {
    pub fn from_history(history: &[SpinResult]) -> Self {
        let mut stats = SpinStats {
            total: history.len(),
            frequencies: vec![0; MAX_NUMBER as usize + 1],
            ..Default::default()
        };

        for spin in history {
            stats.frequencies[spin.number as usize] += 1;
            match spin.color {
                SpinColor::Red => stats.red += 1,
                SpinColor::Black => stats.black += 1,
                SpinColor::Green => {}
            }
            if spin.number == 0 {
                stats.zero += 1;
                continue;
            }
            if spin.number % 2 == 0 {
                stats.even += 1;
            } else {
                stats.odd += 1;
            }
            if spin.number <= 18 {
                stats.low += 1;
            } else {
                stats.high += 1;
            }
        }

        // Ties break toward the lower number so the output is stable.
        let mut ranked: Vec<(u8, usize)> = stats
            .frequencies
            .iter()
            .enumerate()
            .map(|(n, count)| (n as u8, *count))
            .collect();

        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        stats.hot_numbers = ranked
            .iter()
            .filter(|(_, count)| *count > 0)
            .take(HOT_COLD_COUNT)
            .map(|(n, _)| *n)
            .collect();

        ranked.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)));
        stats.cold_numbers = ranked.iter().take(HOT_COLD_COUNT).map(|(n, _)| *n).collect();

        stats
    }
}

/// Deep view of one roulette, fetched on demand.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailedRoulette {
    pub entity: RouletteEntity,
    pub stats: SpinStats,
    /// Untouched server payload for fields the cache does not model.
    pub raw: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history(numbers: &[u8]) -> Vec<SpinResult> {
        numbers
            .iter()
            .map(|n| SpinResult::new(*n, None, "r").unwrap())
            .collect()
    }

    #[test]
    fn test_stats_empty_history() {
        let stats = SpinStats::from_history(&[]);
        assert_eq!(stats.total, 0);
        assert!(stats.hot_numbers.is_empty());
        assert_eq!(stats.cold_numbers, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_stats_counts() {
        let stats = SpinStats::from_history(&history(&[0, 1, 2, 19, 36, 36]));

        assert_eq!(stats.total, 6);
        assert_eq!(stats.zero, 1);
        assert_eq!(stats.red, 4); // 1, 19, 36, 36
        assert_eq!(stats.black, 1); // 2
        assert_eq!(stats.even, 3); // 2, 36, 36
        assert_eq!(stats.odd, 2); // 1, 19
        assert_eq!(stats.low, 2);
        assert_eq!(stats.high, 3);
        assert_eq!(stats.frequencies[36], 2);
    }

    #[test]
    fn test_stats_hot_and_cold() {
        let stats = SpinStats::from_history(&history(&[7, 7, 7, 3, 3, 12]));

        assert_eq!(stats.hot_numbers, vec![7, 3, 12]);
        assert!(!stats.cold_numbers.contains(&7));
        assert_eq!(stats.cold_numbers[0], 0);
    }
}
