use crate::state::{Direction, MoveDirection};

/// Moves smaller than this fraction of the previous close are sideways.
pub const SIDEWAYS_BAND: f64 = 0.002;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonCase {
    Sideways,
    BothCorrect,
    AiCorrect,
    UserCorrect,
    BothWrong,
}

impl ComparisonCase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sideways => "sideways",
            Self::BothCorrect => "both_correct",
            Self::AiCorrect => "ai_correct",
            Self::UserCorrect => "user_correct",
            Self::BothWrong => "both_wrong",
        }
    }
}

impl std::fmt::Display for ComparisonCase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct ComparisonResult {
    pub case: ComparisonCase,
}

/// Score an AI call and a user call against what the market did.
/// Sideways outcomes are unscoreable. Total over its inputs.
pub fn compare(ai: Direction, user: Direction, actual: MoveDirection) -> ComparisonResult {
    let actual = match actual {
        MoveDirection::Sideways => return ComparisonResult { case: ComparisonCase::Sideways },
        MoveDirection::Up => Direction::Up,
        MoveDirection::Down => Direction::Down,
    };

    let case = match (ai == actual, user == actual) {
        (true, true) => ComparisonCase::BothCorrect,
        (true, false) => ComparisonCase::AiCorrect,
        (false, true) => ComparisonCase::UserCorrect,
        (false, false) => ComparisonCase::BothWrong,
    };
    ComparisonResult { case }
}

/// Day-over-day move between two closes.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct MarketMove {
    pub prev: f64,
    pub last: f64,
    pub pct: f64,
    pub actual: MoveDirection,
}

/// Classify a close-to-close change with the ±0.2% dead-band.
/// A zero previous close reads as no change.
pub fn classify_move(prev: f64, last: f64) -> MarketMove {
    let pct = if prev != 0.0 && prev.is_finite() {
        (last - prev) / prev
    } else {
        0.0
    };
    let pct = if pct.is_finite() { pct } else { 0.0 };

    let actual = if pct.abs() < SIDEWAYS_BAND {
        MoveDirection::Sideways
    } else if pct > 0.0 {
        MoveDirection::Up
    } else {
        MoveDirection::Down
    };

    MarketMove { prev, last, pct, actual }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truth_table() {
        use ComparisonCase::*;
        use Direction::{Down, Up};

        let cases = [
            (Up, Up, MoveDirection::Up, BothCorrect),
            (Up, Down, MoveDirection::Up, AiCorrect),
            (Down, Up, MoveDirection::Up, UserCorrect),
            (Down, Down, MoveDirection::Up, BothWrong),
            (Down, Down, MoveDirection::Down, BothCorrect),
            (Down, Up, MoveDirection::Down, AiCorrect),
            (Up, Down, MoveDirection::Down, UserCorrect),
            (Up, Up, MoveDirection::Down, BothWrong),
        ];
        for (ai, user, actual, expected) in cases {
            assert_eq!(compare(ai, user, actual).case, expected, "{ai} {user} {actual}");
        }
    }

    #[test]
    fn test_sideways_ignores_predictions() {
        for ai in [Direction::Up, Direction::Down] {
            for user in [Direction::Up, Direction::Down] {
                assert_eq!(
                    compare(ai, user, MoveDirection::Sideways).case,
                    ComparisonCase::Sideways
                );
            }
        }
    }

    #[test]
    fn test_case_wire_format() {
        let json = serde_json::to_string(&compare(Direction::Up, Direction::Down, MoveDirection::Up)).unwrap();
        assert_eq!(json, r#"{"case":"ai_correct"}"#);
    }

    #[test]
    fn test_dead_band() {
        assert_eq!(classify_move(100.0, 100.19).actual, MoveDirection::Sideways);
        assert_eq!(classify_move(100.0, 99.81).actual, MoveDirection::Sideways);
        assert_eq!(classify_move(100.0, 100.3).actual, MoveDirection::Up);
        assert_eq!(classify_move(100.0, 99.7).actual, MoveDirection::Down);
    }

    #[test]
    fn test_zero_previous_close_is_sideways() {
        let m = classify_move(0.0, 50.0);
        assert_eq!(m.pct, 0.0);
        assert_eq!(m.actual, MoveDirection::Sideways);
    }

    #[test]
    fn test_offline_closes_read_as_up() {
        // Offline closes are [0.98p, p]: a ~2% rise
        let m = classify_move(98.0, 100.0);
        assert_eq!(m.actual, MoveDirection::Up);
        assert!((m.pct - 2.0 / 98.0).abs() < 1e-12);
    }
}
