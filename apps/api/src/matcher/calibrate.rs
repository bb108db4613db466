//! Calibrator — presentation-only mapping of raw final scores within one
//! run. Never changes rank order; every strategy is monotone.

use std::str::FromStr;

use serde::Serialize;

use crate::matcher::scoring::RankedCandidate;

/// Display range for `relative_minmax`.
pub const MINMAX_RANGE: [f64; 2] = [0.40, 0.85];
/// Midpoint used when every score in the run is (near) identical.
const MINMAX_DEGENERATE: f64 = 0.55;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Calibration {
    RelativeMinmax,
    AffineFloor,
    Sigmoid,
    None,
}

impl Calibration {
    pub fn as_str(&self) -> &'static str {
        match self {
            Calibration::RelativeMinmax => "relative_minmax",
            Calibration::AffineFloor => "affine_floor",
            Calibration::Sigmoid => "sigmoid",
            Calibration::None => "none",
        }
    }

    /// Display range reported in run metadata, where the strategy has one.
    pub fn range(&self) -> Option<[f64; 2]> {
        match self {
            Calibration::RelativeMinmax => Some(MINMAX_RANGE),
            _ => None,
        }
    }
}

impl FromStr for Calibration {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "relative_minmax" => Ok(Calibration::RelativeMinmax),
            "affine_floor" => Ok(Calibration::AffineFloor),
            "sigmoid" => Ok(Calibration::Sigmoid),
            "" | "none" | "null" => Ok(Calibration::None),
            other => Err(format!(
                "unknown calibration '{other}' (expected relative_minmax, affine_floor, sigmoid, or none)"
            )),
        }
    }
}

/// Maps `final_raw` to `final_cal` for every candidate of one run.
pub fn apply_calibration(ranked: &mut [RankedCandidate], strategy: Calibration) {
    match strategy {
        Calibration::None => {
            for candidate in ranked.iter_mut() {
                candidate.scores.final_cal = candidate.scores.final_raw;
            }
        }
        Calibration::AffineFloor => {
            for candidate in ranked.iter_mut() {
                let v = candidate.scores.final_raw.clamp(0.0, 1.0);
                candidate.scores.final_cal = 0.6 + 0.4 * v;
            }
        }
        Calibration::Sigmoid => {
            for candidate in ranked.iter_mut() {
                let v = candidate.scores.final_raw;
                candidate.scores.final_cal = 0.65 + 0.30 * sigmoid(6.0 * (v - 0.5));
            }
        }
        Calibration::RelativeMinmax => {
            let finals: Vec<f64> = ranked.iter().map(|c| c.scores.final_raw).collect();
            let min = finals.iter().copied().fold(f64::INFINITY, f64::min);
            let max = finals.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let spread = max - min;
            for candidate in ranked.iter_mut() {
                candidate.scores.final_cal = if !spread.is_finite() || spread.abs() < 1e-9 {
                    MINMAX_DEGENERATE
                } else {
                    let [lo, hi] = MINMAX_RANGE;
                    lo + (candidate.scores.final_raw - min) / spread * (hi - lo)
                };
            }
        }
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::scoring::{Scores, SubScores};
    use crate::vector_store::Document;
    use serde_json::Map;

    fn candidate(final_raw: f64, order: usize) -> RankedCandidate {
        RankedCandidate {
            doc: Document {
                page_content: String::new(),
                metadata: Map::new(),
            },
            raw_distance: 0.5,
            order,
            rank: order + 1,
            subs: SubScores {
                sector: 0.5,
                stage: 0.5,
                funding: 0.5,
            },
            scores: Scores {
                rule: 0.5,
                content: 0.5,
                goal: 0.5,
                final_raw,
                final_cal: final_raw,
            },
            reasons: vec![],
            improvements: vec![],
        }
    }

    #[test]
    fn test_parse_strategy_names() {
        assert_eq!(
            "relative_minmax".parse::<Calibration>().unwrap(),
            Calibration::RelativeMinmax
        );
        assert_eq!("SIGMOID".parse::<Calibration>().unwrap(), Calibration::Sigmoid);
        assert_eq!("".parse::<Calibration>().unwrap(), Calibration::None);
        assert_eq!("null".parse::<Calibration>().unwrap(), Calibration::None);
        assert!("bogus".parse::<Calibration>().is_err());
    }

    #[test]
    fn test_minmax_maps_to_display_range() {
        let mut ranked = vec![candidate(0.9, 0), candidate(0.5, 1), candidate(0.1, 2)];
        apply_calibration(&mut ranked, Calibration::RelativeMinmax);
        assert!((ranked[0].scores.final_cal - 0.85).abs() < 1e-9);
        assert!((ranked[2].scores.final_cal - 0.40).abs() < 1e-9);
        assert!(ranked[1].scores.final_cal > 0.40 && ranked[1].scores.final_cal < 0.85);
    }

    #[test]
    fn test_minmax_degenerate_tie_maps_to_midpoint() {
        // Scenario: three candidates all at 0.42 land on 0.55.
        let mut ranked = vec![candidate(0.42, 0), candidate(0.42, 1), candidate(0.42, 2)];
        apply_calibration(&mut ranked, Calibration::RelativeMinmax);
        for c in &ranked {
            assert!((c.scores.final_cal - 0.55).abs() < 1e-9);
        }
    }

    #[test]
    fn test_affine_floor_formula() {
        let mut ranked = vec![candidate(0.0, 0), candidate(1.0, 1), candidate(1.5, 2)];
        apply_calibration(&mut ranked, Calibration::AffineFloor);
        assert!((ranked[0].scores.final_cal - 0.6).abs() < 1e-9);
        assert!((ranked[1].scores.final_cal - 1.0).abs() < 1e-9);
        // Out-of-range raw scores are clamped before the affine map
        assert!((ranked[2].scores.final_cal - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_sigmoid_is_centered_and_bounded() {
        let mut ranked = vec![candidate(0.5, 0), candidate(0.0, 1), candidate(1.0, 2)];
        apply_calibration(&mut ranked, Calibration::Sigmoid);
        assert!((ranked[0].scores.final_cal - 0.80).abs() < 1e-9);
        assert!(ranked[1].scores.final_cal > 0.65 && ranked[1].scores.final_cal < 0.80);
        assert!(ranked[2].scores.final_cal > 0.80 && ranked[2].scores.final_cal < 0.95);
    }

    #[test]
    fn test_none_is_passthrough() {
        let mut ranked = vec![candidate(0.37, 0)];
        apply_calibration(&mut ranked, Calibration::None);
        assert_eq!(ranked[0].scores.final_cal, 0.37);
    }

    #[test]
    fn test_every_strategy_preserves_rank_order() {
        for strategy in [
            Calibration::RelativeMinmax,
            Calibration::AffineFloor,
            Calibration::Sigmoid,
            Calibration::None,
        ] {
            let mut ranked = vec![
                candidate(0.91, 0),
                candidate(0.72, 1),
                candidate(0.72, 2),
                candidate(0.13, 3),
            ];
            apply_calibration(&mut ranked, strategy);
            for pair in ranked.windows(2) {
                assert!(
                    pair[0].scores.final_cal >= pair[1].scores.final_cal - 1e-12,
                    "{strategy:?} broke ordering"
                );
            }
        }
    }
}
