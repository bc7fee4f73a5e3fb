use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ResultsError;

/// Credit weight carried by every course.
pub const COURSE_CREDITS: f64 = 3.0;

/// Courses assumed per semester when a semester has no data at all.
pub const COURSES_PER_SEMESTER: u8 = 5;

/// Grade point of B-. Originals strictly below this may be improved.
pub const IMPROVEMENT_THRESHOLD: f64 = 2.75;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GradeLetter {
    #[serde(rename = "A+")]
    APlus,
    #[serde(rename = "A")]
    A,
    #[serde(rename = "A-")]
    AMinus,
    #[serde(rename = "B+")]
    BPlus,
    #[serde(rename = "B")]
    B,
    #[serde(rename = "B-")]
    BMinus,
    #[serde(rename = "C+")]
    CPlus,
    #[serde(rename = "C")]
    C,
    #[serde(rename = "D")]
    D,
    #[serde(rename = "F")]
    F,
}

impl GradeLetter {
    pub const ALL: [GradeLetter; 10] = [
        GradeLetter::APlus,
        GradeLetter::A,
        GradeLetter::AMinus,
        GradeLetter::BPlus,
        GradeLetter::B,
        GradeLetter::BMinus,
        GradeLetter::CPlus,
        GradeLetter::C,
        GradeLetter::D,
        GradeLetter::F,
    ];

    /// Canonical scale: A+ 4.00 down to D 2.00 in quarter steps, F 0.00.
    pub fn point(self) -> f64 {
        match self {
            GradeLetter::APlus => 4.00,
            GradeLetter::A => 3.75,
            GradeLetter::AMinus => 3.50,
            GradeLetter::BPlus => 3.25,
            GradeLetter::B => 3.00,
            GradeLetter::BMinus => 2.75,
            GradeLetter::CPlus => 2.50,
            GradeLetter::C => 2.25,
            GradeLetter::D => 2.00,
            GradeLetter::F => 0.00,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GradeLetter::APlus => "A+",
            GradeLetter::A => "A",
            GradeLetter::AMinus => "A-",
            GradeLetter::BPlus => "B+",
            GradeLetter::B => "B",
            GradeLetter::BMinus => "B-",
            GradeLetter::CPlus => "C+",
            GradeLetter::C => "C",
            GradeLetter::D => "D",
            GradeLetter::F => "F",
        }
    }

    /// Reads a grade cell as stored in a result table. Blank cells and the
    /// usual placeholders come back as `Ok(None)`.
    pub fn parse_cell(raw: &str) -> Result<Option<GradeLetter>, ResultsError> {
        let trimmed = raw.trim();
        if is_placeholder(trimmed) {
            return Ok(None);
        }
        trimmed.parse().map(Some)
    }
}

impl fmt::Display for GradeLetter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GradeLetter {
    type Err = ResultsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase();
        GradeLetter::ALL
            .into_iter()
            .find(|letter| letter.as_str() == normalized)
            .ok_or_else(|| ResultsError::InvalidGrade(s.to_string()))
    }
}

fn is_placeholder(value: &str) -> bool {
    value.is_empty()
        || value == "-"
        || value.eq_ignore_ascii_case("n/a")
        || value.eq_ignore_ascii_case("na")
        || value.eq_ignore_ascii_case("null")
}

/// Grade point of arbitrary grade text. Unknown or empty text is 0.00.
pub fn grade_point(letter: &str) -> f64 {
    letter
        .parse::<GradeLetter>()
        .map(GradeLetter::point)
        .unwrap_or(0.0)
}

/// Point of an optional letter, treating a missing grade as 0.00.
pub fn point_of(letter: Option<GradeLetter>) -> f64 {
    letter.map(GradeLetter::point).unwrap_or(0.0)
}

pub fn round3(value: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    (value * 1000.0).round() / 1000.0
}

/// Weighted average rounded to three places; zero weight yields 0.000.
pub fn weighted_average(points: f64, credits: f64) -> f64 {
    if credits <= 0.0 {
        0.0
    } else {
        round3(points / credits)
    }
}

pub fn is_improvement_eligible(original: Option<GradeLetter>) -> bool {
    match original {
        None => true,
        Some(letter) => letter == GradeLetter::F || letter.point() < IMPROVEMENT_THRESHOLD,
    }
}

/// Applies one improvement sitting to the currently effective grade.
/// Returns the new effective grade and whether the improvement took.
pub fn apply_improvement(
    original: Option<GradeLetter>,
    current: Option<GradeLetter>,
    improvement: GradeLetter,
) -> (Option<GradeLetter>, bool) {
    let accept = match (original, current) {
        (None, None) => true,
        (None, Some(applied)) => improvement.point() > applied.point(),
        (Some(_), _) if !is_improvement_eligible(original) => false,
        (Some(_), applied) => improvement.point() > point_of(applied),
    };
    if accept {
        (Some(improvement), true)
    } else {
        (current, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_letter_maps_into_range() {
        for letter in GradeLetter::ALL {
            let point = grade_point(letter.as_str());
            assert!((0.0..=4.0).contains(&point), "{letter} -> {point}");
        }
    }

    #[test]
    fn unknown_and_empty_letters_are_zero() {
        assert_eq!(grade_point(""), 0.0);
        assert_eq!(grade_point("E"), 0.0);
        assert_eq!(grade_point("N/A"), 0.0);
    }

    #[test]
    fn parsing_is_case_and_space_insensitive() {
        assert_eq!(" a- ".parse::<GradeLetter>().unwrap(), GradeLetter::AMinus);
        assert_eq!("b+".parse::<GradeLetter>().unwrap(), GradeLetter::BPlus);
        assert!("Z".parse::<GradeLetter>().is_err());
    }

    #[test]
    fn placeholder_cells_are_absent() {
        assert_eq!(GradeLetter::parse_cell("N/A").unwrap(), None);
        assert_eq!(GradeLetter::parse_cell("  ").unwrap(), None);
        assert_eq!(GradeLetter::parse_cell("A+").unwrap(), Some(GradeLetter::APlus));
        assert!(GradeLetter::parse_cell("X").is_err());
    }

    #[test]
    fn rounding_is_idempotent() {
        let once = round3(3.14159);
        assert_eq!(once, 3.142);
        assert_eq!(round3(once), once);
        assert_eq!(round3(f64::NAN), 0.0);
        assert_eq!(weighted_average(10.0, 0.0), 0.0);
    }

    #[test]
    fn f_is_always_eligible_and_b_minus_is_not() {
        assert!(is_improvement_eligible(Some(GradeLetter::F)));
        assert!(is_improvement_eligible(Some(GradeLetter::CPlus)));
        assert!(is_improvement_eligible(None));
        assert!(!is_improvement_eligible(Some(GradeLetter::BMinus)));
        assert!(!is_improvement_eligible(Some(GradeLetter::A)));
    }

    #[test]
    fn improvement_replaces_failed_grade() {
        let (effective, applied) =
            apply_improvement(Some(GradeLetter::F), Some(GradeLetter::F), GradeLetter::BMinus);
        assert_eq!(effective, Some(GradeLetter::BMinus));
        assert!(applied);
    }

    #[test]
    fn improvement_never_lowers_a_grade() {
        for original in GradeLetter::ALL {
            for improvement in GradeLetter::ALL {
                let (effective, _) =
                    apply_improvement(Some(original), Some(original), improvement);
                assert!(point_of(effective) >= original.point());
            }
        }
    }

    #[test]
    fn improvement_fills_missing_regular_grade() {
        let (effective, applied) = apply_improvement(None, None, GradeLetter::D);
        assert_eq!(effective, Some(GradeLetter::D));
        assert!(applied);
    }
}
