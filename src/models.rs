use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

use crate::error::ResultsError;
use crate::grades::GradeLetter;

pub const STUDENT_ID_LEN: usize = 7;

/// Roll number: seven digits, the first two being the admission session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StudentId(String);

impl StudentId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn session(&self) -> &str {
        &self.0[..2]
    }
}

impl FromStr for StudentId {
    type Err = ResultsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.len() == STUDENT_ID_LEN && trimmed.bytes().all(|b| b.is_ascii_digit()) {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(ResultsError::InvalidStudentId(s.to_string()))
        }
    }
}

impl fmt::Display for StudentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for StudentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Academic year and semester, ordered year first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SemesterKey {
    pub year: u8,
    pub semester: u8,
}

impl SemesterKey {
    pub fn new(year: u8, semester: u8) -> Result<Self, ResultsError> {
        if (1..=9).contains(&year) && (1..=2).contains(&semester) {
            Ok(Self { year, semester })
        } else {
            Err(ResultsError::InvalidSemesterKey(format!("{year}-{semester}")))
        }
    }

    pub fn display_name(&self) -> String {
        format!("{} Year {} Semester", ordinal(self.year), ordinal(self.semester))
    }
}

fn ordinal(n: u8) -> String {
    let suffix = match (n % 10, n % 100) {
        (1, 11) | (2, 12) | (3, 13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    };
    format!("{n}{suffix}")
}

impl FromStr for SemesterKey {
    type Err = ResultsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ResultsError::InvalidSemesterKey(s.to_string());
        let (year, semester) = s.trim().split_once('-').ok_or_else(invalid)?;
        let year = year.parse::<u8>().map_err(|_| invalid())?;
        let semester = semester.parse::<u8>().map_err(|_| invalid())?;
        SemesterKey::new(year, semester).map_err(|_| invalid())
    }
}

impl fmt::Display for SemesterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.year, self.semester)
    }
}

impl Serialize for SemesterKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Three-digit course code: year digit, semester digit, course digit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CourseCode {
    pub semester: SemesterKey,
    pub number: u8,
}

impl CourseCode {
    pub fn new(semester: SemesterKey, number: u8) -> Self {
        Self { semester, number }
    }
}

impl FromStr for CourseCode {
    type Err = ResultsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ResultsError::InvalidCourseCode(s.to_string());
        let trimmed = s.trim();
        let digits: Vec<u8> = trimmed
            .bytes()
            .map(|b| if b.is_ascii_digit() { Some(b - b'0') } else { None })
            .collect::<Option<_>>()
            .ok_or_else(invalid)?;
        if digits.len() != 3 {
            return Err(invalid());
        }
        let semester = SemesterKey::new(digits[0], digits[1]).map_err(|_| invalid())?;
        Ok(Self {
            semester,
            number: digits[2],
        })
    }
}

impl fmt::Display for CourseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.semester.year, self.semester.semester, self.number)
    }
}

impl Serialize for CourseCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ResultType {
    Regular,
    Improvement,
}

impl ResultType {
    pub fn as_str(self) -> &'static str {
        match self {
            ResultType::Regular => "regular",
            ResultType::Improvement => "improvement",
        }
    }
}

impl FromStr for ResultType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "regular" => Ok(ResultType::Regular),
            "improvement" => Ok(ResultType::Improvement),
            other => anyhow::bail!("unknown result type `{other}`"),
        }
    }
}

/// One result table listed in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub name: String,
    pub semester: SemesterKey,
    pub exam_year: i32,
    pub result_type: ResultType,
}

impl TableRef {
    pub fn new(semester: SemesterKey, exam_year: i32, result_type: ResultType) -> Self {
        let name = format!(
            "y{}s{}_{}_{}",
            semester.year,
            semester.semester,
            exam_year,
            result_type.as_str()
        );
        Self {
            name,
            semester,
            exam_year,
            result_type,
        }
    }
}

/// One student's row in one result table, cells left as stored.
#[derive(Debug, Clone)]
pub struct RawRow {
    pub table: TableRef,
    pub student_id: StudentId,
    pub cells: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CourseRecord {
    pub code: CourseCode,
    pub grade: Option<GradeLetter>,
    pub original_grade: Option<GradeLetter>,
    pub grade_point: f64,
    pub improvement_applied: bool,
    pub has_improvement_opportunity: bool,
    pub projected: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SemesterRecord {
    pub key: SemesterKey,
    pub display_name: String,
    pub gpa: f64,
    pub cgpa: f64,
    pub ygpa: f64,
    pub courses: Vec<CourseRecord>,
    pub total_points: f64,
    pub total_credits: f64,
}

impl SemesterRecord {
    pub fn has_data(&self) -> bool {
        self.total_credits > 0.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentRecord {
    pub id: StudentId,
    pub name: Option<String>,
    pub semesters: BTreeMap<SemesterKey, SemesterRecord>,
    pub overall_cgpa: f64,
    pub gpa_history: Vec<f64>,
    pub cgpa_history: Vec<f64>,
    pub gpa_std_dev: Option<f64>,
    pub session: String,
    pub anomalies: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SittingSummary {
    pub table: String,
    pub exam_year: i32,
    pub result_type: ResultType,
    pub graded: usize,
    pub mean_grade_point: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CourseSummary {
    pub code: CourseCode,
    pub total_graded: usize,
    pub distribution: BTreeMap<GradeLetter, usize>,
    pub mean_grade_point: f64,
    pub sittings: Vec<SittingSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CohortEntry {
    pub rank: usize,
    pub id: StudentId,
    pub name: Option<String>,
    pub session: String,
    pub cgpa: f64,
    pub gpa_std_dev: f64,
    pub semesters_with_data: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn student_id_requires_seven_digits() {
        let id: StudentId = "1807001".parse().unwrap();
        assert_eq!(id.session(), "18");
        assert!("180700".parse::<StudentId>().is_err());
        assert!("18070011".parse::<StudentId>().is_err());
        assert!("18O7001".parse::<StudentId>().is_err());
    }

    #[test]
    fn course_code_splits_into_digits() {
        let code: CourseCode = "213".parse().unwrap();
        assert_eq!(code.semester, SemesterKey { year: 2, semester: 1 });
        assert_eq!(code.number, 3);
        assert_eq!(code.to_string(), "213");
    }

    #[test]
    fn malformed_course_codes_are_rejected() {
        for raw in ["", "12", "1234", "1a1", "131", "011"] {
            assert!(raw.parse::<CourseCode>().is_err(), "{raw} should be rejected");
        }
    }

    #[test]
    fn semester_keys_order_by_year_then_semester() {
        let a: SemesterKey = "1-2".parse().unwrap();
        let b: SemesterKey = "2-1".parse().unwrap();
        assert!(a < b);
        assert_eq!(a.display_name(), "1st Year 2nd Semester");
        assert!("3".parse::<SemesterKey>().is_err());
        assert!("1-3".parse::<SemesterKey>().is_err());
    }

    #[test]
    fn table_names_are_derived_from_their_key() {
        let table = TableRef::new(SemesterKey::new(1, 2).unwrap(), 2022, ResultType::Improvement);
        assert_eq!(table.name, "y1s2_2022_improvement");
    }
}
