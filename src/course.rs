use std::collections::BTreeMap;

use serde::Serialize;
use tracing::warn;

use crate::error::ResultsError;
use crate::grades::{self, GradeLetter};
use crate::models::{CourseCode, CourseSummary, ResultType, SittingSummary, TableRef};

/// Overall average grade point over a sample of result tables.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Baseline {
    pub mean_grade_point: f64,
    pub graded: usize,
    pub tables: Vec<String>,
}

fn tally<'a>(cells: impl IntoIterator<Item = &'a String>) -> (BTreeMap<GradeLetter, usize>, usize) {
    let mut counts = BTreeMap::new();
    let mut unreadable = 0;
    for cell in cells {
        match GradeLetter::parse_cell(cell) {
            Ok(Some(letter)) => *counts.entry(letter).or_insert(0) += 1,
            Ok(None) => {}
            Err(_) => unreadable += 1,
        }
    }
    (counts, unreadable)
}

fn mean_point(counts: &BTreeMap<GradeLetter, usize>) -> (usize, f64) {
    let graded: usize = counts.values().sum();
    let points: f64 = counts
        .iter()
        .map(|(letter, count)| letter.point() * *count as f64)
        .sum();
    (graded, grades::weighted_average(points, graded as f64))
}

#[derive(Debug, Default)]
struct StudentGrades {
    regular: Option<(i32, Option<GradeLetter>)>,
    improvements: Vec<(i32, GradeLetter)>,
}

impl StudentGrades {
    /// The grade that counts: latest regular sitting, then improvements in
    /// exam order under the usual substitution rule.
    fn effective(mut self) -> Option<GradeLetter> {
        let original = self.regular.and_then(|(_, letter)| letter);
        self.improvements.sort_by_key(|(exam_year, _)| *exam_year);
        self.improvements
            .into_iter()
            .fold(original, |current, (_, letter)| {
                grades::apply_improvement(original, current, letter).0
            })
    }
}

/// Folds the column of one course, as read from each scanned table. Sitting
/// breakdowns count raw cells; the overall figures count each student once,
/// at their effective grade.
pub fn summarize_course(
    code: CourseCode,
    sittings: &[(TableRef, Vec<(String, String)>)],
) -> Result<CourseSummary, ResultsError> {
    let mut students: BTreeMap<&str, StudentGrades> = BTreeMap::new();
    let mut per_sitting = Vec::new();

    for (table, cells) in sittings {
        let (counts, unreadable) = tally(cells.iter().map(|(_, grade)| grade));
        if unreadable > 0 {
            warn!(table = %table.name, course = %code, unreadable, "skipped unreadable grades");
        }

        for (roll, cell) in cells {
            let Ok(letter) = GradeLetter::parse_cell(cell) else {
                continue;
            };
            let student = students.entry(roll.as_str()).or_default();
            match (table.result_type, letter) {
                (ResultType::Regular, _) => {
                    if student
                        .regular
                        .map_or(true, |(exam_year, _)| table.exam_year > exam_year)
                    {
                        student.regular = Some((table.exam_year, letter));
                    }
                }
                (ResultType::Improvement, Some(letter)) => {
                    student.improvements.push((table.exam_year, letter));
                }
                (ResultType::Improvement, None) => {}
            }
        }

        let (graded, mean) = mean_point(&counts);
        if graded == 0 {
            continue;
        }
        per_sitting.push(SittingSummary {
            table: table.name.clone(),
            exam_year: table.exam_year,
            result_type: table.result_type,
            graded,
            mean_grade_point: mean,
        });
    }

    let mut distribution: BTreeMap<GradeLetter, usize> = BTreeMap::new();
    for letter in students.into_values().filter_map(StudentGrades::effective) {
        *distribution.entry(letter).or_insert(0) += 1;
    }

    let (total_graded, mean_grade_point) = mean_point(&distribution);
    if total_graded == 0 {
        return Err(ResultsError::CourseNotFound(code.to_string()));
    }

    Ok(CourseSummary {
        code,
        total_graded,
        distribution,
        mean_grade_point,
        sittings: per_sitting,
    })
}

/// Tables worth scanning for a course: those holding its semester.
pub fn tables_for_course(tables: &[TableRef], code: &CourseCode) -> Vec<TableRef> {
    tables
        .iter()
        .filter(|table| table.semester == code.semester)
        .cloned()
        .collect()
}

/// The first `count` Regular tables in catalog order.
pub fn baseline_tables(tables: &[TableRef], count: usize) -> Vec<TableRef> {
    tables
        .iter()
        .filter(|table| table.result_type == ResultType::Regular)
        .take(count)
        .cloned()
        .collect()
}

pub fn compute_baseline(samples: &[(TableRef, Vec<String>)]) -> Baseline {
    let (counts, _) = tally(samples.iter().flat_map(|(_, cells)| cells));
    let (graded, mean_grade_point) = mean_point(&counts);
    Baseline {
        mean_grade_point,
        graded,
        tables: samples.iter().map(|(table, _)| table.name.clone()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SemesterKey;

    fn table(exam_year: i32, result_type: ResultType) -> TableRef {
        TableRef::new(SemesterKey::new(1, 1).unwrap(), exam_year, result_type)
    }

    fn cells(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn column(values: &[(&str, &str)]) -> Vec<(String, String)> {
        values
            .iter()
            .map(|(roll, grade)| (roll.to_string(), grade.to_string()))
            .collect()
    }

    #[test]
    fn distribution_and_mean_span_all_sittings() {
        let code: CourseCode = "111".parse().unwrap();
        let sittings = vec![
            (
                table(2019, ResultType::Regular),
                column(&[("1807001", "A+"), ("1807002", "A"), ("1807003", "C"), ("1807004", "")]),
            ),
            (table(2020, ResultType::Improvement), column(&[("1807003", "B-")])),
        ];
        let summary = summarize_course(code, &sittings).unwrap();
        assert_eq!(summary.total_graded, 3);
        assert!(!summary.distribution.contains_key(&GradeLetter::C));
        assert_eq!(summary.distribution[&GradeLetter::BMinus], 1);
        assert_eq!(summary.mean_grade_point, grades::round3((4.0 + 3.75 + 2.75) / 3.0));
        assert_eq!(summary.sittings.len(), 2);
        assert_eq!(summary.sittings[0].graded, 3);
        assert_eq!(summary.sittings[1].graded, 1);
    }

    #[test]
    fn improved_student_counts_once_at_effective_grade() {
        let code: CourseCode = "111".parse().unwrap();
        let sittings = vec![
            (table(2019, ResultType::Regular), column(&[("1807001", "F")])),
            (table(2020, ResultType::Improvement), column(&[("1807001", "B-")])),
        ];
        let summary = summarize_course(code, &sittings).unwrap();
        assert_eq!(summary.total_graded, 1);
        assert_eq!(summary.mean_grade_point, 2.75);
        assert_eq!(summary.distribution.get(&GradeLetter::F), None);
        assert_eq!(summary.sittings[0].mean_grade_point, 0.0);
        assert_eq!(summary.sittings[1].mean_grade_point, 2.75);
    }

    #[test]
    fn improvements_follow_the_substitution_rule() {
        let code: CourseCode = "111".parse().unwrap();
        let sittings = vec![
            // an earlier regular sitting is superseded by the later one
            (table(2018, ResultType::Regular), column(&[("1807001", "F")])),
            (table(2019, ResultType::Regular), column(&[("1807001", "B"), ("1807002", "C")])),
            (
                table(2020, ResultType::Improvement),
                column(&[("1807001", "A"), ("1807002", "B+")]),
            ),
            (table(2021, ResultType::Improvement), column(&[("1807002", "C+")])),
        ];
        let summary = summarize_course(code, &sittings).unwrap();
        assert_eq!(summary.total_graded, 2);
        // B is not eligible for improvement
        assert_eq!(summary.distribution[&GradeLetter::B], 1);
        // a later, worse improvement does not undo an earlier better one
        assert_eq!(summary.distribution[&GradeLetter::BPlus], 1);
        assert_eq!(summary.sittings.len(), 4);
    }

    #[test]
    fn course_without_grades_is_not_found() {
        let code: CourseCode = "111".parse().unwrap();
        let sittings = vec![(
            table(2019, ResultType::Regular),
            column(&[("1807001", ""), ("1807002", "N/A")]),
        )];
        assert!(matches!(
            summarize_course(code, &sittings),
            Err(ResultsError::CourseNotFound(_))
        ));
        assert!(matches!(
            summarize_course(code, &[]),
            Err(ResultsError::CourseNotFound(_))
        ));
    }

    #[test]
    fn only_matching_semesters_are_scanned() {
        let tables = vec![
            table(2019, ResultType::Regular),
            TableRef::new(SemesterKey::new(2, 1).unwrap(), 2020, ResultType::Regular),
        ];
        let code: CourseCode = "113".parse().unwrap();
        assert_eq!(tables_for_course(&tables, &code).len(), 1);
    }

    #[test]
    fn baseline_samples_regular_tables_only() {
        let tables = vec![
            table(2019, ResultType::Improvement),
            table(2019, ResultType::Regular),
            table(2020, ResultType::Regular),
        ];
        let picked = baseline_tables(&tables, 1);
        assert_eq!(picked, vec![table(2019, ResultType::Regular)]);

        let baseline = compute_baseline(&[(picked[0].clone(), cells(&["A", "B", "x"]))]);
        assert_eq!(baseline.graded, 2);
        assert_eq!(baseline.mean_grade_point, 3.375);
    }
}
