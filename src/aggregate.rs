use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::cohort;
use crate::error::ResultsError;
use crate::grades::{self, GradeLetter, COURSES_PER_SEMESTER, COURSE_CREDITS};
use crate::models::{
    CourseCode, CourseRecord, RawRow, ResultType, SemesterKey, SemesterRecord, StudentId,
    StudentRecord,
};

/// Years always shown, even for students who have not reached them yet.
pub const MIN_HORIZON_YEARS: u8 = 4;

/// Builds a student's full record from every row fetched for them. Rows must
/// be in catalog (query) order; that order only matters for duplicate
/// Regular sittings, which are reported as anomalies.
pub fn build_student_record(
    id: &StudentId,
    name: Option<String>,
    rows: &[RawRow],
) -> Result<StudentRecord, ResultsError> {
    if rows.is_empty() {
        return Err(ResultsError::StudentNotFound(id.to_string()));
    }

    let mut anomalies = Vec::new();
    let mut regular: BTreeMap<SemesterKey, &RawRow> = BTreeMap::new();
    let mut improvements: BTreeMap<SemesterKey, Vec<&RawRow>> = BTreeMap::new();

    for row in rows {
        let key = row.table.semester;
        match row.table.result_type {
            ResultType::Regular => match regular.entry(key) {
                Entry::Vacant(slot) => {
                    slot.insert(row);
                }
                Entry::Occupied(mut slot) => {
                    let kept = slot.get().table.exam_year;
                    if row.table.exam_year > kept {
                        slot.insert(row);
                    } else if row.table.exam_year == kept {
                        let message = format!(
                            "duplicate regular sitting for {key} in {} and {}; keeping {}",
                            slot.get().table.name,
                            row.table.name,
                            slot.get().table.name
                        );
                        warn!(student = %id, "{message}");
                        anomalies.push(message);
                    }
                }
            },
            ResultType::Improvement => improvements.entry(key).or_default().push(row),
        }
    }

    for sittings in improvements.values_mut() {
        sittings.sort_by_key(|row| row.table.exam_year);
    }

    let max_year = regular
        .keys()
        .chain(improvements.keys())
        .map(|key| key.year)
        .max()
        .unwrap_or(MIN_HORIZON_YEARS);
    let horizon = max_year.max(MIN_HORIZON_YEARS);

    let mut semesters = BTreeMap::new();
    for year in 1..=horizon {
        for semester in 1..=2 {
            let key = SemesterKey { year, semester };
            let mut courses: BTreeMap<CourseCode, CourseRecord> = BTreeMap::new();

            if let Some(row) = regular.get(&key) {
                for (code, letter) in read_cells(row, &mut anomalies) {
                    courses.insert(code, course_record(code, letter, letter));
                }
            }

            for row in improvements.get(&key).into_iter().flatten() {
                for (code, letter) in read_cells(row, &mut anomalies) {
                    let Some(letter) = letter else { continue };
                    let course = courses
                        .entry(code)
                        .or_insert_with(|| course_record(code, None, None));
                    let (effective, applied) =
                        grades::apply_improvement(course.original_grade, course.grade, letter);
                    if applied {
                        debug!(student = %id, course = %code, grade = %letter, "improvement applied");
                        course.grade = effective;
                        course.grade_point = grades::point_of(effective);
                        course.improvement_applied = true;
                    }
                }
            }

            let courses: Vec<CourseRecord> = if courses.is_empty() {
                placeholder_courses(key)
            } else {
                courses.into_values().collect()
            };
            semesters.insert(key, courses);
        }
    }

    Ok(finalize(id, name, semesters, anomalies))
}

fn read_cells(row: &RawRow, anomalies: &mut Vec<String>) -> Vec<(CourseCode, Option<GradeLetter>)> {
    let mut cells = Vec::with_capacity(row.cells.len());
    for (column, value) in &row.cells {
        let code = match column.parse::<CourseCode>() {
            Ok(code) if code.semester == row.table.semester => code,
            Ok(code) => {
                let message = format!(
                    "course {code} found in {} which holds {} results; ignored",
                    row.table.name, row.table.semester
                );
                warn!(student = %row.student_id, "{message}");
                anomalies.push(message);
                continue;
            }
            Err(_) => continue,
        };
        let letter = match GradeLetter::parse_cell(value) {
            Ok(letter) => letter,
            Err(err) => {
                let message = format!("{} course {code}: {err}; treated as missing", row.table.name);
                warn!(student = %row.student_id, "{message}");
                anomalies.push(message);
                None
            }
        };
        cells.push((code, letter));
    }
    cells
}

fn course_record(
    code: CourseCode,
    original: Option<GradeLetter>,
    effective: Option<GradeLetter>,
) -> CourseRecord {
    CourseRecord {
        code,
        grade: effective,
        original_grade: original,
        grade_point: grades::point_of(effective),
        improvement_applied: false,
        has_improvement_opportunity: grades::is_improvement_eligible(original),
        projected: false,
    }
}

fn placeholder_courses(key: SemesterKey) -> Vec<CourseRecord> {
    (1..=COURSES_PER_SEMESTER)
        .map(|number| course_record(CourseCode::new(key, number), None, None))
        .collect()
}

/// Derives every per-semester and running figure from effective grades.
/// Semesters are processed in key order; YGPA restarts at each new year.
pub(crate) fn finalize(
    id: &StudentId,
    name: Option<String>,
    courses_by_semester: BTreeMap<SemesterKey, Vec<CourseRecord>>,
    anomalies: Vec<String>,
) -> StudentRecord {
    let mut semesters = BTreeMap::new();
    let mut gpa_history = Vec::new();
    let mut cgpa_history = Vec::new();

    let (mut cumulative_points, mut cumulative_credits) = (0.0, 0.0);
    let (mut year_points, mut year_credits) = (0.0, 0.0);
    let mut current_year = None;

    for (key, courses) in courses_by_semester {
        if current_year.is_some_and(|year| year != key.year) {
            year_points = 0.0;
            year_credits = 0.0;
        }
        current_year = Some(key.year);

        let graded = courses.iter().filter(|course| course.grade.is_some());
        let total_points = grades::round3(
            graded
                .clone()
                .map(|course| course.grade_point * COURSE_CREDITS)
                .sum(),
        );
        let total_credits = graded.count() as f64 * COURSE_CREDITS;

        cumulative_points += total_points;
        cumulative_credits += total_credits;
        year_points += total_points;
        year_credits += total_credits;

        let record = SemesterRecord {
            key,
            display_name: key.display_name(),
            gpa: grades::weighted_average(total_points, total_credits),
            cgpa: grades::weighted_average(cumulative_points, cumulative_credits),
            ygpa: grades::weighted_average(year_points, year_credits),
            courses,
            total_points,
            total_credits,
        };

        if record.has_data() {
            gpa_history.push(record.gpa);
            cgpa_history.push(record.cgpa);
        }
        semesters.insert(key, record);
    }

    let gpa_std_dev = if gpa_history.is_empty() {
        None
    } else {
        Some(cohort::sample_std_dev(&gpa_history))
    };

    StudentRecord {
        id: id.clone(),
        name,
        semesters,
        overall_cgpa: grades::weighted_average(cumulative_points, cumulative_credits),
        gpa_history,
        cgpa_history,
        gpa_std_dev,
        session: id.session().to_string(),
        anomalies,
    }
}
