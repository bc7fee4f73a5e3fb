use std::collections::BTreeMap;

use crate::aggregate;
use crate::error::ResultsError;
use crate::grades::GradeLetter;
use crate::models::{CourseCode, SemesterKey, StudentRecord};

/// Hypothetical grades keyed by semester and course.
pub type Overrides = BTreeMap<(SemesterKey, CourseCode), GradeLetter>;

/// Parses `<year>-<semester>:<course>=<grade>`, e.g. `1-2:121=B+`.
pub fn parse_override(raw: &str) -> Result<((SemesterKey, CourseCode), GradeLetter), ResultsError> {
    let invalid = || ResultsError::InvalidOverride(raw.to_string());
    let (target, letter) = raw.split_once('=').ok_or_else(invalid)?;
    let (key, code) = target.split_once(':').ok_or_else(invalid)?;
    let key: SemesterKey = key.parse().map_err(|_| invalid())?;
    let code: CourseCode = code.parse().map_err(|_| invalid())?;
    if code.semester != key {
        return Err(invalid());
    }
    let letter: GradeLetter = letter.parse().map_err(|_| invalid())?;
    Ok(((key, code), letter))
}

/// Re-derives the record as if each override had been earned. An override
/// only takes when it beats the effective grade or fills a missing one.
pub fn recompute(base: &StudentRecord, overrides: &Overrides) -> StudentRecord {
    let courses_by_semester = base
        .semesters
        .iter()
        .map(|(key, semester)| {
            let courses = semester
                .courses
                .iter()
                .map(|course| {
                    let mut course = course.clone();
                    if let Some(&letter) = overrides.get(&(*key, course.code)) {
                        let improves = course
                            .grade
                            .map_or(true, |current| letter.point() > current.point());
                        if improves {
                            course.grade = Some(letter);
                            course.grade_point = letter.point();
                            course.projected = true;
                        }
                    }
                    course
                })
                .collect();
            (*key, courses)
        })
        .collect();

    aggregate::finalize(
        &base.id,
        base.name.clone(),
        courses_by_semester,
        base.anomalies.clone(),
    )
}

/// Overrides naming a course the record does not carry.
pub fn unmatched<'a>(
    base: &StudentRecord,
    overrides: &'a Overrides,
) -> Vec<&'a (SemesterKey, CourseCode)> {
    overrides
        .keys()
        .filter(|(key, code)| {
            base.semesters
                .get(key)
                .map_or(true, |semester| semester.courses.iter().all(|c| c.code != *code))
        })
        .collect()
}
