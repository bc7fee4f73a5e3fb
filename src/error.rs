use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResultsError {
    #[error("invalid student id `{0}`: expected 7 digits")]
    InvalidStudentId(String),
    #[error("invalid course code `{0}`: expected year digit, semester digit (1-2), course digit")]
    InvalidCourseCode(String),
    #[error("invalid semester key `{0}`: expected `<year>-<semester>`")]
    InvalidSemesterKey(String),
    #[error("unrecognised grade `{0}`")]
    InvalidGrade(String),
    #[error("invalid what-if override `{0}`: expected `<year>-<semester>:<course>=<grade>`")]
    InvalidOverride(String),
    #[error("no results found for student {0}")]
    StudentNotFound(String),
    #[error("no results found for course {0}")]
    CourseNotFound(String),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}
