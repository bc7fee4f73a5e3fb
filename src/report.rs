use std::fmt::Write;

use chrono::NaiveDate;

use crate::cohort;
use crate::course::Baseline;
use crate::grades::IMPROVEMENT_THRESHOLD;
use crate::models::{CohortEntry, CourseRecord, CourseSummary, StudentRecord};
use crate::service::CohortReport;

fn course_cell(course: &CourseRecord) -> String {
    let mut cell = course
        .grade
        .map(|letter| letter.to_string())
        .unwrap_or_else(|| "N/A".to_string());
    if course.improvement_applied {
        if let Some(original) = course.original_grade {
            let _ = write!(cell, " (imp, was {original})");
        } else {
            cell.push_str(" (imp)");
        }
    }
    if course.projected {
        cell.push_str(" (what-if)");
    }
    cell
}

pub fn student_transcript(record: &StudentRecord) -> String {
    let mut output = String::new();
    let name = record.name.as_deref().unwrap_or("Unknown student");

    let _ = writeln!(output, "# {} ({})", name, record.id);
    let _ = writeln!(
        output,
        "Session {} | CGPA {:.3} | GPA std-dev {}",
        record.session,
        record.overall_cgpa,
        record
            .gpa_std_dev
            .map(|value| format!("{value:.3}"))
            .unwrap_or_else(|| "n/a".to_string())
    );

    for semester in record.semesters.values() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## {} ({})", semester.display_name, semester.key);
        if !semester.has_data() {
            let _ = writeln!(output, "No results published.");
            continue;
        }
        let _ = writeln!(
            output,
            "GPA {:.3} | YGPA {:.3} | CGPA {:.3} | {} credits",
            semester.gpa, semester.ygpa, semester.cgpa, semester.total_credits
        );
        for course in &semester.courses {
            let marker = if course.has_improvement_opportunity { " *" } else { "" };
            let _ = writeln!(output, "- {}: {}{}", course.code, course_cell(course), marker);
        }
    }

    if record.semesters.values().any(|s| {
        s.has_data() && s.courses.iter().any(|c| c.has_improvement_opportunity)
    }) {
        let _ = writeln!(output);
        let _ = writeln!(output, "`*` eligible for an improvement sitting");
    }

    if !record.anomalies.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Data Warnings");
        for anomaly in &record.anomalies {
            let _ = writeln!(output, "- {anomaly}");
        }
    }

    output
}

fn entry_line(entry: &CohortEntry) -> String {
    format!(
        "| {} | {} | {} | {} | {:.3} | {:.3} | {} |",
        entry.rank,
        entry.id,
        entry.name.as_deref().unwrap_or("-"),
        entry.session,
        entry.cgpa,
        entry.gpa_std_dev,
        entry.semesters_with_data
    )
}

pub fn ranking_table(entries: &[CohortEntry]) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "| Rank | Roll | Name | Session | CGPA | GPA std-dev | Semesters |");
    let _ = writeln!(output, "|---|---|---|---|---|---|---|");
    for entry in entries {
        let _ = writeln!(output, "{}", entry_line(entry));
    }
    output
}

pub fn cohort_report(report: &CohortReport, top: usize, generated: NaiveDate) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Cohort Results Report");
    let _ = writeln!(
        output,
        "Generated {} for {} students ({} not found, {} failed)",
        generated,
        report.ranked.len() + report.missing.len() + report.failed.len(),
        report.missing.len(),
        report.failed.len()
    );
    let _ = writeln!(output);

    let _ = writeln!(output, "## Top Performers");
    if report.ranked.is_empty() {
        let _ = writeln!(output, "No students with published results.");
    } else {
        for entry in cohort::top_n(&report.ranked, top) {
            let _ = writeln!(
                output,
                "- #{} {} ({}) CGPA {:.3}",
                entry.rank,
                entry.name.as_deref().unwrap_or("-"),
                entry.id,
                entry.cgpa
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Full Ranking");
    if report.ranked.is_empty() {
        let _ = writeln!(output, "No students with published results.");
    } else {
        output.push_str(&ranking_table(&report.ranked));
    }

    let improvable: Vec<(&StudentRecord, usize)> = report
        .students
        .iter()
        .map(|student| {
            let count = student
                .semesters
                .values()
                .filter(|semester| semester.has_data())
                .flat_map(|semester| &semester.courses)
                .filter(|course| course.grade.is_some() && course.grade_point < IMPROVEMENT_THRESHOLD)
                .count();
            (student, count)
        })
        .filter(|(_, count)| *count > 0)
        .collect();

    let _ = writeln!(output);
    let _ = writeln!(output, "## Improvement Candidates");
    if improvable.is_empty() {
        let _ = writeln!(output, "No graded courses below B-.");
    } else {
        for (student, count) in improvable {
            let _ = writeln!(
                output,
                "- {} ({}): {} course(s) below B-",
                student.name.as_deref().unwrap_or("-"),
                student.id,
                count
            );
        }
    }

    if !report.missing.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Not Found");
        for id in &report.missing {
            let _ = writeln!(output, "- {id}");
        }
    }

    if !report.failed.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Fetch Failures");
        for (id, reason) in &report.failed {
            let _ = writeln!(output, "- {id}: {reason}");
        }
    }

    output
}

pub fn course_report(summary: &CourseSummary, baseline: Option<&Baseline>) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Course {}", summary.code);
    let _ = writeln!(
        output,
        "{} graded | mean grade point {:.3}",
        summary.total_graded, summary.mean_grade_point
    );
    if let Some(baseline) = baseline {
        let _ = writeln!(
            output,
            "Overall average {:.3} across {} grades ({:+.3})",
            baseline.mean_grade_point,
            baseline.graded,
            summary.mean_grade_point - baseline.mean_grade_point
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Grade Distribution");
    for (letter, count) in &summary.distribution {
        let _ = writeln!(output, "- {letter}: {count}");
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Sittings");
    for sitting in &summary.sittings {
        let _ = writeln!(
            output,
            "- {} ({} {}): {} graded, mean {:.3}",
            sitting.table,
            sitting.exam_year,
            sitting.result_type.as_str(),
            sitting.graded,
            sitting.mean_grade_point
        );
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::build_student_record;
    use crate::aggregate::tests::row;
    use crate::models::ResultType;

    fn record() -> StudentRecord {
        let rows = vec![
            row("1807001", 1, 1, 2019, ResultType::Regular, &[("111", "A+"), ("112", "F")]),
            row("1807001", 1, 1, 2020, ResultType::Improvement, &[("112", "B")]),
        ];
        build_student_record(&"1807001".parse().unwrap(), Some("Nadia Rahman".into()), &rows)
            .unwrap()
    }

    #[test]
    fn transcript_marks_improvements_and_empty_semesters() {
        let text = student_transcript(&record());
        assert!(text.contains("# Nadia Rahman (1807001)"));
        assert!(text.contains("- 112: B (imp, was F) *"));
        assert!(text.contains("No results published."));
    }

    #[test]
    fn cohort_report_lists_missing_ids() {
        let student = record();
        let report = CohortReport {
            ranked: cohort::rank_students(std::slice::from_ref(&student)),
            students: vec![student],
            missing: vec!["1807099".parse().unwrap()],
            failed: vec![("1807098".parse().unwrap(), "connection reset".to_string())],
        };
        let date = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        let text = cohort_report(&report, 5, date);
        assert!(text.contains("Generated 2026-10-18 for 3 students (1 not found, 1 failed)"));
        assert!(text.contains("| 1 | 1807001 | Nadia Rahman | 18 |"));
        assert!(text.contains("## Not Found\n- 1807099"));
        assert!(text.contains("## Fetch Failures\n- 1807098: connection reset"));
    }

    #[test]
    fn improvement_candidates_use_effective_grades() {
        // F lifted to B no longer counts; a standing C still does
        let improved = record();
        let rows = vec![row(
            "1807002",
            1,
            1,
            2019,
            ResultType::Regular,
            &[("111", "C"), ("112", "A")],
        )];
        let weak = build_student_record(&"1807002".parse().unwrap(), None, &rows).unwrap();
        let students = vec![improved, weak];
        let report = CohortReport {
            ranked: cohort::rank_students(&students),
            students,
            missing: Vec::new(),
            failed: Vec::new(),
        };
        let text = cohort_report(&report, 5, NaiveDate::from_ymd_opt(2026, 10, 18).unwrap());
        assert!(text.contains("- - (1807002): 1 course(s) below B-"));
        assert!(!text.contains("(1807001): "));
        assert!(!text.contains("## Fetch Failures"));
    }
}
