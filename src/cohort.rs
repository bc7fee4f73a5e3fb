use std::cmp::Ordering;

use crate::grades;
use crate::models::{CohortEntry, StudentRecord};

/// Sample standard deviation (n - 1), rounded; 0 for fewer than two values.
pub fn sample_std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    grades::round3(variance.sqrt())
}

/// CGPA descending, then steadier GPA, then earlier session, then roll.
pub fn compare_entries(a: &CohortEntry, b: &CohortEntry) -> Ordering {
    b.cgpa
        .total_cmp(&a.cgpa)
        .then_with(|| a.gpa_std_dev.total_cmp(&b.gpa_std_dev))
        .then_with(|| a.session.cmp(&b.session))
        .then_with(|| a.id.cmp(&b.id))
}

pub fn rank_students(students: &[StudentRecord]) -> Vec<CohortEntry> {
    let mut entries: Vec<CohortEntry> = students
        .iter()
        .map(|student| CohortEntry {
            rank: 0,
            id: student.id.clone(),
            name: student.name.clone(),
            session: student.session.clone(),
            cgpa: student.overall_cgpa,
            gpa_std_dev: sample_std_dev(&student.gpa_history),
            semesters_with_data: student.gpa_history.len(),
        })
        .collect();

    entries.sort_by(compare_entries);
    for (index, entry) in entries.iter_mut().enumerate() {
        entry.rank = index + 1;
    }
    entries
}

pub fn top_n(ranked: &[CohortEntry], n: usize) -> &[CohortEntry] {
    &ranked[..n.min(ranked.len())]
}

/// Entries within `radius` places of a 1-based rank, clamped to the list.
pub fn around_rank(ranked: &[CohortEntry], rank: usize, radius: usize) -> &[CohortEntry] {
    if ranked.is_empty() || rank == 0 || rank > ranked.len() {
        return &[];
    }
    let index = rank - 1;
    let start = index.saturating_sub(radius);
    let end = (index + radius + 1).min(ranked.len());
    &ranked[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, cgpa: f64, std_dev: f64) -> CohortEntry {
        let id: crate::models::StudentId = id.parse().unwrap();
        CohortEntry {
            rank: 0,
            session: id.session().to_string(),
            id,
            name: None,
            cgpa,
            gpa_std_dev: std_dev,
            semesters_with_data: 2,
        }
    }

    fn student(id: &str, cgpa: f64, gpa_history: &[f64]) -> StudentRecord {
        let id: crate::models::StudentId = id.parse().unwrap();
        StudentRecord {
            session: id.session().to_string(),
            id,
            name: None,
            semesters: Default::default(),
            overall_cgpa: cgpa,
            gpa_history: gpa_history.to_vec(),
            cgpa_history: Vec::new(),
            gpa_std_dev: None,
            anomalies: Vec::new(),
        }
    }

    #[test]
    fn single_value_has_zero_deviation() {
        assert_eq!(sample_std_dev(&[3.5]), 0.0);
        assert_eq!(sample_std_dev(&[]), 0.0);
    }

    #[test]
    fn deviation_uses_n_minus_one() {
        // mean 3.0, squared deviations 0.25 + 0.25, / (2 - 1)
        assert_eq!(sample_std_dev(&[2.5, 3.5]), grades::round3(0.5_f64.sqrt()));
    }

    #[test]
    fn ranking_follows_key_priority() {
        let steady = [3.5, 3.5];
        let uneven = [3.2, 3.8];
        let entries = rank_students(&[
            student("1907003", 3.5, &steady),
            student("1807002", 3.5, &steady),
            student("1807001", 3.5, &uneven),
            student("1807009", 3.8, &[3.4, 3.9, 4.0]),
            student("1707004", 3.5, &steady),
        ]);
        let ids: Vec<&str> = entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["1807009", "1707004", "1807002", "1907003", "1807001"]);
        assert_eq!(entries[0].rank, 1);
        assert_eq!(entries[0].semesters_with_data, 3);
        assert_eq!(entries[4].rank, 5);
        assert_eq!(entries[4].gpa_std_dev, sample_std_dev(&uneven));
    }

    #[test]
    fn lower_session_breaks_ties() {
        let a = entry("1807050", 3.2, 0.1);
        let b = entry("1707060", 3.2, 0.1);
        assert_eq!(compare_entries(&b, &a), Ordering::Less);
    }

    #[test]
    fn roll_is_the_final_tie_break() {
        let a = entry("1807001", 3.2, 0.1);
        let b = entry("1807002", 3.2, 0.1);
        assert_eq!(compare_entries(&a, &b), Ordering::Less);
        assert_eq!(compare_entries(&a, &a), Ordering::Equal);
    }

    #[test]
    fn top_and_adjacent_views() {
        let students: Vec<StudentRecord> = (1..=6)
            .map(|i| student(&format!("180700{i}"), 4.0 - i as f64 * 0.1, &[3.0]))
            .collect();
        let entries = rank_students(&students);
        assert_eq!(top_n(&entries, 3).len(), 3);
        assert_eq!(top_n(&entries, 10).len(), 6);

        let window = around_rank(&entries, 1, 2);
        assert_eq!(window.iter().map(|e| e.rank).collect::<Vec<_>>(), [1, 2, 3]);
        let window = around_rank(&entries, 5, 1);
        assert_eq!(window.iter().map(|e| e.rank).collect::<Vec<_>>(), [4, 5, 6]);
        assert!(around_rank(&entries, 7, 1).is_empty());
        assert!(around_rank(&entries, 0, 1).is_empty());
    }
}
