use anyhow::Context;
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::{info, warn};

use crate::grades::GradeLetter;
use crate::models::{CourseCode, RawRow, ResultType, SemesterKey, StudentId, TableRef};
use crate::store::{MemoryStore, RecordStore};

const SCHEMA: &str = "academic_results";

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// One grade cell as it arrives from an import file.
#[derive(Debug, Clone)]
pub struct GradeEntry {
    pub student_id: StudentId,
    pub full_name: String,
    pub table: TableRef,
    pub code: CourseCode,
    pub grade: Option<GradeLetter>,
}

impl GradeEntry {
    fn stored_grade(&self) -> Option<&'static str> {
        self.grade.map(GradeLetter::as_str)
    }
}

fn quoted_table(name: &str) -> anyhow::Result<String> {
    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
        anyhow::bail!("refusing to query table with unsafe name `{name}`");
    }
    Ok(format!("{SCHEMA}.\"{name}\""))
}

fn is_course_column(name: &str) -> bool {
    name.len() == 3 && name.bytes().all(|b| b.is_ascii_digit())
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordStore for PgStore {
    async fn list_tables(&self) -> anyhow::Result<Vec<TableRef>> {
        let rows = sqlx::query(
            r#"
            SELECT table_name, academic_year, academic_semester, exam_year, result_type
            FROM academic_results.result_tables
            ORDER BY academic_year, academic_semester, exam_year, result_type, table_name
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("failed to read result table catalog")?;

        let mut tables = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.get("table_name");
            let year: i16 = row.get("academic_year");
            let semester: i16 = row.get("academic_semester");
            let result_type: String = row.get("result_type");

            let key = u8::try_from(year)
                .ok()
                .zip(u8::try_from(semester).ok())
                .and_then(|(year, semester)| SemesterKey::new(year, semester).ok());
            let (Some(semester), Ok(result_type)) = (key, result_type.parse::<ResultType>()) else {
                warn!(table = %name, "catalog entry has an invalid key; skipped");
                continue;
            };

            tables.push(TableRef {
                name,
                semester,
                exam_year: row.get("exam_year"),
                result_type,
            });
        }
        Ok(tables)
    }

    async fn fetch_student_rows(
        &self,
        table: &TableRef,
        student_id: &StudentId,
    ) -> anyhow::Result<Vec<RawRow>> {
        let query = format!(
            "SELECT to_jsonb(t) AS cells FROM {} t WHERE t.roll = $1",
            quoted_table(&table.name)?
        );
        let rows = sqlx::query(&query)
            .bind(student_id.as_str())
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("failed to read {} for {student_id}", table.name))?;

        let mut raw = Vec::with_capacity(rows.len());
        for row in rows {
            let cells: serde_json::Value = row.get("cells");
            let cells = cells
                .as_object()
                .map(|object| {
                    object
                        .iter()
                        .filter(|(column, _)| is_course_column(column))
                        .filter_map(|(column, value)| {
                            value.as_str().map(|grade| (column.clone(), grade.to_string()))
                        })
                        .collect()
                })
                .unwrap_or_default();
            raw.push(RawRow {
                table: table.clone(),
                student_id: student_id.clone(),
                cells,
            });
        }
        Ok(raw)
    }

    async fn fetch_course_grades(
        &self,
        table: &TableRef,
        code: &CourseCode,
    ) -> anyhow::Result<Vec<(String, String)>> {
        let query = format!(
            "SELECT t.roll, to_jsonb(t) ->> $1 AS grade FROM {} t",
            quoted_table(&table.name)?
        );
        let rows = sqlx::query(&query)
            .bind(code.to_string())
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("failed to read course {code} from {}", table.name))?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let roll: String = row.get("roll");
                row.get::<Option<String>, _>("grade").map(|grade| (roll, grade))
            })
            .collect())
    }

    async fn fetch_all_grades(&self, table: &TableRef) -> anyhow::Result<Vec<String>> {
        let query = format!(
            "SELECT cell.key, cell.value FROM {} t, jsonb_each_text(to_jsonb(t) - 'roll') AS cell",
            quoted_table(&table.name)?
        );
        let rows = sqlx::query(&query)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("failed to read grades from {}", table.name))?;

        Ok(rows
            .into_iter()
            .filter(|row| is_course_column(&row.get::<String, _>("key")))
            .filter_map(|row| row.get::<Option<String>, _>("value"))
            .collect())
    }

    async fn fetch_student_name(&self, student_id: &StudentId) -> anyhow::Result<Option<String>> {
        let row = sqlx::query("SELECT full_name FROM academic_results.students WHERE roll = $1")
            .bind(student_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| row.get("full_name")))
    }
}

/// Creates the result table if needed, registers it in the catalog and makes
/// sure the course column exists.
async fn ensure_course_column(pool: &PgPool, table: &TableRef, code: &CourseCode) -> anyhow::Result<()> {
    let qualified = quoted_table(&table.name)?;
    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {qualified} (roll TEXT PRIMARY KEY)"
    ))
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO academic_results.result_tables
        (table_name, academic_year, academic_semester, exam_year, result_type)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (table_name) DO NOTHING
        "#,
    )
    .bind(&table.name)
    .bind(i16::from(table.semester.year))
    .bind(i16::from(table.semester.semester))
    .bind(table.exam_year)
    .bind(table.result_type.as_str())
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        "ALTER TABLE {qualified} ADD COLUMN IF NOT EXISTS \"{code}\" TEXT"
    ))
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn write_entries(pool: &PgPool, entries: &[GradeEntry]) -> anyhow::Result<usize> {
    let mut written = 0usize;
    let mut prepared: Vec<(String, CourseCode)> = Vec::new();

    for entry in entries {
        let marker = (entry.table.name.clone(), entry.code);
        if !prepared.contains(&marker) {
            ensure_course_column(pool, &entry.table, &entry.code).await?;
            prepared.push(marker);
        }

        sqlx::query(
            r#"
            INSERT INTO academic_results.students (roll, full_name)
            VALUES ($1, $2)
            ON CONFLICT (roll) DO UPDATE SET full_name = EXCLUDED.full_name
            "#,
        )
        .bind(entry.student_id.as_str())
        .bind(&entry.full_name)
        .execute(pool)
        .await?;

        let code = entry.code;
        let result = sqlx::query(&format!(
            "INSERT INTO {} (roll, \"{code}\") VALUES ($1, $2) \
             ON CONFLICT (roll) DO UPDATE SET \"{code}\" = EXCLUDED.\"{code}\"",
            quoted_table(&entry.table.name)?
        ))
        .bind(entry.student_id.as_str())
        .bind(entry.stored_grade())
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            written += 1;
        }
    }

    Ok(written)
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<usize> {
    let students = [
        ("1807001", "Nadia Rahman"),
        ("1807002", "Tanvir Hasan"),
        ("1807003", "Farhana Akter"),
        ("1707015", "Imran Chowdhury"),
    ];
    let regular = [
        (1, 1, 2019, ["A+", "B+", "A", "A-", "A-"]),
        (1, 1, 2019, ["B", "B-", "C+", "A-", "B"]),
        (1, 1, 2019, ["A", "A", "A-", "B+", "A+"]),
        (1, 1, 2018, ["B+", "C", "F", "B", "B-"]),
    ];

    let mut entries = Vec::new();
    for ((roll, name), (year, semester, exam_year, letters)) in students.iter().zip(regular) {
        let key = SemesterKey::new(year, semester)?;
        let table = TableRef::new(key, exam_year, ResultType::Regular);
        for (number, letter) in (1u8..).zip(letters) {
            entries.push(GradeEntry {
                student_id: roll.parse()?,
                full_name: name.to_string(),
                table: table.clone(),
                code: CourseCode::new(key, number),
                grade: Some(letter.parse()?),
            });
        }
    }

    let second = SemesterKey::new(1, 2)?;
    let second_regular = TableRef::new(second, 2019, ResultType::Regular);
    let improvement = TableRef::new(second, 2020, ResultType::Improvement);
    let later = [
        ("1807001", "Nadia Rahman", &second_regular, 1, "F"),
        ("1807001", "Nadia Rahman", &second_regular, 2, "A"),
        ("1807001", "Nadia Rahman", &improvement, 1, "B-"),
        ("1807002", "Tanvir Hasan", &second_regular, 1, "C+"),
        ("1807002", "Tanvir Hasan", &second_regular, 2, "B+"),
        ("1807003", "Farhana Akter", &second_regular, 1, "A"),
        ("1807003", "Farhana Akter", &second_regular, 2, "A+"),
    ];
    for (roll, name, table, number, letter) in later {
        entries.push(GradeEntry {
            student_id: roll.parse()?,
            full_name: name.to_string(),
            table: table.clone(),
            code: CourseCode::new(second, number),
            grade: Some(letter.parse()?),
        });
    }

    let written = write_entries(pool, &entries).await?;
    info!(written, "seed grades written");
    Ok(written)
}

#[derive(Debug, serde::Deserialize)]
struct CsvRow {
    roll: String,
    full_name: String,
    academic_year: u8,
    academic_semester: u8,
    exam_year: i32,
    result_type: String,
    course_code: String,
    grade: String,
}

/// Reads and validates a long-format grade file; one line per grade cell.
pub fn read_grade_csv(csv_path: &std::path::Path) -> anyhow::Result<Vec<GradeEntry>> {
    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut entries = Vec::new();

    for (index, result) in reader.deserialize::<CsvRow>().enumerate() {
        let line = index + 2;
        let row = result.with_context(|| format!("line {line}: malformed row"))?;
        let key = SemesterKey::new(row.academic_year, row.academic_semester)
            .with_context(|| format!("line {line}"))?;
        let code: CourseCode = row
            .course_code
            .parse()
            .with_context(|| format!("line {line}"))?;
        if code.semester != key {
            anyhow::bail!("line {line}: course {code} does not belong to semester {key}");
        }
        let result_type: ResultType = row
            .result_type
            .parse()
            .with_context(|| format!("line {line}"))?;

        entries.push(GradeEntry {
            student_id: row
                .roll
                .parse::<StudentId>()
                .with_context(|| format!("line {line}"))?,
            full_name: row.full_name,
            table: TableRef::new(key, row.exam_year, result_type),
            code,
            grade: GradeLetter::parse_cell(&row.grade).with_context(|| format!("line {line}"))?,
        });
    }

    Ok(entries)
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    let entries = read_grade_csv(csv_path)?;
    write_entries(pool, &entries).await
}

/// Loads entries into an in-memory store, for checking a file before import.
pub fn load_into_memory(entries: &[GradeEntry]) -> anyhow::Result<MemoryStore> {
    let store = MemoryStore::new();
    for entry in entries {
        store.set_name(&entry.student_id, &entry.full_name)?;
        store.insert_grade(
            &entry.table,
            &entry.student_id,
            &entry.code.to_string(),
            entry.stored_grade().unwrap_or(""),
        )?;
    }
    Ok(store)
}
