use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::models::{CourseCode, RawRow, StudentId, TableRef};

/// Read access to the result tables and their catalog.
#[async_trait]
pub trait RecordStore: Send + Sync + 'static {
    /// Every result table the catalog knows about, in catalog order.
    async fn list_tables(&self) -> anyhow::Result<Vec<TableRef>>;

    async fn fetch_student_rows(
        &self,
        table: &TableRef,
        student_id: &StudentId,
    ) -> anyhow::Result<Vec<RawRow>>;

    /// Roll and raw grade cell of one course column, one per student row.
    async fn fetch_course_grades(
        &self,
        table: &TableRef,
        code: &CourseCode,
    ) -> anyhow::Result<Vec<(String, String)>>;

    /// Every course column present in a table, as stored.
    async fn fetch_all_grades(&self, table: &TableRef) -> anyhow::Result<Vec<String>>;

    async fn fetch_student_name(&self, student_id: &StudentId) -> anyhow::Result<Option<String>>;
}

#[derive(Debug)]
struct MemoryTable {
    table: TableRef,
    rows: BTreeMap<StudentId, BTreeMap<String, String>>,
}

/// In-process store, used for CSV dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Vec<MemoryTable>>,
    names: RwLock<HashMap<StudentId, String>>,
    failing: RwLock<Vec<String>>,
    catalog_down: RwLock<bool>,
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow::anyhow!("memory store lock poisoned")
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_name(&self, student_id: &StudentId, name: &str) -> anyhow::Result<()> {
        self.names
            .write()
            .map_err(poisoned)?
            .insert(student_id.clone(), name.to_string());
        Ok(())
    }

    pub fn insert_grade(
        &self,
        table: &TableRef,
        student_id: &StudentId,
        code: &str,
        grade: &str,
    ) -> anyhow::Result<()> {
        let mut tables = self.tables.write().map_err(poisoned)?;
        let index = match tables
            .iter()
            .position(|t| t.table.name == table.name)
        {
            Some(index) => index,
            None => {
                tables.push(MemoryTable {
                    table: table.clone(),
                    rows: BTreeMap::new(),
                });
                tables.len() - 1
            }
        };
        tables[index]
            .rows
            .entry(student_id.clone())
            .or_default()
            .insert(code.to_string(), grade.to_string());
        Ok(())
    }

    /// Makes every read of the named table fail.
    pub fn fail_table(&self, name: &str) -> anyhow::Result<()> {
        self.failing.write().map_err(poisoned)?.push(name.to_string());
        Ok(())
    }

    /// Makes catalog listing fail, as when the store itself is unreachable.
    pub fn fail_catalog(&self) -> anyhow::Result<()> {
        *self.catalog_down.write().map_err(poisoned)? = true;
        Ok(())
    }

    fn check(&self, table: &TableRef) -> anyhow::Result<()> {
        let failing = self.failing.read().map_err(poisoned)?;
        if failing.contains(&table.name) {
            anyhow::bail!("table {} is unavailable", table.name);
        }
        Ok(())
    }

    fn with_table<T>(
        &self,
        table: &TableRef,
        read: impl FnOnce(&MemoryTable) -> T,
    ) -> anyhow::Result<Option<T>> {
        self.check(table)?;
        let tables = self.tables.read().map_err(poisoned)?;
        Ok(tables
            .iter()
            .find(|t| t.table.name == table.name)
            .map(read))
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn list_tables(&self) -> anyhow::Result<Vec<TableRef>> {
        if *self.catalog_down.read().map_err(poisoned)? {
            anyhow::bail!("result table catalog is unavailable");
        }
        let tables = self.tables.read().map_err(poisoned)?;
        Ok(tables.iter().map(|t| t.table.clone()).collect())
    }

    async fn fetch_student_rows(
        &self,
        table: &TableRef,
        student_id: &StudentId,
    ) -> anyhow::Result<Vec<RawRow>> {
        let rows = self.with_table(table, |t| {
            t.rows
                .get(student_id)
                .map(|cells| RawRow {
                    table: table.clone(),
                    student_id: student_id.clone(),
                    cells: cells.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                })
                .into_iter()
                .collect()
        })?;
        Ok(rows.unwrap_or_default())
    }

    async fn fetch_course_grades(
        &self,
        table: &TableRef,
        code: &CourseCode,
    ) -> anyhow::Result<Vec<(String, String)>> {
        let column = code.to_string();
        let grades = self.with_table(table, |t| {
            t.rows
                .iter()
                .filter_map(|(roll, cells)| {
                    cells.get(&column).map(|grade| (roll.to_string(), grade.clone()))
                })
                .collect()
        })?;
        Ok(grades.unwrap_or_default())
    }

    async fn fetch_all_grades(&self, table: &TableRef) -> anyhow::Result<Vec<String>> {
        let grades = self.with_table(table, |t| {
            t.rows
                .values()
                .flat_map(|cells| cells.values().cloned())
                .collect()
        })?;
        Ok(grades.unwrap_or_default())
    }

    async fn fetch_student_name(&self, student_id: &StudentId) -> anyhow::Result<Option<String>> {
        let names = self.names.read().map_err(poisoned)?;
        Ok(names.get(student_id).cloned())
    }
}
