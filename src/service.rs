use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::aggregate;
use crate::cohort;
use crate::config::Config;
use crate::course::{self, Baseline};
use crate::error::ResultsError;
use crate::models::{CohortEntry, CourseCode, CourseSummary, StudentId, StudentRecord, TableRef};
use crate::store::RecordStore;

#[derive(Debug, Clone)]
pub struct CohortReport {
    pub ranked: Vec<CohortEntry>,
    pub students: Vec<StudentRecord>,
    /// Ids with no results in any table.
    pub missing: Vec<StudentId>,
    /// Ids whose lookup failed for another reason, with that reason.
    pub failed: Vec<(StudentId, String)>,
}

/// Fetches raw results concurrently and hands them to the pure aggregation
/// code. Owns the session's memoized overall-average baseline.
pub struct ResultsService<S> {
    store: Arc<S>,
    config: Config,
    permits: Arc<Semaphore>,
    baseline: Arc<RwLock<Option<Baseline>>>,
}

impl<S> Clone for ResultsService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: self.config.clone(),
            permits: Arc::clone(&self.permits),
            baseline: Arc::clone(&self.baseline),
        }
    }
}

impl<S: RecordStore> ResultsService<S> {
    pub fn new(store: S, config: Config) -> Self {
        let permits = Arc::new(Semaphore::new(config.fetch_concurrency.max(1)));
        Self {
            store: Arc::new(store),
            config,
            permits,
            baseline: Arc::new(RwLock::new(None)),
        }
    }

    /// Runs one fetch per table, bounded by the configured concurrency, and
    /// joins the results by table name. Failed tables are logged and left out.
    async fn fan_out<T, F, Fut>(&self, tables: &[TableRef], fetch: F) -> HashMap<String, T>
    where
        T: Send + 'static,
        F: Fn(Arc<S>, TableRef) -> Fut,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let mut tasks = JoinSet::new();
        for table in tables {
            let permits = Arc::clone(&self.permits);
            let pending = fetch(Arc::clone(&self.store), table.clone());
            let table = table.clone();
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                (table, pending.await)
            });
        }

        let mut fetched = HashMap::with_capacity(tables.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((table, Ok(value))) => {
                    fetched.insert(table.name, value);
                }
                Ok((table, Err(err))) => {
                    warn!(table = %table.name, error = %format!("{err:#}"), "fetch failed; table excluded");
                }
                Err(err) => warn!(error = %err, "fetch task did not complete"),
            }
        }
        fetched
    }

    #[tracing::instrument(skip(self))]
    pub async fn student(&self, raw_id: &str) -> Result<StudentRecord, ResultsError> {
        let id: StudentId = raw_id.parse()?;
        self.student_by_id(&id).await
    }

    async fn student_by_id(&self, id: &StudentId) -> Result<StudentRecord, ResultsError> {
        let tables = self.store.list_tables().await?;
        debug!(student = %id, tables = tables.len(), "fetching student rows");

        let mut fetched = self
            .fan_out(&tables, |store, table| {
                let id = id.clone();
                async move { store.fetch_student_rows(&table, &id).await }
            })
            .await;

        let rows: Vec<_> = tables
            .iter()
            .filter_map(|table| fetched.remove(&table.name))
            .flatten()
            .collect();

        let name = match self.store.fetch_student_name(id).await {
            Ok(name) => name,
            Err(err) => {
                warn!(student = %id, error = %format!("{err:#}"), "name lookup failed");
                None
            }
        };

        let record = aggregate::build_student_record(id, name, &rows)?;
        info!(student = %id, rows = rows.len(), cgpa = record.overall_cgpa, "student aggregated");
        Ok(record)
    }

    /// Aggregates every distinct id concurrently and ranks those that were
    /// found. All ids are validated before anything is fetched.
    #[tracing::instrument(skip(self, raw_ids), fields(students = raw_ids.len()))]
    pub async fn cohort(&self, raw_ids: &[String]) -> Result<CohortReport, ResultsError> {
        let ids = raw_ids
            .iter()
            .map(|raw| raw.parse::<StudentId>())
            .collect::<Result<BTreeSet<_>, _>>()?;

        let mut tasks = JoinSet::new();
        for id in &ids {
            let service = self.clone();
            let id = id.clone();
            tasks.spawn(async move {
                let result = service.student_by_id(&id).await;
                (id, result)
            });
        }

        let mut pending = ids;
        let mut students = Vec::new();
        let mut missing = Vec::new();
        let mut failed = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((id, result)) => {
                    pending.remove(&id);
                    match result {
                        Ok(record) => students.push(record),
                        Err(ResultsError::StudentNotFound(_)) => {
                            debug!(student = %id, "no results; left out of cohort");
                            missing.push(id);
                        }
                        Err(err) => {
                            warn!(student = %id, error = %err, "lookup failed; left out of cohort");
                            failed.push((id, err.to_string()));
                        }
                    }
                }
                Err(err) => warn!(error = %err, "student task did not complete"),
            }
        }
        failed.extend(
            pending
                .into_iter()
                .map(|id| (id, "lookup task did not complete".to_string())),
        );

        students.sort_by(|a, b| a.id.cmp(&b.id));
        missing.sort();
        failed.sort();
        let ranked = cohort::rank_students(&students);
        Ok(CohortReport {
            ranked,
            students,
            missing,
            failed,
        })
    }

    #[tracing::instrument(skip(self))]
    pub async fn course(&self, raw_code: &str) -> Result<CourseSummary, ResultsError> {
        let code: CourseCode = raw_code.parse()?;
        let tables = course::tables_for_course(&self.store.list_tables().await?, &code);

        let mut fetched = self
            .fan_out(&tables, move |store, table| async move {
                store.fetch_course_grades(&table, &code).await
            })
            .await;

        let sittings: Vec<_> = tables
            .into_iter()
            .filter_map(|table| fetched.remove(&table.name).map(|cells| (table, cells)))
            .collect();

        course::summarize_course(code, &sittings)
    }

    /// Overall average grade point, computed on first use and then reused
    /// until [`Self::invalidate_baseline`] is called.
    pub async fn baseline(&self) -> Result<Baseline, ResultsError> {
        if let Some(cached) = self.baseline.read().await.as_ref() {
            return Ok(cached.clone());
        }

        let mut slot = self.baseline.write().await;
        if let Some(cached) = slot.as_ref() {
            return Ok(cached.clone());
        }

        let tables =
            course::baseline_tables(&self.store.list_tables().await?, self.config.baseline_tables);
        let mut fetched = self
            .fan_out(&tables, |store, table| async move {
                store.fetch_all_grades(&table).await
            })
            .await;
        let samples: Vec<_> = tables
            .into_iter()
            .filter_map(|table| fetched.remove(&table.name).map(|cells| (table, cells)))
            .collect();

        let baseline = course::compute_baseline(&samples);
        info!(
            tables = baseline.tables.len(),
            graded = baseline.graded,
            mean = baseline.mean_grade_point,
            "baseline computed"
        );
        *slot = Some(baseline.clone());
        Ok(baseline)
    }

    pub async fn invalidate_baseline(&self) {
        self.baseline.write().await.take();
    }
}
