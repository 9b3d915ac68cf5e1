//! In-memory stores for testing and simulation.

use crate::connection::{ConnectionProvider, ExecOutcome, StoreConnection};
use crate::error::{StoreError, StoreResult};
use crate::schema::{KeyGeneration, Schema, TableMetadata, TableSchema};
use crate::statement::{Condition, OnConflict, Statement};
use crate::value::{Record, Value};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug)]
struct TableData {
    rows: BTreeMap<Value, Record>,
    next_key: i64,
}

impl TableData {
    fn new() -> Self {
        Self {
            rows: BTreeMap::new(),
            next_key: 1,
        }
    }

    fn observe_key(&mut self, key: &Value) {
        if let Value::Int(k) = key {
            self.next_key = self.next_key.max(k.saturating_add(1));
        }
    }
}

/// One-shot failure switches.
#[derive(Debug, Default)]
struct Faults {
    connect: AtomicBool,
    execute: AtomicBool,
    commit: AtomicBool,
    rollback: AtomicBool,
    validation: AtomicBool,
}

impl Faults {
    fn take(flag: &AtomicBool) -> bool {
        flag.swap(false, Ordering::SeqCst)
    }
}

/// An in-memory store.
///
/// Rows live in ordered tables keyed by primary key. Connections stage
/// their writes privately and publish them atomically on commit.
/// Generated keys come from a per-table sequence that is never rolled back.
///
/// # Fault injection
///
/// The `fail_next_*` switches make the next matching call on any
/// connection to this store fail once, which lets tests exercise
/// prepare, commit and rollback failure paths.
///
/// # Example
///
/// ```rust
/// use tandem_store::{InMemoryStore, Record, Schema, TableSchema};
///
/// let store = InMemoryStore::new(
///     "inventory",
///     Schema::new().with_table(TableSchema::generated("products", "product_id")),
/// );
/// let key = store.seed("products", Record::new().with("stock", 10)).unwrap();
/// assert_eq!(store.row("products", &key).unwrap().get_i64("stock"), Some(10));
/// ```
#[derive(Debug)]
pub struct InMemoryStore {
    name: String,
    schema: Arc<Schema>,
    tables: RwLock<BTreeMap<String, TableData>>,
    faults: Faults,
    rollbacks: AtomicU64,
}

impl InMemoryStore {
    /// Creates a store with an empty table per schema entry.
    #[must_use]
    pub fn new(name: impl Into<String>, schema: Schema) -> Self {
        let tables = schema
            .tables()
            .map(|t| (t.name.clone(), TableData::new()))
            .collect();
        Self {
            name: name.into(),
            schema: Arc::new(schema),
            tables: RwLock::new(tables),
            faults: Faults::default(),
            rollbacks: AtomicU64::new(0),
        }
    }

    /// Returns the store name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the store schema.
    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Inserts a committed row directly, bypassing connections.
    ///
    /// Returns the row's primary key, generating one if the table uses
    /// generated keys and the row does not carry one.
    ///
    /// # Errors
    ///
    /// Fails on an unknown table, a missing supplied key or a duplicate.
    pub fn seed(&self, table: &str, mut row: Record) -> StoreResult<Value> {
        let schema = self.table_schema(table)?.clone();
        let mut tables = self.tables.write();
        let data = tables
            .get_mut(table)
            .ok_or_else(|| self.unknown_table(table))?;
        let key = match row.get(&schema.primary_key).filter(|v| !v.is_null()) {
            Some(key) => key.clone(),
            None if schema.key_generation == KeyGeneration::Generated => {
                let key = Value::Int(data.next_key);
                row.set(schema.primary_key.clone(), key.clone());
                key
            }
            None => {
                return Err(StoreError::MissingKey {
                    table: table.to_string(),
                    column: schema.primary_key,
                })
            }
        };
        if data.rows.contains_key(&key) {
            return Err(StoreError::DuplicateKey {
                table: table.to_string(),
                key: key.to_string(),
            });
        }
        data.observe_key(&key);
        data.rows.insert(key.clone(), row);
        Ok(key)
    }

    /// Returns a committed row.
    #[must_use]
    pub fn row(&self, table: &str, key: &Value) -> Option<Record> {
        self.tables.read().get(table)?.rows.get(key).cloned()
    }

    /// Returns every committed row of a table in key order.
    #[must_use]
    pub fn rows(&self, table: &str) -> Vec<Record> {
        self.tables
            .read()
            .get(table)
            .map(|t| t.rows.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the number of committed rows in a table.
    #[must_use]
    pub fn row_count(&self, table: &str) -> usize {
        self.tables.read().get(table).map_or(0, |t| t.rows.len())
    }

    /// Opens a manual-commit connection.
    #[must_use]
    pub fn connect(self: &Arc<Self>) -> InMemoryConnection {
        InMemoryConnection {
            store: Arc::clone(self),
            overlay: BTreeMap::new(),
            auto_commit: false,
            closed: false,
        }
    }

    /// Returns how many physical rollbacks connections to this store have
    /// attempted, failed ones included.
    #[must_use]
    pub fn rollback_count(&self) -> u64 {
        self.rollbacks.load(Ordering::Relaxed)
    }

    /// Makes the next connection attempt fail.
    pub fn fail_next_connect(&self) {
        self.faults.connect.store(true, Ordering::SeqCst);
    }

    /// Makes the next statement execution fail.
    pub fn fail_next_execute(&self) {
        self.faults.execute.store(true, Ordering::SeqCst);
    }

    /// Makes the next physical commit fail.
    pub fn fail_next_commit(&self) {
        self.faults.commit.store(true, Ordering::SeqCst);
    }

    /// Makes the next physical rollback fail.
    pub fn fail_next_rollback(&self) {
        self.faults.rollback.store(true, Ordering::SeqCst);
    }

    /// Makes the next liveness check report an unusable connection.
    pub fn fail_next_validation(&self) {
        self.faults.validation.store(true, Ordering::SeqCst);
    }

    fn table_schema(&self, table: &str) -> StoreResult<&TableSchema> {
        self.schema
            .table(table)
            .ok_or_else(|| self.unknown_table(table))
    }

    fn unknown_table(&self, table: &str) -> StoreError {
        StoreError::UnknownTable {
            store: self.name.clone(),
            table: table.to_string(),
        }
    }

    fn allocate_key(&self, table: &str) -> StoreResult<Value> {
        let mut tables = self.tables.write();
        let data = tables
            .get_mut(table)
            .ok_or_else(|| self.unknown_table(table))?;
        let key = data.next_key;
        data.next_key += 1;
        Ok(Value::Int(key))
    }
}

type Overlay = BTreeMap<String, BTreeMap<Value, Option<Record>>>;

/// A connection to an [`InMemoryStore`].
#[derive(Debug)]
pub struct InMemoryConnection {
    store: Arc<InMemoryStore>,
    overlay: Overlay,
    auto_commit: bool,
    closed: bool,
}

impl InMemoryConnection {
    fn ensure_open(&self) -> StoreResult<()> {
        if self.closed {
            return Err(StoreError::Closed(self.store.name.clone()));
        }
        Ok(())
    }

    fn check_execute_fault(&self) -> StoreResult<()> {
        if Faults::take(&self.store.faults.execute) {
            return Err(StoreError::execution(format!(
                "injected execution failure on store {}",
                self.store.name
            )));
        }
        Ok(())
    }

    /// Committed rows with this connection's pending writes applied.
    fn visible_rows(&self, table: &str) -> StoreResult<BTreeMap<Value, Record>> {
        let tables = self.store.tables.read();
        let data = tables
            .get(table)
            .ok_or_else(|| self.store.unknown_table(table))?;
        let mut rows = data.rows.clone();
        drop(tables);

        if let Some(changes) = self.overlay.get(table) {
            for (key, change) in changes {
                match change {
                    Some(row) => rows.insert(key.clone(), row.clone()),
                    None => rows.remove(key),
                };
            }
        }
        Ok(rows)
    }

    fn matching(
        &self,
        table: &str,
        filter: &[Condition],
        params: &[Value],
    ) -> StoreResult<Vec<(Value, Record)>> {
        let mut out = Vec::new();
        for (key, row) in self.visible_rows(table)? {
            let mut keep = true;
            for condition in filter {
                if !condition.matches(&row, params)? {
                    keep = false;
                    break;
                }
            }
            if keep {
                out.push((key, row));
            }
        }
        Ok(out)
    }

    fn stage(&mut self, table: &str, key: Value, row: Option<Record>) {
        self.overlay
            .entry(table.to_string())
            .or_default()
            .insert(key, row);
    }

    fn insert(
        &mut self,
        table: &str,
        columns: &[String],
        values: &[crate::statement::Expr],
        on_conflict: OnConflict,
        params: &[Value],
    ) -> StoreResult<ExecOutcome> {
        let schema = self.store.table_schema(table)?.clone();
        let mut row = Record::new();
        for (column, expr) in columns.iter().zip(values) {
            row.set(column.clone(), expr.eval(params, None)?);
        }

        let mut generated_key = None;
        let key = match row.get(&schema.primary_key).filter(|v| !v.is_null()) {
            Some(key) => key.clone(),
            None if schema.key_generation == KeyGeneration::Generated => {
                let key = self.store.allocate_key(table)?;
                row.set(schema.primary_key.clone(), key.clone());
                generated_key = Some(key.clone());
                key
            }
            None => {
                return Err(StoreError::MissingKey {
                    table: table.to_string(),
                    column: schema.primary_key,
                })
            }
        };

        if self.visible_rows(table)?.contains_key(&key) {
            return match on_conflict {
                OnConflict::DoNothing => Ok(ExecOutcome::rows(0)),
                OnConflict::Fail => Err(StoreError::DuplicateKey {
                    table: table.to_string(),
                    key: key.to_string(),
                }),
            };
        }

        if generated_key.is_none() {
            if let Some(data) = self.store.tables.write().get_mut(table) {
                data.observe_key(&key);
            }
        }
        self.stage(table, key, Some(row));
        Ok(ExecOutcome {
            rows_affected: 1,
            generated_key,
        })
    }

    fn update(
        &mut self,
        table: &str,
        assignments: &[(String, crate::statement::Expr)],
        filter: &[Condition],
        params: &[Value],
    ) -> StoreResult<ExecOutcome> {
        let primary_key = self.store.table_schema(table)?.primary_key.clone();
        let targets = self.matching(table, filter, params)?;
        let mut staged = Vec::with_capacity(targets.len());
        for (key, old) in targets {
            let mut new = old.clone();
            for (column, expr) in assignments {
                let value = expr.eval(params, Some(&old))?;
                if *column == primary_key && value != key {
                    return Err(StoreError::execution(format!(
                        "cannot change primary key {primary_key} of {table}"
                    )));
                }
                new.set(column.clone(), value);
            }
            staged.push((key, new));
        }
        let count = staged.len() as u64;
        for (key, row) in staged {
            self.stage(table, key, Some(row));
        }
        Ok(ExecOutcome::rows(count))
    }

    fn delete(
        &mut self,
        table: &str,
        filter: &[Condition],
        params: &[Value],
    ) -> StoreResult<ExecOutcome> {
        let targets = self.matching(table, filter, params)?;
        let count = targets.len() as u64;
        for (key, _) in targets {
            self.stage(table, key, None);
        }
        Ok(ExecOutcome::rows(count))
    }
}

impl StoreConnection for InMemoryConnection {
    fn store(&self) -> &str {
        &self.store.name
    }

    fn query(&mut self, statement: &Statement, params: &[Value]) -> StoreResult<Vec<Record>> {
        self.ensure_open()?;
        self.check_execute_fault()?;
        match statement {
            Statement::Select { table, filter, .. } => Ok(self
                .matching(table, filter, params)?
                .into_iter()
                .map(|(_, row)| row)
                .collect()),
            other => Err(StoreError::execution(format!(
                "query requires a SELECT, got: {other}"
            ))),
        }
    }

    fn execute(&mut self, statement: &Statement, params: &[Value]) -> StoreResult<ExecOutcome> {
        self.ensure_open()?;
        self.check_execute_fault()?;
        let outcome = match statement {
            Statement::Insert {
                table,
                columns,
                values,
                on_conflict,
            } => self.insert(table, columns, values, *on_conflict, params)?,
            Statement::Update {
                table,
                assignments,
                filter,
            } => self.update(table, assignments, filter, params)?,
            Statement::Delete { table, filter } => self.delete(table, filter, params)?,
            Statement::Select { .. } => {
                return Err(StoreError::execution(format!(
                    "execute does not accept a SELECT: {statement}"
                )))
            }
        };
        if self.auto_commit {
            self.commit()?;
        }
        Ok(outcome)
    }

    fn commit(&mut self) -> StoreResult<()> {
        self.ensure_open()?;
        let overlay = std::mem::take(&mut self.overlay);
        if Faults::take(&self.store.faults.commit) {
            return Err(StoreError::CommitFailed {
                store: self.store.name.clone(),
                reason: "injected commit failure".to_string(),
            });
        }
        let mut tables = self.store.tables.write();
        for (table, changes) in overlay {
            let Some(data) = tables.get_mut(&table) else {
                continue;
            };
            for (key, change) in changes {
                match change {
                    Some(row) => {
                        data.rows.insert(key, row);
                    }
                    None => {
                        data.rows.remove(&key);
                    }
                }
            }
        }
        debug!(store = %self.store.name, "committed");
        Ok(())
    }

    fn rollback(&mut self) -> StoreResult<()> {
        self.ensure_open()?;
        self.overlay.clear();
        self.store.rollbacks.fetch_add(1, Ordering::Relaxed);
        if Faults::take(&self.store.faults.rollback) {
            return Err(StoreError::RollbackFailed {
                store: self.store.name.clone(),
                reason: "injected rollback failure".to_string(),
            });
        }
        Ok(())
    }

    fn is_valid(&mut self) -> bool {
        !self.closed && !Faults::take(&self.store.faults.validation)
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn auto_commit(&self) -> bool {
        self.auto_commit
    }

    fn set_auto_commit(&mut self, enabled: bool) -> StoreResult<()> {
        self.ensure_open()?;
        if enabled && !self.auto_commit && !self.overlay.is_empty() {
            self.commit()?;
        }
        self.auto_commit = enabled;
        Ok(())
    }

    fn close(&mut self) -> StoreResult<()> {
        if !self.closed {
            self.overlay.clear();
            self.closed = true;
        }
        Ok(())
    }
}

/// A [`ConnectionProvider`] over a fixed set of in-memory stores.
#[derive(Debug, Default, Clone)]
pub struct InMemoryProvider {
    stores: BTreeMap<String, Arc<InMemoryStore>>,
}

impl InMemoryProvider {
    /// Creates a provider with no stores.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a store under its own name.
    #[must_use]
    pub fn with_store(self, store: InMemoryStore) -> Self {
        self.with_shared_store(Arc::new(store))
    }

    /// Registers a store the caller keeps a handle to.
    #[must_use]
    pub fn with_shared_store(mut self, store: Arc<InMemoryStore>) -> Self {
        self.stores.insert(store.name.clone(), store);
        self
    }

    /// Returns a registered store.
    #[must_use]
    pub fn store(&self, name: &str) -> Option<Arc<InMemoryStore>> {
        self.stores.get(name).cloned()
    }

    fn lookup(&self, name: &str) -> StoreResult<&Arc<InMemoryStore>> {
        self.stores
            .get(name)
            .ok_or_else(|| StoreError::UnknownStore(name.to_string()))
    }
}

impl ConnectionProvider for InMemoryProvider {
    fn store_names(&self) -> Vec<String> {
        self.stores.keys().cloned().collect()
    }

    fn connect(&self, store: &str) -> StoreResult<Box<dyn StoreConnection>> {
        let target = self.lookup(store)?;
        if Faults::take(&target.faults.connect) {
            return Err(StoreError::ConnectFailed {
                store: store.to_string(),
                reason: "injected connection failure".to_string(),
            });
        }
        Ok(Box::new(target.connect()))
    }

    fn metadata(&self, store: &str) -> StoreResult<Arc<dyn TableMetadata>> {
        let schema: Arc<dyn TableMetadata> = self.lookup(store)?.schema.clone();
        Ok(schema)
    }
}
