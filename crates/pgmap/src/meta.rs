//! Record field metadata and its per-type cache.

use crate::error::{OrmError, OrmResult};
use crate::query::Query;
use crate::value::ColumnSlot;
use std::any::{TypeId, type_name};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Declared field of a record: the Rust field name and its column name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDef {
    pub name: &'static str,
    pub column: &'static str,
}

/// A struct that maps to one table row.
///
/// Normally implemented with `#[derive(Record)]`:
///
/// ```ignore
/// #[derive(Debug, Default, Record)]
/// #[orm(table = "node")]
/// struct Node {
///     #[orm(id)]
///     id: i64,
///     parent_id: i64,
///     name: String,
/// }
/// ```
pub trait Record: Default + Send + Sync + 'static {
    /// Table the record is read from.
    const TABLE: &'static str;

    /// Fields in declaration order.
    fn fields() -> &'static [FieldDef];

    /// Column used as the traversal key in recursive queries, if declared.
    fn key_column() -> Option<&'static str> {
        None
    }

    /// Storage slot of the field at `index` in [`Record::fields`].
    fn field_mut(&mut self, index: usize) -> Option<&mut dyn ColumnSlot>;
}

/// Resolved column of a record type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldEntry {
    pub column: &'static str,
    pub index: usize,
}

/// Column layout of a record type, computed once per type.
#[derive(Debug)]
pub struct RecordMeta {
    table: &'static str,
    key: Option<&'static str>,
    entries: Vec<FieldEntry>,
    by_column: HashMap<&'static str, usize>,
}

impl RecordMeta {
    fn build<T: Record>() -> OrmResult<Self> {
        let fields = T::fields();
        let mut entries = Vec::with_capacity(fields.len());
        let mut by_column = HashMap::with_capacity(fields.len());

        for (index, field) in fields.iter().enumerate() {
            if field.column.is_empty() {
                return Err(OrmError::Metadata(format!(
                    "{}.{} has an empty column name",
                    type_name::<T>(),
                    field.name
                )));
            }
            if by_column.insert(field.column, index).is_some() {
                return Err(OrmError::Metadata(format!(
                    "{} maps column '{}' more than once",
                    type_name::<T>(),
                    field.column
                )));
            }
            entries.push(FieldEntry {
                column: field.column,
                index,
            });
        }

        if let Some(key) = T::key_column() {
            if !by_column.contains_key(key) {
                return Err(OrmError::Metadata(format!(
                    "{} declares key column '{}' which is not a field",
                    type_name::<T>(),
                    key
                )));
            }
        }

        Ok(Self {
            table: T::TABLE,
            key: T::key_column(),
            entries,
            by_column,
        })
    }

    pub fn table(&self) -> &'static str {
        self.table
    }

    pub fn key_column(&self) -> Option<&'static str> {
        self.key
    }

    pub fn entries(&self) -> &[FieldEntry] {
        &self.entries
    }

    /// Field index for a result column, if the record declares it.
    pub fn field_index(&self, column: &str) -> Option<usize> {
        self.by_column.get(column).copied()
    }

    /// Column names in declaration order.
    pub fn columns(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|e| e.column)
    }
}

/// Cache of [`RecordMeta`] keyed by record type.
///
/// Cloning is cheap; clones share the same cache. Entries are computed lazily
/// on first use and never recomputed.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<RwLock<HashMap<TypeId, Arc<RecordMeta>>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Metadata for `T`, computing and caching it on first use.
    pub fn resolve<T: Record>(&self) -> OrmResult<Arc<RecordMeta>> {
        let id = TypeId::of::<T>();
        {
            let cache = self
                .inner
                .read()
                .map_err(|_| OrmError::Metadata("metadata cache poisoned".into()))?;
            if let Some(meta) = cache.get(&id) {
                return Ok(Arc::clone(meta));
            }
        }

        let meta = Arc::new(RecordMeta::build::<T>()?);
        let mut cache = self
            .inner
            .write()
            .map_err(|_| OrmError::Metadata("metadata cache poisoned".into()))?;
        // Another task may have resolved the same type meanwhile; keep the first.
        let entry = cache.entry(id).or_insert(meta);
        tracing::trace!(target: "pgmap.meta", record = type_name::<T>(), "resolved record metadata");
        Ok(Arc::clone(entry))
    }

    /// Number of cached record types.
    pub fn len(&self) -> usize {
        self.inner.read().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Start a query over `T`'s table.
    pub fn query<T: Record>(&self) -> Query<T> {
        Query::new(self)
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry").field("records", &self.len()).finish()
    }
}
