//! Row materialization into caller-supplied destinations.
//!
//! A destination's [`Shape`] is picked from its Rust type through the
//! [`Destination`] trait: a record, a scalar or a [`Row`] is a single-row
//! destination, `Vec<E>` collects every row, `HashMap<K, E>` indexes rows by
//! the first column and `HashMap<K, Vec<E>>` groups them.
//!
//! Every row is decoded in two phases. The cursor first decodes each column
//! into a disposable [`Value`] holder. Then, per column, a NULL holder resets
//! the destination slot to its default and absorbs the NULL, while a non-NULL
//! holder is committed into the slot. Non-nullable fields therefore never see
//! a NULL.

use crate::error::{OrmError, OrmResult};
use crate::meta::{Record, Registry};
use crate::value::{FromValue, Value};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::any::type_name;
use std::collections::HashMap;
use std::hash::Hash;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use uuid::Uuid;

/// Admissible destination shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// One record; at most one row is consumed.
    SingleRecord,
    /// `Vec<Record>`, appended in row order.
    RecordSequence,
    /// `HashMap<K, Record>` keyed by column 0; the last row per key wins.
    KeyedMapToRecord,
    /// `HashMap<K, Vec<E>>` keyed by column 0, in arrival order per key.
    KeyedMapToRecordSequence,
    /// `HashMap<K, V>` mapping column 0 to column 1.
    KeyedMapToScalar,
    /// `Vec<scalar>` from column 0.
    ScalarSequence,
    /// `Vec<Row>`, one column-name mapping per row.
    MappingSequence,
    /// A single [`Row`].
    StringKeyedMapping,
    /// One scalar from column 0 of the first row.
    SingleScalar,
}

impl Shape {
    /// Single shapes stop after the first row.
    pub fn is_single(self) -> bool {
        matches!(
            self,
            Shape::SingleRecord | Shape::SingleScalar | Shape::StringKeyedMapping
        )
    }
}

/// What one destination element is made of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Record,
    Scalar,
    Mapping,
}

/// Which part of a row an element is decoded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The element is the whole row.
    Whole,
    /// The element is the value of a keyed map; column 0 is the key.
    MapValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Field(usize),
    Holder,
}

/// Per-result-set decoding plan, computed once before the first row.
#[derive(Debug, Clone)]
pub struct ScanPlan {
    columns: Arc<[String]>,
    targets: Vec<Target>,
    value_column: usize,
}

impl ScanPlan {
    fn new(columns: &[String], targets: Vec<Target>, value_column: usize) -> Self {
        Self {
            columns: columns.into(),
            targets,
            value_column,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    fn column(&self, i: usize) -> &str {
        self.columns.get(i).map(String::as_str).unwrap_or("?")
    }
}

/// A column-name → value mapping for one row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row(HashMap<String, Value>);

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Typed access to a column.
    pub fn get<T: FromValue>(&self, column: &str) -> OrmResult<T> {
        let value = self
            .0
            .get(column)
            .cloned()
            .ok_or_else(|| OrmError::decode(column, "column not present in row"))?;
        T::from_value(value).map_err(|m| OrmError::decode(column, m))
    }

    pub fn into_inner(self) -> HashMap<String, Value> {
        self.0
    }
}

impl Deref for Row {
    type Target = HashMap<String, Value>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Row {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl From<HashMap<String, Value>> for Row {
    fn from(map: HashMap<String, Value>) -> Self {
        Self(map)
    }
}

// ==================== Elements ====================

/// One decodable unit of a destination: a record, a scalar or a [`Row`].
pub trait Element: Default + Send {
    fn kind() -> ElementKind;

    fn plan(columns: &[String], registry: &Registry, role: Role) -> OrmResult<ScanPlan>;

    /// Decode one row into `self`.
    fn decode(&mut self, plan: &ScanPlan, row: Vec<Value>) -> OrmResult<()>;
}

impl<T: Record> Element for T {
    fn kind() -> ElementKind {
        ElementKind::Record
    }

    fn plan(columns: &[String], registry: &Registry, _role: Role) -> OrmResult<ScanPlan> {
        let meta = registry.resolve::<T>()?;

        let mut probe = T::default();
        for entry in meta.entries() {
            if probe.field_mut(entry.index).is_none() {
                return Err(OrmError::shape(format!(
                    "field for column '{}' of {} is not addressable",
                    entry.column,
                    type_name::<T>()
                )));
            }
        }

        let targets = columns
            .iter()
            .map(|name| match meta.field_index(name) {
                Some(index) => Target::Field(index),
                None => {
                    tracing::trace!(
                        target: "pgmap.scan",
                        column = %name,
                        record = type_name::<T>(),
                        "result column has no matching field"
                    );
                    Target::Holder
                }
            })
            .collect();
        Ok(ScanPlan::new(columns, targets, 0))
    }

    fn decode(&mut self, plan: &ScanPlan, row: Vec<Value>) -> OrmResult<()> {
        let mut pending = Vec::with_capacity(row.len());

        for (i, holder) in row.into_iter().enumerate() {
            let Some(Target::Field(index)) = plan.targets.get(i).copied() else {
                continue;
            };
            let slot = self.field_mut(index).ok_or_else(|| {
                OrmError::shape(format!("field for column '{}' is not addressable", plan.column(i)))
            })?;
            if holder.is_null() {
                slot.reset();
            } else {
                pending.push((i, index, holder));
            }
        }

        for (i, index, value) in pending {
            if let Some(slot) = self.field_mut(index) {
                slot.assign(value)
                    .map_err(|m| OrmError::decode(plan.column(i), m))?;
            }
        }
        Ok(())
    }
}

fn scalar_plan(columns: &[String], role: Role) -> OrmResult<ScanPlan> {
    let value_column = match role {
        Role::Whole => 0,
        Role::MapValue => 1,
    };
    if columns.len() <= value_column {
        return Err(OrmError::shape(match role {
            Role::Whole => "scalar destination needs at least one result column".to_string(),
            Role::MapValue => format!(
                "key/value map destination needs at least two result columns, got {}",
                columns.len()
            ),
        }));
    }
    let targets = (0..columns.len())
        .map(|i| {
            if i == value_column {
                Target::Field(0)
            } else {
                Target::Holder
            }
        })
        .collect();
    Ok(ScanPlan::new(columns, targets, value_column))
}

fn scalar_decode<S: FromValue + Default>(
    slot: &mut S,
    plan: &ScanPlan,
    mut row: Vec<Value>,
) -> OrmResult<()> {
    let i = plan.value_column;
    if i >= row.len() {
        return Err(OrmError::shape(format!(
            "row has {} column(s), expected at least {}",
            row.len(),
            i + 1
        )));
    }
    let holder = row.swap_remove(i);
    if holder.is_null() {
        *slot = S::default();
        return Ok(());
    }
    *slot = S::from_value(holder).map_err(|m| OrmError::decode(plan.column(i), m))?;
    Ok(())
}

macro_rules! scalar_element {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Element for $ty {
                fn kind() -> ElementKind {
                    ElementKind::Scalar
                }

                fn plan(columns: &[String], _registry: &Registry, role: Role) -> OrmResult<ScanPlan> {
                    scalar_plan(columns, role)
                }

                fn decode(&mut self, plan: &ScanPlan, row: Vec<Value>) -> OrmResult<()> {
                    scalar_decode(self, plan, row)
                }
            }
        )*
    };
}

scalar_element!(
    bool,
    i16,
    i32,
    i64,
    u32,
    u64,
    f32,
    f64,
    String,
    serde_json::Value,
    Uuid,
    NaiveDate,
    NaiveDateTime,
    DateTime<Utc>,
    Value,
);

#[cfg(feature = "rust_decimal")]
scalar_element!(rust_decimal::Decimal);

impl<T: FromValue + Send> Element for Option<T> {
    fn kind() -> ElementKind {
        ElementKind::Scalar
    }

    fn plan(columns: &[String], _registry: &Registry, role: Role) -> OrmResult<ScanPlan> {
        scalar_plan(columns, role)
    }

    fn decode(&mut self, plan: &ScanPlan, row: Vec<Value>) -> OrmResult<()> {
        scalar_decode(self, plan, row)
    }
}

impl Element for Row {
    fn kind() -> ElementKind {
        ElementKind::Mapping
    }

    fn plan(columns: &[String], _registry: &Registry, _role: Role) -> OrmResult<ScanPlan> {
        Ok(ScanPlan::new(columns, vec![Target::Holder; columns.len()], 0))
    }

    fn decode(&mut self, plan: &ScanPlan, row: Vec<Value>) -> OrmResult<()> {
        self.0.clear();
        for (name, value) in plan.columns.iter().zip(row) {
            self.0.insert(name.clone(), value);
        }
        Ok(())
    }
}

// ==================== Destinations ====================

/// A value rows can be materialized into.
pub trait Destination: Send {
    fn shape() -> Shape;

    /// Validate the destination against the result columns and reset it
    /// where the shape requires.
    fn prepare(&mut self, columns: &[String], registry: &Registry) -> OrmResult<ScanPlan>;

    /// Commit one decoded row.
    fn accept(&mut self, plan: &ScanPlan, row: Vec<Value>) -> OrmResult<()>;
}

impl<E: Element> Destination for E {
    fn shape() -> Shape {
        match E::kind() {
            ElementKind::Record => Shape::SingleRecord,
            ElementKind::Scalar => Shape::SingleScalar,
            ElementKind::Mapping => Shape::StringKeyedMapping,
        }
    }

    fn prepare(&mut self, columns: &[String], registry: &Registry) -> OrmResult<ScanPlan> {
        E::plan(columns, registry, Role::Whole)
    }

    fn accept(&mut self, plan: &ScanPlan, row: Vec<Value>) -> OrmResult<()> {
        self.decode(plan, row)
    }
}

impl<E: Element> Destination for Vec<E> {
    fn shape() -> Shape {
        match E::kind() {
            ElementKind::Record => Shape::RecordSequence,
            ElementKind::Scalar => Shape::ScalarSequence,
            ElementKind::Mapping => Shape::MappingSequence,
        }
    }

    fn prepare(&mut self, columns: &[String], registry: &Registry) -> OrmResult<ScanPlan> {
        E::plan(columns, registry, Role::Whole)
    }

    fn accept(&mut self, plan: &ScanPlan, row: Vec<Value>) -> OrmResult<()> {
        let mut element = E::default();
        element.decode(plan, row)?;
        self.push(element);
        Ok(())
    }
}

/// Map key from column 0. A NULL key becomes the key type's default.
fn map_key<K: FromValue + Default>(plan: &ScanPlan, row: &[Value]) -> OrmResult<K> {
    match row.first() {
        None => Err(OrmError::shape("keyed map destination needs a key column")),
        Some(Value::Null) => Ok(K::default()),
        Some(v) => K::from_value(v.clone()).map_err(|m| OrmError::decode(plan.column(0), m)),
    }
}

fn map_plan<E: Element>(columns: &[String], registry: &Registry) -> OrmResult<ScanPlan> {
    if columns.is_empty() {
        return Err(OrmError::shape("keyed map destination needs a key column"));
    }
    E::plan(columns, registry, Role::MapValue)
}

impl<K, V> Destination for HashMap<K, V>
where
    K: FromValue + Default + Eq + Hash + Send,
    V: Element,
{
    fn shape() -> Shape {
        match V::kind() {
            ElementKind::Scalar => Shape::KeyedMapToScalar,
            ElementKind::Record | ElementKind::Mapping => Shape::KeyedMapToRecord,
        }
    }

    fn prepare(&mut self, columns: &[String], registry: &Registry) -> OrmResult<ScanPlan> {
        let plan = map_plan::<V>(columns, registry)?;
        self.clear();
        Ok(plan)
    }

    fn accept(&mut self, plan: &ScanPlan, row: Vec<Value>) -> OrmResult<()> {
        let key = map_key::<K>(plan, &row)?;
        let mut value = V::default();
        value.decode(plan, row)?;
        self.insert(key, value);
        Ok(())
    }
}

impl<K, E> Destination for HashMap<K, Vec<E>>
where
    K: FromValue + Default + Eq + Hash + Send,
    E: Element,
{
    fn shape() -> Shape {
        Shape::KeyedMapToRecordSequence
    }

    fn prepare(&mut self, columns: &[String], registry: &Registry) -> OrmResult<ScanPlan> {
        let plan = map_plan::<E>(columns, registry)?;
        self.clear();
        Ok(plan)
    }

    fn accept(&mut self, plan: &ScanPlan, row: Vec<Value>) -> OrmResult<()> {
        let key = map_key::<K>(plan, &row)?;
        let mut element = E::default();
        element.decode(plan, row)?;
        self.entry(key).or_default().push(element);
        Ok(())
    }
}
