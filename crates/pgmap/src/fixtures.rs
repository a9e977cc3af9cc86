//! Records shared by unit tests.

use crate::meta::{FieldDef, Record};
use crate::value::ColumnSlot;

#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct Node {
    pub id: i64,
    pub parent_id: i64,
    pub name: String,
}

impl Record for Node {
    const TABLE: &'static str = "node";

    fn fields() -> &'static [FieldDef] {
        &[
            FieldDef {
                name: "id",
                column: "id",
            },
            FieldDef {
                name: "parent_id",
                column: "parent_id",
            },
            FieldDef {
                name: "name",
                column: "name",
            },
        ]
    }

    fn key_column() -> Option<&'static str> {
        Some("id")
    }

    fn field_mut(&mut self, index: usize) -> Option<&mut dyn ColumnSlot> {
        match index {
            0 => Some(&mut self.id),
            1 => Some(&mut self.parent_id),
            2 => Some(&mut self.name),
            _ => None,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct Person {
    pub name: String,
    pub age: Option<i32>,
}

impl Record for Person {
    const TABLE: &'static str = "person";

    fn fields() -> &'static [FieldDef] {
        &[
            FieldDef {
                name: "name",
                column: "name",
            },
            FieldDef {
                name: "age",
                column: "age",
            },
        ]
    }

    fn field_mut(&mut self, index: usize) -> Option<&mut dyn ColumnSlot> {
        match index {
            0 => Some(&mut self.name),
            1 => Some(&mut self.age),
            _ => None,
        }
    }
}

/// A record whose second field cannot be addressed.
#[derive(Debug, Default)]
pub(crate) struct Sealed {
    pub id: i64,
}

impl Record for Sealed {
    const TABLE: &'static str = "sealed";

    fn fields() -> &'static [FieldDef] {
        &[
            FieldDef {
                name: "id",
                column: "id",
            },
            FieldDef {
                name: "secret",
                column: "secret",
            },
        ]
    }

    fn field_mut(&mut self, index: usize) -> Option<&mut dyn ColumnSlot> {
        match index {
            0 => Some(&mut self.id),
            _ => None,
        }
    }
}

pub(crate) fn columns(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}
