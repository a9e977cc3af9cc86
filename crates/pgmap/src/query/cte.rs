//! Common table expressions and self-referential traversal.

use super::{Query, Subject, sub_error};
use crate::clause::{Column, Conditions, CteDef, Fragment, SubQuery};
use crate::error::{OrmError, OrmResult};
use crate::ident::Ident;
use crate::meta::Record;
use std::any::type_name;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    /// Walk towards the root: `node.key = node_cte.parent`.
    Parents,
    /// Walk towards the leaves: `node.parent = node_cte.key`.
    Children,
}

impl<T: Record> Query<T> {
    /// Attach `WITH name(columns) AS (sub)`.
    pub fn with_cte(self, sub: &SubQuery, name: &str, columns: &[&str]) -> Self {
        self.add_cte(sub, name, columns, false)
    }

    /// Attach `WITH RECURSIVE name(columns) AS (sub)`.
    ///
    /// `sub` is normally an anchor query with the recursive step added via
    /// [`Query::union_all`]:
    ///
    /// ```ignore
    /// let step = registry
    ///     .query::<Node>()
    ///     .select(&["node.id", "node.parent_id", "node.name"])
    ///     .join("ancestors", |on| on.column("node.id", "=", "ancestors.parent_id"))
    ///     .sub_query();
    /// let body = registry.query::<Node>().where_eq("id", 3).union_all(&step).sub_query();
    /// let (nodes, _) = registry
    ///     .query::<Node>()
    ///     .with_recursive_cte(&body, "ancestors", &[])
    ///     .from("ancestors")
    ///     .get_list(&client)
    ///     .await;
    /// ```
    pub fn with_recursive_cte(self, sub: &SubQuery, name: &str, columns: &[&str]) -> Self {
        self.add_cte(sub, name, columns, true)
    }

    fn add_cte(self, sub: &SubQuery, name: &str, columns: &[&str], recursive: bool) -> Self {
        self.apply(|q| {
            sub_error(&format!("CTE {name}"), sub)?;
            let name = Ident::parse(name)?;
            if q.ctes.iter().any(|c| c.name == name) {
                return Err(OrmError::builder(format!("CTE {name} is defined twice")));
            }
            let columns = columns
                .iter()
                .map(|c| Ident::parse(c))
                .collect::<OrmResult<Vec<_>>>()?;
            q.ctes.push(CteDef {
                name,
                recursive,
                columns,
                body: sub.fragment.clone(),
            });
            Ok(())
        })
    }

    /// Select the current rows and all their ancestors.
    ///
    /// `parent_column` names the column pointing at the parent row; the key
    /// it refers to is the record's declared key (`#[orm(id)]`). The query
    /// becomes `SELECT * FROM <table>_cte`; predicates, ordering and limits
    /// added afterwards apply to the traversal result.
    pub fn with_parents_on_column(self, parent_column: &str) -> Self {
        self.traverse(Direction::Parents, parent_column, None)
    }

    /// Like [`Query::with_parents_on_column`] with an explicit key column.
    pub fn with_parents_on_column_keyed(self, parent_column: &str, key_column: &str) -> Self {
        self.traverse(Direction::Parents, parent_column, Some(key_column))
    }

    /// Select the current rows and all their descendants.
    pub fn with_children_on_column(self, parent_column: &str) -> Self {
        self.traverse(Direction::Children, parent_column, None)
    }

    /// Like [`Query::with_children_on_column`] with an explicit key column.
    pub fn with_children_on_column_keyed(self, parent_column: &str, key_column: &str) -> Self {
        self.traverse(Direction::Children, parent_column, Some(key_column))
    }

    fn traverse(self, direction: Direction, parent_column: &str, key: Option<&str>) -> Self {
        self.apply(|q| q.build_traversal(direction, parent_column, key))
    }

    fn build_traversal(
        &mut self,
        direction: Direction,
        parent_column: &str,
        key: Option<&str>,
    ) -> OrmResult<()> {
        let table = Ident::parse(T::TABLE)?;
        let given = Ident::parse(parent_column)?;
        let parent = given.unqualified();
        let key = match key.or(T::key_column()) {
            Some(k) => Ident::parse(k)?.unqualified(),
            None => {
                return Err(OrmError::builder(format!(
                    "{} declares no key column; mark one with #[orm(id)] or pass it explicitly",
                    type_name::<T>()
                )));
            }
        };
        let cte = Ident::parse(&format!("{}_cte", table.bare_name()))?;
        if self.ctes.iter().any(|c| c.name == cte) {
            return Err(OrmError::builder(format!("CTE {cte} is defined twice")));
        }

        let columns: Vec<Column> = if self.columns.is_empty() {
            let meta = self.registry.resolve::<T>()?;
            meta.columns()
                .map(|c| Ident::parse(c).map(|c| Column::Name(Ident::qualified(&table, &c))))
                .collect::<OrmResult<_>>()?
        } else {
            self.columns.iter().map(|c| c.qualify(&table)).collect()
        };

        let on = match direction {
            Direction::Parents => (
                Ident::qualified(&table, &key),
                Ident::qualified(&cte, &parent),
            ),
            Direction::Children => {
                let left = if given.is_qualified() {
                    given
                } else {
                    Ident::qualified(&table, &parent)
                };
                (left, Ident::qualified(&cte, &key))
            }
        };

        // Anchor: the query as configured so far, with the qualified select list.
        self.columns = columns.clone();
        let mut body = Fragment::new();
        self.write_body(&mut body);

        let mut step = Fragment::new();
        step.push("SELECT ");
        for (i, column) in columns.iter().enumerate() {
            if i > 0 {
                step.push(", ");
            }
            column.write(&mut step);
        }
        step.push(" FROM ")
            .push_ident(&table)
            .push(" INNER JOIN ")
            .push_ident(&cte)
            .push(" ON ");
        let on = Conditions::new().column(&on.0.to_sql(), "=", &on.1.to_sql());
        if let Some(e) = on.error() {
            return Err(OrmError::builder(e));
        }
        on.write(&mut step);

        body.push(" UNION ALL ").push_fragment(&step);

        self.ctes.push(CteDef {
            name: cte.clone(),
            recursive: true,
            columns: Vec::new(),
            body,
        });
        self.subject = Some(Subject::Table(cte));
        self.columns.clear();
        self.joins.clear();
        self.wheres = Conditions::new();
        self.unions.clear();
        Ok(())
    }
}
