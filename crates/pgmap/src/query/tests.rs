use super::*;
use crate::executor::Session;
use crate::fixtures::{Node, Person};
use crate::stub::StubExecutor;
use std::collections::HashMap;

fn nodes(registry: &Registry) -> Query<Node> {
    registry.query::<Node>()
}

fn node_row(id: i64, parent: i64, name: &str) -> Vec<Value> {
    vec![id.into(), parent.into(), name.into()]
}

fn tree_stub() -> StubExecutor {
    StubExecutor::new().with_rows(
        &["id", "parent_id", "name"],
        vec![node_row(3, 2, "leaf"), node_row(2, 1, "mid"), node_row(1, 0, "root")],
    )
}

fn placeholders(sql: &str) -> usize {
    sql.match_indices('$').count()
}

// ==================== Compilation ====================

#[test]
fn defaults_to_select_star_from_record_table() {
    let registry = Registry::new();
    assert_eq!(nodes(&registry).compile().sql, "SELECT * FROM node");
}

#[test]
fn clauses_render_in_fixed_order() {
    let registry = Registry::new();
    // Added out of order on purpose.
    let q = nodes(&registry)
        .for_update()
        .limit(10)
        .order_by_desc("id")
        .offset(20)
        .or_where_null("parent_id")
        .where_eq("name", "a")
        .left_join("tag", |on| on.column("tag.node_id", "=", "node.id"))
        .select(&["id", "name"]);

    let compiled = q.compile();
    assert_eq!(
        compiled.sql,
        "SELECT id, name FROM node LEFT JOIN tag ON tag.node_id = node.id \
         WHERE parent_id IS NULL AND name = $1 ORDER BY id DESC LIMIT 10 OFFSET 20 FOR UPDATE"
    );
    assert_eq!(compiled.bindings, vec![Value::from("a")]);
}

#[test]
fn or_predicates_join_with_or() {
    let registry = Registry::new();
    let sql = nodes(&registry)
        .where_op("id", ">", 10)
        .or_where_null("parent_id")
        .or_where_eq("name", "root")
        .compile()
        .sql;
    assert_eq!(
        sql,
        "SELECT * FROM node WHERE id > $1 OR parent_id IS NULL OR name = $2"
    );
}

#[test]
fn placeholders_are_numbered_across_sub_queries() {
    let registry = Registry::new();
    let sub = nodes(&registry)
        .select(&["id"])
        .where_eq("name", "x")
        .sub_query();
    let compiled = nodes(&registry)
        .where_in("id", [1i64, 2])
        .where_in_sub("parent_id", &sub)
        .where_raw("length(name) > ?", vec![3i64.into()])
        .compile();

    assert_eq!(
        compiled.sql,
        "SELECT * FROM node WHERE id IN ($1, $2) AND parent_id IN \
         (SELECT id FROM node WHERE name = $3) AND length(name) > $4"
    );
    assert_eq!(placeholders(&compiled.sql), compiled.bindings.len());
    assert_eq!(
        compiled.bindings,
        vec![1i64.into(), 2i64.into(), "x".into(), 3i64.into()]
    );
}

#[test]
fn empty_in_list_matches_nothing() {
    let registry = Registry::new();
    let compiled = nodes(&registry)
        .where_in("id", Vec::<i64>::new())
        .where_not_in("parent_id", Vec::<i64>::new())
        .compile();
    assert_eq!(compiled.sql, "SELECT * FROM node WHERE 1=0 AND 1=1");
    assert!(compiled.bindings.is_empty());
}

#[test]
fn groups_are_parenthesised() {
    let registry = Registry::new();
    let sql = nodes(&registry)
        .where_eq("parent_id", 1)
        .where_group(|g| g.eq("name", "a").or_eq("name", "b"))
        .or_where_group(|g| g.null("parent_id"))
        .compile()
        .sql;
    assert_eq!(
        sql,
        "SELECT * FROM node WHERE parent_id = $1 AND (name = $2 OR name = $3) OR (parent_id IS NULL)"
    );
}

#[test]
fn from_sub_and_select_sub() {
    let registry = Registry::new();
    let inner = nodes(&registry).where_eq("name", "a").sub_query();
    let compiled = nodes(&registry)
        .from_sub(&inner, "t")
        .where_op("t.id", ">", 1)
        .compile();
    assert_eq!(
        compiled.sql,
        "SELECT * FROM (SELECT * FROM node WHERE name = $1) AS t WHERE t.id > $2"
    );

    let count = nodes(&registry)
        .select_raw("count(*)", vec![])
        .where_column("parent_id", "=", "node.id")
        .sub_query();
    let sql = nodes(&registry)
        .select(&["id"])
        .select_sub(&count, "children")
        .compile()
        .sql;
    assert_eq!(
        sql,
        "SELECT id, (SELECT count(*) FROM node WHERE parent_id = node.id) AS children FROM node"
    );
}

#[test]
fn union_precedes_order_by() {
    let registry = Registry::new();
    let other = nodes(&registry).where_eq("id", 2).sub_query();
    let sql = nodes(&registry)
        .order_by("id")
        .where_eq("id", 1)
        .union(&other)
        .compile()
        .sql;
    assert_eq!(
        sql,
        "SELECT * FROM node WHERE id = $1 UNION SELECT * FROM node WHERE id = $2 ORDER BY id ASC"
    );
}

#[test]
fn order_by_raw_rejects_statement_breaks() {
    let registry = Registry::new();
    let ok = nodes(&registry).order_by_raw("lower(name) DESC NULLS LAST");
    assert!(ok.error().is_none());
    assert!(ok.compile().sql.ends_with("ORDER BY lower(name) DESC NULLS LAST"));

    let bad = nodes(&registry).order_by_raw("id; DROP TABLE node");
    assert!(bad.error().is_some());
}

// ==================== Sticky errors ====================

#[test]
fn first_error_is_kept() {
    let registry = Registry::new();
    let q = nodes(&registry)
        .where_op("id", "<>>", 1)
        .where_eq("bad column", 2)
        .where_eq("name", "ok");
    let err = q.error().unwrap();
    assert!(err.contains("<>>"), "{err}");
    // Nothing after the failure was recorded.
    assert!(!q.compile().sql.contains("name"));
}

#[test]
fn raw_placeholder_mismatch_is_an_error() {
    let registry = Registry::new();
    let q = nodes(&registry).where_raw("id = ? AND name = ?", vec![1i64.into()]);
    assert!(q.error().is_some());
}

#[test]
fn join_without_on_is_an_error() {
    let registry = Registry::new();
    let q = nodes(&registry).join("tag", |on| on);
    assert!(q.error().unwrap().contains("tag"));
}

#[test]
fn sub_query_errors_propagate() {
    let registry = Registry::new();
    let broken = SubQuery::raw("SELECT id FROM node WHERE id = ?", vec![]);
    assert!(broken.error().is_some());
    assert!(!broken.error().unwrap().starts_with("Builder error"));

    let q = nodes(&registry).from_sub(&broken, "t");
    assert!(q.error().unwrap().contains("placeholder"));

    let q = nodes(&registry).where_in_sub("id", &broken);
    assert!(q.error().is_some());
}

#[tokio::test]
async fn builder_error_skips_the_executor() {
    let registry = Registry::new();
    let stub = tree_stub();
    let (list, result) = nodes(&registry)
        .where_eq("id; --", 1)
        .get_list(&stub)
        .await;

    assert!(list.is_empty());
    assert!(result.error().is_some_and(|e| e.is_builder()));
    assert_eq!(result.sql, "SELECT * FROM node");
    assert_eq!(stub.calls(), 0);
}

// ==================== Traversal ====================

#[test]
fn parents_traversal_sql() {
    let registry = Registry::new();
    let compiled = nodes(&registry)
        .where_eq("id", 3)
        .with_parents_on_column("parent_id")
        .compile();
    assert_eq!(
        compiled.sql,
        "WITH RECURSIVE node_cte AS (SELECT node.id, node.parent_id, node.name FROM node \
         WHERE id = $1 UNION ALL SELECT node.id, node.parent_id, node.name FROM node \
         INNER JOIN node_cte ON node.id = node_cte.parent_id) SELECT * FROM node_cte"
    );
    assert_eq!(compiled.bindings, vec![Value::from(3)]);
}

#[test]
fn children_traversal_sql() {
    let registry = Registry::new();
    let sql = nodes(&registry)
        .where_eq("id", 1)
        .with_children_on_column("node.parent_id")
        .order_by("id")
        .compile()
        .sql;
    assert_eq!(
        sql,
        "WITH RECURSIVE node_cte AS (SELECT node.id, node.parent_id, node.name FROM node \
         WHERE id = $1 UNION ALL SELECT node.id, node.parent_id, node.name FROM node \
         INNER JOIN node_cte ON node.parent_id = node_cte.id) SELECT * FROM node_cte ORDER BY id ASC"
    );
}

#[test]
fn traversal_keeps_quoted_columns() {
    let registry = Registry::new();
    let parents = nodes(&registry)
        .with_parents_on_column_keyed(r#""ParentId""#, r#"node."NodeId""#)
        .compile()
        .sql;
    assert!(
        parents.ends_with(r#"INNER JOIN node_cte ON node."NodeId" = node_cte."ParentId") SELECT * FROM node_cte"#),
        "{parents}"
    );

    let children = nodes(&registry)
        .with_children_on_column(r#"node."Parent.Id""#)
        .compile()
        .sql;
    assert!(
        children.contains(r#"ON node."Parent.Id" = node_cte.id)"#),
        "{children}"
    );
}

#[test]
fn traversal_keeps_the_select_list() {
    let registry = Registry::new();
    let sql = nodes(&registry)
        .select(&["id", "parent_id"])
        .where_eq("id", 3)
        .with_parents_on_column_keyed("parent_id", "id")
        .compile()
        .sql;
    assert!(sql.starts_with(
        "WITH RECURSIVE node_cte AS (SELECT node.id, node.parent_id FROM node WHERE id = $1 \
         UNION ALL SELECT node.id, node.parent_id FROM node"
    ));
}

#[test]
fn traversal_without_key_is_an_error() {
    let registry = Registry::new();
    let q = registry.query::<Person>().with_parents_on_column("parent");
    assert!(q.error().unwrap().contains("#[orm(id)]"));

    let keyed = registry
        .query::<Person>()
        .with_children_on_column_keyed("parent", "name");
    assert!(keyed.error().is_none());
}

#[test]
fn traversal_twice_is_an_error() {
    let registry = Registry::new();
    let q = nodes(&registry)
        .with_parents_on_column("parent_id")
        .with_parents_on_column("parent_id");
    assert!(q.error().unwrap().contains("node_cte"));
}

#[test]
fn explicit_recursive_cte() {
    let registry = Registry::new();
    let step = nodes(&registry)
        .select(&["node.id", "node.parent_id", "node.name"])
        .join("ancestors", |on| on.column("node.id", "=", "ancestors.parent_id"))
        .sub_query();
    let body = nodes(&registry)
        .where_eq("id", 3)
        .union_all(&step)
        .sub_query();
    let sql = nodes(&registry)
        .with_recursive_cte(&body, "ancestors", &[])
        .from("ancestors")
        .compile()
        .sql;
    assert_eq!(
        sql,
        "WITH RECURSIVE ancestors AS (SELECT * FROM node WHERE id = $1 UNION ALL \
         SELECT node.id, node.parent_id, node.name FROM node INNER JOIN ancestors \
         ON node.id = ancestors.parent_id) SELECT * FROM ancestors"
    );
}

#[test]
fn plain_cte_with_columns() {
    let registry = Registry::new();
    let roots = nodes(&registry)
        .select(&["id", "name"])
        .where_null("parent_id")
        .sub_query();
    let sql = nodes(&registry)
        .with_cte(&roots, "roots", &["root_id", "root_name"])
        .from("roots")
        .compile()
        .sql;
    assert_eq!(
        sql,
        "WITH roots(root_id, root_name) AS (SELECT id, name FROM node WHERE parent_id IS NULL) \
         SELECT * FROM roots"
    );

    let twice = nodes(&registry)
        .with_cte(&roots, "roots", &[])
        .with_cte(&roots, "roots", &[]);
    assert!(twice.error().is_some());
}

#[tokio::test]
async fn ancestors_come_back_in_row_order() {
    let registry = Registry::new();
    let stub = tree_stub();
    let (list, result) = nodes(&registry)
        .where_eq("id", 3)
        .with_parents_on_column("parent_id")
        .get_list(&stub)
        .await;

    assert!(result.is_ok(), "{:?}", result.error);
    assert_eq!(result.rows, 3);
    assert_eq!(list.iter().map(|n| n.id).collect::<Vec<_>>(), vec![3, 2, 1]);
    assert_eq!(list[2].name, "root");

    let call = stub.last_call().unwrap();
    assert!(call.sql.starts_with("WITH RECURSIVE node_cte"));
    assert_eq!(call.bindings, vec![Value::from(3)]);
}

// ==================== Execution ====================

#[tokio::test]
async fn get_consumes_one_row() {
    let registry = Registry::new();
    let stub = tree_stub();
    let (node, result) = nodes(&registry).get(&stub).await;

    assert_eq!(node.map(|n| n.id), Some(3));
    assert_eq!(result.rows, 1);
    assert!(result.sql.ends_with("LIMIT 1"));
    assert_eq!(stub.rows_consumed(), 1);
    assert_eq!(stub.open_cursors(), 0);
}

#[tokio::test]
async fn get_on_empty_result_is_none() {
    let registry = Registry::new();
    let stub = StubExecutor::new().with_rows(&["id", "parent_id", "name"], vec![]);
    let (node, result) = nodes(&registry).get(&stub).await;

    assert!(node.is_none());
    assert!(result.is_ok());
    assert_eq!(stub.open_cursors(), 0);
}

#[tokio::test]
async fn null_column_materializes_as_none() {
    let registry = Registry::new();
    let stub = StubExecutor::new().with_rows(&["name", "age"], vec![vec!["ann".into(), Value::Null]]);
    let (person, result) = registry.query::<Person>().get(&stub).await;

    assert!(result.is_ok());
    assert_eq!(
        person,
        Some(Person {
            name: "ann".into(),
            age: None
        })
    );
}

#[tokio::test]
async fn unmapped_column_of_unsupported_type_is_ignored() {
    use crate::value::RawValue;
    use tokio_postgres::types::Type;

    let registry = Registry::new();
    let tags = Value::Raw(RawValue::new(Type::TEXT_ARRAY, vec![0; 20]));
    let stub = StubExecutor::new().with_rows(
        &["id", "parent_id", "name", "tags"],
        vec![vec![1i64.into(), 0i64.into(), "root".into(), tags.clone()]],
    );
    let (list, result) = nodes(&registry).get_list(&stub).await;
    assert!(result.is_ok(), "{:?}", result.error);
    assert_eq!(list[0].name, "root");

    // Asking for it as a typed value fails on that column only.
    let stub = StubExecutor::new().with_rows(&["tags"], vec![vec![tags]]);
    let (_, result) = nodes(&registry)
        .select(&["tags"])
        .get_scalars::<String, _>(&stub)
        .await;
    match result.error {
        Some(OrmError::Decode { ref column, ref message }) => {
            assert_eq!(column, "tags");
            assert!(message.contains("_text"), "{message}");
        }
        ref other => panic!("expected decode error, got {other:?}"),
    }
}

#[tokio::test]
async fn decode_error_releases_cursor() {
    let registry = Registry::new();
    let stub = StubExecutor::new().with_rows(
        &["id", "parent_id", "name"],
        vec![node_row(1, 0, "a"), vec!["x".into(), 0i64.into(), "b".into()]],
    );
    let (list, result) = nodes(&registry).get_list(&stub).await;

    assert_eq!(list.len(), 1);
    assert_eq!(result.rows, 1);
    match result.error {
        Some(OrmError::Decode { ref column, .. }) => assert_eq!(column, "id"),
        ref other => panic!("expected decode error, got {other:?}"),
    }
    assert_eq!(stub.open_cursors(), 0);
}

#[tokio::test]
async fn row_failure_keeps_committed_rows() {
    let registry = Registry::new();
    let stub = tree_stub().failing_at_row(1, "connection reset");
    let (list, result) = nodes(&registry).get_list(&stub).await;

    assert_eq!(list.len(), 1);
    assert!(matches!(result.error, Some(OrmError::Execution(_))));
    assert_eq!(stub.open_cursors(), 0);
}

#[tokio::test]
async fn execute_failure_is_reported() {
    let registry = Registry::new();
    let stub = StubExecutor::new().failing("server closed");
    let (list, result) = nodes(&registry).get_list(&stub).await;

    assert!(list.is_empty());
    assert!(matches!(result.error, Some(OrmError::Execution(ref m)) if m == "server closed"));
    assert_eq!(stub.calls(), 1);
}

#[tokio::test]
async fn timeout_from_context() {
    let registry = Registry::new();
    let stub = tree_stub().with_delay(Duration::from_millis(200));
    let (_, result) = nodes(&registry)
        .with_timeout(Duration::from_millis(10))
        .get_list(&stub)
        .await;
    assert!(result.error().is_some_and(|e| e.is_timeout()));
}

#[tokio::test]
async fn context_is_forwarded() {
    let registry = Registry::new();
    let stub = tree_stub();
    let _ = nodes(&registry).with_tag("node.tree").get_list(&stub).await;

    let call = stub.last_call().unwrap();
    assert_eq!(call.ctx.tag(), Some("node.tree"));
    assert_eq!(call.sql, "SELECT * FROM node");
}

#[tokio::test]
async fn bound_transaction_wins() {
    let registry = Registry::new();
    let conn = StubExecutor::new();
    let tx = tree_stub();

    let session = Session::new(&conn);
    let (list, _) = nodes(&registry).get_list(&session).await;
    assert!(list.is_empty());
    assert_eq!(conn.calls(), 1);

    let session = session.bind_transaction(&tx);
    assert!(session.is_bound());
    let (list, _) = nodes(&registry).get_list(&session).await;
    assert_eq!(list.len(), 3);
    assert_eq!(conn.calls(), 1);
    assert_eq!(tx.calls(), 1);
}

#[tokio::test]
async fn keyed_and_grouped_terminals() {
    let registry = Registry::new();
    let stub = tree_stub();
    let (by_id, result) = nodes(&registry).get_map::<i64, _>(&stub).await;
    assert!(result.is_ok());
    assert_eq!(by_id.len(), 3);
    assert_eq!(by_id[&2].name, "mid");

    let stub = StubExecutor::new().with_rows(
        &["parent_id", "id", "name"],
        vec![
            vec![1i64.into(), 2i64.into(), "a".into()],
            vec![1i64.into(), 3i64.into(), "b".into()],
            vec![2i64.into(), 4i64.into(), "c".into()],
        ],
    );
    let (grouped, result): (HashMap<i64, Vec<Node>>, _) = nodes(&registry)
        .select(&["parent_id", "id", "name"])
        .get_grouped(&stub)
        .await;
    assert!(result.is_ok());
    assert_eq!(
        grouped[&1].iter().map(|n| n.id).collect::<Vec<_>>(),
        vec![2, 3]
    );
    assert_eq!(grouped[&2].len(), 1);
}

#[tokio::test]
async fn scalar_and_row_terminals() {
    let registry = Registry::new();
    let stub = StubExecutor::new().with_rows(&["name"], vec![vec!["a".into()], vec!["b".into()]]);
    let q = nodes(&registry).select(&["name"]);

    let (first, _) = q.get_scalar::<String, _>(&stub).await;
    assert_eq!(first.as_deref(), Some("a"));

    let (all, _) = q.get_scalars::<String, _>(&stub).await;
    assert_eq!(all, vec!["a".to_string(), "b".to_string()]);

    let (row, _) = q.get_row(&stub).await;
    assert_eq!(row.unwrap().get::<String>("name").unwrap(), "a");

    let (rows, result) = q.get_rows(&stub).await;
    assert_eq!(rows.len(), 2);
    assert_eq!(result.rows, 2);
    assert_eq!(stub.open_cursors(), 0);
}
