use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use pgmap::{FieldDef, Query, Record, Registry};

#[derive(Debug, Default)]
struct Node {
    id: i64,
    parent_id: i64,
    name: String,
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

    fn field_mut(&mut self, index: usize) -> Option<&mut dyn pgmap::ColumnSlot> {
        match index {
            0 => Some(&mut self.id),
            1 => Some(&mut self.parent_id),
            2 => Some(&mut self.name),
            _ => None,
        }
    }
}

/// SELECT ... FROM node WHERE id = $1 AND id = $2 ... with `n` predicates.
fn build_query(registry: &Registry, n: usize) -> Query<Node> {
    let mut q = registry.query::<Node>().select(&["id", "parent_id", "name"]);
    for i in 0..n {
        q = q.where_eq("id", i as i64);
    }
    q.order_by("id").limit(100)
}

fn bench_compile(c: &mut Criterion) {
    let registry = Registry::new();
    let mut group = c.benchmark_group("sql_builder/compile");

    for n in [1, 5, 10, 50, 100] {
        let q = build_query(&registry, n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &q, |b, q| {
            b.iter(|| black_box(q.compile()));
        });
    }

    group.finish();
}

fn bench_build_and_compile(c: &mut Criterion) {
    let registry = Registry::new();
    let mut group = c.benchmark_group("sql_builder/build_and_compile");

    for n in [1, 5, 10, 50, 100] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| black_box(build_query(&registry, n).compile()));
        });
    }

    group.finish();
}

fn bench_where_in(c: &mut Criterion) {
    let registry = Registry::new();
    let mut group = c.benchmark_group("sql_builder/where_in");

    for n in [5, 20, 100, 500] {
        let values: Vec<i64> = (0..n).collect();
        group.bench_with_input(BenchmarkId::from_parameter(n), &values, |b, values| {
            b.iter(|| {
                let q = registry
                    .query::<Node>()
                    .where_in("id", values.iter().copied());
                black_box(q.compile());
            });
        });
    }

    group.finish();
}

fn bench_traversal(c: &mut Criterion) {
    let registry = Registry::new();
    c.bench_function("sql_builder/traversal", |b| {
        b.iter(|| {
            let q = registry
                .query::<Node>()
                .where_eq("id", 3i64)
                .with_parents_on_column("parent_id");
            black_box(q.compile());
        });
    });
}

criterion_group!(
    benches,
    bench_compile,
    bench_build_and_compile,
    bench_where_in,
    bench_traversal
);
criterion_main!(benches);
