use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use graphcore::{EngineConfig, MemoryEngine, Params, QueryEngine, Value};
use std::sync::Arc;

/// Engine without result caching so every iteration really executes
fn engine_with_people(size: i64, indexed: bool) -> QueryEngine {
    let config = EngineConfig {
        result_cache_capacity: 0,
        ..EngineConfig::default()
    };
    let engine = QueryEngine::new(Arc::new(MemoryEngine::new()), config);
    if indexed {
        engine.execute("CREATE INDEX ON :Person(id)", &Params::new()).unwrap();
    }
    let mut params = Params::new();
    params.insert("n".to_string(), Value::Integer(size));
    engine
        .execute(
            "UNWIND range(0, $n - 1) AS i CREATE (:Person {id: i, name: 'Person' + i, age: i % 100})",
            &params,
        )
        .unwrap();
    engine
        .execute(
            "MATCH (a:Person), (b:Person) WHERE b.id = a.id + 1 AND a.id % 10 <> 0 CREATE (a)-[:KNOWS]->(b)",
            &params,
        )
        .unwrap();
    engine
}

fn bench_parse(c: &mut Criterion) {
    let query = "MATCH (a:Person)-[:KNOWS*1..3]->(b:Person) WHERE a.age > 30 AND b.name STARTS WITH 'P' \
                 RETURN b.age AS age, count(DISTINCT b) AS n ORDER BY n DESC LIMIT 10";
    c.bench_function("parse_statement", |b| {
        b.iter(|| graphcore::query::parse_statement(query).unwrap())
    });
}

fn bench_point_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("point_lookup");
    for indexed in [false, true] {
        let engine = engine_with_people(1_000, indexed);
        let mut params = Params::new();
        params.insert("id".to_string(), Value::Integer(500));
        let label = if indexed { "index_seek" } else { "label_scan" };
        group.bench_function(label, |b| {
            b.iter(|| {
                engine
                    .execute("MATCH (p:Person) WHERE p.id = $id RETURN p.name", &params)
                    .unwrap()
            })
        });
    }
    group.finish();
}

fn bench_aggregation(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregation");
    for size in [100, 1_000, 10_000] {
        let engine = engine_with_people(size, false);
        group.bench_with_input(BenchmarkId::from_parameter(size), &engine, |b, engine| {
            b.iter(|| {
                engine
                    .execute(
                        "MATCH (p:Person) WHERE p.age >= 18 RETURN p.age % 10 AS bucket, count(*) AS n",
                        &Params::new(),
                    )
                    .unwrap()
            })
        });
    }
    group.finish();
}

fn bench_expand(c: &mut Criterion) {
    let engine = engine_with_people(1_000, true);
    c.bench_function("var_length_expand", |b| {
        b.iter(|| {
            engine
                .execute(
                    "MATCH (a:Person {id: 1})-[:KNOWS*1..5]->(b) RETURN count(b)",
                    &Params::new(),
                )
                .unwrap()
        })
    });
}

fn bench_create(c: &mut Criterion) {
    c.bench_function("create_node", |b| {
        let engine = QueryEngine::in_memory();
        b.iter(|| {
            engine
                .execute("CREATE (:Event {kind: 'tick', at: 1})", &Params::new())
                .unwrap()
        })
    });
}

criterion_group!(
    benches,
    bench_parse,
    bench_point_lookup,
    bench_aggregation,
    bench_expand,
    bench_create
);
criterion_main!(benches);
