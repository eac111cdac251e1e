use graphcore::{EngineConfig, Label, Params, QueryEngine, RocksEngine, StorageConfig, Value};
use std::sync::Arc;
use tempfile::TempDir;

fn open(dir: &TempDir) -> QueryEngine {
    QueryEngine::new(Arc::new(RocksEngine::open(dir.path()).unwrap()), EngineConfig::default())
}

fn run(engine: &QueryEngine, query: &str) -> Vec<Vec<Value>> {
    engine.execute(query, &Params::new()).unwrap().rows.clone()
}

#[test]
fn test_graph_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let last_id = {
        let engine = open(&dir);
        run(&engine, "CREATE INDEX ON :City(name)");
        run(
            &engine,
            "CREATE (:City {name: 'Lisbon', pop: 545000, coords: [38.7, -9.1]})-[:ROAD {km: 313}]->(:City {name: 'Porto'})",
        );
        run(&engine, "CREATE (g:Ghost) DELETE g");
        let rows = run(&engine, "MATCH (n) RETURN max(id(n)) AS id");
        engine.storage().flush().unwrap();
        rows[0][0].clone()
    };

    let engine = open(&dir);
    assert!(engine.storage().has_index(&Label::new("City"), "name"));
    assert_eq!(
        run(
            &engine,
            "MATCH (a:City {name: 'Lisbon'})-[r:ROAD]->(b) RETURN a.pop, a.coords, r.km, b.name"
        ),
        vec![vec![
            Value::Integer(545000),
            Value::List(vec![Value::Float(38.7), Value::Float(-9.1)]),
            Value::Integer(313),
            Value::from("Porto"),
        ]]
    );

    // Counters are durable: the deleted node's id is not handed out again
    let Value::Integer(before) = last_id else {
        panic!("expected integer id, got {:?}", last_id)
    };
    let created = run(&engine, "CREATE (n:City {name: 'Faro'}) RETURN id(n) AS id");
    match &created[0][0] {
        Value::Integer(id) => assert!(*id > before + 1, "{} reused after {}", id, before),
        other => panic!("unexpected {:?}", other),
    }

    // The rebuilt index serves lookups
    let plan = run(&engine, "EXPLAIN MATCH (c:City) WHERE c.name = 'Faro' RETURN c");
    assert!(plan.iter().any(|r| r[0] == Value::from("NodeIndexSeek")));
    assert_eq!(
        run(&engine, "MATCH (c:City) WHERE c.name = 'Faro' RETURN c.name"),
        vec![vec![Value::from("Faro")]]
    );
}

#[test]
fn test_failed_delete_leaves_durable_state_intact() {
    let dir = TempDir::new().unwrap();
    {
        let engine = open(&dir);
        run(&engine, "CREATE (:A)-[:R]->(:B)");
        assert!(engine.execute("MATCH (a:A) DELETE a", &Params::new()).is_err());
    }
    let engine = open(&dir);
    assert_eq!(run(&engine, "MATCH (a:A)-[:R]->(b:B) RETURN count(*) AS c"), vec![vec![Value::Integer(1)]]);
}

#[test]
fn test_open_from_config() {
    let dir = TempDir::new().unwrap();
    let config = EngineConfig {
        storage: StorageConfig::Rocksdb {
            path: dir.path().join("graph"),
        },
        database: "cities".to_string(),
        ..EngineConfig::default()
    };
    let engine = QueryEngine::open(config).unwrap();
    assert_eq!(engine.storage().name(), "rocksdb");
    let rows = run(&engine, "CREATE (n:X) RETURN elementId(n) AS e");
    assert_eq!(rows, vec![vec![Value::from("4:cities:0")]]);
}
