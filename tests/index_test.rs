mod common;

use common::{fixtures, params, Fixture};
use graphcore::{Label, Value};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_value(rng: &mut StdRng) -> Value {
    match rng.gen_range(0..10) {
        0..=5 => Value::Integer(rng.gen_range(-20..20)),
        6 | 7 => Value::Float(rng.gen_range(-20..20) as f64 / 2.0),
        8 => Value::from(["a", "b", "c"][rng.gen_range(0..3)]),
        _ => Value::Null,
    }
}

fn ids(f: &Fixture, query: &str, p: &[(&str, Value)]) -> Vec<Value> {
    f.run_with(query, &params(p)).rows.iter().map(|r| r[0].clone()).collect()
}

#[test]
fn test_index_seek_matches_label_scan() {
    let queries = [
        ("MATCH (n:Item) WHERE n.v = $x RETURN id(n) AS id ORDER BY id", "x"),
        ("MATCH (n:Item) WHERE n.v > $x RETURN id(n) AS id ORDER BY id", "x"),
        ("MATCH (n:Item) WHERE n.v <= $x RETURN id(n) AS id ORDER BY id", "x"),
        ("MATCH (n:Item) WHERE n.v >= $x AND n.v < $x + 5 RETURN id(n) AS id ORDER BY id", "x"),
        ("MATCH (n:Item) WHERE n.v IN [$x, 3, 'b'] RETURN id(n) AS id ORDER BY id", "x"),
        ("MATCH (n:Item {v: $x}) RETURN id(n) AS id ORDER BY id", "x"),
    ];

    for f in fixtures() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for _ in 0..150 {
            let v = random_value(&mut rng);
            f.run_with("CREATE (:Item {v: $v})", &params(&[("v", v)]));
        }
        // Non-item nodes share the property and must never leak into results
        f.run("CREATE (:Other {v: 1}), (:Other {v: 'a'})");

        let lookups: Vec<Value> = (0..20).map(|_| random_value(&mut rng)).collect();
        let mut expected = Vec::new();
        for (query, name) in queries {
            for lookup in &lookups {
                if lookup.is_null() {
                    continue;
                }
                expected.push(ids(&f, query, &[(name, lookup.clone())]));
            }
        }

        f.run("CREATE INDEX ON :Item(v)");
        let mut actual = Vec::new();
        for (query, name) in queries {
            for lookup in &lookups {
                if lookup.is_null() {
                    continue;
                }
                actual.push(ids(&f, query, &[(name, lookup.clone())]));
            }
        }
        assert_eq!(expected, actual, "{}", f.name);

        // Index maintenance on update and delete
        f.run("MATCH (n:Item) WHERE n.v = 3 SET n.v = 1000");
        assert!(ids(&f, "MATCH (n:Item) WHERE n.v = 3 RETURN id(n) AS id", &[]).is_empty());
        f.run("MATCH (n:Item) WHERE n.v = 1000 DELETE n");
        assert!(ids(&f, "MATCH (n:Item) WHERE n.v = 1000 RETURN id(n) AS id", &[]).is_empty());
    }
}

#[test]
fn test_integer_and_float_keys_are_equal() {
    for f in fixtures() {
        f.run("CREATE INDEX ON :Num(x)");
        f.run("CREATE (:Num {x: 1}), (:Num {x: 1.0}), (:Num {x: 1.5})");
        let result = f.run("MATCH (n:Num) WHERE n.x = 1 RETURN count(n) AS c");
        assert_eq!(result.rows[0][0], Value::Integer(2), "{}", f.name);
        let range = f.run("MATCH (n:Num) WHERE n.x > 1 RETURN n.x AS x");
        assert_eq!(range.rows, vec![vec![Value::Float(1.5)]]);
    }
}

#[test]
fn test_explain_shows_index_seek() {
    let f = Fixture::memory();
    f.run("CREATE INDEX FOR (p:Person) ON (p.name)");
    assert!(f.engine.storage().has_index(&Label::new("Person"), "name"));

    let plan = f.run("EXPLAIN MATCH (p:Person) WHERE p.name = 'Ada' RETURN p");
    let operators: Vec<Value> = plan.rows.iter().map(|r| r[0].clone()).collect();
    assert!(operators.contains(&Value::from("NodeIndexSeek")), "{:?}", operators);
    // The full predicate is still checked after the seek
    assert!(operators.contains(&Value::from("Filter")), "{:?}", operators);

    let range = f.run("EXPLAIN MATCH (p:Person) WHERE p.name >= 'A' RETURN p");
    assert!(range.rows.iter().any(|r| r[0] == Value::from("NodeIndexSeekByRange")));

    f.run("DROP INDEX ON :Person(name)");
    let scan = f.run("EXPLAIN MATCH (p:Person) WHERE p.name = 'Ada' RETURN p");
    assert!(scan.rows.iter().any(|r| r[0] == Value::from("NodeByLabelScan")));
}

#[test]
fn test_index_backfills_existing_nodes() {
    for f in fixtures() {
        f.run("UNWIND range(1, 50) AS i CREATE (:Row {i: i})");
        assert_eq!(f.run("CREATE INDEX ON :Row(i)").stats.indexes_added, 1);
        let result = f.run("MATCH (r:Row) WHERE r.i >= 48 RETURN r.i AS i ORDER BY i");
        assert_eq!(
            result.rows,
            vec![vec![Value::Integer(48)], vec![Value::Integer(49)], vec![Value::Integer(50)]]
        );
    }
}
