mod common;

use common::{fixtures, params, strings, Fixture};
use graphcore::{ErrorKind, Params, QueryStats, Value};

#[test]
fn test_create_reports_stats() {
    for f in fixtures() {
        let result = f.run("CREATE (a:Person:Admin {name: 'Ada'})-[:OWNS {since: 1}]->(b:Repo {name: 'core'})");
        assert_eq!(
            result.stats,
            QueryStats {
                nodes_created: 2,
                relationships_created: 1,
                properties_set: 3,
                labels_added: 3,
                ..QueryStats::default()
            },
            "{}",
            f.name
        );
        assert!(result.columns.is_empty());

        let count = f.run("MATCH (a)-[r]->(b) RETURN labels(a) AS l, type(r) AS t, b.name AS b");
        assert_eq!(
            count.rows,
            vec![vec![strings(&["Person", "Admin"]), Value::from("OWNS"), Value::from("core")]]
        );
    }
}

#[test]
fn test_create_per_input_row() {
    for f in fixtures() {
        let result = f.run("UNWIND range(1, 3) AS i CREATE (n:Item {i: i}) RETURN n.i AS i");
        assert_eq!(result.len(), 3);
        assert_eq!(result.stats.nodes_created, 3);
        let total = f.run("MATCH (n:Item) RETURN sum(n.i) AS s");
        assert_eq!(total.rows, vec![vec![Value::Integer(6)]]);
    }
}

#[test]
fn test_set_and_remove() {
    for f in fixtures() {
        f.run("CREATE (:Person {name: 'Ada', age: 36, tmp: 1})");

        let set = f.run("MATCH (p:Person) SET p.age = p.age + 1, p:Engineer, p.tmp = null RETURN p.age AS age");
        assert_eq!(set.rows, vec![vec![Value::Integer(37)]], "{}", f.name);
        assert_eq!(set.stats.labels_added, 1);

        let merged = f.run("MATCH (p:Person) SET p += {city: 'London', age: 40} RETURN keys(p) AS k");
        assert_eq!(merged.rows, vec![vec![strings(&["age", "city", "name"])]]);

        f.run("MATCH (p:Person) REMOVE p.city, p:Engineer");
        let after = f.run("MATCH (p:Person) RETURN p.city AS city, labels(p) AS l, p.age AS age");
        assert_eq!(after.rows, vec![vec![Value::Null, strings(&["Person"]), Value::Integer(40)]]);

        let replaced = f.run("MATCH (p:Person) SET p = {name: 'Augusta'} RETURN properties(p) AS props");
        match &replaced.rows[0][0] {
            Value::Map(m) => {
                assert_eq!(m.len(), 1);
                assert_eq!(m["name"], Value::from("Augusta"));
            }
            other => panic!("expected map, got {:?}", other),
        }
    }
}

#[test]
fn test_set_relationship_property() {
    for f in fixtures() {
        f.run("CREATE (:A)-[:R {w: 1}]->(:B)");
        f.run("MATCH ()-[r:R]->() SET r.w = r.w * 10, r.tag = 'x'");
        let result = f.run("MATCH ()-[r:R]->() RETURN r.w AS w, r.tag AS tag");
        assert_eq!(result.rows, vec![vec![Value::Integer(10), Value::from("x")]]);
    }
}

#[test]
fn test_set_unstorable_value_fails() {
    let f = Fixture::memory();
    f.run("CREATE (:A)");
    let err = f.engine.execute("MATCH (a:A) SET a.m = {k: 1}", &Params::new()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Runtime);
    let err = f.engine.execute("MATCH (a:A) SET a.xs = [1, 'a']", &Params::new()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Runtime);
}

#[test]
fn test_delete_requires_detach() {
    for f in fixtures() {
        f.run("CREATE (:A {k: 1})-[:R]->(:B), (:A {k: 2})");

        let err = f.engine.execute("MATCH (a:A) DELETE a", &Params::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConstraintViolation, "{}", f.name);
        // Nothing was deleted, not even the unconnected node
        assert_eq!(f.run("MATCH (a:A) RETURN count(a) AS c").rows[0][0], Value::Integer(2));

        let result = f.run("MATCH (a:A) DETACH DELETE a");
        assert_eq!(result.stats.nodes_deleted, 2);
        assert_eq!(result.stats.relationships_deleted, 1);
        assert_eq!(f.run("MATCH (n) RETURN count(n) AS c").rows[0][0], Value::Integer(1));
        assert_eq!(f.run("MATCH ()-[r]->() RETURN count(r) AS c").rows[0][0], Value::Integer(0));
    }
}

#[test]
fn test_detach_delete_removes_exactly_incident_edges() {
    for f in fixtures() {
        f.run(
            "CREATE (hub:Hub), (a:Leaf), (b:Leaf), (c:Leaf), \
                    (hub)-[:L]->(a), (hub)-[:L]->(b), (c)-[:L]->(hub), (a)-[:L]->(b)",
        );
        assert!(f.engine.execute("MATCH (h:Hub) DELETE h", &Params::new()).is_err());
        assert_eq!(f.run("MATCH ()-[r]->() RETURN count(r) AS c").rows[0][0], Value::Integer(4));

        let result = f.run("MATCH (h:Hub) DETACH DELETE h");
        assert_eq!(result.stats.nodes_deleted, 1, "{}", f.name);
        assert_eq!(result.stats.relationships_deleted, 3, "{}", f.name);
        assert_eq!(f.run("MATCH ()-[r]->() RETURN count(r) AS c").rows[0][0], Value::Integer(1));
        assert_eq!(f.run("MATCH (n:Leaf) RETURN count(n) AS c").rows[0][0], Value::Integer(3));
    }
}

#[test]
fn test_delete_relationship_and_node_together() {
    for f in fixtures() {
        f.run("CREATE (:A)-[:R]->(:B)");
        let result = f.run("MATCH (a:A)-[r:R]->(b) DELETE r, a");
        assert_eq!(result.stats.nodes_deleted, 1);
        assert_eq!(result.stats.relationships_deleted, 1);
        assert_eq!(f.run("MATCH (n) RETURN labels(n) AS l").rows, vec![vec![strings(&["B"])]]);
    }
}

#[test]
fn test_ids_never_reused() {
    for f in fixtures() {
        let first = f.run("CREATE (n:T) RETURN id(n) AS id").rows[0][0].clone();
        f.run("MATCH (n:T) DELETE n");
        let second = f.run("CREATE (n:T) RETURN id(n) AS id").rows[0][0].clone();
        match (first, second) {
            (Value::Integer(a), Value::Integer(b)) => assert!(b > a, "{}: {} then {}", f.name, a, b),
            other => panic!("unexpected ids {:?}", other),
        }
    }
}

#[test]
fn test_merge_match_or_create() {
    for f in fixtures() {
        let query = "MERGE (p:Person {name: $name}) \
                     ON CREATE SET p.created = true \
                     ON MATCH SET p.seen = true \
                     RETURN p.created AS created, p.seen AS seen";
        let p = params(&[("name", Value::from("Ada"))]);

        let created = f.run_with(query, &p);
        assert_eq!(created.rows, vec![vec![Value::Boolean(true), Value::Null]]);
        assert_eq!(created.stats.nodes_created, 1);

        let matched = f.run_with(query, &p);
        assert_eq!(matched.rows, vec![vec![Value::Boolean(true), Value::Boolean(true)]]);
        assert_eq!(matched.stats.nodes_created, 0);
        assert_eq!(f.run("MATCH (p:Person) RETURN count(p) AS c").rows[0][0], Value::Integer(1));
    }
}

#[test]
fn test_merge_yields_every_match() {
    let f = Fixture::memory();
    f.run("CREATE (:Tag {name: 'x'}), (:Tag {name: 'x'})");
    let result = f.run("MERGE (t:Tag {name: 'x'}) RETURN t");
    assert_eq!(result.len(), 2);
    assert!(!result.stats.contains_updates());
}

#[test]
fn test_merge_relationship_between_bound_nodes() {
    for f in fixtures() {
        f.run("CREATE (:P {name: 'a'}), (:P {name: 'b'})");
        let query = "MATCH (a:P {name: 'a'}), (b:P {name: 'b'}) MERGE (a)-[:KNOWS]->(b)";
        assert_eq!(f.run(query).stats.relationships_created, 1);
        assert_eq!(f.run(query).stats.relationships_created, 0);
        assert_eq!(f.run("MATCH (:P)-[r:KNOWS]->(:P) RETURN count(r) AS c").rows[0][0], Value::Integer(1));
    }
}

#[test]
fn test_concurrent_merge_creates_once() {
    for f in fixtures() {
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..10 {
                        f.run("MERGE (:Singleton {key: 'only'})");
                    }
                });
            }
        });
        let count = f.run("MATCH (n:Singleton) RETURN count(n) AS c");
        assert_eq!(count.rows[0][0], Value::Integer(1), "{}", f.name);
    }
}

#[test]
fn test_concurrent_reads_and_writes() {
    let f = Fixture::memory();
    std::thread::scope(|s| {
        for t in 0..4 {
            let f = &f;
            s.spawn(move || {
                for i in 0..25 {
                    f.run_with(
                        "CREATE (:W {t: $t, i: $i})",
                        &params(&[("t", Value::Integer(t)), ("i", Value::Integer(i))]),
                    );
                    f.run("MATCH (w:W) RETURN count(w) AS c");
                }
            });
        }
    });
    assert_eq!(f.run("MATCH (w:W) RETURN count(w) AS c").rows[0][0], Value::Integer(100));
}
