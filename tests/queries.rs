//! Dispatcher flows: insert/match/delete/update, session and transaction
//! kind checks, aggregates, and grouping.

use motif::{
    Aggregate, Conjunction, Database, DeleteQuery, Definition, InsertQuery, Label, Numeric,
    Options, Predicate, SessionType, TransactionType, UpdateQuery, Value, ValueType,
};

fn company_database() -> Database {
    let db = Database::new();
    let mut txn = db.transaction(SessionType::Schema, TransactionType::Write);
    txn.define(&[
        Definition::EntityType {
            label: Label::of("person"),
        },
        Definition::AttributeType {
            label: Label::of("name"),
            value_type: ValueType::String,
        },
        Definition::AttributeType {
            label: Label::of("age"),
            value_type: ValueType::Long,
        },
        Definition::Owns {
            owner: Label::of("person"),
            attribute: Label::of("name"),
            is_key: false,
        },
        Definition::Owns {
            owner: Label::of("person"),
            attribute: Label::of("age"),
            is_key: false,
        },
    ])
    .unwrap();
    txn.commit().unwrap();
    db
}

fn insert_person(db: &Database, name: &str, age: i64) {
    let mut insert = Conjunction::new();
    let x = insert.named_thing("x");
    insert.isa_label(x, Label::of("person"));
    let n = insert.named_thing("n");
    insert.value(n, Predicate::Eq, Value::String(name.into()));
    insert.isa_label(n, Label::of("name"));
    insert.has(x, n);
    let a = insert.named_thing("a");
    insert.value(a, Predicate::Eq, Value::Long(age));
    insert.isa_label(a, Label::of("age"));
    insert.has(x, a);

    let mut txn = db.transaction(SessionType::Data, TransactionType::Write);
    txn.insert(&InsertQuery { when: None, insert }, &Options::default())
        .unwrap();
    txn.commit().unwrap();
}

fn person_age_pattern() -> Conjunction {
    let mut conj = Conjunction::new();
    let x = conj.named_thing("x");
    conj.isa_label(x, Label::of("person"));
    let a = conj.named_thing("a");
    conj.isa_label(a, Label::of("age"));
    conj.has(x, a);
    conj
}

#[test]
fn insert_then_match_roundtrip() {
    let db = company_database();
    insert_person(&db, "alice", 34);
    insert_person(&db, "bob", 41);

    let txn = db.transaction(SessionType::Data, TransactionType::Read);
    let answers: Vec<_> = txn
        .match_(&person_age_pattern(), &Options::default())
        .unwrap()
        .collect::<motif::Result<_>>()
        .unwrap();
    assert_eq!(answers.len(), 2);
}

#[test]
fn writes_are_rejected_in_read_transactions_and_schema_sessions() {
    let db = company_database();
    let insert = InsertQuery {
        when: None,
        insert: {
            let mut conj = Conjunction::new();
            let x = conj.named_thing("x");
            conj.isa_label(x, Label::of("person"));
            conj
        },
    };

    let mut read_txn = db.transaction(SessionType::Data, TransactionType::Read);
    assert_eq!(
        read_txn.insert(&insert, &Options::default()).unwrap_err().code(),
        303
    );

    let mut schema_txn = db.transaction(SessionType::Schema, TransactionType::Write);
    assert_eq!(
        schema_txn.insert(&insert, &Options::default()).unwrap_err().code(),
        301
    );

    let mut data_txn = db.transaction(SessionType::Data, TransactionType::Write);
    assert_eq!(
        data_txn
            .define(&[Definition::EntityType {
                label: Label::of("city"),
            }])
            .unwrap_err()
            .code(),
        302
    );
}

#[test]
fn aggregates_over_age() {
    let db = company_database();
    insert_person(&db, "alice", 34);
    insert_person(&db, "bob", 40);

    let txn = db.transaction(SessionType::Data, TransactionType::Read);
    let pattern = person_age_pattern();
    let options = Options::default();

    assert_eq!(
        txn.match_aggregate(&pattern, &options, &Aggregate::Count).unwrap(),
        Numeric::Long(2)
    );
    assert_eq!(
        txn.match_aggregate(&pattern, &options, &Aggregate::Sum("a".into()))
            .unwrap(),
        Numeric::Long(74)
    );
    assert_eq!(
        txn.match_aggregate(&pattern, &options, &Aggregate::Min("a".into()))
            .unwrap(),
        Numeric::Long(34)
    );
    assert_eq!(
        txn.match_aggregate(&pattern, &options, &Aggregate::Max("a".into()))
            .unwrap(),
        Numeric::Long(40)
    );
    assert_eq!(
        txn.match_aggregate(&pattern, &options, &Aggregate::Mean("a".into()))
            .unwrap(),
        Numeric::Double(37.0)
    );
}

#[test]
fn group_by_owner() {
    let db = company_database();
    insert_person(&db, "alice", 34);
    insert_person(&db, "bob", 40);

    let txn = db.transaction(SessionType::Data, TransactionType::Read);
    let groups = txn
        .match_group(&person_age_pattern(), &Options::default(), "x")
        .unwrap();
    assert_eq!(groups.len(), 2);
    for (_, members) in groups {
        assert_eq!(members.len(), 1);
    }
}

#[test]
fn delete_removes_matched_things() {
    let db = company_database();
    insert_person(&db, "alice", 34);

    // delete the age attribute binding via its owner match
    let mut txn = db.transaction(SessionType::Data, TransactionType::Write);
    txn.delete(
        &DeleteQuery {
            when: person_age_pattern(),
            concepts: vec!["a".into()],
        },
        &Options::default(),
    )
    .unwrap();
    txn.commit().unwrap();

    let txn = db.transaction(SessionType::Data, TransactionType::Read);
    let remaining: Vec<_> = txn
        .match_(&person_age_pattern(), &Options::default())
        .unwrap()
        .collect::<motif::Result<_>>()
        .unwrap();
    assert!(remaining.is_empty());
}

#[test]
fn update_replaces_an_attribute() {
    let db = company_database();
    insert_person(&db, "alice", 34);

    let mut insert = Conjunction::new();
    let x = insert.named_thing("x");
    insert.isa_label(x, Label::of("person"));
    let a = insert.named_thing("a2");
    insert.value(a, Predicate::Eq, Value::Long(35));
    insert.isa_label(a, Label::of("age"));
    insert.has(x, a);

    let mut txn = db.transaction(SessionType::Data, TransactionType::Write);
    txn.update(
        &UpdateQuery {
            when: person_age_pattern(),
            delete: vec!["a".into()],
            insert,
        },
        &Options::default(),
    )
    .unwrap();
    txn.commit().unwrap();

    let txn = db.transaction(SessionType::Data, TransactionType::Read);
    let mut ages = Conjunction::new();
    let p = ages.named_thing("x");
    ages.isa_label(p, Label::of("person"));
    let v = ages.named_thing("a");
    ages.isa_label(v, Label::of("age"));
    ages.has(p, v);
    let answers: Vec<_> = txn
        .match_(&ages, &Options::default())
        .unwrap()
        .collect::<motif::Result<_>>()
        .unwrap();
    assert_eq!(answers.len(), 1);
    let motif::Concept::Thing(age_iid) = answers[0].get("a").unwrap() else {
        panic!()
    };
    assert_eq!(age_iid.value().unwrap(), Value::Long(35));
}

#[test]
fn insert_violations_surface_typed_errors() {
    let db = company_database();
    let mut txn = db.transaction(SessionType::Data, TransactionType::Write);

    // no isa
    let mut no_isa = Conjunction::new();
    no_isa.named_thing("x");
    assert_eq!(
        txn.insert(
            &InsertQuery { when: None, insert: no_isa },
            &Options::default()
        )
        .unwrap_err()
        .code(),
        201
    );

    // two isa constraints
    let mut two_isa = Conjunction::new();
    let x = two_isa.named_thing("x");
    two_isa.isa_label(x, Label::of("person"));
    two_isa.isa_label(x, Label::of("person"));
    assert_eq!(
        txn.insert(
            &InsertQuery { when: None, insert: two_isa },
            &Options::default()
        )
        .unwrap_err()
        .code(),
        202
    );

    // attribute without a value
    let mut no_value = Conjunction::new();
    let a = no_value.named_thing("a");
    no_value.isa_label(a, Label::of("name"));
    assert_eq!(
        txn.insert(
            &InsertQuery { when: None, insert: no_value },
            &Options::default()
        )
        .unwrap_err()
        .code(),
        203
    );
}

#[test]
fn explain_names_the_planned_walk() {
    let db = company_database();
    insert_person(&db, "alice", 34);

    let txn = db.transaction(SessionType::Data, TransactionType::Read);
    let summary = txn.explain(&person_age_pattern()).unwrap();
    assert!(summary.contains("start="));
    assert!(summary.contains("isa") || summary.contains("has"));
}

#[test]
fn parallel_match_agrees_with_serial() {
    let db = company_database();
    for i in 0..6 {
        insert_person(&db, &format!("p{i}"), 20 + i);
    }
    let txn = db.transaction(SessionType::Data, TransactionType::Read);
    let mut serial: Vec<_> = txn
        .match_(&person_age_pattern(), &Options::default())
        .unwrap()
        .collect::<motif::Result<_>>()
        .unwrap();
    let mut parallel: Vec<_> = txn
        .match_(&person_age_pattern(), &Options::default().parallel(true))
        .unwrap()
        .collect::<motif::Result<_>>()
        .unwrap();
    serial.sort();
    parallel.sort();
    assert_eq!(serial, parallel);
}
