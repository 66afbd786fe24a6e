//! Rule definition, concludable derivation, and inference end-to-end.

use motif::logic::DerivationMode;
use motif::pattern::Reference;
use motif::{
    Conjunction, Database, Label, Options, RolePlayer, RuleHead, SessionType, TransactionType,
    Value, ValueType,
};

fn marriage_database() -> Database {
    let db = Database::new();
    let schema = db.schema();
    let person = schema.put_entity_type("person").unwrap();
    let friendship = schema.put_relation_type("friendship").unwrap();
    let friend = schema.put_relates(friendship, "friend").unwrap();
    let marriage = schema.put_relation_type("marriage").unwrap();
    let spouse = schema.put_relates(marriage, "spouse").unwrap();
    schema.put_plays(person, friend).unwrap();
    schema.put_plays(person, spouse).unwrap();
    db
}

fn marriage_is_friendship_when() -> Conjunction {
    let mut when = Conjunction::new();
    let x = when.named_thing("x");
    let y = when.named_thing("y");
    when.isa_label(x, Label::of("person"));
    when.isa_label(y, Label::of("person"));
    let rel = when.anon_thing();
    let spouse_a = when.labelled_type(Label::scoped("spouse", "marriage"));
    let spouse_b = when.labelled_type(Label::scoped("spouse", "marriage"));
    when.relation(
        rel,
        vec![
            RolePlayer::new(Some(spouse_a), x),
            RolePlayer::new(Some(spouse_b), y),
        ],
    );
    when.isa_label(rel, Label::of("marriage"));
    when
}

#[test]
fn relation_rule_concludables_are_counted_correctly() {
    let db = marriage_database();
    let mut txn = db.transaction(SessionType::Schema, TransactionType::Write);
    txn.put_rule(
        "marriage-is-friendship",
        marriage_is_friendship_when(),
        RuleHead::Relation {
            relation_type: Label::of("friendship"),
            role_players: vec![
                ("friend".into(), "x".into()),
                ("friend".into(), "y".into()),
            ],
        },
    )
    .unwrap();

    let rule = db.logic().get_rule("marriage-is-friendship").unwrap();
    let schema = db.schema();

    let then = rule.then_concludables(schema);
    assert_eq!(then.iter().filter(|c| c.is_isa()).count(), 1);
    assert_eq!(then.iter().filter(|c| c.is_has()).count(), 0);
    assert_eq!(then.iter().filter(|c| c.is_relation()).count(), 1);
    assert_eq!(then.iter().filter(|c| c.is_value()).count(), 0);

    let when = rule.when_concludables(schema);
    assert_eq!(when.iter().filter(|c| c.is_isa()).count(), 2);
    assert_eq!(when.iter().filter(|c| c.is_has()).count(), 0);
    assert_eq!(when.iter().filter(|c| c.is_relation()).count(), 1);
    assert_eq!(when.iter().filter(|c| c.is_value()).count(), 0);
}

#[test]
fn has_rule_with_variable_attribute_concludables() {
    let db = Database::new();
    let schema = db.schema();
    let milk = schema.put_entity_type("milk").unwrap();
    let age = schema
        .put_attribute_type("age-in-days", ValueType::Long)
        .unwrap();
    let good = schema
        .put_attribute_type("is-still-good", ValueType::Bool)
        .unwrap();
    schema.put_owns(milk, age, false).unwrap();
    schema.put_owns(milk, good, false).unwrap();

    let mut when = Conjunction::new();
    let x = when.named_thing("x");
    when.isa_label(x, Label::of("milk"));
    let a = when.named_thing("a");
    when.value(a, motif::Predicate::Eq, Value::Long(10));
    when.isa_label(a, Label::of("age-in-days"));

    let mut txn = db.transaction(SessionType::Schema, TransactionType::Write);
    txn.put_rule(
        "old-milk-is-not-good",
        when,
        RuleHead::HasVariable {
            owner: "x".into(),
            attribute: "a".into(),
        },
    )
    .unwrap();

    let rule = db.logic().get_rule("old-milk-is-not-good").unwrap();
    let then = rule.then_concludables(schema);
    assert_eq!(then.iter().filter(|c| c.is_isa()).count(), 0);
    assert_eq!(then.iter().filter(|c| c.is_has()).count(), 1);
    assert_eq!(then.iter().filter(|c| c.is_relation()).count(), 0);
    assert_eq!(then.iter().filter(|c| c.is_value()).count(), 0);

    let when = rule.when_concludables(schema);
    assert_eq!(when.iter().filter(|c| c.is_isa()).count(), 2);
    assert_eq!(when.iter().filter(|c| c.is_has()).count(), 0);
    assert_eq!(when.iter().filter(|c| c.is_relation()).count(), 0);
    assert_eq!(when.iter().filter(|c| c.is_value()).count(), 0);

    // the variable-attribute head keeps exactly the two named variables
    let then_conj = rule.then();
    assert_eq!(then_conj.variables().len(), 2);
    assert!(then_conj.find_named("x").is_some());
    assert!(then_conj.find_named("a").is_some());
}

#[test]
fn concrete_boolean_head_expands_anonymous_attribute() {
    let db = Database::new();
    let schema = db.schema();
    let milk = schema.put_entity_type("milk").unwrap();
    let good = schema
        .put_attribute_type("is-still-good", ValueType::Bool)
        .unwrap();
    schema.put_owns(milk, good, false).unwrap();

    let mut when = Conjunction::new();
    let x = when.named_thing("x");
    when.isa_label(x, Label::of("milk"));

    let mut txn = db.transaction(SessionType::Schema, TransactionType::Write);
    txn.put_rule(
        "milk-goes-bad",
        when,
        RuleHead::HasConcrete {
            owner: "x".into(),
            attribute_type: Label::of("is-still-good"),
            value: Value::Bool(false),
        },
    )
    .unwrap();

    let rule = db.logic().get_rule("milk-goes-bad").unwrap();
    let then = rule.then();
    // owner, anonymous attribute, attribute type, anonymous value holder
    assert_eq!(then.variables().len(), 4);
    let anon_things = then
        .var_ids()
        .filter(|id| {
            then.variable(*id).is_thing()
                && matches!(then.variable(*id).reference(), Reference::Anonymous(_))
        })
        .count();
    assert_eq!(anon_things, 2);

    let attribute = then
        .var_ids()
        .find(|id| then.isa_of(*id).is_some() && then.variable(*id).is_thing())
        .unwrap();
    assert_eq!(
        then.label_of(then.isa_of(attribute).unwrap()),
        Some(&Label::of("is-still-good"))
    );
    let owner = then.find_named("x").unwrap();
    assert!(then
        .variable(owner)
        .thing_constraints()
        .iter()
        .any(|c| c.is_has()));
}

#[test]
fn single_player_relation_head_expands_scoped_role() {
    let db = Database::new();
    let schema = db.schema();
    let person = schema.put_entity_type("person").unwrap();
    let employment = schema.put_relation_type("employment").unwrap();
    let employee = schema.put_relates(employment, "employee").unwrap();
    let name = schema.put_attribute_type("name", ValueType::String).unwrap();
    schema.put_plays(person, employee).unwrap();
    schema.put_owns(person, name, false).unwrap();

    let mut when = Conjunction::new();
    let x = when.named_thing("x");
    when.isa_label(x, Label::of("person"));
    let n = when.anon_thing();
    when.value(n, motif::Predicate::Eq, Value::String("bob".into()));
    when.isa_label(n, Label::of("name"));
    when.has(x, n);

    let mut txn = db.transaction(SessionType::Schema, TransactionType::Write);
    txn.put_rule(
        "bob-is-employed",
        when,
        RuleHead::Relation {
            relation_type: Label::of("employment"),
            role_players: vec![("employee".into(), "x".into())],
        },
    )
    .unwrap();

    let rule = db.logic().get_rule("bob-is-employed").unwrap();
    let then = rule.then();
    assert_eq!(then.variables().len(), 4);
    let heads = rule.then_concludables(db.schema());
    assert_eq!(heads.iter().filter(|c| c.is_isa()).count(), 1);
    assert_eq!(heads.iter().filter(|c| c.is_relation()).count(), 1);
    let relation_head = heads.iter().find(|c| c.is_relation()).unwrap();
    assert_eq!(
        relation_head.role_hints,
        vec![vec![Label::scoped("employee", "employment")]]
    );
}

#[test]
fn value_head_is_rejected_as_illegal() {
    let db = Database::new();
    db.schema().put_entity_type("person").unwrap();
    let mut when = Conjunction::new();
    let x = when.named_thing("x");
    when.isa_label(x, Label::of("person"));

    let mut txn = db.transaction(SessionType::Schema, TransactionType::Write);
    let err = txn
        .put_rule(
            "bad-rule",
            when,
            RuleHead::Value {
                var: "n".into(),
                predicate: motif::Predicate::Eq,
                value: Value::Long(5),
            },
        )
        .unwrap_err();
    assert_eq!(err.code(), 105);
}

#[test]
fn marriage_rule_infers_friendships() {
    let db = marriage_database();
    {
        let mut txn = db.transaction(SessionType::Schema, TransactionType::Write);
        txn.put_rule(
            "marriage-is-friendship",
            marriage_is_friendship_when(),
            RuleHead::Relation {
                relation_type: Label::of("friendship"),
                role_players: vec![
                    ("friend".into(), "x".into()),
                    ("friend".into(), "y".into()),
                ],
            },
        )
        .unwrap();
    }

    // two married people, no stored friendship
    let mut insert = Conjunction::new();
    let x = insert.named_thing("x");
    insert.isa_label(x, Label::of("person"));
    let y = insert.named_thing("y");
    insert.isa_label(y, Label::of("person"));
    let rel = insert.anon_thing();
    let role_a = insert.labelled_type(Label::scoped("spouse", "marriage"));
    let role_b = insert.labelled_type(Label::scoped("spouse", "marriage"));
    insert.relation(
        rel,
        vec![
            RolePlayer::new(Some(role_a), x),
            RolePlayer::new(Some(role_b), y),
        ],
    );
    insert.isa_label(rel, Label::of("marriage"));

    let mut txn = db.transaction(SessionType::Data, TransactionType::Write);
    txn.insert(
        &motif::InsertQuery {
            when: None,
            insert,
        },
        &Options::default(),
    )
    .unwrap();
    txn.commit().unwrap();

    // query friendships
    let mut friends = Conjunction::new();
    let a = friends.named_thing("a");
    friends.isa_label(a, Label::of("person"));
    let b = friends.named_thing("b");
    friends.isa_label(b, Label::of("person"));
    let rel = friends.anon_thing();
    let role_a = friends.labelled_type(Label::scoped("friend", "friendship"));
    let role_b = friends.labelled_type(Label::scoped("friend", "friendship"));
    friends.relation(
        rel,
        vec![
            RolePlayer::new(Some(role_a), a),
            RolePlayer::new(Some(role_b), b),
        ],
    );
    friends.isa_label(rel, Label::of("friendship"));

    let txn = db.transaction(SessionType::Data, TransactionType::Read);
    let stored: Vec<_> = txn
        .match_(&friends, &Options::default())
        .unwrap()
        .collect::<motif::Result<_>>()
        .unwrap();
    assert!(stored.is_empty());

    let inferred: Vec<_> = txn
        .match_(&friends, &Options::default().infer(true))
        .unwrap()
        .collect::<motif::Result<_>>()
        .unwrap();
    // both orientations of the symmetric friendship
    assert_eq!(inferred.len(), 2);
    for answer in &inferred {
        assert!(answer.get("a").is_some() && answer.get("b").is_some());
    }

    // monotonicity: inference only ever adds answers
    let base: Vec<_> = txn
        .match_(&friends, &Options::default())
        .unwrap()
        .collect::<motif::Result<_>>()
        .unwrap();
    assert!(base.len() <= inferred.len());
}

#[test]
fn concrete_has_rule_reaches_fixpoint_and_infers() {
    let db = Database::new();
    let schema = db.schema();
    let milk = schema.put_entity_type("milk").unwrap();
    let good = schema
        .put_attribute_type("is-still-good", ValueType::Bool)
        .unwrap();
    schema.put_owns(milk, good, false).unwrap();

    let mut when = Conjunction::new();
    let x = when.named_thing("x");
    when.isa_label(x, Label::of("milk"));

    let mut txn = db.transaction(SessionType::Schema, TransactionType::Write);
    txn.put_rule(
        "milk-goes-bad",
        when,
        RuleHead::HasConcrete {
            owner: "x".into(),
            attribute_type: Label::of("is-still-good"),
            value: Value::Bool(false),
        },
    )
    .unwrap();

    let mut insert = Conjunction::new();
    let m = insert.named_thing("m");
    insert.isa_label(m, Label::of("milk"));
    let mut txn = db.transaction(SessionType::Data, TransactionType::Write);
    txn.insert(&motif::InsertQuery { when: None, insert }, &Options::default())
        .unwrap();
    txn.commit().unwrap();

    let mut query = Conjunction::new();
    let m = query.named_thing("m");
    query.isa_label(m, Label::of("milk"));
    let g = query.named_thing("g");
    query.isa_label(g, Label::of("is-still-good"));
    query.has(m, g);

    let txn = db.transaction(SessionType::Data, TransactionType::Read);
    let stored: Vec<_> = txn
        .match_(&query, &Options::default())
        .unwrap()
        .collect::<motif::Result<_>>()
        .unwrap();
    assert!(stored.is_empty());

    let inferred: Vec<_> = txn
        .match_(&query, &Options::default().infer(true))
        .unwrap()
        .collect::<motif::Result<_>>()
        .unwrap();
    assert_eq!(inferred.len(), 1);

    // disabling inference again never invents answers
    let stored_again: Vec<_> = txn
        .match_(&query, &Options::default())
        .unwrap()
        .collect::<motif::Result<_>>()
        .unwrap();
    assert!(stored_again.is_empty());
}

#[test]
fn unbounded_generation_exhausts_the_reasoning_budget() {
    let db = Database::new();
    let schema = db.schema();
    let pebble = schema.put_entity_type("pebble").unwrap();
    let box_type = schema.put_relation_type("box").unwrap();
    let container = schema.put_relates(box_type, "container").unwrap();
    schema.put_plays(pebble, container).unwrap();
    // boxes may contain boxes, so every conclusion feeds the next pass
    schema.put_plays(box_type, container).unwrap();

    let mut when = Conjunction::new();
    let r = when.named_thing("r");
    when.isa_label(r, Label::of("box"));
    let mut txn = db.transaction(SessionType::Schema, TransactionType::Write);
    txn.put_rule(
        "boxes-all-the-way-up",
        when,
        RuleHead::Relation {
            relation_type: Label::of("box"),
            role_players: vec![("container".into(), "r".into())],
        },
    )
    .unwrap();

    let mut insert = Conjunction::new();
    let p = insert.named_thing("p");
    insert.isa_label(p, Label::of("pebble"));
    let b = insert.anon_thing();
    let role = insert.labelled_type(Label::scoped("container", "box"));
    insert.relation(b, vec![RolePlayer::new(Some(role), p)]);
    insert.isa_label(b, Label::of("box"));
    let mut txn = db.transaction(SessionType::Data, TransactionType::Write);
    txn.insert(&motif::InsertQuery { when: None, insert }, &Options::default())
        .unwrap();
    txn.commit().unwrap();

    let mut query = Conjunction::new();
    let r = query.named_thing("r");
    query.isa_label(r, Label::of("box"));

    let txn = db.transaction(SessionType::Data, TransactionType::Read);
    let err = txn
        .match_(&query, &Options::default().infer(true))
        .unwrap_err();
    assert_eq!(err.code(), 501);
}

#[test]
fn when_concludable_modes_differ_for_relation_owners() {
    let db = marriage_database();
    let when = {
        let mut conj = marriage_is_friendship_when();
        conj.infer_hints(db.schema()).unwrap();
        conj
    };
    let body = motif::logic::concludables_of(&when, db.schema(), DerivationMode::Conjunction);
    let head_view = motif::logic::concludables_of(&when, db.schema(), DerivationMode::Head);
    // the relation owner's isa is absorbed in body derivation only
    assert_eq!(body.iter().filter(|c| c.is_isa()).count(), 2);
    assert_eq!(head_view.iter().filter(|c| c.is_isa()).count(), 3);
}
