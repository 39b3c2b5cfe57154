use std::sync::Arc;

use proptest::prelude::*;
use proptest::strategy::ValueTree;
use proptest::test_runner::{Config, TestRunner};
use strata_core::condition::Condition;
use strata_core::dialect::{Dialect, PostgresDialect, SqliteDialect};
use strata_core::field::Field;
use strata_core::query::Query;
use strata_core::registry::{Models, Registry};
use strata_core::value::Value;

fn models() -> Arc<Models> {
    let registry = Registry::new();
    registry.new_model("User");
    registry.new_model("Profile");
    registry.add_field("User", Field::char("Name"));
    registry.add_field("User", Field::integer("Age"));
    registry.add_field("User", Field::many2one("Profile", "Profile"));
    registry.add_field("User", Field::float("PMoney").related("Profile.Money"));
    registry.add_field("Profile", Field::float("Money"));
    registry.add_field("Profile", Field::char("City"));
    registry.bootstrap()
}

const PATHS: &[&str] = &["Name", "Age", "PMoney", "Profile.City", "profile_id.money"];

fn leaf_strategy() -> impl Strategy<Value = Condition> {
    let value = prop_oneof![
        any::<i64>().prop_map(Value::Int),
        "[a-z?$' ]{0,12}".prop_map(Value::Text),
        prop::collection::vec(any::<i64>(), 0..4).prop_map(Value::Ids),
        Just(Value::Null),
    ];
    (0..PATHS.len(), 0..6_usize, value).prop_map(|(path, op, value)| {
        let field = Condition::field(PATHS[path]);
        match op {
            0 => field.equals(value),
            1 => field.not_equals(value),
            2 => field.greater(value),
            3 => field.ilike(value),
            4 => field.in_(value),
            _ => field.not_in(value),
        }
    })
}

fn condition_strategy() -> impl Strategy<Value = Condition> {
    (leaf_strategy(), prop::collection::vec((0..3_usize, leaf_strategy()), 0..6)).prop_map(
        |(first, rest)| {
            rest.into_iter().fold(first, |acc, (op, leaf)| match op {
                0 => acc.and_cond(leaf),
                1 => acc.or_cond(leaf),
                _ => acc.and_cond(Condition::new().or_cond(leaf)),
            })
        },
    )
}

fn runner(cases: u32) -> TestRunner {
    TestRunner::new(Config {
        cases,
        failure_persistence: None,
        ..Config::default()
    })
}

#[test]
fn placeholders_match_bound_arguments() {
    let models = models();
    let mut runner = runner(128);
    let strategy = condition_strategy();
    for _ in 0..128 {
        let condition = strategy.new_tree(&mut runner).unwrap().current();
        let query = Query::new("User").filter(condition);

        let compiled = query.select_sql(&models, &PostgresDialect, &["Name"]).unwrap();
        for n in 1..=compiled.args.len() {
            assert!(compiled.sql.contains(&format!("${}", n)), "{}", compiled.sql);
        }
        let next = format!("${}", compiled.args.len() + 1);
        assert!(!compiled.sql.contains(&next), "{}", compiled.sql);

        let compiled = query.select_sql(&models, &SqliteDialect, &["Name"]).unwrap();
        assert_eq!(compiled.sql.matches('?').count(), compiled.args.len(), "{}", compiled.sql);
    }
}

#[test]
fn shared_prefixes_join_once() {
    let models = models();
    let mut runner = runner(64);
    let strategy = condition_strategy();
    for _ in 0..64 {
        let condition = strategy.new_tree(&mut runner).unwrap().current();
        let compiled = Query::new("User")
            .filter(condition)
            .select_sql(&models, &SqliteDialect, &["Profile.City", "PMoney"])
            .unwrap();
        assert_eq!(compiled.sql.matches("LEFT JOIN").count(), 1, "{}", compiled.sql);
    }
}

#[test]
fn quoted_identifiers_round_trip() {
    let mut runner = runner(128);
    let ident = "[A-Za-z0-9_\"\\-\\s]{0,32}";
    for _ in 0..128 {
        let raw = ident.new_tree(&mut runner).unwrap().current();
        for dialect in [&SqliteDialect as &dyn Dialect, &PostgresDialect] {
            let quoted = dialect.quote_identifier(&raw);
            assert!(quoted.starts_with('"') && quoted.ends_with('"'));
            let inner = &quoted[1..quoted.len() - 1];
            assert_eq!(inner.replace("\"\"", "\""), raw);
        }
    }
}

#[test]
fn empty_in_lists_never_bind() {
    let models = models();
    let mut runner = runner(32);
    let path = 0..PATHS.len();
    for _ in 0..32 {
        let path = PATHS[path.new_tree(&mut runner).unwrap().current()];
        let compiled = Query::new("User")
            .filter(Condition::field(path).in_(Vec::<i64>::new()))
            .select_sql(&models, &SqliteDialect, &[])
            .unwrap();
        assert!(compiled.sql.contains("(1=0)"));
        assert!(compiled.args.is_empty());
    }
}
