use std::sync::Arc;

use criterion::{Criterion, criterion_group, criterion_main};
use strata_core::{PostgresDialect, Query, SqliteDialect};
use strata_orm::prelude::*;

fn models() -> Arc<Models> {
    let registry = Registry::new();
    registry.new_model("Partner");
    registry.add_field("Partner", Field::char("Name").index());
    registry.add_field("Partner", Field::integer("Rank"));
    registry.add_field("Partner", Field::many2one("Country", "Country"));
    registry.add_field("Partner", Field::char("CountryCode").related("Country.Code"));
    registry.new_model("Country");
    registry.add_field("Country", Field::char("Code"));
    registry.add_field("Country", Field::char("Name"));
    registry.bootstrap()
}

fn condition() -> Condition {
    Condition::field("Name")
        .ilike("smith")
        .and()
        .field("Rank")
        .greater_or_equal(3)
        .or()
        .field("Country.Name")
        .in_(vec![Value::from("France"), Value::from("Japan")])
        .and_not()
        .field("CountryCode")
        .equals(Value::Null)
}

fn bench_condition(c: &mut Criterion) {
    let cond = condition();
    c.bench_function("condition_serialize", |b| {
        b.iter(|| std::hint::black_box(cond.serialize().to_string()))
    });

    let domain = cond.serialize();
    c.bench_function("condition_from_domain", |b| {
        b.iter(|| std::hint::black_box(Condition::from_domain(&domain).expect("domain")))
    });
}

fn bench_select(c: &mut Criterion) {
    let models = models();
    let query = Query::new("Partner")
        .filter(condition())
        .order_by("Country.Name")
        .order_by_desc("Rank")
        .limit(20);

    c.bench_function("select_sql_sqlite", |b| {
        b.iter(|| {
            let compiled = query
                .select_sql(&models, &SqliteDialect, &["Name", "CountryCode"])
                .expect("compile");
            std::hint::black_box(compiled);
        })
    });
    c.bench_function("select_sql_postgres", |b| {
        b.iter(|| {
            let compiled = query
                .select_sql(&models, &PostgresDialect, &["Name", "CountryCode"])
                .expect("compile");
            std::hint::black_box(compiled);
        })
    });
}

criterion_group!(benches, bench_condition, bench_select);
criterion_main!(benches);
