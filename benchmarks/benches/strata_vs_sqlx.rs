use criterion::{Criterion, criterion_group, criterion_main};
use sqlx::Row;
use strata_orm::prelude::*;

async fn init_env() -> (Environment, i64) {
    let registry = Registry::new();
    registry.new_model("Partner");
    registry.add_field("Partner", Field::char("Name"));
    registry.add_field("Partner", Field::integer("Rank"));
    let models = registry.bootstrap();

    let executor = Executor::connect("sqlite::memory:")
        .await
        .expect("connect sqlite memory");
    sync_database(&executor, &models).await.expect("sync schema");

    let env = Environment::new(models, executor, Principal::superuser());
    let partner = env
        .pool("Partner")
        .expect("partner model")
        .create(field_map! { "Name" => "Alice", "Rank" => 42 })
        .await
        .expect("seed row");
    let id = partner.single_id().await.expect("single id");
    (env, id)
}

fn bench_strata_vs_sqlx(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("tokio runtime");
    let (env, id) = rt.block_on(init_env());

    let raw_env = env.clone();
    c.bench_function("raw_sqlx_fetch_one", |b| {
        b.to_async(&rt).iter(|| {
            let env = raw_env.clone();
            async move {
                let row = sqlx::query("SELECT id, name, rank FROM partner WHERE id = ?")
                    .bind(id)
                    .fetch_one(env.executor().pool())
                    .await
                    .expect("raw fetch");
                let name: String = row.try_get(1).expect("name");
                std::hint::black_box(name);
            }
        })
    });

    let strata_env = env.clone();
    c.bench_function("strata_read_one", |b| {
        b.to_async(&rt).iter(|| {
            let env = strata_env.clone();
            async move {
                let values = env
                    .pool("Partner")
                    .expect("partner model")
                    .with_ids(vec![id])
                    .read(&["Name", "Rank"])
                    .await
                    .expect("strata read");
                std::hint::black_box(values);
            }
        })
    });

    c.bench_function("strata_search_ids", |b| {
        b.to_async(&rt).iter(|| {
            let env = env.clone();
            async move {
                let ids = env
                    .pool("Partner")
                    .expect("partner model")
                    .search(Condition::field("Rank").greater(10))
                    .ids()
                    .await
                    .expect("strata search");
                std::hint::black_box(ids);
            }
        })
    });
}

criterion_group!(benches, bench_strata_vs_sqlx);
criterion_main!(benches);
