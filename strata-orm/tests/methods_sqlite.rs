mod common;

use common::{JANE, seed, setup, setup_with, user_by_email};
use strata_orm::prelude::*;

#[tokio::test]
async fn extensions_wrap_the_base_layer() {
    let env = setup().await;
    seed(&env).await;

    let jane = user_by_email(&env, JANE);
    let res = jane.call("PrefixedUser", vec!["Prefix".into()]).await.unwrap();
    assert_eq!(
        res,
        Value::List(vec![Value::from("Prefix: Jane A. Smith [<jane.smith@example.com>]")])
    );
}

#[tokio::test]
async fn non_stored_computed_fields_follow_the_method_chain() {
    let env = setup().await;
    seed(&env).await;

    let jane = user_by_email(&env, JANE);
    assert_eq!(
        jane.get("DecoratedName").await.unwrap(),
        Value::from("User: Jane A. Smith [<jane.smith@example.com>]")
    );

    let users = env.pool("User").unwrap().order_by("Name");
    assert_eq!(users.len().await.unwrap(), 3);
    let names: Vec<Value> = users
        .read(&["DecoratedName"])
        .await
        .unwrap()
        .into_iter()
        .filter_map(|mut values| values.remove("DecoratedName"))
        .collect();
    assert_eq!(
        names,
        vec![
            Value::from("User: Jane A. Smith [<jane.smith@example.com>]"),
            Value::from("User: John Smith [<jsmith2@example.com>]"),
            Value::from("User: Will Smith [<will.smith@example.com>]"),
        ]
    );
}

#[tokio::test]
async fn display_name_comes_from_name_get() {
    let env = setup().await;
    seed(&env).await;

    let jane = user_by_email(&env, JANE);
    assert_eq!(jane.get("DisplayName").await.unwrap(), Value::from("Jane A. Smith"));

    let post = env
        .pool("Post")
        .unwrap()
        .create(field_map! { "Content" => "no title" })
        .await
        .unwrap();
    let id = post.single_id().await.unwrap();
    assert_eq!(post.call("NameGet", vec![]).await.unwrap(), Value::from(format!("Post,{}", id)));
}

#[tokio::test]
async fn mixin_methods_sit_below_the_models_own_layers() {
    let env = setup().await;
    seed(&env).await;

    let profile = user_by_email(&env, JANE).get_records("Profile").await.unwrap();
    assert_eq!(
        profile.call("PrintAddress", vec![]).await.unwrap(),
        Value::from("[<165 5th Avenue, 0305 New York>, USA]")
    );
    assert_eq!(profile.call("SayHello", vec![]).await.unwrap(), Value::from("Hello !"));

    let layers = env
        .models()
        .model("Profile")
        .unwrap()
        .method("PrintAddress")
        .unwrap()
        .layers()
        .iter()
        .map(|layer| layer.is_mixed_in())
        .collect::<Vec<_>>();
    assert_eq!(layers, vec![true, true, false, false]);
}

#[tokio::test]
async fn model_mixin_reaches_every_model() {
    let env = setup().await;
    seed(&env).await;

    let jane = user_by_email(&env, JANE);
    jane.set("Active", true).await.unwrap();
    assert_eq!(jane.get("Active").await.unwrap(), Value::Bool(true));
    assert_eq!(jane.call("IsActivated", vec![]).await.unwrap(), Value::Bool(true));

    let profile = jane.get_records("Profile").await.unwrap();
    assert_eq!(profile.call("IsActivated", vec![]).await.unwrap(), Value::Bool(false));
    profile.set("Active", true).await.unwrap();
    assert_eq!(profile.call("IsActivated", vec![]).await.unwrap(), Value::Bool(true));

    // Link models and mixins stay out of ModelMixin's reach.
    let models = env.models();
    assert!(models.model("PostTagRel").unwrap().field("Active").is_none());
    assert!(models.model("AddressMixIn").unwrap().field("Active").is_none());
}

#[tokio::test]
async fn mixin_of_a_mixin_dispatches_outermost_first() {
    let registry = Registry::new();
    registry.new_mixin_model("Traced");
    registry.add_method("Traced", "Trace", |_call: Call| async { Ok(Value::from("traced")) });

    registry.new_mixin_model("Audited");
    registry.inherit("Audited", "Traced");
    registry.extend_method("Audited", "Trace", |call: Call| async move {
        let res = call.call_super(Vec::new()).await?;
        Ok(Value::Text(format!("{} > audited", res)))
    });

    registry.new_model("Ledger");
    registry.add_field("Ledger", Field::char("Label"));
    registry.inherit("Ledger", "Audited");
    registry.extend_method("Ledger", "Trace", |call: Call| async move {
        let res = call.call_super(Vec::new()).await?;
        Ok(Value::Text(format!("{} > ledger", res)))
    });

    let env = setup_with(registry.bootstrap()).await;
    let ledger = env
        .pool("Ledger")
        .unwrap()
        .create(field_map! { "Label" => "main" })
        .await
        .unwrap();
    assert_eq!(
        ledger.call("Trace", vec![]).await.unwrap(),
        Value::from("traced > audited > ledger")
    );

    let layers = env
        .models()
        .model("Ledger")
        .unwrap()
        .method("Trace")
        .unwrap()
        .layers()
        .iter()
        .map(|layer| layer.is_mixed_in())
        .collect::<Vec<_>>();
    assert_eq!(layers, vec![true, true, false]);
}

#[tokio::test]
async fn extending_create_on_one_model() {
    let env = setup().await;

    let posts = env.pool("Post").unwrap();
    let untitled = posts.create(field_map! { "Content" => "body" }).await.unwrap();
    assert_eq!(untitled.get("Title").await.unwrap(), Value::from("Untitled"));

    let titled = posts.create(field_map! { "Title" => "Hello" }).await.unwrap();
    assert_eq!(titled.get("Title").await.unwrap(), Value::from("Hello"));

    // Other models keep the plain Create.
    let tag = env.pool("Tag").unwrap().create(field_map! {}).await.unwrap();
    assert_eq!(tag.get("Name").await.unwrap(), Value::Null);
}

#[tokio::test]
async fn methods_can_write_through_relations() {
    let env = setup().await;
    seed(&env).await;

    let jane = user_by_email(&env, JANE);
    jane.call("UpdateCity", vec!["Paris".into()]).await.unwrap();
    let profile = jane.get_records("Profile").await.unwrap();
    assert_eq!(profile.get("City").await.unwrap(), Value::from("Paris"));
}

#[tokio::test]
async fn unknown_methods_are_reported() {
    let env = setup().await;
    seed(&env).await;

    let err = user_by_email(&env, JANE).call("Fly", vec![]).await.unwrap_err();
    assert!(matches!(err, StrataError::UnknownMethod { ref method, .. } if method == "Fly"));
}

#[tokio::test]
async fn principals_need_method_and_field_grants() {
    let registry = Registry::new();
    common::declare_models(&registry);
    registry.grant_method("User", "PrefixedUser", "staff");
    registry.grant_method("User", "DecorateEmail", "staff");
    registry.grant_field("User", "Email", "staff", Permission::READ);
    let env = common::setup_with(registry.bootstrap()).await;
    seed(&env).await;

    let staff = env.with_principal(Principal::new(7, ["staff"]));
    let jane = user_by_email(&staff, JANE);

    // The field ACL on Name is checked inside the base layer.
    let err = jane.call("PrefixedUser", vec!["Prefix".into()]).await.unwrap_err();
    assert!(matches!(
        err,
        StrataError::PermissionDenied { ref target, permission, .. }
            if target == "Name" && permission == Permission::READ
    ));

    let err = jane.call("SayHello", vec![]).await.unwrap_err();
    assert!(matches!(err, StrataError::UnknownMethod { .. }));

    let err = jane.call("IsActivated", vec![]).await.unwrap_err();
    assert!(matches!(err, StrataError::PermissionDenied { ref target, .. } if target == "IsActivated"));

    assert_eq!(jane.get("Email").await.unwrap(), Value::from(JANE));
    let err = jane.set("Email", "x@example.com").await.unwrap_err();
    assert!(matches!(err, StrataError::PermissionDenied { .. }));

    // Superuser still reads everything.
    assert_eq!(
        user_by_email(&env, JANE).get("Name").await.unwrap(),
        Value::from("Jane A. Smith")
    );
}
