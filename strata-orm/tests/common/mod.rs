#![allow(dead_code)]

use std::sync::Arc;

use strata_core::test_utils::MockDatabase;
use strata_orm::prelude::*;

pub const JANE: &str = "jane.smith@example.com";
pub const JOHN: &str = "jsmith2@example.com";
pub const WILL: &str = "will.smith@example.com";

/// Declare the shared test models: users with profiles and posts, an address
/// mixin on profiles, an "active" flag mixed into every model and a view.
pub fn declare_models(registry: &Registry) {
    registry.new_model("User");
    registry.add_field("User", Field::char("Name").index());
    registry.add_field("User", Field::char("DecoratedName").compute("computeDecoratedName"));
    registry.add_field("User", Field::char("Email").size(100).index());
    registry.add_field("User", Field::boolean("IsStaff"));
    registry.add_field("User", Field::many2one("Profile", "Profile").on_delete(OnDelete::SetNull));
    registry.add_field(
        "User",
        Field::integer("Age")
            .compute("computeAge")
            .depends(["Profile", "Profile.Age"])
            .stored(),
    );
    registry.add_field("User", Field::one2many("Posts", "Post", "User"));
    registry.add_field("User", Field::float("PMoney").related("Profile.Money"));
    registry.add_field("User", Field::many2one("LastPost", "Post").embed());
    registry.add_field("User", Field::integer("Nums"));

    registry.add_method("User", "PrefixedUser", |call: Call| async move {
        let prefix = call.arg(0);
        let mut res = Vec::new();
        for values in call.records().read(&["Name"]).await? {
            let name = values.get("Name").cloned().unwrap_or_default();
            res.push(Value::Text(format!("{}: {}", prefix, name)));
        }
        Ok(Value::List(res))
    });
    registry.extend_method("User", "PrefixedUser", |call: Call| async move {
        let Value::List(mut res) = call.call_super(call.args().to_vec()).await? else {
            return Ok(Value::List(Vec::new()));
        };
        let records = call.records().records().await?;
        for (line, record) in res.iter_mut().zip(records) {
            let email = record.get("Email").await?;
            let decorated = record.call("DecorateEmail", vec![email]).await?;
            *line = Value::Text(format!("{} {}", line, decorated));
        }
        Ok(Value::List(res))
    });

    registry.add_method("User", "DecorateEmail", |call: Call| async move {
        Ok(Value::Text(format!("<{}>", call.arg(0))))
    });
    registry.extend_method("User", "DecorateEmail", |call: Call| async move {
        let res = call.call_super(call.args().to_vec()).await?;
        Ok(Value::Text(format!("[{}]", res)))
    });

    registry.add_compute_method("User", "computeAge", &["Age"], |call: Call| async move {
        let profile = call.records().get_records("Profile").await?;
        let age = if profile.is_empty().await? {
            Value::Null
        } else {
            profile.get("Age").await?
        };
        Ok(Value::Map(field_map! { "Age" => age }))
    });
    registry.add_compute_method(
        "User",
        "computeDecoratedName",
        &["DecoratedName"],
        |call: Call| async move {
            let prefixed = call.records().call("PrefixedUser", vec!["User".into()]).await?;
            let first = match prefixed {
                Value::List(mut lines) if !lines.is_empty() => lines.swap_remove(0),
                _ => Value::Null,
            };
            Ok(Value::Map(field_map! { "DecoratedName" => first }))
        },
    );
    registry.add_method("User", "UpdateCity", |call: Call| async move {
        let profile = call.records().get_records("Profile").await?;
        profile.set("City", call.arg(0)).await?;
        Ok(Value::Null)
    });

    registry.new_model("Profile");
    registry.add_field("Profile", Field::integer("Age"));
    registry.add_field("Profile", Field::float("Money"));
    registry.add_field("Profile", Field::many2one("User", "User"));
    registry.add_field("Profile", Field::one2one("BestPost", "Post"));
    registry.add_field("Profile", Field::char("City"));
    registry.add_field("Profile", Field::char("Country"));

    registry.add_method("Profile", "PrintAddress", |call: Call| async move {
        let res = call.call_super(Vec::new()).await?;
        let country = call.records().get("Country").await?;
        Ok(Value::Text(format!("{}, {}", res, country)))
    });
    registry.extend_method("Profile", "PrintAddress", |call: Call| async move {
        let res = call.call_super(Vec::new()).await?;
        Ok(Value::Text(format!("[{}]", res)))
    });

    registry.new_model("Post");
    registry.add_field("Post", Field::many2one("User", "User"));
    registry.add_field("Post", Field::char("Title"));
    registry.add_field("Post", Field::text("Content"));
    registry.add_field("Post", Field::many2many("Tags", "Tag"));

    // Posts created without a title get a placeholder one.
    registry.extend_method("Post", "Create", |call: Call| async move {
        let mut values = call.arg(0).as_map().cloned().unwrap_or_default();
        if !values.contains_key("Title") {
            values.insert("Title".to_owned(), Value::from("Untitled"));
        }
        call.call_super(vec![Value::Map(values)]).await
    });

    registry.new_model("Tag");
    registry.add_field("Tag", Field::char("Name"));
    registry.add_field("Tag", Field::many2one("BestPost", "Post"));
    registry.add_field("Tag", Field::many2many("Posts", "Post"));
    registry.add_field("Tag", Field::char("Description"));

    registry.new_mixin_model("AddressMixIn");
    registry.add_field("AddressMixIn", Field::char("Street"));
    registry.add_field("AddressMixIn", Field::char("Zip"));
    registry.add_field("AddressMixIn", Field::char("City").size(30));
    registry.inherit("Profile", "AddressMixIn");

    registry.add_method("AddressMixIn", "SayHello", |_call: Call| async move {
        Ok(Value::from("Hello !"))
    });
    registry.add_method("AddressMixIn", "PrintAddress", |call: Call| async move {
        let values = call.records().read(&["Street", "Zip", "City"]).await?;
        let Some(address) = values.first() else {
            return Ok(Value::from(""));
        };
        let text = |name: &str| address.get(name).cloned().unwrap_or_default();
        Ok(Value::Text(format!(
            "{}, {} {}",
            text("Street"),
            text("Zip"),
            text("City")
        )))
    });
    registry.extend_method("AddressMixIn", "PrintAddress", |call: Call| async move {
        let res = call.call_super(Vec::new()).await?;
        Ok(Value::Text(format!("<{}>", res)))
    });

    registry.new_mixin_model("ActiveMixIn");
    registry.add_field("ActiveMixIn", Field::boolean("Active"));
    registry.inherit("ModelMixin", "ActiveMixIn");
    registry.add_method("ActiveMixIn", "IsActivated", |call: Call| async move {
        Ok(Value::Bool(
            call.records().get("Active").await?.as_bool().unwrap_or_default(),
        ))
    });

    registry.new_manual_model("UserView");
    registry.add_field("UserView", Field::char("Name"));
    registry.add_field("UserView", Field::char("City"));
}

pub fn bootstrap_models() -> Arc<Models> {
    let registry = Registry::new();
    declare_models(&registry);
    registry.bootstrap()
}

/// A synchronized in-memory database over freshly bootstrapped test models.
pub async fn setup() -> Environment {
    setup_with(bootstrap_models()).await
}

pub async fn setup_with(models: Arc<Models>) -> Environment {
    let executor = MockDatabase::new_sqlite().await.expect("connect").executor();
    sync_database(&executor, &models).await.expect("sync");
    Environment::new(models, executor, Principal::superuser())
}

/// Jane has a profile, John and Will do not.
pub async fn seed(env: &Environment) {
    let profile = env
        .pool("Profile")
        .unwrap()
        .create(field_map! {
            "Age" => 23,
            "Money" => 12345.0,
            "Street" => "165 5th Avenue",
            "Zip" => "0305",
            "City" => "New York",
            "Country" => "USA",
        })
        .await
        .expect("create profile");
    let profile_id = profile.single_id().await.unwrap();

    let users = env.pool("User").unwrap();
    users
        .create(field_map! {
            "Name" => "Jane A. Smith",
            "Email" => JANE,
            "IsStaff" => false,
            "Profile" => profile_id,
        })
        .await
        .expect("create jane");
    users
        .create(field_map! { "Name" => "John Smith", "Email" => JOHN, "IsStaff" => false })
        .await
        .expect("create john");
    users
        .create(field_map! { "Name" => "Will Smith", "Email" => WILL, "IsStaff" => true })
        .await
        .expect("create will");
}

pub fn user_by_email(env: &Environment, email: &str) -> RecordSet {
    env.pool("User")
        .unwrap()
        .search(Condition::field("Email").equals(email))
}
