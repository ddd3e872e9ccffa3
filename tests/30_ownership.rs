mod common;

use anyhow::Result;
use serde_json::json;
use uuid::Uuid;

use campus_data::context::RequestContext;
use campus_data::database::DatabaseError;
use campus_data::query::{QueryDescriptor, QueryEngine};
use common::{id_of, TestCampus};

struct School {
    campus: TestCampus,
    ctx: RequestContext,
    student: campus_data::context::ActingUser,
    teacher: campus_data::context::ActingUser,
    admin: campus_data::context::ActingUser,
    other_admin: campus_data::context::ActingUser,
}

async fn school() -> Result<School> {
    let campus = TestCampus::new();
    let ctx = campus.tenant("school-a")?;
    let student = campus.seed_user(&ctx, "Sam", &["student"]).await?;
    let teacher = campus.seed_user(&ctx, "Tess", &["teacher"]).await?;
    let admin = campus.seed_user(&ctx, "Ada", &["admin"]).await?;
    let other_admin = campus.seed_user(&ctx, "Alan", &["teacher", "admin"]).await?;
    Ok(School { campus, ctx, student, teacher, admin, other_admin })
}

#[tokio::test]
async fn can_edit_follows_creator_and_admin_pairs() -> Result<()> {
    common::init_tracing();
    let s = school().await?;
    s.campus
        .seed(&s.ctx, "Post", vec![
            json!({ "title": "by student", "created_by": s.student.id.to_string(), "n": 1 }),
            json!({ "title": "by admin", "created_by": s.admin.id.to_string(), "n": 2 }),
            json!({ "title": "anonymous", "n": 3 }),
            json!({ "title": "broken", "created_by": "nobody", "n": 4 }),
        ])
        .await?;

    let flags = |viewer| {
        let ctx = s.ctx.clone().with_user(viewer);
        let registry = &s.campus.registry;
        async move {
            let page = QueryEngine::new(registry)
                .paginate_entity(&ctx, "Post", &QueryDescriptor::new().with_sort("n"))
                .await?;
            Ok::<_, anyhow::Error>(page.results.iter().map(|r| r["can_edit"].as_bool()).collect::<Vec<_>>())
        }
    };

    assert_eq!(flags(s.student).await?, vec![Some(true), Some(false), Some(true), Some(false)]);
    assert_eq!(flags(s.teacher).await?, vec![Some(false), Some(false), Some(true), Some(false)]);
    // An admin may edit another admin's record, not a student's
    assert_eq!(flags(s.other_admin).await?, vec![Some(false), Some(true), Some(true), Some(false)]);
    assert_eq!(flags(s.admin).await?, vec![Some(false), Some(true), Some(true), Some(false)]);
    Ok(())
}

#[tokio::test]
async fn anonymous_readers_cannot_edit_owned_records() -> Result<()> {
    let s = school().await?;
    s.campus
        .seed(&s.ctx, "Class", vec![json!({ "name": "Math", "created_by": s.teacher.id.to_string() })])
        .await?;
    let page = QueryEngine::new(&s.campus.registry)
        .paginate_entity(&s.ctx, "Class", &QueryDescriptor::new())
        .await?;
    assert_eq!(page.results[0]["can_edit"], json!(false));
    Ok(())
}

#[tokio::test]
async fn entities_without_ownership_are_not_flagged() -> Result<()> {
    let s = school().await?;
    s.campus.seed(&s.ctx, "Branch", vec![json!({ "name": "North" })]).await?;
    let ctx = s.ctx.clone().with_user(s.admin);
    let page = QueryEngine::new(&s.campus.registry)
        .paginate_entity(&ctx, "Branch", &QueryDescriptor::new())
        .await?;
    assert!(!page.results[0].contains_key("can_edit"));
    Ok(())
}

#[tokio::test]
async fn owned_array_items_are_flagged_individually() -> Result<()> {
    let s = school().await?;
    s.campus
        .seed(&s.ctx, "Post", vec![json!({
            "title": "discussion",
            "created_by": s.teacher.id.to_string(),
            "comments": [
                { "text": "mine", "created_by": s.student.id.to_string() },
                { "text": "theirs", "created_by": s.teacher.id.to_string() }
            ]
        })])
        .await?;

    let ctx = s.ctx.clone().with_user(s.student);
    let page = QueryEngine::new(&s.campus.registry)
        .paginate_entity(&ctx, "Post", &QueryDescriptor::new())
        .await?;
    let post = &page.results[0];
    assert_eq!(post["can_edit"], json!(false));
    assert_eq!(post["comments"][0]["can_edit"], json!(true));
    assert_eq!(post["comments"][1]["can_edit"], json!(false));
    Ok(())
}

#[tokio::test]
async fn select_still_yields_can_edit() -> Result<()> {
    let s = school().await?;
    s.campus
        .seed(&s.ctx, "Post", vec![json!({ "title": "mine", "created_by": s.student.id.to_string() })])
        .await?;
    let ctx = s.ctx.clone().with_user(s.student);
    let page = QueryEngine::new(&s.campus.registry)
        .paginate_entity(&ctx, "Post", &QueryDescriptor::new().with_select("title"))
        .await?;
    assert_eq!(page.results[0]["can_edit"], json!(true));
    Ok(())
}

#[tokio::test]
async fn creator_is_stamped_from_context() -> Result<()> {
    let s = school().await?;
    let ctx = s.ctx.clone().with_user(s.teacher);
    let posts = s.campus.registry.repository(&ctx, "Post").await?;
    let post = posts.create(json!({ "title": "stamped" })).await?;
    assert_eq!(post["created_by"], json!(s.teacher.id.to_string()));

    // An explicit creator is kept, and types without ownership get none
    let explicit = posts.create(json!({ "title": "kept", "created_by": s.admin.id.to_string() })).await?;
    assert_eq!(explicit["created_by"], json!(s.admin.id.to_string()));
    let branches = s.campus.registry.repository(&ctx, "Branch").await?;
    let branch = branches.create(json!({ "name": "South" })).await?;
    assert!(!branch.contains_key("created_by"));
    Ok(())
}

#[tokio::test]
async fn update_by_id_enforces_ownership() -> Result<()> {
    let s = school().await?;
    let owner_ctx = s.ctx.clone().with_user(s.student);
    let posts = s.campus.registry.repository(&owner_ctx, "Post").await?;
    let post = posts.create(json!({ "title": "draft" })).await?;
    let id = id_of(&post);

    let as_teacher = s.campus.registry.repository(&s.ctx.clone().with_user(s.teacher), "Post").await?;
    let denied = as_teacher.update_by_id(&id, json!({ "title": "hijacked" })).await;
    assert!(matches!(denied, Err(DatabaseError::Forbidden { .. })));

    let anonymous = s.campus.registry.repository(&s.ctx, "Post").await?;
    assert!(matches!(
        anonymous.update_by_id(&id, json!({ "title": "x" })).await,
        Err(DatabaseError::Forbidden { .. })
    ));

    let updated = posts.update_by_id(&id, json!({ "title": "final", "created_by": s.admin.id.to_string() })).await?;
    assert_eq!(updated["title"], json!("final"));
    assert_eq!(updated["created_at"], post["created_at"]);
    // Owner is not a system field, so an explicit reassignment is honoured
    assert_eq!(updated["created_by"], json!(s.admin.id.to_string()));
    Ok(())
}

#[tokio::test]
async fn filtered_updates_cannot_sidestep_ownership() -> Result<()> {
    let s = school().await?;
    let posts = s.campus.registry.repository(&s.ctx.clone().with_user(s.student), "Post").await?;
    let post = posts.create(json!({ "title": "draft" })).await?;
    let id = id_of(&post);

    let as_teacher = s.campus.registry.repository(&s.ctx.clone().with_user(s.teacher), "Post").await?;
    let single = as_teacher.update_one(json!({ "id": id }), json!({ "title": "hijacked" })).await;
    assert!(matches!(single, Err(DatabaseError::Forbidden { .. })));
    let bulk = as_teacher.update_many(json!({ "title": "draft" }), json!({ "title": "hijacked" })).await;
    assert!(matches!(bulk, Err(DatabaseError::Forbidden { .. })));

    let stored = posts.find_by_id(&id).await?.expect("post still exists");
    assert_eq!(stored["title"], json!("draft"));

    // The owner goes through the same check and passes
    assert_eq!(posts.update_one(json!({ "id": id }), json!({ "title": "final" })).await?, 1);
    Ok(())
}

#[tokio::test]
async fn unowned_records_update_without_an_acting_user() -> Result<()> {
    let s = school().await?;
    let branches = s.campus.registry.repository(&s.ctx, "Branch").await?;
    let branch = branches.create(json!({ "name": "North" })).await?;
    let updated = branches.update_by_id(&id_of(&branch), json!({ "name": "North campus" })).await?;
    assert_eq!(updated["name"], json!("North campus"));

    // Creator-less records of owned types are open as well
    let posts = s.campus.registry.repository(&s.ctx, "Post").await?;
    let post = posts.create(json!({ "title": "notice" })).await?;
    let updated = posts.update_by_id(&id_of(&post), json!({ "title": "notice (edited)" })).await?;
    assert_eq!(updated["title"], json!("notice (edited)"));

    let maintenance = RequestContext::untenanted();
    let users = s.campus.registry.repository(&maintenance, "User").await?;
    let operator = users.create(json!({ "name": "ops", "roles": ["admin"] })).await?;
    let updated = users.update_by_id(&id_of(&operator), json!({ "roles": ["admin", "teacher"] })).await?;
    assert_eq!(updated["roles"], json!(["admin", "teacher"]));
    Ok(())
}

#[tokio::test]
async fn promoting_both_users_to_admin_grants_edit() -> Result<()> {
    let s = school().await?;
    let created = s
        .campus
        .seed(&s.ctx, "Post", vec![json!({ "title": "unchanged", "created_by": s.student.id.to_string() })])
        .await?;

    let viewer = s.ctx.clone().with_user(s.teacher);
    let can_edit = || {
        let (ctx, registry) = (&viewer, &s.campus.registry);
        async move {
            let page = QueryEngine::new(registry)
                .paginate_entity(ctx, "Post", &QueryDescriptor::new())
                .await?;
            Ok::<_, anyhow::Error>(page.results[0]["can_edit"].clone())
        }
    };
    assert_eq!(can_edit().await?, json!(false));

    let users = s.campus.registry.repository(&s.ctx, "User").await?;
    for user in [s.student, s.teacher] {
        users.update_by_id(&user.id.to_string(), json!({ "roles": ["admin"] })).await?;
    }
    assert_eq!(can_edit().await?, json!(true));

    let posts = s.campus.registry.repository(&viewer, "Post").await?;
    let record = posts.find_by_id(&id_of(&created[0])).await?.expect("post still exists");
    assert_eq!(record["title"], json!("unchanged"));
    assert_eq!(record["updated_at"], created[0]["updated_at"]);
    Ok(())
}

#[tokio::test]
async fn admins_may_edit_each_others_records() -> Result<()> {
    let s = school().await?;
    let as_admin = s.campus.registry.repository(&s.ctx.clone().with_user(s.admin), "Inventory").await?;
    let item = as_admin.create(json!({ "name": "Projector" })).await?;

    let as_other = s.campus.registry.repository(&s.ctx.clone().with_user(s.other_admin), "Inventory").await?;
    let updated = as_other.update_by_id(&id_of(&item), json!({ "name": "Projector (broken)" })).await?;
    assert_eq!(updated["name"], json!("Projector (broken)"));
    Ok(())
}

#[tokio::test]
async fn update_by_id_rejects_missing_and_malformed_ids() -> Result<()> {
    let s = school().await?;
    let posts = s.campus.registry.repository(&s.ctx.clone().with_user(s.admin), "Post").await?;

    let missing = posts.update_by_id(&Uuid::new_v4().to_string(), json!({ "title": "x" })).await;
    assert!(matches!(missing, Err(DatabaseError::NotFound(_))));

    let malformed = posts.update_by_id("42", json!({ "title": "x" })).await;
    assert!(matches!(malformed, Err(DatabaseError::InvalidId { .. })));
    Ok(())
}
