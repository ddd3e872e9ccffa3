mod common;

use std::sync::Arc;

use anyhow::Result;
use serde_json::json;

use campus_data::context::{self, RequestContext, TenantId};
use campus_data::database::{DatabaseError, StoreError};
use campus_data::entity::EntitySchema;
use common::TestCampus;

#[tokio::test]
async fn same_entity_resolves_to_per_tenant_collections() -> Result<()> {
    common::init_tracing();
    let campus = TestCampus::new();
    let school_a = campus.tenant("school-a")?;
    let school_b = campus.tenant("school-b")?;

    let posts_a = campus.registry.repository(&school_a, "Post").await?;
    let posts_b = campus.registry.repository(&school_b, "Post").await?;
    assert_eq!(posts_a.target(), "school-a_posts");
    assert_eq!(posts_b.target(), "school-b_posts");

    posts_a.create(json!({ "title": "A only" })).await?;
    posts_b.create(json!({ "title": "B one" })).await?;
    posts_b.create(json!({ "title": "B two" })).await?;

    assert_eq!(posts_a.count(None).await?, 1);
    assert_eq!(posts_b.count(None).await?, 2);
    assert_eq!(campus.store.dump("school-a_posts").await.len(), 1);
    Ok(())
}

#[tokio::test]
async fn untenanted_context_uses_bare_names() -> Result<()> {
    let campus = TestCampus::new();
    let users = campus.registry.repository(&RequestContext::untenanted(), "User").await?;
    assert_eq!(users.target(), "users");

    let classes = campus.registry.repository(&RequestContext::untenanted(), "Class").await?;
    assert_eq!(classes.target(), "classes");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn interleaved_operations_never_cross_tenants() -> Result<()> {
    let campus = Arc::new(TestCampus::new());
    let tenants = [TestCampus::generate_tenant_name(), TestCampus::generate_tenant_name()];

    let mut tasks = Vec::new();
    for i in 0..40 {
        let campus = campus.clone();
        let tenant = TenantId::new(tenants[i % 2].clone())?;
        tasks.push(tokio::spawn(async move {
            context::run(tenant, None, |ctx| async move {
                let posts = campus.registry.repository(&ctx, "Post").await?;
                tokio::task::yield_now().await;
                let tenant = ctx.tenant().map(|t| t.to_string()).unwrap_or_default();
                posts.create(json!({ "title": format!("post {}", i), "written_for": tenant })).await?;
                Ok::<_, DatabaseError>(())
            })
            .await
        }));
    }
    for task in tasks {
        task.await??;
    }

    for tenant in &tenants {
        let docs = campus.store.dump(&format!("{}_posts", tenant)).await;
        assert_eq!(docs.len(), 20);
        assert!(docs.iter().all(|d| d["written_for"] == json!(tenant)));
    }
    Ok(())
}

#[tokio::test]
async fn nested_run_shadows_tenant_only_inside() -> Result<()> {
    let campus = TestCampus::new();
    let campus = &campus;
    let outer = TenantId::new("school-a")?;
    let (inner_target, outer_target) = context::run(outer, None, |ctx| async move {
        let inner = ctx
            .run(TenantId::new("school-b")?, |inner| async move {
                Ok::<_, anyhow::Error>(campus.registry.repository(&inner, "Session").await?.target().to_string())
            })
            .await?;
        let outer = campus.registry.repository(&ctx, "Session").await?.target().to_string();
        Ok::<_, anyhow::Error>((inner, outer))
    })
    .await?;

    assert_eq!(inner_target, "school-b_sessions");
    assert_eq!(outer_target, "school-a_sessions");
    Ok(())
}

#[tokio::test]
async fn unknown_entity_type_is_rejected() -> Result<()> {
    let campus = TestCampus::new();
    let ctx = campus.tenant("school-a")?;
    let err = campus.registry.repository(&ctx, "Unknown").await.err();
    assert!(matches!(err, Some(DatabaseError::UnknownEntity(_))));
    Ok(())
}

#[tokio::test]
async fn store_rejections_propagate_unchanged() -> Result<()> {
    let mut campus = TestCampus::new();
    campus.registry.register(EntitySchema::new("Broken").with_collection("bad name"));
    let ctx = campus.tenant("school-a")?;

    let err = campus.registry.repository(&ctx, "Broken").await.err();
    assert!(matches!(
        err,
        Some(DatabaseError::Store(StoreError::InvalidCollection(name))) if name == "school-a_bad name"
    ));
    Ok(())
}
