use std::sync::Arc;

use clap::Args;

use crate::cli::utils::{output_structured, parse_tenant, parse_user, summarize_record};
use crate::cli::OutputFormat;
use crate::context;
use crate::database::{DatabaseManager, PgStore};
use crate::entity::EntityRegistry;
use crate::observer::implementations::Notifier;
use crate::query::{Page, QueryDescriptor, QueryEngine};

#[derive(Args)]
pub struct FindArgs {
    #[arg(long, help = "Tenant id; omit to query un-prefixed collections")]
    pub tenant: Option<String>,

    #[arg(long, help = "Entity type, e.g. Post")]
    pub entity: String,

    #[arg(long, help = "Query string: page=2&limit=10&sort=-created_at&filter=[...]")]
    pub query: Option<String>,

    #[arg(long, help = "Acting user id, used for can_edit")]
    pub user: Option<String>,
}

pub async fn handle(args: FindArgs, output_format: OutputFormat) -> anyhow::Result<()> {
    let tenant = parse_tenant(args.tenant.as_deref())?;
    let user = parse_user(args.user.as_deref())?;
    let descriptor = QueryDescriptor::from_query_string(args.query.as_deref().unwrap_or(""));

    let store = PgStore::connect().await?;
    let registry = EntityRegistry::school(Arc::new(store), Notifier::new(16));
    let engine = QueryEngine::new(&registry);

    let result = match tenant {
        Some(tenant) => {
            context::run(tenant, user, |ctx| async move {
                engine.paginate_entity(&ctx, &args.entity, &descriptor).await
            })
            .await
        }
        None => {
            context::run_untenanted(|ctx| async move {
                engine.paginate_entity(&ctx, &args.entity, &descriptor).await
            })
            .await
        }
    };

    registry.observers().drain().await;
    DatabaseManager::close_all().await;
    print_page(&result?, output_format)
}

fn print_page(page: &Page, output_format: OutputFormat) -> anyhow::Result<()> {
    if output_structured(output_format, page)? {
        return Ok(());
    }
    for record in &page.results {
        println!("{}", summarize_record(record));
    }
    println!(
        "-- page {}/{} ({} results, limit {})",
        page.page, page.total_pages, page.total_results, page.limit
    );
    Ok(())
}
