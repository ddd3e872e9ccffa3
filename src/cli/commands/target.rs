use clap::Args;
use serde_json::json;

use crate::cli::utils::{output_structured, parse_tenant};
use crate::cli::OutputFormat;
use crate::context::RequestContext;
use crate::database::resolver::physical_target;
use crate::entity::catalog::school_entities;

#[derive(Args)]
pub struct TargetArgs {
    #[arg(long, help = "Tenant id; omit for un-prefixed targets")]
    pub tenant: Option<String>,

    #[arg(long, help = "Entity type, e.g. Post")]
    pub entity: String,
}

pub async fn handle(args: TargetArgs, output_format: OutputFormat) -> anyhow::Result<()> {
    let schema = school_entities()
        .into_iter()
        .find(|s| s.name().eq_ignore_ascii_case(&args.entity))
        .ok_or_else(|| anyhow::anyhow!("Unknown entity type: {}", args.entity))?;

    let ctx = match parse_tenant(args.tenant.as_deref())? {
        Some(tenant) => RequestContext::new(tenant),
        None => RequestContext::untenanted(),
    };
    let target = physical_target(&ctx, &schema);

    let data = json!({
        "tenant": ctx.tenant().map(|t| t.as_str()),
        "entity": schema.name(),
        "target": target,
    });
    if !output_structured(output_format, &data)? {
        println!("{}", target);
    }
    Ok(())
}
