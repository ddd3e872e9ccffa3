use serde::Serialize;
use std::collections::BTreeMap;

use crate::cli::utils::output_structured;
use crate::cli::OutputFormat;
use crate::database::resolver::base_name;
use crate::entity::catalog::school_entities;

#[derive(Serialize)]
struct EntityRow {
    name: String,
    collection: String,
    ownership: bool,
    references: BTreeMap<String, String>,
    owned_arrays: Vec<String>,
}

pub async fn handle(output_format: OutputFormat) -> anyhow::Result<()> {
    let mut rows: Vec<EntityRow> = school_entities()
        .iter()
        .map(|schema| EntityRow {
            name: schema.name().to_string(),
            collection: base_name(schema),
            ownership: schema.has_ownership(),
            references: schema.references().clone(),
            owned_arrays: schema.owned_arrays().to_vec(),
        })
        .collect();
    rows.sort_by(|a, b| a.name.cmp(&b.name));

    if output_structured(output_format, &rows)? {
        return Ok(());
    }

    println!("{:<14} {:<16} {:<6} {}", "ENTITY", "COLLECTION", "OWNED", "REFERENCES");
    println!("{}", "-".repeat(70));
    for row in &rows {
        let references: Vec<String> = row
            .references
            .iter()
            .map(|(field, entity)| format!("{}->{}", field, entity))
            .collect();
        let owned = if row.ownership { "yes" } else { "" };
        println!("{:<14} {:<16} {:<6} {}", row.name, row.collection, owned, references.join(", "));
    }
    Ok(())
}
