use serde_json::json;

use crate::cli::utils::output_structured;
use crate::cli::OutputFormat;
use crate::database::DatabaseManager;

pub async fn handle(output_format: OutputFormat) -> anyhow::Result<()> {
    let result = DatabaseManager::health_check().await;
    DatabaseManager::close_all().await;

    let data = json!({
        "status": if result.is_ok() { "ok" } else { "unavailable" },
        "error": result.as_ref().err().map(|e| e.to_string()),
    });
    if !output_structured(output_format, &data)? {
        match &result {
            Ok(()) => println!("database: ok"),
            Err(e) => println!("database: unavailable ({})", e),
        }
    }
    result.map_err(Into::into)
}
