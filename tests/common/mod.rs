#![allow(dead_code)]

use serde_json::Value;

use campus_data::database::Document;

pub use campus_data::testing::TestCampus;

/// Installs a test subscriber once; `RUST_LOG` controls verbosity.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn id_of(doc: &Document) -> String {
    doc.get("id").and_then(Value::as_str).unwrap_or_default().to_string()
}

pub fn field<'a>(docs: &'a [Document], name: &str) -> Vec<&'a Value> {
    docs.iter().filter_map(|d| d.get(name)).collect()
}
