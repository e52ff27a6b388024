// External-script inventory resolver
//
// The non-manual mode shells out to a configured executable with the
// selection query as its argument. The script prints a JSON array of flat
// records on stdout; the configured attribute picks the address field.

use std::path::PathBuf;
use std::process::Command;

use async_trait::async_trait;

use super::{Record, Resolver};
use crate::output::errors::VolleyError;

/// Inventory resolver backed by an external executable
#[derive(Debug, Clone)]
pub struct ScriptResolver {
    script_path: PathBuf,
}

impl ScriptResolver {
    pub fn new(script_path: PathBuf) -> Self {
        ScriptResolver { script_path }
    }

    fn run_script(&self, query: &str) -> Result<String, VolleyError> {
        let output = Command::new(&self.script_path)
            .arg(query)
            .output()
            .map_err(|e| VolleyError::Inventory {
                message: format!(
                    "Failed to execute inventory script '{}': {}",
                    self.script_path.display(),
                    e
                ),
                suggestion: Some(
                    "Ensure the script is executable and has correct permissions".to_string(),
                ),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VolleyError::Inventory {
                message: format!(
                    "Inventory script '{}' failed with exit code {}",
                    self.script_path.display(),
                    output.status.code().unwrap_or(-1)
                ),
                suggestion: if stderr.is_empty() {
                    Some("Check script output and logs".to_string())
                } else {
                    Some(format!("Script error: {}", stderr))
                },
            });
        }

        String::from_utf8(output.stdout).map_err(|e| VolleyError::Inventory {
            message: format!("Script output is not valid UTF-8: {}", e),
            suggestion: Some("Ensure the script outputs valid UTF-8 JSON".to_string()),
        })
    }
}

/// Parse the script's stdout into inventory records
pub(super) fn parse_records(raw: &str) -> Result<Vec<Record>, VolleyError> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| VolleyError::Inventory {
            message: format!("Inventory script output is not valid JSON: {}", e),
            suggestion: Some("The script must print a JSON array of objects".to_string()),
        })?;

    let items = value.as_array().ok_or_else(|| VolleyError::Inventory {
        message: "Inventory script output is not a JSON array".to_string(),
        suggestion: Some("The script must print a JSON array of objects".to_string()),
    })?;

    items
        .iter()
        .map(|item| {
            item.as_object().cloned().ok_or_else(|| VolleyError::Inventory {
                message: "Inventory record is not a JSON object".to_string(),
                suggestion: Some("Each array element must be an object of attributes".to_string()),
            })
        })
        .collect()
}

#[async_trait]
impl Resolver for ScriptResolver {
    async fn search(&self, query: &str) -> Result<Vec<Record>, VolleyError> {
        tracing::debug!(script = %self.script_path.display(), query, "running inventory script");
        let raw = self.run_script(query)?;
        parse_records(&raw)
    }
}
