// Inventory resolution - turns a selection into host addresses

mod script;

pub use script::ScriptResolver;

use async_trait::async_trait;

use crate::output::errors::VolleyError;

/// One inventory record: a flat map of attribute name to value
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Resolves a selection query into inventory records.
///
/// The engine only consumes host address strings; what a query means and
/// where records come from is the resolver's business.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<Record>, VolleyError>;
}

/// Pull the connection address out of a record. Only string attributes
/// qualify; a record without the attribute yields `None`.
pub fn extract_address(record: &Record, attribute: &str) -> Option<String> {
    match record.get(attribute) {
        Some(serde_json::Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// Parse a manual host list: the selection argument is a space-separated
/// list of addresses instead of a query.
pub fn manual_list(arg: &str) -> Vec<String> {
    arg.split_whitespace().map(|s| s.to_string()).collect()
}

/// Resolve a query to host addresses via a resolver.
///
/// Records missing the configured attribute are skipped, matching the
/// behavior of searches that return partially-populated records.
pub async fn resolve_hosts(
    resolver: &dyn Resolver,
    query: &str,
    attribute: &str,
) -> Result<Vec<String>, VolleyError> {
    let records = resolver.search(query).await?;

    let hosts: Vec<String> = records
        .iter()
        .filter_map(|record| extract_address(record, attribute))
        .collect();

    tracing::debug!(
        query,
        attribute,
        records = records.len(),
        hosts = hosts.len(),
        "resolved inventory query"
    );

    Ok(hosts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(pairs: &[(&str, serde_json::Value)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    struct FakeResolver(Vec<Record>);

    #[async_trait]
    impl Resolver for FakeResolver {
        async fn search(&self, _query: &str) -> Result<Vec<Record>, VolleyError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_manual_list_splits_on_whitespace() {
        assert_eq!(
            manual_list("web1  web2\tdb1"),
            vec!["web1".to_string(), "web2".to_string(), "db1".to_string()]
        );
        assert!(manual_list("   ").is_empty());
    }

    #[test]
    fn test_extract_address_wants_a_string() {
        let rec = record(&[
            ("fqdn", json!("web1.example.com")),
            ("port", json!(22)),
            ("empty", json!("")),
        ]);

        assert_eq!(
            extract_address(&rec, "fqdn").as_deref(),
            Some("web1.example.com")
        );
        assert_eq!(extract_address(&rec, "port"), None);
        assert_eq!(extract_address(&rec, "empty"), None);
        assert_eq!(extract_address(&rec, "missing"), None);
    }

    #[tokio::test]
    async fn test_resolve_hosts_skips_records_without_attribute() {
        let resolver = FakeResolver(vec![
            record(&[("fqdn", json!("web1.example.com"))]),
            record(&[("ipaddress", json!("10.0.0.2"))]),
            record(&[("fqdn", json!("web3.example.com"))]),
        ]);

        let hosts = resolve_hosts(&resolver, "role:web", "fqdn").await.unwrap();

        assert_eq!(hosts, vec!["web1.example.com", "web3.example.com"]);
    }

    #[tokio::test]
    async fn test_resolve_hosts_preserves_record_order() {
        let resolver = FakeResolver(vec![
            record(&[("fqdn", json!("c"))]),
            record(&[("fqdn", json!("a"))]),
            record(&[("fqdn", json!("b"))]),
        ]);

        let hosts = resolve_hosts(&resolver, "*:*", "fqdn").await.unwrap();

        assert_eq!(hosts, vec!["c", "a", "b"]);
    }
}
