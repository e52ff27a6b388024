// Host list partitioning

use crate::output::errors::VolleyError;

/// An ordered, non-empty slice of the resolved host list. Batches never
/// exceed the configured size; the last one may be smaller.
pub type Batch = Vec<String>;

/// Partition a resolved host list into fixed-size batches.
///
/// Slicing preserves discovery order and passes duplicates through; manual
/// lists may legitimately repeat a host. An empty host list is fatal, not
/// recoverable: there is nothing to run against.
pub fn partition(hosts: &[String], size: usize) -> Result<Vec<Batch>, VolleyError> {
    if size == 0 {
        return Err(VolleyError::Config {
            message: "batch size must be greater than zero".to_string(),
            suggestion: Some("Pass --batch-size with a positive value".to_string()),
        });
    }

    if hosts.is_empty() {
        return Err(VolleyError::NoHosts);
    }

    Ok(hosts.chunks(size).map(|chunk| chunk.to_vec()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn hosts(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_partition_produces_ceil_n_over_k_batches() {
        let list = hosts(&["a", "b", "c", "d", "e"]);

        let batches = partition(&list, 2).unwrap();

        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0], hosts(&["a", "b"]));
        assert_eq!(batches[1], hosts(&["c", "d"]));
        assert_eq!(batches[2], hosts(&["e"]));
    }

    #[test]
    fn test_partition_round_trips_in_order() {
        let list = hosts(&["w1", "w2", "db1", "db2", "cache1", "cache2", "lb1"]);

        let batches = partition(&list, 3).unwrap();
        let rejoined: Vec<String> = batches.into_iter().flatten().collect();

        assert_eq!(rejoined, list);
    }

    #[test]
    fn test_partition_example_from_three_hosts() {
        let list = hosts(&["a", "bb", "ccc"]);

        let batches = partition(&list, 2).unwrap();

        assert_eq!(batches, vec![hosts(&["a", "bb"]), hosts(&["ccc"])]);
    }

    #[test]
    fn test_partition_keeps_duplicates() {
        let list = hosts(&["web1", "web1", "web2"]);

        let batches = partition(&list, 5).unwrap();

        assert_eq!(batches, vec![hosts(&["web1", "web1", "web2"])]);
    }

    #[test]
    fn test_zero_batch_size_is_invalid_configuration() {
        let list = hosts(&["a"]);

        let err = partition(&list, 0).unwrap_err();

        assert!(matches!(err, VolleyError::Config { .. }));
    }

    #[test]
    fn test_empty_host_list_is_fatal() {
        let err = partition(&[], 5).unwrap_err();

        assert!(matches!(err, VolleyError::NoHosts));
        assert_eq!(err.exit_code(), 10);
    }

    #[test]
    fn test_single_batch_when_size_exceeds_list() {
        let list = hosts(&["a", "b"]);

        let batches = partition(&list, 10).unwrap();

        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0], list);
    }
}
