//! Host port allocation for sandbox containers.
//!
//! Every sandbox shifts all of its exposed ports by one shared offset, so
//! the distances between services inside a sandbox are preserved.

use bollard::models::PortMap;
use std::collections::BTreeMap;

use super::SandboxError;

/// Container port to host port.
pub(crate) type PortMapping = BTreeMap<u16, u16>;

/// Compute the next free offset given the mappings of existing sandboxes.
///
/// The first base port is the reference: each existing mapping that exposes
/// it contributes `host - reference`, and the result is one past the highest
/// of those offsets (0 when none expose it).
pub(crate) fn next_offset<'a, I>(base_ports: &[u16], existing: I) -> u16
where
    I: IntoIterator<Item = &'a PortMapping>,
{
    let Some(&reference) = base_ports.first() else {
        return 0;
    };

    let max_offset = existing
        .into_iter()
        .filter_map(|ports| ports.get(&reference))
        .map(|&host| i32::from(host) - i32::from(reference))
        .fold(-1, i32::max);

    u16::try_from(max_offset + 1).unwrap_or(u16::MAX)
}

/// Apply an offset to every base port.
pub(crate) fn build_mapping(base_ports: &[u16], offset: u16) -> Result<PortMapping, SandboxError> {
    base_ports
        .iter()
        .map(|&port| {
            port.checked_add(offset)
                .map(|host| (port, host))
                .ok_or(SandboxError::PortRangeExhausted { port, offset })
        })
        .collect()
}

/// Parse the runtime's live port report into a mapping.
///
/// Keys look like `8000/tcp`; unbound ports and unparsable entries are
/// skipped. When a port is bound on several interfaces the first binding
/// wins.
pub(crate) fn parse_port_map(report: &PortMap) -> PortMapping {
    let mut mapping = PortMapping::new();
    for (key, bindings) in report {
        let Some(container_port) = key
            .split('/')
            .next()
            .and_then(|p| p.parse::<u16>().ok())
        else {
            continue;
        };
        let host_port = bindings
            .iter()
            .flatten()
            .find_map(|b| b.host_port.as_deref().and_then(|p| p.parse::<u16>().ok()));
        if let Some(host_port) = host_port {
            mapping.entry(container_port).or_insert(host_port);
        }
    }
    mapping
}

#[cfg(test)]
mod tests {
    use super::*;
    use bollard::models::PortBinding;

    fn mapping(pairs: &[(u16, u16)]) -> PortMapping {
        pairs.iter().copied().collect()
    }

    #[test]
    fn test_next_offset_no_base_ports() {
        let existing = [mapping(&[(8000, 8005)])];
        assert_eq!(next_offset(&[], &existing), 0);
    }

    #[test]
    fn test_next_offset_no_existing_containers() {
        assert_eq!(next_offset(&[8000], &[]), 0);
    }

    #[test]
    fn test_next_offset_after_existing() {
        let existing = [mapping(&[(8000, 8000)]), mapping(&[(8000, 8001)])];
        assert_eq!(next_offset(&[8000, 5432], &existing), 2);
    }

    #[test]
    fn test_next_offset_skips_containers_without_reference_port() {
        let existing = [mapping(&[(3000, 3007)]), mapping(&[(8000, 8003)])];
        assert_eq!(next_offset(&[8000], &existing), 4);
    }

    #[test]
    fn test_next_offset_uses_max_not_count() {
        let existing = [mapping(&[(8000, 8004)])];
        assert_eq!(next_offset(&[8000], &existing), 5);
    }

    #[test]
    fn test_next_offset_ignores_negative_offsets() {
        let existing = [mapping(&[(8000, 7000)])];
        assert_eq!(next_offset(&[8000], &existing), 0);
    }

    #[test]
    fn test_build_mapping_shifts_all_ports() {
        let ports = build_mapping(&[8000, 5432], 2).unwrap();
        assert_eq!(ports, mapping(&[(8000, 8002), (5432, 5434)]));
    }

    #[test]
    fn test_build_mapping_overflow() {
        let err = build_mapping(&[65535], 1).unwrap_err();
        assert!(matches!(
            err,
            SandboxError::PortRangeExhausted {
                port: 65535,
                offset: 1
            }
        ));
    }

    #[test]
    fn test_parse_port_map() {
        let mut report = PortMap::new();
        report.insert(
            "8000/tcp".to_string(),
            Some(vec![
                PortBinding {
                    host_ip: Some("0.0.0.0".to_string()),
                    host_port: Some("8001".to_string()),
                },
                PortBinding {
                    host_ip: Some("::".to_string()),
                    host_port: Some("8001".to_string()),
                },
            ]),
        );
        report.insert("9000/tcp".to_string(), None);
        report.insert("bogus".to_string(), Some(vec![]));

        assert_eq!(parse_port_map(&report), mapping(&[(8000, 8001)]));
    }

    #[test]
    fn test_parse_empty_port_map() {
        assert!(parse_port_map(&PortMap::new()).is_empty());
    }
}
