use anyhow::{bail, Context, Result};
use std::num::NonZeroU16;

/// A `HashSet` specialized for ports.
///
/// Because ports are `u16` values, this type avoids the overhead of actually
/// hashing ports.
pub type PortSet = std::collections::HashSet<NonZeroU16, std::hash::BuildHasherDefault<PortHasher>>;

/// A hasher for ports.
///
/// Because ports are single `NonZeroU16` values, we don't have to hash them; we can just use
/// the integer values as hashes directly.
///
/// Borrowed from the proxy.
#[derive(Debug, Default)]
pub struct PortHasher(u16);

// === impl PortHasher ===

impl std::hash::Hasher for PortHasher {
    fn write(&mut self, _: &[u8]) {
        unreachable!("hashing a `u16` calls `write_u16`");
    }

    #[inline]
    fn write_u16(&mut self, port: u16) {
        self.0 = port;
    }

    #[inline]
    fn finish(&self) -> u64 {
        self.0 as u64
    }
}

/// Read a comma-separated of ports or port ranges from the given string.
pub fn parse_portset(s: &str) -> Result<PortSet> {
    let mut ports = PortSet::default();

    for spec in s.split(',') {
        match spec.split_once('-') {
            None => {
                if !spec.trim().is_empty() {
                    let port = spec.trim().parse().context("parsing port")?;
                    ports.insert(port);
                }
            }
            Some((floor, ceil)) => {
                let floor = floor.trim().parse::<NonZeroU16>().context("parsing port")?;
                let ceil = ceil.trim().parse::<NonZeroU16>().context("parsing port")?;
                if floor > ceil {
                    bail!("Port range must be increasing");
                }
                ports.extend(
                    (u16::from(floor)..=u16::from(ceil)).map(|p| NonZeroU16::try_from(p).unwrap()),
                );
            }
        }
    }

    Ok(ports)
}

/// Like `parse_portset`, but entries that are neither a bare number nor a
/// `floor-ceil` range are treated as named ports and resolved through
/// `resolve_name` (container ports for a pod, workload spec ports for an
/// `ExternalWorkload`, or a service's own named `ServicePort`s).
///
/// Unresolvable names are logged and skipped rather than failing the whole
/// annotation, matching the "skip the bad bit" tolerance used elsewhere for
/// malformed objects.
pub fn parse_port_spec(s: &str, resolve_name: impl Fn(&str) -> PortSet) -> PortSet {
    let mut ports = PortSet::default();
    for spec in s.split(',') {
        let spec = spec.trim();
        if spec.is_empty() {
            continue;
        }
        if spec.contains('-') || spec.chars().all(|c| c.is_ascii_digit()) {
            match parse_portset(spec) {
                Ok(parsed) => ports.extend(parsed),
                Err(error) => tracing::info!(%spec, %error, "invalid port entry"),
            }
            continue;
        }
        let resolved = resolve_name(spec);
        if resolved.is_empty() {
            tracing::info!(name = %spec, "named port not found");
        }
        ports.extend(resolved);
    }
    ports
}

#[cfg(test)]
mod tests {
    use super::*;

    macro_rules! ports {
        ($($x:expr),+ $(,)?) => (
            vec![$($x),+]
                .into_iter()
                .map(NonZeroU16::try_from)
                .collect::<Result<PortSet, _>>()
                .unwrap()
        );
    }

    #[test]
    fn parse_portset() {
        use super::parse_portset;

        assert!(parse_portset("").unwrap().is_empty(), "empty");
        assert!(parse_portset("0").is_err(), "0");
        assert_eq!(parse_portset("1").unwrap(), ports![1], "1");
        assert_eq!(parse_portset("1-3").unwrap(), ports![1, 2, 3], "1-2");
        assert_eq!(parse_portset("4,1-2").unwrap(), ports![1, 2, 4], "4,1-2");
        assert!(parse_portset("2-1").is_err(), "2-1");
        assert!(parse_portset("2-").is_err(), "2-");
        assert!(parse_portset("65537").is_err(), "65537");
    }

    #[test]
    fn port_spec_resolves_names_and_ranges() {
        let resolved = parse_port_spec("admin,8080-8081,http", |name| match name {
            "admin" => ports![9990],
            "http" => ports![80],
            _ => PortSet::default(),
        });
        assert_eq!(resolved, ports![80, 8080, 8081, 9990]);
    }

    #[test]
    fn port_spec_skips_unresolvable_names() {
        let resolved = parse_port_spec("missing,80", |_| PortSet::default());
        assert_eq!(resolved, ports![80]);
    }
}
