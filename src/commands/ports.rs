//! Show a sandbox's port mappings.

use anyhow::Result;
use std::fmt::Write;

use super::manager;
use crate::sandbox::PortMapping;

pub fn format_ports(name: &str, ports: &PortMapping) -> String {
    let mut out = String::new();
    if ports.is_empty() {
        writeln!(&mut out, "No ports found for sandbox '{name}' (not running?)").unwrap();
        return out;
    }
    writeln!(&mut out, "Ports for '{name}':").unwrap();
    for (container, host) in ports {
        writeln!(&mut out, "  {container}/tcp -> 0.0.0.0:{host}").unwrap();
    }
    out
}

pub async fn run(name: &str) -> Result<()> {
    let manager = manager()?;
    let ports = manager.ports(name).await?;
    print!("{}", format_ports(name, &ports));
    Ok(())
}
