//! Interface lookup via sysfs.

use std::path::Path;

use anyhow::{Context, Result};
use hr_radvd::InterfaceParams;
use tracing::warn;

const SYS_CLASS_NET: &str = "/sys/class/net";

pub fn resolve_interface(name: &str) -> Result<InterfaceParams> {
    resolve_interface_in(Path::new(SYS_CLASS_NET), name)
}

fn resolve_interface_in(root: &Path, name: &str) -> Result<InterfaceParams> {
    if name.is_empty() {
        anyhow::bail!("No interface configured");
    }

    let dir = root.join(name);
    let index: u32 = std::fs::read_to_string(dir.join("ifindex"))
        .with_context(|| format!("Interface {} not found", name))?
        .trim()
        .parse()
        .with_context(|| format!("Invalid ifindex for {}", name))?;

    let hw_addr = match std::fs::read_to_string(dir.join("address")) {
        Ok(s) => parse_mac(s.trim()).unwrap_or_else(|| {
            warn!(interface = name, address = s.trim(), "Unsupported hardware address, omitting SLLA");
            Vec::new()
        }),
        Err(e) => {
            warn!(interface = name, "Failed to read hardware address: {}", e);
            Vec::new()
        }
    };

    Ok(InterfaceParams::new(name, index, hw_addr))
}

/// Parse `aa:bb:cc:dd:ee:ff`. Any other length is rejected.
fn parse_mac(s: &str) -> Option<Vec<u8>> {
    let bytes = s
        .split(':')
        .map(|b| u8::from_str_radix(b, 16).ok())
        .collect::<Option<Vec<u8>>>()?;
    (bytes.len() == 6).then_some(bytes)
}
