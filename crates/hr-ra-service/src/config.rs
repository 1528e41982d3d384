use std::net::Ipv6Addr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use hr_radvd::RaParams;
use ipnet::Ipv6Net;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaServiceConfig {
    #[serde(default)]
    pub interface: String,
    #[serde(default)]
    pub has_default_route: bool,
    #[serde(default = "default_hop_limit")]
    pub hop_limit: u8,
    #[serde(default = "default_mtu")]
    pub mtu: u32,
    #[serde(default)]
    pub prefixes: Vec<String>,
    #[serde(default)]
    pub dns_servers: Vec<String>,
    #[serde(default = "default_true")]
    pub withdraw_on_exit: bool,
    #[serde(default = "default_exit_grace")]
    pub exit_grace_secs: u64,
}

fn default_hop_limit() -> u8 {
    hr_radvd::params::DEFAULT_HOP_LIMIT
}
fn default_mtu() -> u32 {
    1280
}
fn default_true() -> bool {
    true
}
fn default_exit_grace() -> u64 {
    // Six withdrawals at the minimum 3s spacing.
    18
}

impl Default for RaServiceConfig {
    fn default() -> Self {
        serde_json::from_str("{}").unwrap()
    }
}

pub fn config_path() -> PathBuf {
    PathBuf::from(
        std::env::var("HR_RA_CONFIG_PATH")
            .unwrap_or_else(|_| "/var/lib/server-dashboard/ra-config.json".to_string()),
    )
}

impl RaServiceConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        let config: RaServiceConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;
        Ok(config)
    }

    /// Load `path` if it exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load_from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// The snapshot to advertise for this config.
    pub fn to_params(&self) -> Result<RaParams> {
        let mut params = RaParams::new()
            .with_default_route(self.has_default_route)
            .with_hop_limit(self.hop_limit)
            .with_mtu(self.mtu);

        for p in &self.prefixes {
            let prefix: Ipv6Net = p
                .parse()
                .with_context(|| format!("Invalid IPv6 prefix: {}", p))?;
            params = params.with_prefix(prefix);
        }

        for d in &self.dns_servers {
            let dns: Ipv6Addr = d
                .parse()
                .with_context(|| format!("Invalid DNS server address: {}", d))?;
            params = params.with_dns(dns);
        }

        Ok(params)
    }
}
