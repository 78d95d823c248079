//! iptables NAT rules for bridge networks.
//!
//! Each bridge network gets one MASQUERADE rule so containers can reach the
//! outside world, and each published port gets one DNAT rule. Rules are
//! checked with `-C` before being added or deleted, which keeps both
//! directions idempotent.

use std::net::Ipv4Addr;
use std::path::Path;
use std::process::Command;

use hutch_common::error::{HutchError, Result};
use ipnetwork::Ipv4Network;

const IPTABLES: &str = "iptables";
const IP_FORWARD: &str = "/proc/sys/net/ipv4/ip_forward";

/// What to do with a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Append,
    Check,
    Delete,
}

impl Action {
    const fn flag(self) -> &'static str {
        match self {
            Self::Append => "-A",
            Self::Check => "-C",
            Self::Delete => "-D",
        }
    }
}

/// Source NAT for traffic leaving a bridge subnet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasqueradeRule {
    /// Container subnet.
    pub source: Ipv4Network,
    /// Bridge the subnet lives on; traffic back out of it is not rewritten.
    pub bridge: String,
}

impl MasqueradeRule {
    /// Creates the MASQUERADE rule for `source` behind `bridge`.
    #[must_use]
    pub fn new(source: Ipv4Network, bridge: impl Into<String>) -> Self {
        Self {
            source,
            bridge: bridge.into(),
        }
    }

    fn args(&self, action: Action) -> Vec<String> {
        vec![
            "-t".into(),
            "nat".into(),
            action.flag().into(),
            "POSTROUTING".into(),
            "-s".into(),
            self.source.to_string(),
            "!".into(),
            "-o".into(),
            self.bridge.clone(),
            "-j".into(),
            "MASQUERADE".into(),
        ]
    }
}

/// TCP port forwarding from the host to a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DnatRule {
    /// Port on the host.
    pub host_port: u16,
    /// Container address.
    pub container_ip: Ipv4Addr,
    /// Port inside the container.
    pub container_port: u16,
}

impl DnatRule {
    fn args(&self, action: Action) -> Vec<String> {
        vec![
            "-t".into(),
            "nat".into(),
            action.flag().into(),
            "PREROUTING".into(),
            "-p".into(),
            "tcp".into(),
            "-m".into(),
            "tcp".into(),
            "--dport".into(),
            self.host_port.to_string(),
            "-j".into(),
            "DNAT".into(),
            "--to-destination".into(),
            format!("{}:{}", self.container_ip, self.container_port),
        ]
    }
}

/// A rule hutch manages in the `nat` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NatRule {
    /// Outbound source NAT for a bridge subnet.
    Masquerade(MasqueradeRule),
    /// Inbound port forwarding.
    Dnat(DnatRule),
}

impl NatRule {
    fn args(&self, action: Action) -> Vec<String> {
        match self {
            Self::Masquerade(rule) => rule.args(action),
            Self::Dnat(rule) => rule.args(action),
        }
    }

    /// Whether the rule is currently installed.
    ///
    /// # Errors
    ///
    /// Returns an error if `iptables` cannot be executed.
    pub fn exists(&self) -> Result<bool> {
        let output = Command::new(IPTABLES)
            .args(self.args(Action::Check))
            .output()
            .map_err(|e| HutchError::Network {
                message: format!("failed to run {IPTABLES}: {e}"),
            })?;
        Ok(output.status.success())
    }

    /// Installs the rule unless it is already present.
    ///
    /// # Errors
    ///
    /// Returns an error if `iptables` fails.
    pub fn install(&self) -> Result<()> {
        if self.exists()? {
            tracing::debug!(rule = ?self, "nat rule already installed");
            return Ok(());
        }
        run_iptables(&self.args(Action::Append))?;
        tracing::debug!(rule = ?self, "nat rule installed");
        Ok(())
    }

    /// Deletes the rule if it is present.
    ///
    /// # Errors
    ///
    /// Returns an error if `iptables` fails.
    pub fn remove(&self) -> Result<()> {
        if !self.exists()? {
            return Ok(());
        }
        run_iptables(&self.args(Action::Delete))?;
        tracing::debug!(rule = ?self, "nat rule removed");
        Ok(())
    }
}

impl From<MasqueradeRule> for NatRule {
    fn from(rule: MasqueradeRule) -> Self {
        Self::Masquerade(rule)
    }
}

impl From<DnatRule> for NatRule {
    fn from(rule: DnatRule) -> Self {
        Self::Dnat(rule)
    }
}

fn run_iptables(args: &[String]) -> Result<()> {
    let output = Command::new(IPTABLES)
        .args(args)
        .output()
        .map_err(|e| HutchError::Network {
            message: format!("failed to run {IPTABLES}: {e}"),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(HutchError::Network {
            message: format!("{IPTABLES} {} failed: {}", args.join(" "), stderr.trim()),
        });
    }
    Ok(())
}

/// Turns on IPv4 forwarding so bridged traffic can be routed.
///
/// # Errors
///
/// Returns an error if the sysctl cannot be written.
pub fn enable_ip_forward() -> Result<()> {
    let path = Path::new(IP_FORWARD);
    if std::fs::read_to_string(path).is_ok_and(|v| v.trim() == "1") {
        return Ok(());
    }
    std::fs::write(path, "1").map_err(|e| HutchError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masquerade_excludes_bridge_egress() {
        let rule = MasqueradeRule::new("192.168.10.0/24".parse().unwrap(), "testbr");
        assert_eq!(
            rule.args(Action::Append).join(" "),
            "-t nat -A POSTROUTING -s 192.168.10.0/24 ! -o testbr -j MASQUERADE"
        );
    }

    #[test]
    fn dnat_forwards_host_port_to_container() {
        let rule = DnatRule {
            host_port: 8080,
            container_ip: Ipv4Addr::new(192, 168, 10, 2),
            container_port: 80,
        };
        assert_eq!(
            NatRule::from(rule).args(Action::Append).join(" "),
            "-t nat -A PREROUTING -p tcp -m tcp --dport 8080 -j DNAT --to-destination 192.168.10.2:80"
        );
    }

    #[test]
    fn delete_and_check_reuse_the_rule_body() {
        let rule = NatRule::from(MasqueradeRule::new(
            "10.1.0.0/16".parse().unwrap(),
            "br1",
        ));
        let append = rule.args(Action::Append);
        let delete = rule.args(Action::Delete);
        let check = rule.args(Action::Check);
        assert_eq!(delete[2], "-D");
        assert_eq!(check[2], "-C");
        assert_eq!(append[3..], delete[3..]);
        assert_eq!(append[3..], check[3..]);
    }
}
