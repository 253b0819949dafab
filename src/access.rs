//! Address-based access control.
//!
//! Rules come from the command line or config file as text and are resolved
//! once at startup:
//!
//! | Input            | Rule                                         |
//! |------------------|----------------------------------------------|
//! | `10.0.0.5`       | exact address                                |
//! | `fileserver`     | exact address, one per resolved address      |
//! | `10.0.0.0/24`    | network, host bits cleared                   |
//! | `fileserver/24`  | network around the host's first address      |
//!
//! A rule that fails to resolve is reported and dropped; the others still
//! apply.
//!
//! # Decision
//!
//! 1. With no allow rules every address is admitted. With at least one,
//!    only addresses matching an allow rule are.
//! 2. An address matching any deny rule is rejected, whatever step 1 said.

use ipnet::IpNet;
use std::fmt;
use std::net::{IpAddr, ToSocketAddrs};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RuleError {
    #[error("Unable to resolve: {0}")]
    Unresolvable(String),
    #[error("Invalid CIDR address: {0}")]
    InvalidNetwork(String),
    #[error("None of the allow rules could be resolved; refusing to admit everyone")]
    AllowListUnresolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    Allow,
    Deny,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Address(IpAddr),
    Network(IpNet),
}

impl Target {
    /// `addr` must already be canonical (no IPv4-mapped IPv6).
    fn matches(&self, addr: IpAddr) -> bool {
        match self {
            Target::Address(exact) => *exact == addr,
            Target::Network(net) => net.contains(&addr),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Address(addr) => write!(f, "{addr}"),
            Target::Network(net) => write!(f, "{net}"),
        }
    }
}

/// A resolved rule, with the text it was resolved from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRule {
    pub policy: Policy,
    pub target: Target,
    pub source: String,
}

impl AccessRule {
    /// Resolve rule text. A hostname can yield several exact rules.
    pub fn resolve(text: &str, policy: Policy) -> Result<Vec<AccessRule>, RuleError> {
        let text = text.trim();
        let rule = |target| AccessRule {
            policy,
            target,
            source: text.to_string(),
        };

        if let Some((host, prefix)) = text.split_once('/') {
            let invalid = || RuleError::InvalidNetwork(text.to_string());
            let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
            let addr = *resolve_host(host)
                .map_err(|_| invalid())?
                .first()
                .ok_or_else(invalid)?;
            let net = IpNet::new(addr, prefix).map_err(|_| invalid())?.trunc();
            return Ok(vec![rule(Target::Network(net))]);
        }

        let addrs = resolve_host(text)?;
        Ok(addrs
            .into_iter()
            .map(|addr| rule(Target::Address(addr)))
            .collect())
    }
}

/// Resolve an IP literal or hostname to its distinct addresses.
fn resolve_host(host: &str) -> Result<Vec<IpAddr>, RuleError> {
    let unresolvable = || RuleError::Unresolvable(host.to_string());
    if host.is_empty() {
        return Err(unresolvable());
    }
    if let Ok(addr) = host.parse::<IpAddr>() {
        return Ok(vec![addr.to_canonical()]);
    }
    let mut addrs: Vec<IpAddr> = Vec::new();
    for sock in (host, 0).to_socket_addrs().map_err(|_| unresolvable())? {
        let addr = sock.ip().to_canonical();
        if !addrs.contains(&addr) {
            addrs.push(addr);
        }
    }
    if addrs.is_empty() {
        return Err(unresolvable());
    }
    Ok(addrs)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Admit,
    Reject,
}

/// Immutable allow/deny rule set, built once at startup.
#[derive(Debug, Clone, Default)]
pub struct AccessFilter {
    rules: Vec<AccessRule>,
}

/// Outcome of resolving a rule list: the filter plus every rule that was
/// dropped.
#[derive(Debug)]
pub struct Resolved {
    pub filter: AccessFilter,
    pub failures: Vec<RuleError>,
}

impl AccessFilter {
    pub fn new(rules: Vec<AccessRule>) -> Self {
        Self { rules }
    }

    /// Resolve textual allow and deny lists.
    ///
    /// Individual failures are collected in [`Resolved::failures`]. It is an
    /// error only when allow rules were given and none survived, since an
    /// empty allow list would admit everyone.
    pub fn resolve(allow: &[String], deny: &[String]) -> Result<Resolved, RuleError> {
        let mut rules = Vec::new();
        let mut failures = Vec::new();
        for (texts, policy) in [(allow, Policy::Allow), (deny, Policy::Deny)] {
            for text in texts {
                match AccessRule::resolve(text, policy) {
                    Ok(resolved) => rules.extend(resolved),
                    Err(e) => failures.push(e),
                }
            }
        }

        let filter = Self::new(rules);
        if !allow.is_empty() && !filter.has_allow_rules() {
            return Err(RuleError::AllowListUnresolved);
        }
        Ok(Resolved { filter, failures })
    }

    pub fn rules(&self) -> &[AccessRule] {
        &self.rules
    }

    fn has_allow_rules(&self) -> bool {
        self.rules.iter().any(|r| r.policy == Policy::Allow)
    }

    pub fn decide(&self, addr: IpAddr) -> Decision {
        let addr = addr.to_canonical();
        let matches = |policy: Policy| {
            self.rules
                .iter()
                .filter(|r| r.policy == policy)
                .any(|r| r.target.matches(addr))
        };

        let mut decision = Decision::Admit;
        if self.has_allow_rules() && !matches(Policy::Allow) {
            decision = Decision::Reject;
        }
        if matches(Policy::Deny) {
            decision = Decision::Reject;
        }
        decision
    }
}
