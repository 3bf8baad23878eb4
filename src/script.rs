//! Script runner (component E).
//!
//! Builds the environment dhclient-script expects, invokes it, and reports
//! its exit status. The design notes ask that this stay synchronous (the
//! script installs the address; returning before it completes would race
//! the protocol) but sit behind a trait so tests can substitute a mock.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::ScriptError;
use crate::lease::ClientLease;
use crate::packet::OptionCode;

/// The reason code passed to the script, naming why it was invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    Bound,
    Renew,
    Rebind,
    Reboot,
    Expire,
    Fail,
    /// No broadcast interfaces.
    Nbi,
    Preinit,
    Medium,
    Release,
    Stop,
    Timeout,
}

impl Reason {
    fn as_str(self) -> &'static str {
        match self {
            Reason::Bound => "BOUND",
            Reason::Renew => "RENEW",
            Reason::Rebind => "REBIND",
            Reason::Reboot => "REBOOT",
            Reason::Expire => "EXPIRE",
            Reason::Fail => "FAIL",
            Reason::Nbi => "NBI",
            Reason::Preinit => "PREINIT",
            Reason::Medium => "MEDIUM",
            Reason::Release => "RELEASE",
            Reason::Stop => "STOP",
            Reason::Timeout => "TIMEOUT",
        }
    }
}

/// Which of a lease's option set to prefix environment variables with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeasePrefix {
    Old,
    New,
    Alias,
    Requested,
}

impl LeasePrefix {
    fn as_str(self) -> &'static str {
        match self {
            LeasePrefix::Old => "old_",
            LeasePrefix::New => "new_",
            LeasePrefix::Alias => "alias_",
            LeasePrefix::Requested => "requested_",
        }
    }
}

/// Everything a single script invocation needs, gathered by the state
/// machine before calling [`ScriptRunner::run`].
#[derive(Debug, Default)]
pub struct ScriptInvocation {
    pub reason: Option<Reason>,
    pub interface: String,
    pub medium: Option<String>,
    /// `(prefix, lease, parameter_request_list)` entries; more than one can
    /// be present at once (e.g. both `old_` and `new_` on a RENEW).
    pub leases: Vec<(LeasePrefix, ClientLease, Vec<OptionCode>)>,
}

impl ScriptInvocation {
    pub fn new(reason: Reason, interface: impl Into<String>) -> Self {
        ScriptInvocation {
            reason: Some(reason),
            interface: interface.into(),
            medium: None,
            leases: Vec::new(),
        }
    }

    pub fn with_lease(mut self, prefix: LeasePrefix, lease: ClientLease, requested: Vec<OptionCode>) -> Self {
        self.leases.push((prefix, lease, requested));
        self
    }

    pub fn with_medium(mut self, medium: impl Into<String>) -> Self {
        self.medium = Some(medium.into());
        self
    }

    /// Build the flat environment this invocation implies.
    pub fn build_env(&self, pid: u32) -> Result<BTreeMap<String, String>, ScriptError> {
        let mut env = BTreeMap::new();
        env.insert("interface".to_string(), self.interface.clone());
        env.insert("pid".to_string(), pid.to_string());
        if let Some(reason) = self.reason {
            env.insert("reason".to_string(), reason.as_str().to_string());
        }
        if let Some(medium) = &self.medium {
            env.insert("medium".to_string(), medium.clone());
        }
        for (prefix, lease, requested) in &self.leases {
            insert_lease_vars(&mut env, *prefix, lease, requested)?;
        }
        Ok(env)
    }
}

fn insert_lease_vars(
    env: &mut BTreeMap<String, String>,
    prefix: LeasePrefix,
    lease: &ClientLease,
    requested: &[OptionCode],
) -> Result<(), ScriptError> {
    let p = prefix.as_str();
    set_safe(env, format!("{p}ip_address"), format_ipv4(lease.address))?;
    if lease.next_server != [0; 4] {
        set_safe(env, format!("{p}next_server"), format_ipv4(lease.next_server))?;
    }
    if let Some(mask) = lease.options.lookup_ipv4(OptionCode::SubnetMask) {
        let network = network_number(lease.address, mask);
        let broadcast = broadcast_address(network, mask);
        set_safe(env, format!("{p}network_number"), format_ipv4(network))?;
        set_safe(env, format!("{p}broadcast_address"), format_ipv4(broadcast))?;
    }
    if let Some(f) = &lease.boot_file_name {
        set_safe(env, format!("{p}filename"), f.clone())?;
    }
    if let Some(s) = &lease.server_name {
        validate_domain_like(s).map_err(|_| ScriptError::UnsafeValue {
            key: format!("{p}server_name"),
        })?;
        set_safe(env, format!("{p}server_name"), s.clone())?;
    }
    set_safe(env, format!("{p}expiry"), lease.expiry.as_secs().to_string())?;

    for code in requested {
        if let Some(name) = option_env_name(*code) {
            if let Some(bytes) = lease.options.lookup_raw(*code) {
                let formatted = if option_is_ipv4_list(*code) {
                    format_ipv4_list(bytes)
                } else {
                    std::str::from_utf8(bytes).ok().map(str::to_string)
                };
                if let Some(s) = formatted {
                    set_safe(env, format!("{p}{name}"), s)?;
                }
            }
        }
    }
    Ok(())
}

/// Options the spec stores as one or more raw big-endian IPv4 addresses
/// rather than text — these need dotted-decimal formatting, not a UTF-8
/// validity check, before they're fit to pass to the script.
fn option_is_ipv4_list(code: OptionCode) -> bool {
    matches!(
        code,
        OptionCode::SubnetMask | OptionCode::Router | OptionCode::DomainNameServers | OptionCode::NtpServers
    )
}

/// Format a run of 4-byte IPv4 addresses as space-separated dotted-decimal,
/// matching dhclient-script's convention for multi-valued address options.
fn format_ipv4_list(bytes: &[u8]) -> Option<String> {
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|c| format!("{}.{}.{}.{}", c[0], c[1], c[2], c[3]))
            .collect::<Vec<_>>()
            .join(" "),
    )
}

fn set_safe(env: &mut BTreeMap<String, String>, key: String, value: String) -> Result<(), ScriptError> {
    if !is_shell_safe(&value) {
        return Err(ScriptError::UnsafeValue { key });
    }
    env.insert(key, value);
    Ok(())
}

/// Only a conservative character set is allowed through to the
/// environment: alphanumerics and `. - _ : , / @` plus space.
fn is_shell_safe(value: &str) -> bool {
    value
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b".-_:,/@ ".contains(&b))
}

/// Domain-name label rules: length 1-63, alphanumerics plus `-`/`_`, no
/// leading/trailing `-`/`_`, optional trailing dot.
fn validate_domain_like(name: &str) -> Result<(), ()> {
    let name = name.strip_suffix('.').unwrap_or(name);
    for label in name.split('.') {
        if label.is_empty() || label.len() > 63 {
            return Err(());
        }
        if !label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_') {
            return Err(());
        }
        let first = label.as_bytes()[0];
        let last = *label.as_bytes().last().unwrap();
        if first == b'-' || first == b'_' || last == b'-' || last == b'_' {
            return Err(());
        }
    }
    Ok(())
}

fn network_number(addr: [u8; 4], mask: [u8; 4]) -> [u8; 4] {
    std::array::from_fn(|i| addr[i] & mask[i])
}

fn broadcast_address(network: [u8; 4], mask: [u8; 4]) -> [u8; 4] {
    std::array::from_fn(|i| network[i] | !mask[i])
}

fn format_ipv4(addr: [u8; 4]) -> String {
    format!("{}.{}.{}.{}", addr[0], addr[1], addr[2], addr[3])
}

fn option_env_name(code: OptionCode) -> Option<&'static str> {
    match code {
        OptionCode::SubnetMask => Some("subnet_mask"),
        OptionCode::Router => Some("routers"),
        OptionCode::DomainNameServers => Some("domain_name_servers"),
        OptionCode::DomainName => Some("domain_name"),
        OptionCode::HostName => Some("host_name"),
        OptionCode::NtpServers => Some("ntp_servers"),
        _ => None,
    }
}

/// The outcome of a script invocation: either it ran to completion with an
/// exit status, or it was killed by a signal (reported as `-signal`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    Exited(i32),
    Signaled(i32),
}

impl ExitOutcome {
    /// True exactly when BOUND/RENEW should interpret this as an address
    /// collision.
    pub fn is_failure(self) -> bool {
        !matches!(self, ExitOutcome::Exited(0))
    }
}

/// Abstracts invoking the external script so tests can substitute a mock.
pub trait ScriptRunner {
    fn run(&self, invocation: &ScriptInvocation) -> Result<ExitOutcome, ScriptError>;
}

/// The real runner: spawns `script_path`, waits synchronously, translates
/// the child's termination into an [`ExitOutcome`].
pub struct ProcessScriptRunner {
    script_path: PathBuf,
}

impl ProcessScriptRunner {
    pub fn new(script_path: impl Into<PathBuf>) -> Self {
        ProcessScriptRunner {
            script_path: script_path.into(),
        }
    }
}

impl ScriptRunner for ProcessScriptRunner {
    fn run(&self, invocation: &ScriptInvocation) -> Result<ExitOutcome, ScriptError> {
        let env = invocation.build_env(std::process::id())?;
        let mut cmd = Command::new(&self.script_path);
        cmd.env_clear();
        for (k, v) in &env {
            cmd.env(k, v);
        }
        let status = cmd
            .status()
            .map_err(|source| ScriptError::Spawn { path: self.script_path.clone(), source })?;
        Ok(match status.code() {
            Some(code) => ExitOutcome::Exited(code),
            None => {
                #[cfg(unix)]
                {
                    use std::os::unix::process::ExitStatusExt;
                    ExitOutcome::Signaled(status.signal().unwrap_or(0))
                }
                #[cfg(not(unix))]
                {
                    ExitOutcome::Signaled(0)
                }
            }
        })
    }
}

/// A script runner usable in config contexts where `dad_wait_time` and other
/// constant environment entries are needed; kept as a free function so the
/// real runner and a test mock can both reuse it without duplicating the
/// boilerplate.
pub fn with_constant_env(mut env: BTreeMap<String, String>, dad_wait_time: u32) -> BTreeMap<String, String> {
    env.insert("dad_wait_time".to_string(), dad_wait_time.to_string());
    env
}
