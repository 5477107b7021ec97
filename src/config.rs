// src/config.rs

//! Controller configuration: loading, validation, and the container
//! execution-layer sub-config.
//!
//! The main config is line-based `keyword=value` records. A `#` begins a
//! comment unless escaped as `\#`. Node lines (`NodeName=...`) and
//! partition lines (`PartitionName=...`) carry additional key=value pairs
//! on the same line. The loaded snapshot is immutable; reconfigure swaps
//! the whole `Arc`.

use crate::core::LatticeError;
use crate::core::model::SharedPolicy;
use crate::core::rpc::pack::NO_VAL;
use std::fs;
use std::str::FromStr;
use tracing::warn;

fn default_controller_port() -> u16 {
    6817
}
fn default_controller_timeout() -> u64 {
    300
}
fn default_node_timeout() -> u64 {
    300
}
fn default_kill_wait() -> u64 {
    30
}
fn default_heartbeat_interval() -> u64 {
    60
}
fn default_tmp_fs() -> String {
    "/tmp".to_string()
}
fn default_state_save_location() -> String {
    "/var/spool/latticed".to_string()
}
fn default_first_job_id() -> u32 {
    1 << 16
}
fn default_max_job_id() -> u32 {
    0x7fff_ffff
}
fn default_min_job_age() -> u64 {
    300
}
fn default_hash_base() -> u32 {
    crate::core::hostlist::DEFAULT_HASH_BASE
}
fn default_metrics_port() -> u16 {
    8878
}
fn default_node_port() -> u16 {
    6818
}
fn default_sched_interval() -> u64 {
    5
}
fn default_log_level() -> String {
    "info".to_string()
}

/// One `NodeName=` line: a set of nodes sharing a configuration record.
#[derive(Debug, Clone)]
pub struct NodeLine {
    /// Hostlist expression, e.g. `lx[00-15]`.
    pub names: String,
    /// Parallel hostlist expression of communication addresses; must
    /// expand to the same count as `names`. Node names double as
    /// addresses when absent.
    pub addrs: Option<String>,
    /// Compute-daemon port the alias tables advertise.
    pub port: u16,
    pub cpus: u32,
    pub real_memory: u32,
    pub tmp_disk: u32,
    pub weight: u32,
    pub features: Vec<String>,
    pub sockets: u32,
    pub cores_per_socket: u32,
    pub threads_per_core: u32,
}

impl Default for NodeLine {
    fn default() -> Self {
        Self {
            names: String::new(),
            addrs: None,
            port: default_node_port(),
            cpus: 1,
            real_memory: 1,
            tmp_disk: 1,
            weight: 1,
            features: Vec::new(),
            sockets: 1,
            cores_per_socket: 1,
            threads_per_core: 1,
        }
    }
}

/// One `PartitionName=` line.
#[derive(Debug, Clone)]
pub struct PartitionLine {
    pub name: String,
    pub nodes: String,
    /// Minutes, `NO_VAL` for INFINITE.
    pub max_time: u32,
    pub max_nodes: u32,
    pub max_cpus_per_job: u32,
    pub default: bool,
    pub shared: SharedPolicy,
    pub state_up: bool,
    pub root_only: bool,
    pub allow_groups: Vec<String>,
}

impl Default for PartitionLine {
    fn default() -> Self {
        Self {
            name: String::new(),
            nodes: String::new(),
            max_time: NO_VAL,
            max_nodes: NO_VAL,
            max_cpus_per_job: NO_VAL,
            default: false,
            shared: SharedPolicy::No,
            state_up: true,
            root_only: false,
            allow_groups: Vec::new(),
        }
    }
}

/// Container execution-layer configuration, loaded from its own
/// `keyword=value` file. The controller only parses and validates it; the
/// compute side consumes it.
#[derive(Debug, Clone, Default)]
pub struct ContainerConfig {
    pub container_path: String,
    pub runtime_create: Option<String>,
    pub runtime_delete: Option<String>,
    pub runtime_kill: Option<String>,
    pub runtime_query: Option<String>,
    pub runtime_run: Option<String>,
    pub runtime_start: Option<String>,
    pub create_env_file: bool,
}

/// Values substituted into container runtime command patterns.
#[derive(Debug, Clone, Default)]
pub struct PatternValues<'a> {
    pub job_id: u32,
    pub step_id: u32,
    pub task_id: u32,
    pub user: &'a str,
    pub bundle: &'a str,
    pub env_file: &'a str,
    pub node: &'a str,
    pub rootfs: &'a str,
    pub argv: &'a str,
}

impl ContainerConfig {
    /// Expands the `%j %s %t %u %b %e %n %r %@` substitutions in a runtime
    /// command pattern. `%%` emits a literal percent.
    pub fn substitute(pattern: &str, v: &PatternValues) -> String {
        let mut out = String::with_capacity(pattern.len());
        let mut chars = pattern.chars();
        while let Some(c) = chars.next() {
            if c != '%' {
                out.push(c);
                continue;
            }
            match chars.next() {
                Some('j') => out.push_str(&v.job_id.to_string()),
                Some('s') => out.push_str(&v.step_id.to_string()),
                Some('t') => out.push_str(&v.task_id.to_string()),
                Some('u') => out.push_str(v.user),
                Some('b') => out.push_str(v.bundle),
                Some('e') => out.push_str(v.env_file),
                Some('n') => out.push_str(v.node),
                Some('r') => out.push_str(v.rootfs),
                Some('@') => out.push_str(v.argv),
                Some('%') => out.push('%'),
                Some(other) => {
                    out.push('%');
                    out.push(other);
                }
                None => out.push('%'),
            }
        }
        out
    }

    pub fn from_file(path: &str) -> Result<Self, LatticeError> {
        let text = fs::read_to_string(path)?;
        Self::from_str_records(&text)
    }

    fn from_str_records(text: &str) -> Result<Self, LatticeError> {
        let mut cfg = Self::default();
        for (key, value) in iter_records(text)? {
            match key.as_str() {
                "ContainerPath" => cfg.container_path = value,
                "RunTimeCreate" => cfg.runtime_create = Some(value),
                "RunTimeDelete" => cfg.runtime_delete = Some(value),
                "RunTimeKill" => cfg.runtime_kill = Some(value),
                "RunTimeQuery" => cfg.runtime_query = Some(value),
                "RunTimeRun" => cfg.runtime_run = Some(value),
                "RunTimeStart" => cfg.runtime_start = Some(value),
                "CreateEnvFile" => cfg.create_env_file = parse_yes_no(&value)?,
                other => warn!("ignoring unknown container config keyword '{other}'"),
            }
        }
        if cfg.container_path.is_empty() {
            return Err(LatticeError::ParseFailure(
                "container config missing ContainerPath".into(),
            ));
        }
        Ok(cfg)
    }
}

/// The controller's runtime configuration snapshot.
#[derive(Debug, Clone)]
pub struct Config {
    pub control_machine: String,
    pub backup_controller: Option<String>,
    /// User the controller daemon runs as.
    pub control_user: String,
    pub cluster_name: String,
    pub state_save_location: String,
    pub controller_port: u16,
    /// Seconds before the backup assumes control.
    pub controller_timeout: u64,
    /// Seconds without a heartbeat before a node is flagged not responding.
    pub node_timeout: u64,
    /// Seconds between job signal and forced termination.
    pub kill_wait: u64,
    /// When true, trust configured node resources; when false, measured
    /// values must meet-or-exceed configured ones.
    pub fast_schedule: bool,
    pub heartbeat_interval: u64,
    pub prolog: Option<String>,
    pub epilog: Option<String>,
    pub tmp_fs: String,
    /// RPC authentication backend: `mac`, `claim`, or `none`.
    pub auth_type: String,
    /// Job credential backend: `mac`, `claim`, or `none`.
    pub cred_type: String,
    pub scheduler_type: String,
    /// Resource selection plugin: `linear` or `cons_res`.
    pub select_type: String,
    /// Topology allocator plugin: `none` or `grid`.
    pub topology_type: String,
    pub track_wckey: bool,
    pub first_job_id: u32,
    pub max_job_id: u32,
    /// Seconds a completed job is retained before the purge agent frees it.
    pub min_job_age: u64,
    pub hash_base: u32,
    pub cred_key_file: Option<String>,
    /// Must be set to accept the `none` credential backend.
    pub allow_insecure_auth: bool,
    pub metrics_enabled: bool,
    pub metrics_port: u16,
    pub sched_interval: u64,
    pub log_level: String,
    /// Path to the container execution-layer config, if any.
    pub container_config: Option<String>,
    pub nodes: Vec<NodeLine>,
    pub partitions: Vec<PartitionLine>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            control_machine: String::new(),
            backup_controller: None,
            control_user: "root".to_string(),
            cluster_name: "cluster".to_string(),
            state_save_location: default_state_save_location(),
            controller_port: default_controller_port(),
            controller_timeout: default_controller_timeout(),
            node_timeout: default_node_timeout(),
            kill_wait: default_kill_wait(),
            fast_schedule: true,
            heartbeat_interval: default_heartbeat_interval(),
            prolog: None,
            epilog: None,
            tmp_fs: default_tmp_fs(),
            auth_type: "mac".to_string(),
            cred_type: "mac".to_string(),
            scheduler_type: "builtin".to_string(),
            select_type: "cons_res".to_string(),
            topology_type: "none".to_string(),
            track_wckey: false,
            first_job_id: default_first_job_id(),
            max_job_id: default_max_job_id(),
            min_job_age: default_min_job_age(),
            hash_base: default_hash_base(),
            cred_key_file: None,
            allow_insecure_auth: false,
            metrics_enabled: false,
            metrics_port: default_metrics_port(),
            sched_interval: default_sched_interval(),
            log_level: default_log_level(),
            container_config: None,
            nodes: Vec::new(),
            partitions: Vec::new(),
        }
    }
}

impl Config {
    /// Loads and validates a configuration file.
    pub fn from_file(path: &str) -> Result<Self, LatticeError> {
        let text = fs::read_to_string(path)
            .map_err(|e| LatticeError::ParseFailure(format!("cannot read '{path}': {e}")))?;
        Self::parse(&text)
    }

    /// Parses configuration text; used directly by tests.
    pub fn parse(text: &str) -> Result<Self, LatticeError> {
        let mut cfg = Config::default();
        for line in text.lines() {
            let line = strip_comment(line);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let pairs = split_pairs(line)?;
            let Some((first_key, _)) = pairs.first() else {
                continue;
            };
            match first_key.as_str() {
                "NodeName" => cfg.nodes.push(parse_node_line(&pairs)?),
                "PartitionName" => cfg.partitions.push(parse_partition_line(&pairs)?),
                _ => {
                    for (key, value) in pairs {
                        cfg.apply_scalar(&key, value)?;
                    }
                }
            }
        }
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_scalar(&mut self, key: &str, value: String) -> Result<(), LatticeError> {
        match key {
            "ControlMachine" => self.control_machine = value,
            "BackupController" => self.backup_controller = Some(value),
            "ControlUser" => self.control_user = value,
            "ClusterName" => self.cluster_name = value,
            "StateSaveLocation" => self.state_save_location = value,
            "ControllerPort" => self.controller_port = value.parse()?,
            "ControllerTimeout" => self.controller_timeout = value.parse()?,
            "NodeTimeout" => self.node_timeout = value.parse()?,
            "KillWait" => self.kill_wait = value.parse()?,
            "FastSchedule" => self.fast_schedule = value.parse::<u8>()? != 0,
            "HeartbeatInterval" => self.heartbeat_interval = value.parse()?,
            "Prolog" => self.prolog = Some(value),
            "Epilog" => self.epilog = Some(value),
            "TmpFS" => self.tmp_fs = value,
            "AuthType" => self.auth_type = value,
            "CredType" => self.cred_type = value,
            "SchedulerType" => self.scheduler_type = value,
            "SelectType" => self.select_type = value,
            "TopologyType" => self.topology_type = value,
            "TrackWCKey" => self.track_wckey = parse_yes_no(&value)?,
            "FirstJobId" => self.first_job_id = value.parse()?,
            "MaxJobId" => self.max_job_id = value.parse()?,
            "MinJobAge" => self.min_job_age = value.parse()?,
            "HashBase" => self.hash_base = value.parse()?,
            "CredKeyFile" => self.cred_key_file = Some(value),
            "AllowInsecureAuth" => self.allow_insecure_auth = parse_yes_no(&value)?,
            "MetricsEnabled" => self.metrics_enabled = parse_yes_no(&value)?,
            "MetricsPort" => self.metrics_port = value.parse()?,
            "SchedInterval" => self.sched_interval = value.parse()?,
            "LogLevel" => self.log_level = value,
            "ContainerConfig" => self.container_config = Some(value),
            other => warn!("ignoring unknown config keyword '{other}'"),
        }
        Ok(())
    }

    /// Cross-reference validation after parsing.
    fn validate(&mut self) -> Result<(), LatticeError> {
        if self.control_machine.is_empty() {
            return Err(LatticeError::ParseFailure(
                "ControlMachine is required".into(),
            ));
        }
        if self.first_job_id >= self.max_job_id {
            return Err(LatticeError::ParseFailure(
                "FirstJobId must be below MaxJobId".into(),
            ));
        }

        let defaults = self.partitions.iter().filter(|p| p.default).count();
        match defaults {
            0 => {
                if let Some(first) = self.partitions.first_mut() {
                    warn!(
                        "no default partition configured; using '{}'",
                        first.name
                    );
                    first.default = true;
                }
            }
            1 => {}
            _ => {
                return Err(LatticeError::ParseFailure(
                    "more than one partition marked Default=YES".into(),
                ));
            }
        }

        // Every partition node expression must resolve against node lines.
        let mut known: Vec<String> = Vec::new();
        for line in &self.nodes {
            let names = crate::core::hostlist::expand(&line.names)?;
            if let Some(addrs) = &line.addrs {
                let addr_count = crate::core::hostlist::expand(addrs)?.len();
                if addr_count != names.len() {
                    return Err(LatticeError::ParseFailure(format!(
                        "NodeAddr '{addrs}' expands to {addr_count} addresses for {} nodes",
                        names.len()
                    )));
                }
            }
            known.extend(names);
        }
        for part in &self.partitions {
            if part.nodes.is_empty() {
                continue;
            }
            for name in crate::core::hostlist::expand(&part.nodes)? {
                if !known.contains(&name) {
                    return Err(LatticeError::InvalidNodeName(format!(
                        "partition '{}' references unknown node '{name}'",
                        part.name
                    )));
                }
            }
        }

        let insecure = self.auth_type == "none" || self.cred_type == "none";
        if insecure && !self.allow_insecure_auth {
            return Err(LatticeError::ParseFailure(
                "AuthType/CredType 'none' requires AllowInsecureAuth=YES".into(),
            ));
        }
        Ok(())
    }
}

fn parse_node_line(pairs: &[(String, String)]) -> Result<NodeLine, LatticeError> {
    let mut line = NodeLine::default();
    for (key, value) in pairs {
        match key.as_str() {
            "NodeName" => line.names = value.clone(),
            "NodeAddr" => line.addrs = Some(value.clone()),
            "Port" => line.port = value.parse()?,
            "CPUs" | "Procs" => line.cpus = value.parse()?,
            "RealMemory" => line.real_memory = value.parse()?,
            "TmpDisk" => line.tmp_disk = value.parse()?,
            "Weight" => line.weight = value.parse()?,
            "Feature" | "Features" => {
                line.features = value.split(',').map(|s| s.trim().to_string()).collect()
            }
            "Sockets" => line.sockets = value.parse()?,
            "CoresPerSocket" => line.cores_per_socket = value.parse()?,
            "ThreadsPerCore" => line.threads_per_core = value.parse()?,
            other => warn!("ignoring unknown node keyword '{other}'"),
        }
    }
    if line.names.is_empty() {
        return Err(LatticeError::ParseFailure("NodeName value missing".into()));
    }
    Ok(line)
}

fn parse_partition_line(pairs: &[(String, String)]) -> Result<PartitionLine, LatticeError> {
    let mut line = PartitionLine::default();
    for (key, value) in pairs {
        match key.as_str() {
            "PartitionName" => line.name = value.clone(),
            "Nodes" => line.nodes = value.clone(),
            "MaxTime" => line.max_time = parse_or_infinite(value)?,
            "MaxNodes" => line.max_nodes = parse_or_infinite(value)?,
            "MaxCpus" => line.max_cpus_per_job = parse_or_infinite(value)?,
            "Default" => line.default = parse_yes_no(value)?,
            "Shared" => {
                line.shared = SharedPolicy::from_str(value).map_err(|_| {
                    LatticeError::ParseFailure(format!("bad Shared value '{value}'"))
                })?
            }
            "State" => {
                line.state_up = match value.to_ascii_uppercase().as_str() {
                    "UP" => true,
                    "DOWN" => false,
                    other => {
                        return Err(LatticeError::ParseFailure(format!(
                            "bad State value '{other}'"
                        )));
                    }
                }
            }
            "RootOnly" => line.root_only = parse_yes_no(value)?,
            "AllowGroups" => {
                line.allow_groups = value
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty() && s != "ALL")
                    .collect()
            }
            other => warn!("ignoring unknown partition keyword '{other}'"),
        }
    }
    if line.name.is_empty() {
        return Err(LatticeError::ParseFailure(
            "PartitionName value missing".into(),
        ));
    }
    Ok(line)
}

/// Removes a trailing `#` comment, honoring the `\#` escape.
fn strip_comment(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'#') => {
                chars.next();
                out.push('#');
            }
            '#' => break,
            _ => out.push(c),
        }
    }
    out
}

/// Splits a record line into `Key=Value` pairs on whitespace. Values may
/// contain commas and brackets but not unescaped whitespace.
fn split_pairs(line: &str) -> Result<Vec<(String, String)>, LatticeError> {
    let mut pairs = Vec::new();
    for token in line.split_whitespace() {
        let Some((key, value)) = token.split_once('=') else {
            return Err(LatticeError::ParseFailure(format!(
                "expected Key=Value, got '{token}'"
            )));
        };
        pairs.push((key.to_string(), value.to_string()));
    }
    Ok(pairs)
}

fn parse_yes_no(value: &str) -> Result<bool, LatticeError> {
    match value.to_ascii_uppercase().as_str() {
        "YES" | "TRUE" | "1" => Ok(true),
        "NO" | "FALSE" | "0" => Ok(false),
        other => Err(LatticeError::ParseFailure(format!(
            "expected YES or NO, got '{other}'"
        ))),
    }
}

fn parse_or_infinite(value: &str) -> Result<u32, LatticeError> {
    if value.eq_ignore_ascii_case("INFINITE") || value.eq_ignore_ascii_case("UNLIMITED") {
        return Ok(NO_VAL);
    }
    Ok(value.parse()?)
}

/// Iterates `keyword=value` records of a simple (non-line-oriented) plugin
/// config such as the container layer's.
fn iter_records(text: &str) -> Result<Vec<(String, String)>, LatticeError> {
    let mut records = Vec::new();
    for line in text.lines() {
        let line = strip_comment(line);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        records.extend(split_pairs(line)?);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
# main controller config
ControlMachine=ctl0
BackupController=ctl1
ClusterName=tux
FastSchedule=1
AuthType=mac
CredType=mac

NodeName=lx[00-03] CPUs=2 RealMemory=2000 TmpDisk=500 Weight=4 Feature=fast
PartitionName=batch Nodes=lx[00-03] MaxTime=60 Default=YES Shared=NO State=UP AllowGroups=staff
"#;

    #[test]
    fn parses_sample() {
        let cfg = Config::parse(SAMPLE).unwrap();
        assert_eq!(cfg.control_machine, "ctl0");
        assert_eq!(cfg.nodes.len(), 1);
        assert_eq!(cfg.nodes[0].cpus, 2);
        assert_eq!(cfg.partitions.len(), 1);
        assert_eq!(cfg.partitions[0].max_time, 60);
        assert!(cfg.partitions[0].default);
        assert_eq!(cfg.partitions[0].allow_groups, vec!["staff".to_string()]);
    }

    #[test]
    fn comment_escape() {
        assert_eq!(strip_comment(r"Prolog=/etc/run\#1 # trailing"), "Prolog=/etc/run#1 ");
    }

    #[test]
    fn rejects_unknown_partition_node() {
        let bad = "ControlMachine=c\nNodeName=a1 CPUs=1\nPartitionName=p Nodes=b1 Default=YES\n";
        assert!(Config::parse(bad).is_err());
    }

    #[test]
    fn pattern_substitution() {
        let v = PatternValues {
            job_id: 42,
            step_id: 1,
            user: "alice",
            bundle: "/bundles/x",
            ..Default::default()
        };
        let out = ContainerConfig::substitute("run --bundle %b --id %j.%s --user %u %%", &v);
        assert_eq!(out, "run --bundle /bundles/x --id 42.1 --user alice %");
    }
}
