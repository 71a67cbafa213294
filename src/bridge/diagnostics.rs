//! Read-only host diagnostics over ephemeral sessions.
//!
//! ## Request Lifecycle
//!
//! 1. **Validation**: actions and identifiers that end up in a command line
//!    are checked first. A rejected request opens no session.
//!
//! 2. **Session**: credentials are looked up by host id and a fresh
//!    diagnostic session is opened. Interactive connections are never reused.
//!
//! 3. **Fan-out**: independent commands run concurrently, one exec channel
//!    each, every one bounded by the command timeout. A failing command only
//!    marks its own field: numbers become [`UNAVAILABLE`], service states
//!    become `unknown`.
//!
//! 4. **Release**: the session is disconnected before the request returns,
//!    success or failure.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, info, warn};

use super::credentials::CredentialSource;
use super::error::BridgeError;
use super::factory::{ExecOutput, RemoteSession, SessionFactory, SessionKind};
use super::types::{
    ContainerActionResult, ContainerSummary, DiagnosticResult, MetricValue, ServiceState,
    UNAVAILABLE,
};

pub const CPU_COMMAND: &str = "vmstat 1 2 | tail -1 | awk '{print 100-$15}'";
pub const MEMORY_COMMAND: &str = "free | awk 'NR==2{printf \"%.2f\", $3*100/$2 }'";
pub const DISK_COMMAND: &str = "df -h / | awk 'NR==2{print $5}' | sed 's/%//'";
pub const UPTIME_COMMAND: &str = "cat /proc/uptime";
pub const LOADAVG_COMMAND: &str = "cat /proc/loadavg";
pub const PROCESS_COUNT_COMMAND: &str = "ps aux | wc -l";
pub const SOCKET_COUNT_COMMAND: &str = "ss -tuln | wc -l";
pub const CONTAINER_LIST_COMMAND: &str =
    "docker ps -a --format \"{{.ID}}|{{.Names}}|{{.Status}}|{{.Ports}}|{{.Image}}\"";

/// Services checked when the caller names none
pub const DEFAULT_SERVICES: &[&str] = &["mysql", "redis", "docker"];

/// Default number of log lines
pub const DEFAULT_LOG_LINES: u32 = 100;

/// Upper bound for identifiers interpolated into commands
const MAX_IDENTIFIER_LEN: usize = 128;

/// Metric commands: (field name, command)
const METRIC_PROBES: &[(&str, &str)] = &[
    ("cpu", CPU_COMMAND),
    ("memory", MEMORY_COMMAND),
    ("disk", DISK_COMMAND),
];

/// Parse trimmed command output as a number. Anything else is [`UNAVAILABLE`].
pub fn parse_scalar(output: &str) -> f64 {
    match output.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => value,
        _ => UNAVAILABLE,
    }
}

/// Output lines joined with `\n`, carriage returns and the final newline dropped.
pub fn join_lines(output: &str) -> String {
    output
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Seconds since boot, from `/proc/uptime`.
pub fn parse_uptime(output: &str) -> f64 {
    output
        .split_whitespace()
        .next()
        .map(parse_scalar)
        .unwrap_or(UNAVAILABLE)
}

/// 1, 5 and 15 minute load averages, from `/proc/loadavg`.
pub fn parse_loadavg(output: &str) -> [f64; 3] {
    let mut fields = output.split_whitespace().map(parse_scalar);
    let mut load = [UNAVAILABLE; 3];
    for slot in load.iter_mut() {
        match fields.next() {
            Some(value) => *slot = value,
            None => return [UNAVAILABLE; 3],
        }
    }
    load
}

/// Row count of `... | wc -l` output, minus the header line.
pub fn parse_row_count(output: &str) -> f64 {
    match parse_scalar(output) {
        v if v == UNAVAILABLE => UNAVAILABLE,
        v => (v - 1.0).max(0.0),
    }
}

/// Normalise `systemctl is-active` output.
pub fn parse_service_state(output: &str) -> ServiceState {
    match output.trim().to_lowercase().as_str() {
        "active" => ServiceState::Active,
        "inactive" | "failed" => ServiceState::Inactive,
        _ => ServiceState::Unknown,
    }
}

/// Parse `docker ps -a` output in `ID|Names|Status|Ports|Image` format.
///
/// Lines with fewer than five fields are skipped.
pub fn parse_container_list(output: &str) -> Vec<ContainerSummary> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let parts: Vec<&str> = line.split('|').collect();
            if parts.len() < 5 {
                debug!("Skipping malformed container line: {}", line);
                return None;
            }

            let ports = parts[3].trim();
            Some(ContainerSummary {
                id: parts[0].chars().take(12).collect(),
                name: parts[1].to_string(),
                status: parts[2].to_string(),
                ports: if ports.is_empty() {
                    Vec::new()
                } else {
                    vec![ports.to_string()]
                },
                image: parts[4].to_string(),
                is_running: parts[2].to_lowercase().contains("up"),
            })
        })
        .collect()
}

/// Check an identifier before it is placed in a command line.
///
/// Allows ASCII alphanumerics and `_ . - @`, not starting with `-`.
pub fn validate_identifier(kind: &str, value: &str) -> Result<(), BridgeError> {
    let valid = !value.is_empty()
        && value.len() <= MAX_IDENTIFIER_LEN
        && !value.starts_with('-')
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-' | '@'));

    if valid {
        Ok(())
    } else {
        Err(BridgeError::Rejected(format!("invalid {}: {:?}", kind, value)))
    }
}

/// Supported container lifecycle actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerAction {
    Start,
    Stop,
    Restart,
}

impl ContainerAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerAction::Start => "start",
            ContainerAction::Stop => "stop",
            ContainerAction::Restart => "restart",
        }
    }

    /// Whether success means the container ends up running.
    pub fn expects_running(&self) -> bool {
        matches!(self, ContainerAction::Start | ContainerAction::Restart)
    }
}

impl FromStr for ContainerAction {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(ContainerAction::Start),
            "stop" => Ok(ContainerAction::Stop),
            "restart" => Ok(ContainerAction::Restart),
            other => Err(BridgeError::Rejected(format!(
                "unsupported container action: {}",
                other
            ))),
        }
    }
}

/// Disconnects its session when released or dropped.
struct EphemeralSession {
    host_id: String,
    session: Arc<dyn RemoteSession>,
    released: bool,
}

impl EphemeralSession {
    fn session(&self) -> &dyn RemoteSession {
        self.session.as_ref()
    }

    async fn release(mut self) {
        self.released = true;
        if let Err(e) = self.session.disconnect().await {
            warn!("Error closing diagnostic session for {}: {}", self.host_id, e);
        }
        debug!("Diagnostic session for {} closed", self.host_id);
    }
}

impl Drop for EphemeralSession {
    fn drop(&mut self) {
        // Request future dropped before release: disconnect in the background
        if !self.released
            && let Ok(runtime) = tokio::runtime::Handle::try_current()
        {
            let session = self.session.clone();
            let host_id = self.host_id.clone();
            runtime.spawn(async move {
                if let Err(e) = session.disconnect().await {
                    warn!("Error closing abandoned diagnostic session for {}: {}", host_id, e);
                }
            });
        }
    }
}

/// Runs fixed diagnostic commands against configured hosts.
pub struct DiagnosticExecutor {
    factory: Arc<dyn SessionFactory>,
    credentials: Arc<dyn CredentialSource>,
    connect_timeout: Duration,
    command_timeout: Duration,
}

impl DiagnosticExecutor {
    pub fn new(
        factory: Arc<dyn SessionFactory>,
        credentials: Arc<dyn CredentialSource>,
        connect_timeout: Duration,
        command_timeout: Duration,
    ) -> Self {
        Self {
            factory,
            credentials,
            connect_timeout,
            command_timeout,
        }
    }

    async fn open(&self, host_id: &str) -> Result<EphemeralSession, BridgeError> {
        let target = self.credentials.lookup(host_id).await?;
        let session = self
            .factory
            .connect(&target, SessionKind::Diagnostic, self.connect_timeout)
            .await?;

        debug!("Diagnostic session opened for {} ({})", host_id, target.display_name());
        Ok(EphemeralSession {
            host_id: host_id.to_string(),
            session,
            released: false,
        })
    }

    /// Run one command, failing on timeout.
    async fn exec(
        &self,
        session: &dyn RemoteSession,
        command: &str,
    ) -> Result<ExecOutput, BridgeError> {
        let output = session.exec(command, self.command_timeout).await?;
        if output.timed_out {
            return Err(BridgeError::Network(format!(
                "command timed out after {}s: {}",
                self.command_timeout.as_secs(),
                command
            )));
        }
        Ok(output)
    }

    /// Run a command whose output is one number. Never fails: any error or
    /// unparseable output yields [`UNAVAILABLE`].
    pub async fn run_scalar(&self, session: &dyn RemoteSession, command: &str) -> f64 {
        match self.run_text(session, command).await {
            Ok(text) => {
                let value = parse_scalar(&text);
                if value == UNAVAILABLE {
                    warn!("Unparseable output for `{}`: {:?}", command, text);
                }
                value
            }
            Err(e) => {
                warn!("Diagnostic command `{}` failed: {}", command, e);
                UNAVAILABLE
            }
        }
    }

    /// Run a command and return its output lines joined with `\n`.
    pub async fn run_text(
        &self,
        session: &dyn RemoteSession,
        command: &str,
    ) -> Result<String, BridgeError> {
        let output = self.exec(session, command).await?;
        match output.exit_code {
            Some(0) | None => Ok(join_lines(&output.stdout)),
            Some(code) => Err(BridgeError::Command(format!(
                "`{}` exited with status {}: {}",
                command,
                code,
                output.stderr.trim()
            ))),
        }
    }

    /// CPU, memory and disk usage percentages.
    pub async fn collect_metrics(&self, host_id: &str) -> Result<DiagnosticResult, BridgeError> {
        let ephemeral = self.open(host_id).await?;
        let values = self.metrics_on(ephemeral.session()).await;
        ephemeral.release().await;

        info!("Collected metrics for {}", host_id);
        Ok(DiagnosticResult::new(values))
    }

    async fn metrics_on(&self, session: &dyn RemoteSession) -> BTreeMap<String, MetricValue> {
        let readings = join_all(
            METRIC_PROBES
                .iter()
                .map(|(_, command)| self.run_scalar(session, command)),
        )
        .await;

        METRIC_PROBES
            .iter()
            .zip(readings)
            .map(|((name, _), value)| (name.to_string(), MetricValue::Number(value)))
            .collect()
    }

    /// Uptime, load averages, process count and listening-socket count.
    pub async fn collect_system_info(
        &self,
        host_id: &str,
    ) -> Result<DiagnosticResult, BridgeError> {
        let ephemeral = self.open(host_id).await?;
        let values = self.system_info_on(ephemeral.session()).await;
        ephemeral.release().await;

        Ok(DiagnosticResult::new(values))
    }

    async fn system_info_on(&self, session: &dyn RemoteSession) -> BTreeMap<String, MetricValue> {
        let text_or_empty = |command: &'static str| async move {
            self.run_text(session, command).await.unwrap_or_else(|e| {
                warn!("Diagnostic command `{}` failed: {}", command, e);
                String::new()
            })
        };

        let (uptime, loadavg, processes, sockets) = tokio::join!(
            text_or_empty(UPTIME_COMMAND),
            text_or_empty(LOADAVG_COMMAND),
            text_or_empty(PROCESS_COUNT_COMMAND),
            text_or_empty(SOCKET_COUNT_COMMAND),
        );

        let [load1, load5, load15] = parse_loadavg(&loadavg);

        [
            ("uptime", parse_uptime(&uptime)),
            ("load1", load1),
            ("load5", load5),
            ("load15", load15),
            ("processCount", parse_row_count(&processes)),
            ("connectionCount", parse_row_count(&sockets)),
        ]
        .into_iter()
        .map(|(name, value)| (name.to_string(), MetricValue::Number(value)))
        .collect()
    }

    /// `systemctl is-active` for each service; [`DEFAULT_SERVICES`] when
    /// `services` is empty.
    pub async fn service_status(
        &self,
        host_id: &str,
        services: &[String],
    ) -> Result<DiagnosticResult, BridgeError> {
        let services: Vec<String> = if services.is_empty() {
            DEFAULT_SERVICES.iter().map(|s| s.to_string()).collect()
        } else {
            services.to_vec()
        };
        for name in &services {
            validate_identifier("service name", name)?;
        }

        let ephemeral = self.open(host_id).await?;
        let session = ephemeral.session();
        let states =
            join_all(services.iter().map(|name| self.service_state(session, name))).await;
        ephemeral.release().await;

        Ok(DiagnosticResult::new(
            services
                .into_iter()
                .zip(states)
                .map(|(name, state)| (name, MetricValue::Status(state.as_str().to_string())))
                .collect(),
        ))
    }

    async fn service_state(&self, session: &dyn RemoteSession, name: &str) -> ServiceState {
        // is-active exits non-zero for inactive units, so only stdout counts
        let command = format!("systemctl is-active {}", name);
        let state = match self.exec(session, &command).await {
            Ok(output) => parse_service_state(&output.stdout),
            Err(e) => {
                warn!("Failed to check service {}: {}", name, e);
                ServiceState::Unknown
            }
        };
        debug!("Service {} is {}", name, state.as_str());
        state
    }

    pub async fn list_containers(
        &self,
        host_id: &str,
    ) -> Result<Vec<ContainerSummary>, BridgeError> {
        let ephemeral = self.open(host_id).await?;
        let output = self
            .run_text(ephemeral.session(), CONTAINER_LIST_COMMAND)
            .await;
        ephemeral.release().await;

        Ok(parse_container_list(&output?))
    }

    /// Start, stop or restart a container.
    ///
    /// Start and restart are confirmed by inspecting the container state
    /// afterwards; a zero exit alone does not count as success.
    pub async fn container_action(
        &self,
        host_id: &str,
        container_id: &str,
        action: &str,
    ) -> Result<ContainerActionResult, BridgeError> {
        let action: ContainerAction = action.parse()?;
        validate_identifier("container id", container_id)?;

        let ephemeral = self.open(host_id).await?;
        let result = self
            .container_action_on(ephemeral.session(), container_id, action)
            .await;
        ephemeral.release().await;

        result
    }

    async fn container_action_on(
        &self,
        session: &dyn RemoteSession,
        container_id: &str,
        action: ContainerAction,
    ) -> Result<ContainerActionResult, BridgeError> {
        let short_id: String = container_id.chars().take(12).collect();
        let command = format!("docker {} {}", action.as_str(), container_id);
        let output = self.exec(session, &command).await?;

        if let Some(code) = output.exit_code
            && code != 0
        {
            return Ok(ContainerActionResult {
                success: false,
                message: format!(
                    "Container {} {} failed: {}",
                    short_id,
                    action.as_str(),
                    output.stderr.trim()
                ),
                raw_output: join_lines(&output.stdout),
            });
        }

        let mut success = true;
        let mut message = format!("Container {} {} succeeded", short_id, action.as_str());

        if action.expects_running() {
            let inspect = format!("docker inspect --format='{{{{.State.Status}}}}' {}", container_id);
            match self.run_text(session, &inspect).await {
                Ok(state) if state.trim() != "running" => {
                    success = false;
                    message = format!(
                        "Container {} {} failed, current state: {}",
                        short_id,
                        action.as_str(),
                        state.trim()
                    );
                }
                Ok(_) => {}
                Err(e) => warn!("Could not confirm state of container {}: {}", short_id, e),
            }
        }

        info!("{}", message);
        Ok(ContainerActionResult {
            success,
            message,
            raw_output: join_lines(&output.stdout),
        })
    }

    /// Last `lines` log lines of a container, stderr included.
    pub async fn container_logs(
        &self,
        host_id: &str,
        container_id: &str,
        lines: u32,
    ) -> Result<String, BridgeError> {
        validate_identifier("container id", container_id)?;
        self.run_once(
            host_id,
            &format!("docker logs --tail {} {} 2>&1", lines, container_id),
        )
        .await
    }

    /// Raw `docker inspect` JSON of a container.
    pub async fn container_inspect(
        &self,
        host_id: &str,
        container_id: &str,
    ) -> Result<String, BridgeError> {
        validate_identifier("container id", container_id)?;
        self.run_once(host_id, &format!("docker inspect {}", container_id))
            .await
    }

    async fn run_once(&self, host_id: &str, command: &str) -> Result<String, BridgeError> {
        let ephemeral = self.open(host_id).await?;
        let output = self.run_text(ephemeral.session(), command).await;
        ephemeral.release().await;
        output
    }
}
