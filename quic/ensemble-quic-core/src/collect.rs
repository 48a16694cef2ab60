// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Client for the local statistics relay.
//!
//! The relay accepts single-datagram textual commands on a local UDP port
//! and answers each with a datagram beginning `OK` or `KO`. Congestion
//! controllers never talk to the relay directly; the transport owns a
//! [`CollectAgent`] and hands it to [`Path::notify`] as the
//! [`Publisher`], so every emission is fire-and-forget with respect to the
//! datapath and a missing relay costs nothing but a warning.
//!
//! [`Path::notify`]: crate::path::Path::notify

use crate::recovery::congestion_controller::Publisher;
use std::{
    env, fmt, fs, io,
    net::{SocketAddr, UdpSocket},
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tracing::warn;

/// The relay listens on a fixed local port
const DEFAULT_RELAY: ([u8; 4], u16) = ([127, 0, 0, 1], 1111);

const RESPONSE_TIMEOUT: Duration = Duration::from_secs(1);

const MAX_RESPONSE_LEN: usize = 2048;

#[derive(Debug)]
pub enum Error {
    /// The relay could not be reached or did not answer in time
    Io(io::Error),
    /// The relay answered `KO`
    Refused(String),
    /// The relay answered something that is neither `OK` nor `KO`
    Malformed(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "relay unreachable: {err}"),
            Error::Refused(response) => write!(f, "relay refused the command: {response}"),
            Error::Malformed(response) => write!(f, "malformed relay response: {response}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

/// The identity under which statistics are recorded, resolved once at
/// registration from the environment the supervisor sets up.
#[derive(Clone, Debug)]
struct JobContext {
    job_name: String,
    job_instance_id: u32,
    scenario_instance_id: u32,
    owner_scenario_instance_id: u32,
    agent_name: String,
}

fn env_or(name: &str, default: u32) -> u32 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn first_line(path: &str) -> Option<String> {
    let contents = fs::read_to_string(path).ok()?;
    let line = contents.lines().next()?.trim();
    if line.is_empty() {
        None
    } else {
        Some(line.to_owned())
    }
}

impl JobContext {
    fn from_env() -> Self {
        let agent_name = first_line("/opt/openbach/agent/agent_name")
            .or_else(|| first_line("/etc/hostname"))
            .unwrap_or_else(|| "agent_name_not_found".to_owned());

        Self {
            job_name: env::var("JOB_NAME").unwrap_or_else(|_| "job_debug".to_owned()),
            job_instance_id: env_or("JOB_INSTANCE_ID", 0),
            scenario_instance_id: env_or("SCENARIO_INSTANCE_ID", 0),
            owner_scenario_instance_id: env_or("OWNER_SCENARIO_INSTANCE_ID", 0),
            agent_name,
        }
    }
}

/// A registered connection to the local statistics relay.
#[derive(Debug)]
pub struct CollectAgent {
    relay: SocketAddr,
    context: JobContext,
    connection_id: u32,
}

impl CollectAgent {
    /// Registers the job described by `config_file` with the relay on its
    /// default local port.
    pub fn register(config_file: &str) -> Result<Self, Error> {
        Self::register_with(DEFAULT_RELAY.into(), config_file)
    }

    /// Registers with a relay at a specific address.
    pub fn register_with(relay: SocketAddr, config_file: &str) -> Result<Self, Error> {
        let context = JobContext::from_env();
        let command = format!(
            "1 \"{}\" \"{}\" {} {} {} \"{}\" 0",
            config_file,
            context.job_name,
            context.job_instance_id,
            context.scenario_instance_id,
            context.owner_scenario_instance_id,
            context.agent_name,
        );

        let response = exchange(relay, &command)?;
        let mut parts = response.split_whitespace();
        match parts.next() {
            Some("OK") => {
                let connection_id = parts
                    .next()
                    .and_then(|id| id.parse().ok())
                    .ok_or_else(|| Error::Malformed(response.clone()))?;
                Ok(Self {
                    relay,
                    context,
                    connection_id,
                })
            }
            Some("KO") => Err(Error::Refused(response)),
            _ => Err(Error::Malformed(response)),
        }
    }

    /// The connection id the relay assigned at registration
    pub fn connection_id(&self) -> u32 {
        self.connection_id
    }

    /// Forwards a log line to the local subscriber, tagged with the job
    /// identity. Logs are never sent over the wire.
    pub fn send_log(&self, level: tracing::Level, message: &str) {
        macro_rules! emit {
            ($level:ident) => {
                tracing::$level!(
                    job = %self.context.job_name,
                    job_instance_id = self.context.job_instance_id,
                    scenario_instance_id = self.context.scenario_instance_id,
                    agent = %self.context.agent_name,
                    "{message}"
                )
            };
        }
        if level == tracing::Level::ERROR {
            emit!(error)
        } else if level == tracing::Level::WARN {
            emit!(warn)
        } else if level == tracing::Level::INFO {
            emit!(info)
        } else if level == tracing::Level::DEBUG {
            emit!(debug)
        } else {
            emit!(trace)
        }
    }

    /// Sends one statistic sample, a set of named values taken at
    /// `timestamp` (milliseconds since the Unix epoch).
    pub fn send_stat(
        &self,
        timestamp: i64,
        stats: &[(&str, &str)],
        suffix: Option<&str>,
    ) -> Result<String, Error> {
        let mut command = format!("2 {} {}", self.connection_id, timestamp);
        for (name, value) in stats {
            command.push_str(&format!(" \"{name}\" \"{value}\""));
        }
        if let Some(suffix) = suffix {
            command.push_str(&format!(" {suffix}"));
        }
        self.command(&command)
    }

    /// Asks the relay to reload this job's configuration
    pub fn reload_stat(&self) -> Result<String, Error> {
        self.command(&format!("3 {}", self.connection_id))
    }

    /// Removes this job from the relay's statistics pool
    pub fn remove_stat(&self) -> Result<String, Error> {
        self.command(&format!("4 {}", self.connection_id))
    }

    /// Asks the relay to reload every registered job at once
    pub fn reload_all_stats(&self) -> Result<String, Error> {
        self.command("5")
    }

    /// Changes where the relay sends this job's statistics.
    ///
    /// The relay identifies the job by its scenario and job instance ids
    /// rather than the registered connection id.
    pub fn change_config(&self, storage: bool, broadcast: bool) -> Result<String, Error> {
        self.command(&format!(
            "6 {} {} {} {}",
            self.context.scenario_instance_id,
            self.context.job_instance_id,
            storage as u8,
            broadcast as u8
        ))
    }

    fn command(&self, message: &str) -> Result<String, Error> {
        let response = exchange(self.relay, message)?;
        if response.starts_with("OK") {
            Ok(response)
        } else if response.starts_with("KO") {
            Err(Error::Refused(response))
        } else {
            Err(Error::Malformed(response))
        }
    }

    fn stat_now(&self, stats: &[(&str, &str)]) {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64;
        if let Err(err) = self.send_stat(timestamp, stats, None) {
            warn!(%err, "dropping statistic");
        }
    }
}

/// One datagram out, one datagram back
fn exchange(relay: SocketAddr, message: &str) -> Result<String, Error> {
    let socket = UdpSocket::bind(("0.0.0.0", 0))?;
    socket.send_to(message.as_bytes(), relay)?;
    socket.set_read_timeout(Some(RESPONSE_TIMEOUT))?;

    let mut buffer = [0u8; MAX_RESPONSE_LEN];
    let len = socket.recv(&mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer[..len]).into_owned())
}

impl Publisher for CollectAgent {
    fn on_slow_start_exited(&mut self, congestion_window: u64) {
        self.stat_now(&[("slow_start_exit_cwnd", &congestion_window.to_string())]);
    }

    fn on_congestion_event(&mut self, congestion_window: u64) {
        self.stat_now(&[
            ("cwnd", &congestion_window.to_string()),
            ("loss_event", "1"),
        ]);
    }

    fn on_window_updated(&mut self, congestion_window: u64) {
        self.stat_now(&[("cwnd", &congestion_window.to_string())]);
    }

    fn on_pacing_rate_updated(&mut self, bytes_per_second: u64) {
        self.stat_now(&[("pacing_rate", &bytes_per_second.to_string())]);
    }
}
