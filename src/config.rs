//! Runtime configuration
//!
//! Defaults are compiled in. The binary parses [`RelayArgs`] from the command
//! line, where every flag falls back to a `RELAY_*` environment variable.

use std::time::Duration;

use clap::Parser;

use crate::error::ConfigError;

/// Default server address
pub const DEFAULT_ADDR: &str = "127.0.0.1:8080";

/// Default capacity for every bounded queue and mailbox
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Per-connection settings for the read and write loops
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Deadline applied to each write
    pub write_wait: Duration,
    /// How long the reader waits for any frame (pongs included)
    pub pong_wait: Duration,
    /// Keepalive ping interval, must be shorter than `pong_wait`
    pub ping_period: Duration,
    /// How long the read loop waits on a full inbound mailbox before dropping
    pub receive_timeout: Duration,
    /// Outbound mailbox capacity
    pub send_capacity: usize,
    /// Inbound mailbox capacity
    pub recv_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let pong_wait = Duration::from_secs(60);
        Self {
            write_wait: Duration::from_secs(10),
            pong_wait,
            ping_period: pong_wait * 9 / 10,
            receive_timeout: Duration::from_secs(10),
            send_capacity: DEFAULT_QUEUE_CAPACITY,
            recv_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ping_period.is_zero() || self.ping_period >= self.pong_wait {
            return Err(ConfigError::Invalid {
                key: "RELAY_PING_PERIOD_SECS",
                value: format!("{:?}", self.ping_period),
            });
        }
        if self.send_capacity == 0 {
            return Err(ConfigError::Invalid {
                key: "RELAY_SEND_CAPACITY",
                value: "0".to_string(),
            });
        }
        if self.recv_capacity == 0 {
            return Err(ConfigError::Invalid {
                key: "RELAY_RECV_CAPACITY",
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}

/// Whole-server settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: String,
    pub room_id: String,
    pub room_name: String,
    /// Chat service membership event queue
    pub events_capacity: usize,
    /// Chat service chat message queue
    pub messages_capacity: usize,
    /// Registry register/unregister request queue
    pub registry_capacity: usize,
    pub client: ClientConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            room_id: "1".to_string(),
            room_name: "General".to_string(),
            events_capacity: DEFAULT_QUEUE_CAPACITY,
            messages_capacity: DEFAULT_QUEUE_CAPACITY,
            registry_capacity: DEFAULT_QUEUE_CAPACITY,
            client: ClientConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Reject settings the channels and timers cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let queues = [
            self.events_capacity,
            self.messages_capacity,
            self.registry_capacity,
        ];
        if queues.contains(&0) {
            return Err(ConfigError::Invalid {
                key: "RELAY_QUEUE_CAPACITY",
                value: "0".to_string(),
            });
        }
        self.client.validate()
    }
}

/// Command line of the relay binary
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Single-room WebSocket chat relay")]
pub struct RelayArgs {
    /// Address to listen on
    #[arg(env = "RELAY_ADDR", default_value = DEFAULT_ADDR)]
    pub addr: String,

    /// Display name of the room
    #[arg(long, env = "RELAY_ROOM_NAME", default_value = "General")]
    pub room_name: String,

    /// Deadline for each write, in seconds
    #[arg(long, env = "RELAY_WRITE_WAIT_SECS", default_value_t = 10)]
    pub write_wait_secs: u64,

    /// How long to wait for any frame from a client, in seconds
    #[arg(long, env = "RELAY_PONG_WAIT_SECS", default_value_t = 60)]
    pub pong_wait_secs: u64,

    /// Keepalive ping interval in seconds, 9/10 of the pong wait when unset
    #[arg(long, env = "RELAY_PING_PERIOD_SECS")]
    pub ping_period_secs: Option<u64>,

    /// How long a full inbound mailbox may stall the reader, in seconds
    #[arg(long, env = "RELAY_RECEIVE_TIMEOUT_SECS", default_value_t = 10)]
    pub receive_timeout_secs: u64,

    /// Outbound mailbox capacity per client
    #[arg(long, env = "RELAY_SEND_CAPACITY", default_value_t = DEFAULT_QUEUE_CAPACITY)]
    pub send_capacity: usize,

    /// Inbound mailbox capacity per client
    #[arg(long, env = "RELAY_RECV_CAPACITY", default_value_t = DEFAULT_QUEUE_CAPACITY)]
    pub recv_capacity: usize,

    /// Capacity of the chat service and registry queues
    #[arg(long, env = "RELAY_QUEUE_CAPACITY", default_value_t = DEFAULT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,
}

impl RelayArgs {
    pub fn into_config(self) -> Result<ServerConfig, ConfigError> {
        let pong_wait = Duration::from_secs(self.pong_wait_secs);
        let ping_period = match self.ping_period_secs {
            Some(secs) => Duration::from_secs(secs),
            None => pong_wait * 9 / 10,
        };

        let config = ServerConfig {
            addr: self.addr,
            room_name: self.room_name,
            events_capacity: self.queue_capacity,
            messages_capacity: self.queue_capacity,
            registry_capacity: self.queue_capacity,
            client: ClientConfig {
                write_wait: Duration::from_secs(self.write_wait_secs),
                pong_wait,
                ping_period,
                receive_timeout: Duration::from_secs(self.receive_timeout_secs),
                send_capacity: self.send_capacity,
                recv_capacity: self.recv_capacity,
            },
            ..ServerConfig::default()
        };
        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<ServerConfig, ConfigError> {
        let args = RelayArgs::try_parse_from(std::iter::once("room_relay").chain(args.iter().copied()))
            .expect("arguments should parse");
        args.into_config()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.addr, DEFAULT_ADDR);
        assert_eq!(config.room_name, "General");
        assert_eq!(config.client.ping_period, Duration::from_secs(54));
        assert_eq!(config.registry_capacity, DEFAULT_QUEUE_CAPACITY);
        assert!(ServerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_flag_overrides() {
        let config = parse(&[
            "0.0.0.0:9000",
            "--pong-wait-secs",
            "20",
            "--send-capacity",
            "8",
            "--queue-capacity",
            "16",
        ])
        .unwrap();

        assert_eq!(config.addr, "0.0.0.0:9000");
        assert_eq!(config.client.pong_wait, Duration::from_secs(20));
        assert_eq!(config.client.ping_period, Duration::from_secs(18));
        assert_eq!(config.client.send_capacity, 8);
        assert_eq!(config.events_capacity, 16);
        assert_eq!(config.registry_capacity, 16);
    }

    #[test]
    fn test_invalid_number_rejected() {
        let result = RelayArgs::try_parse_from(["room_relay", "--send-capacity", "lots"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_ping_period_must_be_shorter_than_pong_wait() {
        let result = parse(&["--pong-wait-secs", "10", "--ping-period-secs", "10"]);
        assert!(matches!(
            result,
            Err(ConfigError::Invalid { key: "RELAY_PING_PERIOD_SECS", .. })
        ));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let result = parse(&["--queue-capacity", "0"]);
        assert!(matches!(
            result,
            Err(ConfigError::Invalid { key: "RELAY_QUEUE_CAPACITY", .. })
        ));

        let config = ServerConfig {
            client: ClientConfig {
                recv_capacity: 0,
                ..ClientConfig::default()
            },
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
