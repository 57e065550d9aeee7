//! Typed configuration surface. The embedding application owns loading this
//! from a file or CLI flags (out of scope here); this crate only validates
//! and consumes it.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub host: String,
    pub proxy_sub_port: u16,
    pub proxy_pub_port: u16,
    pub queue_size: u32,
    pub receive_timeout_ms: u64,
    pub invalid_frame_timeout_ms: u64,
    pub sender_stop_timeout_ms: u64,
    pub max_aggregation_attempts: u32,
    pub image_workers: usize,
    pub bad_frame_budget: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: "127.0.0.1".to_string(),
            proxy_sub_port: 5550,
            proxy_pub_port: 5551,
            queue_size: 16,
            receive_timeout_ms: 200,
            invalid_frame_timeout_ms: 50,
            sender_stop_timeout_ms: 1000,
            max_aggregation_attempts: 10,
            image_workers: 4,
            bad_frame_budget: 25,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            bail!("host must not be empty");
        }
        if !(1025..=65535).contains(&self.proxy_sub_port) {
            bail!("proxy_sub_port must be in 1025..=65535");
        }
        if !(1025..=65535).contains(&self.proxy_pub_port) {
            bail!("proxy_pub_port must be in 1025..=65535");
        }
        if self.proxy_sub_port == self.proxy_pub_port {
            bail!("proxy_sub_port and proxy_pub_port must differ");
        }
        if self.queue_size < 1 {
            bail!("queue_size must be >= 1");
        }
        if self.receive_timeout_ms < 1 {
            bail!("receive_timeout_ms must be >= 1");
        }
        if self.sender_stop_timeout_ms < 1 {
            bail!("sender_stop_timeout_ms must be >= 1");
        }
        if self.max_aggregation_attempts < 1 {
            bail!("max_aggregation_attempts must be >= 1");
        }
        if self.image_workers < 1 {
            bail!("image_workers must be >= 1");
        }
        Ok(())
    }

    pub fn sub_endpoint(&self) -> String {
        format!("tcp://{}:{}", self.host, self.proxy_sub_port)
    }

    pub fn pub_endpoint(&self) -> String {
        format!("tcp://{}:{}", self.host, self.proxy_pub_port)
    }
}
