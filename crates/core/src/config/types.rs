use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

use crate::bulk::SchedulerConfig;
use crate::resources::ResourceConfig;
use crate::subscription::SubscriptionConfig;
use crate::supervisor::SupervisorConfig;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub resources: ResourceConfig,
    #[serde(default)]
    pub subscriptions: SubscriptionConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8080
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("streamvisor.db")
}

/// Sanitized config for API responses.
///
/// Client-to-plan assignments are reduced to a count.
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub supervisor: SupervisorConfig,
    pub scheduler: SchedulerConfig,
    pub resources: ResourceConfig,
    pub subscriptions: SanitizedSubscriptionConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedSubscriptionConfig {
    pub default_plan: String,
    pub plans: Vec<String>,
    pub assigned_clients: usize,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        let mut plans: Vec<String> = config.subscriptions.plans.keys().cloned().collect();
        plans.sort();

        Self {
            server: config.server.clone(),
            database: config.database.clone(),
            supervisor: config.supervisor.clone(),
            scheduler: config.scheduler.clone(),
            resources: config.resources.clone(),
            subscriptions: SanitizedSubscriptionConfig {
                default_plan: config.subscriptions.default_plan.clone(),
                plans,
                assigned_clients: config.subscriptions.clients.len(),
            },
        }
    }
}
