use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{RecError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub postgres: PostgresConfig,
    pub redis: RedisConfig,
    pub batch: BatchConfig,
    pub scheduler: SchedulerConfig,
    pub profile: ProfileConfig,
    pub read: ReadConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| RecError::Validation(format!("bad server address: {}", e)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Size of the top-by-likes candidate snapshot scored per run.
    pub candidate_pool_size: usize,
    pub lock_ttl_secs: u64,
    pub group_ttl_secs: u64,
    pub worker_threads: usize,
    /// Maintain `feed_groups:<itemId>` so items can be evicted from every group.
    pub track_membership: bool,
}

impl BatchConfig {
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn group_ttl(&self) -> Duration {
        Duration::from_secs(self.group_ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub hour: u32,
    pub minute: u32,
    /// Offset of the local zone the schedule and "today" are expressed in.
    pub utc_offset_hours: i32,
}

impl SchedulerConfig {
    pub fn offset(&self) -> Result<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_hours * 3600).ok_or_else(|| {
            RecError::Validation(format!("utc offset {}h out of range", self.utc_offset_hours))
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileConfig {
    pub ttl_secs: u64,
}

impl ProfileConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadConfig {
    pub default_page_size: usize,
    pub max_page_size: usize,
    /// Weight of the per-user profile boost on served pages; 0 disables it.
    pub personal_boost_alpha: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            postgres: PostgresConfig {
                url: "postgresql://localhost:5432/petplace".to_string(),
                max_connections: 10,
            },
            redis: RedisConfig {
                url: "redis://localhost:6379".to_string(),
            },
            batch: BatchConfig {
                candidate_pool_size: 200,
                lock_ttl_secs: 30 * 60,
                group_ttl_secs: 48 * 60 * 60,
                worker_threads: num_cpus::get().clamp(1, 4),
                track_membership: false,
            },
            scheduler: SchedulerConfig {
                enabled: true,
                hour: 3,
                minute: 0,
                utc_offset_hours: 9,
            },
            profile: ProfileConfig {
                ttl_secs: 48 * 60 * 60,
            },
            read: ReadConfig {
                default_page_size: 20,
                max_page_size: 100,
                personal_boost_alpha: 0.0,
            },
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let defaults = config::Config::try_from(&Config::default())?;
        let settings = config::Config::builder()
            .add_source(defaults)
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("PETREC").separator("__"))
            .build()?;

        let config: Config = settings.try_deserialize()?;
        crate::utils::validation::validate_config(&config)?;
        Ok(config)
    }
}
