use chrono::{FixedOffset, Local, Offset};
use serde::Deserialize;
use std::time::Duration;

use crate::engine::EngineConfig;
use crate::liveness::LivenessConfig;
use crate::rollup::RollupConfig;
use crate::rollup::vacuum::VacuumSchedule;
use crate::snapshot::SnapshotConfig;
use crate::worker::WorkerConfig;

/// Largest UTC offset chrono accepts, in minutes (UTC+14:00).
const MAX_UTC_OFFSET_MINUTES: i32 = 14 * 60;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub source: SourceConfig,
    #[serde(default)]
    pub buffer: BufferConfig,
    pub snapshot: SnapshotSection,
    pub rollup: RollupSection,
    pub publishing: PublishingConfig,
    #[serde(default)]
    pub display: DisplayConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// Context subscribed at startup.
    pub initial_context: String,
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: i64,
    #[serde(default = "default_heartbeat_check_interval_ms")]
    pub heartbeat_check_interval_ms: u64,
    /// Treat a push with zero voltage, current and power as loss of supply.
    #[serde(default)]
    pub zero_reading_is_offline: bool,
    /// Devices whose last push is kept for replay to a new subscriber.
    #[serde(default = "default_replay_capacity")]
    pub replay_capacity: usize,
}

fn default_heartbeat_timeout_ms() -> i64 {
    3_000
}

fn default_heartbeat_check_interval_ms() -> u64 {
    2_000
}

fn default_replay_capacity() -> usize {
    crate::source::DEFAULT_REPLAY_CAPACITY
}

#[derive(Debug, Clone, Deserialize)]
pub struct BufferConfig {
    #[serde(default = "default_buffer_capacity")]
    pub capacity: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: default_buffer_capacity(),
        }
    }
}

fn default_buffer_capacity() -> usize {
    300
}

#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotSection {
    pub dir: String,
    #[serde(default = "default_save_every")]
    pub save_every: u64,
    #[serde(default = "default_snapshot_retention_hours")]
    pub retention_hours: u32,
    #[serde(default = "default_fallback_keep")]
    pub fallback_keep: usize,
    /// Upper bound on one snapshot file; larger writes fail and trigger the truncating retry.
    pub max_bytes: Option<usize>,
}

fn default_save_every() -> u64 {
    60
}

fn default_snapshot_retention_hours() -> u32 {
    24
}

fn default_fallback_keep() -> usize {
    100
}

#[derive(Debug, Clone, Deserialize)]
pub struct RollupSection {
    pub path: String,
    #[serde(default = "default_flush_every")]
    pub flush_every: u64,
    #[serde(default = "default_rollup_retention_days")]
    pub retention_days: u32,
    /// Cron expression (with seconds) for VACUUM, e.g. "0 0 3 * * *". Takes precedence over the interval.
    pub vacuum_schedule: Option<String>,
    #[serde(default = "default_vacuum_interval_secs")]
    pub vacuum_interval_secs: u64,
}

fn default_flush_every() -> u64 {
    300
}

fn default_rollup_retention_days() -> u32 {
    7
}

fn default_vacuum_interval_secs() -> u64 {
    86_400
}

#[derive(Debug, Clone, Deserialize)]
pub struct PublishingConfig {
    /// Max number of live events kept in the broadcast channel for /ws/live (slow clients may lag).
    pub broadcast_capacity: usize,
    #[serde(default = "default_command_capacity")]
    pub command_capacity: usize,
    /// How often to log engine stats at INFO level.
    #[serde(default = "default_stats_log_interval_secs")]
    pub stats_log_interval_secs: u64,
}

fn default_command_capacity() -> usize {
    64
}

fn default_stats_log_interval_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DisplayConfig {
    /// Offset for labels, bucket alignment and calendar days. Unset = host local offset at startup.
    pub utc_offset_minutes: Option<i32>,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        let s = std::fs::read_to_string(&path)?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.server.port > 0,
            "server.port must be between 1 and 65535, got {}",
            self.server.port
        );
        anyhow::ensure!(
            !self.source.initial_context.trim().is_empty(),
            "source.initial_context must be non-empty"
        );
        anyhow::ensure!(
            self.source.heartbeat_timeout_ms > 0,
            "source.heartbeat_timeout_ms must be > 0, got {}",
            self.source.heartbeat_timeout_ms
        );
        anyhow::ensure!(
            self.source.heartbeat_check_interval_ms > 0,
            "source.heartbeat_check_interval_ms must be > 0, got {}",
            self.source.heartbeat_check_interval_ms
        );
        anyhow::ensure!(
            self.buffer.capacity > 0,
            "buffer.capacity must be > 0, got {}",
            self.buffer.capacity
        );
        anyhow::ensure!(!self.snapshot.dir.is_empty(), "snapshot.dir must be non-empty");
        anyhow::ensure!(
            self.snapshot.save_every > 0,
            "snapshot.save_every must be > 0, got {}",
            self.snapshot.save_every
        );
        anyhow::ensure!(
            self.snapshot.retention_hours > 0,
            "snapshot.retention_hours must be > 0, got {}",
            self.snapshot.retention_hours
        );
        anyhow::ensure!(
            self.snapshot.fallback_keep > 0 && self.snapshot.fallback_keep <= self.buffer.capacity,
            "snapshot.fallback_keep must be between 1 and buffer.capacity ({}), got {}",
            self.buffer.capacity,
            self.snapshot.fallback_keep
        );
        anyhow::ensure!(!self.rollup.path.is_empty(), "rollup.path must be non-empty");
        anyhow::ensure!(
            self.rollup.flush_every > 0,
            "rollup.flush_every must be > 0, got {}",
            self.rollup.flush_every
        );
        anyhow::ensure!(
            self.rollup.retention_days > 0,
            "rollup.retention_days must be > 0, got {}",
            self.rollup.retention_days
        );
        if let Some(expr) = &self.rollup.vacuum_schedule {
            anyhow::ensure!(
                <cron::Schedule as std::str::FromStr>::from_str(expr).is_ok(),
                "rollup.vacuum_schedule is not a valid cron expression: {}",
                expr
            );
        }
        anyhow::ensure!(
            self.rollup.vacuum_interval_secs > 0,
            "rollup.vacuum_interval_secs must be > 0, got {}",
            self.rollup.vacuum_interval_secs
        );
        anyhow::ensure!(
            self.publishing.broadcast_capacity > 0,
            "publishing.broadcast_capacity must be > 0, got {}",
            self.publishing.broadcast_capacity
        );
        anyhow::ensure!(
            self.publishing.command_capacity > 0,
            "publishing.command_capacity must be > 0, got {}",
            self.publishing.command_capacity
        );
        anyhow::ensure!(
            self.publishing.stats_log_interval_secs > 0,
            "publishing.stats_log_interval_secs must be > 0, got {}",
            self.publishing.stats_log_interval_secs
        );
        if let Some(minutes) = self.display.utc_offset_minutes {
            anyhow::ensure!(
                minutes.abs() <= MAX_UTC_OFFSET_MINUTES,
                "display.utc_offset_minutes must be within ±{}, got {}",
                MAX_UTC_OFFSET_MINUTES,
                minutes
            );
        }
        Ok(())
    }

    /// Configured display offset, or the host's current local offset.
    pub fn utc_offset(&self) -> FixedOffset {
        self.display
            .utc_offset_minutes
            .and_then(|m| FixedOffset::east_opt(m * 60))
            .unwrap_or_else(|| Local::now().offset().fix())
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            buffer_capacity: self.buffer.capacity,
            liveness: LivenessConfig {
                heartbeat_timeout_ms: self.source.heartbeat_timeout_ms,
                zero_reading_is_offline: self.source.zero_reading_is_offline,
            },
            rollup: RollupConfig {
                flush_every: self.rollup.flush_every,
                retention_days: self.rollup.retention_days,
            },
            snapshot: SnapshotConfig {
                save_every: self.snapshot.save_every,
                retention_hours: self.snapshot.retention_hours,
                fallback_keep: self.snapshot.fallback_keep,
            },
            utc_offset: self.utc_offset(),
        }
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            heartbeat_check_interval_ms: self.source.heartbeat_check_interval_ms,
            command_capacity: self.publishing.command_capacity,
            stats_log_interval_secs: self.publishing.stats_log_interval_secs,
        }
    }

    pub fn vacuum_schedule(&self) -> VacuumSchedule {
        match &self.rollup.vacuum_schedule {
            Some(expr) => VacuumSchedule::Cron(expr.clone()),
            None => VacuumSchedule::Every(Duration::from_secs(self.rollup.vacuum_interval_secs)),
        }
    }
}
