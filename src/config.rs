//! Run configuration for the emulator.
//!
//! All knobs are plain fields with serde defaults so a config can be loaded
//! from a JSON snippet or built in code via `..Default::default()`. The core
//! consumes only a subset; the generator-facing keys are carried here because
//! the config struct is the shared surface between the core and its external
//! collaborators (shell, generator, reporter).

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::policy::SchedulingPolicy;

/// Configuration for a scheduler run.
///
/// # Sizing Guidelines
///
/// - `max_overall_mem / mem_per_frame` is the physical frame count; keep it
///   small (2-64) to actually exercise replacement.
/// - `scheduler_tick_delay` bounds the real-time rate of the emulation; tests
///   use 1-5 ms, interactive runs 50-200 ms.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Number of worker threads; also barrier arity minus one.
    pub num_cpu: u32,
    /// Scheduling policy for the ready set.
    pub scheduler: SchedulingPolicy,
    /// RR quantum in ticks. Ignored by FCFS / PRIORITY.
    pub quantum_cycles: u32,
    /// Busy-wait ticks inserted after each retired instruction.
    pub delay_per_exec: u32,
    /// Milliseconds slept at the end of each scheduler loop iteration.
    pub scheduler_tick_delay: u64,

    /// Cap on instructions per process after FOR unrolling (0 = no limit).
    /// Enforced by the generator via [`crate::instruction::unrolled_len`].
    pub max_unrolled_instructions: u32,

    /// Ticks between snapshots pushed into the in-memory log ring.
    pub snapshot_cooldown: u64,
    /// Ticks between on-disk snapshot files.
    pub save_snapshot_file_rate: u64,
    /// Whether the finished map is bounded.
    pub remove_finished: bool,
    /// Capacity of the finished map when bounded.
    pub remove_finished_capacity: usize,

    /// Total physical memory in bytes. Must be a power of two.
    pub max_overall_mem: usize,
    /// Frame (and page) size in bytes. Must be a power of two.
    pub mem_per_frame: usize,
    /// Lower bound of the per-process memory-budget roll.
    pub min_mem_per_proc: usize,
    /// Upper bound of the per-process memory-budget roll.
    pub max_mem_per_proc: usize,

    /// Seed for the deterministic admission budget roll.
    pub rng_seed: u64,

    /// Directory holding per-process swap files.
    pub backing_store_dir: PathBuf,
    /// Directory receiving periodic snapshot files.
    pub logs_dir: PathBuf,

    // Consumed by the external process generator, carried here so one struct
    // describes a whole run.
    /// Generator cadence in ticks.
    pub batch_process_freq: u32,
    /// Minimum instructions per generated process.
    pub min_ins: u32,
    /// Maximum instructions per generated process.
    pub max_ins: u32,
    /// Admission cap used by the generator.
    pub max_generated_processes: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            num_cpu: 4,
            scheduler: SchedulingPolicy::Rr,
            quantum_cycles: 5,
            delay_per_exec: 0,
            scheduler_tick_delay: 10,
            max_unrolled_instructions: 10_000,
            snapshot_cooldown: 32,
            save_snapshot_file_rate: 64,
            remove_finished: true,
            remove_finished_capacity: 128,
            max_overall_mem: 16_384,
            mem_per_frame: 16,
            min_mem_per_proc: 64,
            max_mem_per_proc: 256,
            rng_seed: 0x853c_49e6_748f_ea9b,
            backing_store_dir: PathBuf::from("backing_store"),
            logs_dir: PathBuf::from("logs"),
            batch_process_freq: 1,
            min_ins: 1000,
            max_ins: 2000,
            max_generated_processes: 64,
        }
    }
}

impl SchedulerConfig {
    /// Parses a config from a JSON document; absent keys take defaults.
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(s).map_err(ConfigError::Parse)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validates invariants the rest of the emulator assumes.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_cpu == 0 {
            return Err(ConfigError::Invalid("num_cpu must be > 0"));
        }
        if self.quantum_cycles == 0 {
            return Err(ConfigError::Invalid("quantum_cycles must be > 0"));
        }
        if !self.max_overall_mem.is_power_of_two() {
            return Err(ConfigError::Invalid("max_overall_mem must be a power of two"));
        }
        if !self.mem_per_frame.is_power_of_two() {
            return Err(ConfigError::Invalid("mem_per_frame must be a power of two"));
        }
        if self.mem_per_frame < 2 {
            return Err(ConfigError::Invalid("mem_per_frame must hold at least one 2-byte cell"));
        }
        if self.mem_per_frame > self.max_overall_mem {
            return Err(ConfigError::Invalid("mem_per_frame exceeds max_overall_mem"));
        }
        if self.min_mem_per_proc > self.max_mem_per_proc {
            return Err(ConfigError::Invalid("min_mem_per_proc exceeds max_mem_per_proc"));
        }
        if self.snapshot_cooldown == 0 || self.save_snapshot_file_rate == 0 {
            return Err(ConfigError::Invalid("snapshot periods must be > 0"));
        }
        if self.remove_finished && self.remove_finished_capacity == 0 {
            return Err(ConfigError::Invalid("remove_finished_capacity must be > 0"));
        }
        Ok(())
    }

    /// Number of physical frames implied by the memory settings.
    pub fn frame_count(&self) -> usize {
        self.max_overall_mem / self.mem_per_frame
    }
}

/// Config construction / validation failure.
#[derive(Debug)]
pub enum ConfigError {
    /// JSON did not parse into the config schema.
    Parse(serde_json::Error),
    /// A field violated an invariant.
    Invalid(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Parse(e) => write!(f, "config parse error: {e}"),
            ConfigError::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        SchedulerConfig::default().validate().expect("defaults valid");
    }

    #[test]
    fn frame_count() {
        let cfg = SchedulerConfig {
            max_overall_mem: 64,
            mem_per_frame: 16,
            ..Default::default()
        };
        assert_eq!(cfg.frame_count(), 4);
    }

    #[test]
    fn rejects_zero_cpus() {
        let cfg = SchedulerConfig {
            num_cpu: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_non_pow2_memory() {
        let cfg = SchedulerConfig {
            max_overall_mem: 48,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = SchedulerConfig {
            mem_per_frame: 24,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_inverted_mem_range() {
        let cfg = SchedulerConfig {
            min_mem_per_proc: 512,
            max_mem_per_proc: 64,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn json_round_trip_with_partial_keys() {
        let cfg = SchedulerConfig::from_json_str(
            r#"{"num_cpu": 2, "scheduler": "fcfs", "scheduler_tick_delay": 1}"#,
        )
        .expect("parse");
        assert_eq!(cfg.num_cpu, 2);
        assert_eq!(cfg.scheduler, SchedulingPolicy::Fcfs);
        assert_eq!(cfg.scheduler_tick_delay, 1);
        // Absent keys fall back to defaults.
        assert_eq!(cfg.quantum_cycles, 5);
    }

    #[test]
    fn bad_policy_token_is_a_parse_error() {
        let err = SchedulerConfig::from_json_str(r#"{"scheduler": "lottery"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
