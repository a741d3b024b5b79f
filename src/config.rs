//! Centralized configuration for the KVS engine.
//!
//! Goals:
//! - Single place to collect tunables instead of scattering env lookups.
//! - Options::from_env() reads FKV_* env vars (CLI, tests, bring-up on a dev board).
//! - Fluent with_* setters to override specific fields.
//!
//! Ёмкости (max entries / max sectors / redundancy): не часть Options: это const generics
//! KeyValueStore, RAM-бюджет фиксируется на этапе компиляции.
//!
//! Defaults:
//! - gc_on_write = one_sector (не более одной GC-компактации на одну запись)
//! - recovery = lazy (битые сектора чинятся сразу в init/перед записью)
//! - verify_on_read = true, verify_on_write = true

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Политика GC при нехватке места для записи.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GcOnWrite {
    /// Никогда не запускать GC из put/delete: сразу ResourceExhausted.
    Disabled,
    /// Не более одного сектора за операцию записи.
    OneSector,
    /// Столько секторов, сколько нужно, пока есть что освобождать.
    AsNeeded,
}

/// Политика восстановления после обнаруженной порчи.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorRecovery {
    /// Только явный вызов full_maintenance().
    Manual,
    /// Ремонт сразу в init() и перед записью, если error_detected().
    Lazy,
}

impl FromStr for GcOnWrite {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disabled" | "off" | "0" => Ok(GcOnWrite::Disabled),
            "one_sector" | "one" => Ok(GcOnWrite::OneSector),
            "as_needed" | "all" => Ok(GcOnWrite::AsNeeded),
            other => Err(format!("unknown gc_on_write policy '{}'", other)),
        }
    }
}

impl FromStr for ErrorRecovery {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "manual" => Ok(ErrorRecovery::Manual),
            "lazy" => Ok(ErrorRecovery::Lazy),
            other => Err(format!("unknown recovery policy '{}'", other)),
        }
    }
}

impl fmt::Display for GcOnWrite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GcOnWrite::Disabled => "disabled",
            GcOnWrite::OneSector => "one_sector",
            GcOnWrite::AsNeeded => "as_needed",
        };
        f.write_str(s)
    }
}

impl fmt::Display for ErrorRecovery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorRecovery::Manual => "manual",
            ErrorRecovery::Lazy => "lazy",
        };
        f.write_str(s)
    }
}

/// Неизменяемая (на время жизни экземпляра) конфигурация KeyValueStore.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Options {
    /// Env: FKV_GC_ON_WRITE = disabled|one_sector|as_needed (default one_sector)
    pub gc_on_write: GcOnWrite,

    /// Env: FKV_RECOVERY = manual|lazy (default lazy)
    pub recovery: ErrorRecovery,

    /// Перепроверять чексумму записи при каждом get().
    /// Env: FKV_VERIFY_ON_READ (default true; "1|true|on|yes" => true)
    pub verify_on_read: bool,

    /// Перечитывать и проверять каждую копию сразу после записи.
    /// Env: FKV_VERIFY_ON_WRITE (default true)
    pub verify_on_write: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            gc_on_write: GcOnWrite::OneSector,
            recovery: ErrorRecovery::Lazy,
            verify_on_read: true,
            verify_on_write: true,
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name).ok().map(|v| {
        let s = v.trim().to_ascii_lowercase();
        s == "1" || s == "true" || s == "on" || s == "yes"
    })
}

impl Options {
    /// Load options from environment variables; unknown values keep the default.
    pub fn from_env() -> Self {
        let mut opts = Self::default();

        if let Ok(v) = std::env::var("FKV_GC_ON_WRITE") {
            if let Ok(p) = v.parse::<GcOnWrite>() {
                opts.gc_on_write = p;
            }
        }

        if let Ok(v) = std::env::var("FKV_RECOVERY") {
            if let Ok(r) = v.parse::<ErrorRecovery>() {
                opts.recovery = r;
            }
        }

        if let Some(on) = env_flag("FKV_VERIFY_ON_READ") {
            opts.verify_on_read = on;
        }
        if let Some(on) = env_flag("FKV_VERIFY_ON_WRITE") {
            opts.verify_on_write = on;
        }

        opts
    }

    // Fluent setters (builder-style) to override specific fields.

    pub fn with_gc_on_write(mut self, gc: GcOnWrite) -> Self {
        self.gc_on_write = gc;
        self
    }

    pub fn with_recovery(mut self, recovery: ErrorRecovery) -> Self {
        self.recovery = recovery;
        self
    }

    pub fn with_verify_on_read(mut self, on: bool) -> Self {
        self.verify_on_read = on;
        self
    }

    pub fn with_verify_on_write(mut self, on: bool) -> Self {
        self.verify_on_write = on;
        self
    }
}

impl fmt::Display for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Options {{ \
             gc_on_write: {}, \
             recovery: {}, \
             verify_on_read: {}, \
             verify_on_write: {} \
             }}",
            self.gc_on_write, self.recovery, self.verify_on_read, self.verify_on_write,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_policies() {
        assert_eq!("as_needed".parse::<GcOnWrite>().unwrap(), GcOnWrite::AsNeeded);
        assert_eq!(" Disabled ".parse::<GcOnWrite>().unwrap(), GcOnWrite::Disabled);
        assert_eq!("MANUAL".parse::<ErrorRecovery>().unwrap(), ErrorRecovery::Manual);
        assert!("sometimes".parse::<ErrorRecovery>().is_err());
    }

    #[test]
    fn fluent_setters_override_defaults() {
        let o = Options::default()
            .with_gc_on_write(GcOnWrite::Disabled)
            .with_recovery(ErrorRecovery::Manual)
            .with_verify_on_read(false);
        assert_eq!(o.gc_on_write, GcOnWrite::Disabled);
        assert_eq!(o.recovery, ErrorRecovery::Manual);
        assert!(!o.verify_on_read);
        assert!(o.verify_on_write);
        assert!(o.to_string().contains("gc_on_write: disabled"));
    }
}
