//! Driver options
//!
//! Options are passed to a driver call as a small typed map. Absent keys
//! fall back to documented defaults; unknown names are ignored; invalid
//! values fail with `InvalidArgument` at driver entry, before any work is
//! submitted.

use crate::error::{Error, Result};
use rustc_hash::FxHashMap;
use std::fmt;

/// Execution location for kernels.
///
/// The driver core is shared across targets; only the kernel-adapter entry
/// differs. All variants are optional per build — a driver call with a
/// target the matrix cannot serve (e.g. `Devices` with no device arenas
/// configured) is rejected at entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    /// One host thread, scalar kernel call.
    HostTask,
    /// Host, nested parallelism over inner tiles.
    HostNest,
    /// Host, batched call over many small tiles.
    HostBatch,
    /// Accelerator-batched kernels, round-robined across visible devices.
    Devices,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Target::HostTask => "HostTask",
            Target::HostNest => "HostNest",
            Target::HostBatch => "HostBatch",
            Target::Devices => "Devices",
        };
        write!(f, "{}", name)
    }
}

/// Option names understood by the drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionKey {
    /// Kernel execution target. Default: `HostTask`.
    Target,
    /// Number of trailing panels solved and broadcast eagerly. Default: 1.
    Lookahead,
    /// Sub-tile blocking used inside panel kernels. Default: 16.
    InnerBlocking,
    /// Thread cap for panel-level nested parallelism. Default: runtime max.
    MaxPanelThreads,
}

impl OptionKey {
    /// Parse an option name. Unknown names yield `None`, which callers
    /// treat as "ignore this entry".
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Target" => Some(OptionKey::Target),
            "Lookahead" => Some(OptionKey::Lookahead),
            "InnerBlocking" => Some(OptionKey::InnerBlocking),
            "MaxPanelThreads" => Some(OptionKey::MaxPanelThreads),
            _ => None,
        }
    }
}

/// A tagged option value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OptionValue {
    /// Integer-valued option.
    Int(i64),
    /// Target-valued option.
    Target(Target),
}

/// Option map passed to driver calls.
///
/// # Example
///
/// ```
/// use mosaic_core::{Options, OptionKey, OptionValue, Target};
///
/// let opts = Options::new()
///     .with(OptionKey::Target, OptionValue::Target(Target::HostTask))
///     .with(OptionKey::Lookahead, OptionValue::Int(2));
/// let resolved = opts.resolve(8).unwrap();
/// assert_eq!(resolved.lookahead, 2);
/// assert_eq!(resolved.inner_blocking, 16);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Options {
    map: FxHashMap<OptionKey, OptionValue>,
}

/// Options after defaulting and validation, as consumed by a driver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedOptions {
    /// Kernel execution target.
    pub target: Target,
    /// Lookahead depth.
    pub lookahead: usize,
    /// Inner blocking for panel kernels.
    pub inner_blocking: usize,
    /// Panel nested-parallelism cap.
    pub max_panel_threads: usize,
}

impl Options {
    /// Create an empty option map (all defaults).
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an option, builder style.
    pub fn with(mut self, key: OptionKey, value: OptionValue) -> Self {
        self.map.insert(key, value);
        self
    }

    /// Set an option in place.
    pub fn set(&mut self, key: OptionKey, value: OptionValue) {
        self.map.insert(key, value);
    }

    /// Set an option by name. Unknown names are ignored.
    pub fn set_named(&mut self, name: &str, value: OptionValue) {
        if let Some(key) = OptionKey::from_name(name) {
            self.map.insert(key, value);
        }
    }

    /// Look up an option.
    pub fn get(&self, key: OptionKey) -> Option<OptionValue> {
        self.map.get(&key).copied()
    }

    fn int(&self, key: OptionKey, default: i64) -> Result<i64> {
        match self.map.get(&key) {
            None => Ok(default),
            Some(OptionValue::Int(v)) => Ok(*v),
            Some(other) => Err(Error::invalid_argument(format!(
                "option {:?} expects an integer, got {:?}",
                key, other
            ))),
        }
    }

    /// Apply defaults and validate against the runtime thread maximum.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a negative lookahead, a non-positive inner
    /// blocking, a panel thread cap below 1 or above `runtime_max_threads`,
    /// or a type-mismatched value.
    pub fn resolve(&self, runtime_max_threads: usize) -> Result<ResolvedOptions> {
        let target = match self.map.get(&OptionKey::Target) {
            None => Target::HostTask,
            Some(OptionValue::Target(t)) => *t,
            Some(other) => {
                return Err(Error::invalid_argument(format!(
                    "option Target expects a target, got {:?}",
                    other
                )))
            }
        };

        let lookahead = self.int(OptionKey::Lookahead, 1)?;
        if lookahead < 0 {
            return Err(Error::invalid_argument(format!(
                "Lookahead must be non-negative, got {}",
                lookahead
            )));
        }

        let inner_blocking = self.int(OptionKey::InnerBlocking, 16)?;
        if inner_blocking <= 0 {
            return Err(Error::invalid_argument(format!(
                "InnerBlocking must be positive, got {}",
                inner_blocking
            )));
        }

        let max_panel_threads = self.int(OptionKey::MaxPanelThreads, runtime_max_threads as i64)?;
        if max_panel_threads < 1 || max_panel_threads as usize > runtime_max_threads {
            return Err(Error::invalid_argument(format!(
                "MaxPanelThreads must be in 1..={}, got {}",
                runtime_max_threads, max_panel_threads
            )));
        }

        Ok(ResolvedOptions {
            target,
            lookahead: lookahead as usize,
            inner_blocking: inner_blocking as usize,
            max_panel_threads: max_panel_threads as usize,
        })
    }
}
