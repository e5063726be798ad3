//! ---
//! hcu_section: "01-core-functionality"
//! hcu_subsection: "module"
//! hcu_type: "source"
//! hcu_scope: "code"
//! hcu_description: "Collision-resolving name registry for robots and their units."
//! hcu_version: "v0.0.0-prealpha"
//! hcu_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

static ROBOT_ID: AtomicU64 = AtomicU64::new(0);

static GLOBAL_REGISTRY: Lazy<Arc<NameRegistry>> = Lazy::new(|| Arc::new(NameRegistry::new()));

/// Generate a default robot name from the process-wide counter.
pub(crate) fn next_default_name() -> String {
    format!("Robot-{}", ROBOT_ID.fetch_add(1, Ordering::SeqCst))
}

/// Registry keeping robot names unique within its scope.
///
/// Robots share the process-wide default registry unless their configuration
/// injects a dedicated one (tests do). Claimed names are never recycled, so a
/// requested name that was suffixed away stays suffixed for the life of the
/// registry.
#[derive(Debug, Default)]
pub struct NameRegistry {
    names: Mutex<HashSet<String>>,
}

impl NameRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide default registry.
    pub fn global() -> Arc<NameRegistry> {
        GLOBAL_REGISTRY.clone()
    }

    /// Claim the requested name, renaming with the smallest unused numeric
    /// suffix on collision. Returns the name actually claimed.
    pub fn claim(&self, requested: &str) -> String {
        let mut names = self.names.lock();
        let assigned = unique_name(requested, |candidate| names.contains(candidate));
        names.insert(assigned.clone());
        assigned
    }

    /// Release a previously claimed name.
    pub fn release(&self, name: &str) {
        self.names.lock().remove(name);
    }

    /// Whether the name is currently claimed.
    pub fn contains(&self, name: &str) -> bool {
        self.names.lock().contains(name)
    }
}

/// Append `-1`, `-2`, … to `requested` until `taken` reports a free name.
pub(crate) fn unique_name(requested: &str, taken: impl Fn(&str) -> bool) -> String {
    if !taken(requested) {
        return requested.to_owned();
    }
    let mut suffix = 1u32;
    loop {
        let candidate = format!("{}-{}", requested, suffix);
        if !taken(&candidate) {
            return candidate;
        }
        suffix += 1;
    }
}
