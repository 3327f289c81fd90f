use crate::StationConfig;
use std::collections::BTreeSet;

/// Decides which block devices the station may ever see or touch.
///
/// A name that is protected or carries an ignore prefix never enters the
/// registry and is never admitted as a wipe target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceFilter {
    protected: BTreeSet<String>,
    ignore_prefixes: Vec<String>,
}

impl DeviceFilter {
    pub fn new<P, I>(protected: P, ignore_prefixes: I) -> Self
    where
        P: IntoIterator,
        P::Item: Into<String>,
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self {
            protected: protected.into_iter().map(Into::into).collect(),
            ignore_prefixes: ignore_prefixes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_config(config: &StationConfig) -> Self {
        Self::new(
            config.protected_disks.iter().cloned(),
            config.ignore_prefixes.iter().cloned(),
        )
    }

    pub fn is_protected(&self, name: &str) -> bool {
        self.protected.contains(name)
    }

    /// Virtual, loop, RAID, compressed, optical and RAM devices
    pub fn is_ignored(&self, name: &str) -> bool {
        self.ignore_prefixes
            .iter()
            .any(|prefix| name.starts_with(prefix.as_str()))
    }

    pub fn admits(&self, name: &str) -> bool {
        !name.is_empty() && !self.is_protected(name) && !self.is_ignored(name)
    }

    pub fn protected_disks(&self) -> Vec<String> {
        self.protected.iter().cloned().collect()
    }
}
