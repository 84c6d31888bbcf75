//! Host connectivity check consulted before every flush.

use std::sync::atomic::{AtomicBool, Ordering};

pub trait NetworkMonitor: Send + Sync {
    fn is_available(&self) -> bool;
}

/// For hosts without a connectivity API: always try, let the request fail.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeOnline;

impl NetworkMonitor for AssumeOnline {
    fn is_available(&self) -> bool {
        true
    }
}

/// Connectivity flag flipped by the host's network callbacks.
#[derive(Debug)]
pub struct NetworkFlag {
    online: AtomicBool,
}

impl NetworkFlag {
    pub fn new(online: bool) -> Self {
        NetworkFlag {
            online: AtomicBool::new(online),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

impl Default for NetworkFlag {
    fn default() -> Self {
        NetworkFlag::new(true)
    }
}

impl NetworkMonitor for NetworkFlag {
    fn is_available(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}
