//! Shared Context
//!
//! Configuration shared by every cache built from it: the serializer
//! registry and the fault-tolerance toggle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::codec::Serializers;

#[derive(Debug, Default)]
pub struct Context {
    serializers: Arc<Serializers>,
    fault_tolerant: AtomicBool,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serializers(&self) -> &Arc<Serializers> {
        &self.serializers
    }

    /// When enabled, connection failures degrade to empty results.
    pub fn set_fault_tolerant(&self, enabled: bool) {
        self.fault_tolerant.store(enabled, Ordering::SeqCst);
    }

    pub fn is_fault_tolerant(&self) -> bool {
        self.fault_tolerant.load(Ordering::SeqCst)
    }

    /// Restores the built-in serializers and turns fault tolerance off.
    pub fn reset(&self) {
        self.serializers.reset();
        self.set_fault_tolerant(false);
    }
}
