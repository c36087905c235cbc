// SPDX-License-Identifier: GPL-3.0-only

#![allow(dead_code)]

use std::sync::Arc;

use storage_contracts::{ActivationEvent, Subscription};
use storage_testing::FakeSystem;
use storage_types::ActivationSettings;

/// Activation settings that keep the polling loops fast
pub fn fast_settings() -> ActivationSettings {
    ActivationSettings {
        format_poll_interval_ms: 1,
        format_start_timeout_ms: 50,
    }
}

pub fn fake_system() -> Arc<FakeSystem> {
    Arc::new(FakeSystem::new())
}

/// Number of `Changed` events waiting in a subscription
pub fn changes<T>(events: &[ActivationEvent<T>]) -> usize {
    events
        .iter()
        .filter(|event| matches!(event, ActivationEvent::Changed(_)))
        .count()
}

pub fn drain<T>(subscription: &Subscription<ActivationEvent<T>>) -> Vec<ActivationEvent<T>> {
    subscription.drain()
}
