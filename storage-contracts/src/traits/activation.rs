// SPDX-License-Identifier: GPL-3.0-only

use crate::{ActivationEvent, EventBus, Subscription};

/// Manager bringing storage transport devices online
///
/// Actions never fail with an error: failures of the external tools are
/// logged and turned into `false`, so a batch can go on with the next device.
pub trait ActivationManager {
    type Device: Clone + PartialEq;

    /// Re-reads every device from the system and publishes
    /// [`ActivationEvent::Probed`]
    fn probe(&mut self) -> bool;

    fn is_probed(&self) -> bool;

    /// Devices of the last probe or refresh
    fn devices(&self) -> &[Self::Device];

    fn events(&self) -> &EventBus<ActivationEvent<Self::Device>>;

    fn subscribe(&self) -> Subscription<ActivationEvent<Self::Device>> {
        self.events().subscribe()
    }
}
