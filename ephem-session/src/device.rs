use serde::Serialize;

use crate::error::DeviceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HopperState {
    On,
    Off,
}

/// Feeder that delivers the reinforcer. Only ever commanded, never queried.
pub trait RewardDevice {
    fn set_state(&mut self, state: HopperState) -> Result<(), DeviceError>;
}

/// Stand-in for boxes without a feeder: every command is only logged.
#[derive(Debug, Default)]
pub struct LoggingHopper;

impl RewardDevice for LoggingHopper {
    fn set_state(&mut self, state: HopperState) -> Result<(), DeviceError> {
        tracing::info!(?state, "hopper");
        Ok(())
    }
}

/// Forwards only state changes to the device, so repeated commands are
/// no-ops. A failed command forgets the last known state and is resent the
/// next time any state is requested.
#[derive(Debug)]
pub struct Hopper<R: RewardDevice> {
    device: R,
    last: Option<HopperState>,
}

impl<R: RewardDevice> Hopper<R> {
    pub fn new(device: R) -> Self {
        Self { device, last: None }
    }

    pub fn set(&mut self, state: HopperState) {
        if self.last == Some(state) {
            return;
        }
        match self.device.set_state(state) {
            Ok(()) => self.last = Some(state),
            Err(e) => {
                tracing::warn!(?state, error = %e, "hopper command failed");
                self.last = None;
            }
        }
    }

    pub fn on(&mut self) {
        self.set(HopperState::On);
    }

    pub fn off(&mut self) {
        self.set(HopperState::Off);
    }

    pub fn last_state(&self) -> Option<HopperState> {
        self.last
    }

    pub fn device(&self) -> &R {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut R {
        &mut self.device
    }
}
