//! Hub profiles.
//!
//! Port numbers and the light/sound byte layouts vary between hub firmware
//! revisions. A profile bundles one known-good set.

use serde::{Deserialize, Serialize};

use crate::dispatcher::DEFAULT_HISTORY_CAPACITY;
use crate::error::{Error, Result};
use crate::protocol::{CommandLayout, IdRange, LightLayout, SoundLayout};
use crate::protocol::{OPERATION_ENABLE_UPDATES, PROPERTY_BUTTON};
use crate::types::PortId;

/// Names accepted by [`HubProfile::preset`].
pub const PRESETS: &[&str] = &["duplo-train", "duplo-train-events"];

/// Frame sent once after connecting to enable hub notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activation {
    pub property: u8,
    pub operation: u8,
}

impl Default for Activation {
    fn default() -> Self {
        Self {
            property: PROPERTY_BUTTON,
            operation: OPERATION_ENABLE_UPDATES,
        }
    }
}

/// Per-firmware hub settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubProfile {
    /// Port driving the train motor.
    #[serde(default = "default_motor_port")]
    pub motor_port: PortId,

    /// Port addressed by light commands.
    #[serde(default = "default_light_port")]
    pub light_port: PortId,

    /// Commands kept for diagnostics.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    #[serde(default)]
    pub light: LightLayout,

    #[serde(default)]
    pub sound: SoundLayout,

    #[serde(default = "default_sound_range")]
    pub sound_range: IdRange,

    #[serde(default = "default_color_range")]
    pub color_range: IdRange,

    #[serde(default)]
    pub activation: Activation,
}

fn default_motor_port() -> PortId {
    PortId(0x32)
}
fn default_light_port() -> PortId {
    PortId(0x11)
}
fn default_sound_range() -> IdRange {
    IdRange::new(1, 10)
}
fn default_color_range() -> IdRange {
    IdRange::new(0, 10)
}
fn default_history_capacity() -> usize {
    DEFAULT_HISTORY_CAPACITY
}

impl Default for HubProfile {
    fn default() -> Self {
        Self::duplo_train()
    }
}

impl HubProfile {
    /// Duplo train base with direct light writes and hub-action sounds.
    pub fn duplo_train() -> Self {
        Self {
            motor_port: default_motor_port(),
            light_port: default_light_port(),
            light: LightLayout::default(),
            sound: SoundLayout::default(),
            sound_range: default_sound_range(),
            color_range: default_color_range(),
            activation: Activation::default(),
            history_capacity: default_history_capacity(),
        }
    }

    /// Duplo train base driven through event-style output commands on the
    /// speaker port.
    pub fn duplo_train_events() -> Self {
        Self {
            light_port: PortId(0x34),
            light: LightLayout::PortEvent {
                port: 0x34,
                event: 4,
            },
            sound: SoundLayout::PortEvent {
                port: 0x34,
                event: 6,
            },
            sound_range: IdRange::new(0, 6),
            color_range: IdRange::new(0, 23),
            ..Self::duplo_train()
        }
    }

    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "duplo-train" => Some(Self::duplo_train()),
            "duplo-train-events" => Some(Self::duplo_train_events()),
            _ => None,
        }
    }

    /// Command encoding derived from this profile.
    pub fn layout(&self) -> CommandLayout {
        CommandLayout {
            light: self.light,
            sound: self.sound,
            sound_range: self.sound_range,
            color_range: self.color_range,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.sound_range.is_ordered() {
            return Err(Error::InvalidConfig(format!(
                "hub.sound_range min {} exceeds max {}",
                self.sound_range.min, self.sound_range.max
            )));
        }
        if !self.color_range.is_ordered() {
            return Err(Error::InvalidConfig(format!(
                "hub.color_range min {} exceeds max {}",
                self.color_range.min, self.color_range.max
            )));
        }
        if self.history_capacity == 0 {
            return Err(Error::InvalidConfig("hub.history_capacity must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        for name in PRESETS {
            let profile = HubProfile::preset(name).unwrap();
            assert!(profile.validate().is_ok());
        }
        assert!(HubProfile::preset("steam-locomotive").is_none());

        let events = HubProfile::duplo_train_events();
        assert_eq!(events.motor_port, PortId(0x32));
        assert_eq!(events.layout().color_range, IdRange::new(0, 23));
    }

    #[test]
    fn test_validate_ranges() {
        let mut profile = HubProfile::default();
        profile.sound_range = IdRange::new(5, 1);
        assert!(profile.validate().is_err());
    }
}
