//! Vendor source adapters

mod netatmo;
mod tts;

pub use netatmo::{NetatmoAccount, NetatmoSource, select_device};
pub use tts::{TtsApplication, TtsSource, decode_uplink, device_eui, uplink_topic};
