//! Input devices and the hardware stream seam.
//!
//! The capture scheduler only talks to [`AudioBackend`] and [`InputStream`].
//! [`CpalBackend`] drives real hardware; [`MockBackend`] replays a script so
//! the whole pipeline can run in CI without a microphone.

mod device;
mod mock;

pub use device::CpalBackend;
pub use mock::{MockBackend, MockRead, MockSignal};

use cpal::traits::{DeviceTrait, HostTrait};

use crate::{CancelSignal, HardwareError, MeterError};

/// An input device as seen by the host audio API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// Position in the host's input device list.
    pub index: usize,
    /// Device name reported by the host.
    pub name: String,
    /// Largest channel count any supported input config offers.
    pub max_input_channels: u16,
    /// Sample rate of the device's default input config.
    pub default_sample_rate: u32,
    /// Whether this is the system default input.
    pub is_default: bool,
}

/// Parameters for opening an input stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParams {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Samples per [`InputStream::read`].
    pub block_size: usize,
    /// Hardware channels to open; they are downmixed to mono.
    pub channels: u16,
}

/// One hardware read.
#[derive(Debug, Clone, Default)]
pub struct CapturedBlock {
    /// Mono samples in `[-1.0, 1.0]`.
    pub samples: Vec<f32>,
    /// The device dropped input since the previous read.
    pub overflowed: bool,
}

/// Opens input streams on some audio host.
///
/// The backend is moved into the capture thread, so it must be `Send`. The
/// streams it returns never leave that thread.
pub trait AudioBackend: Send + 'static {
    /// Opens and starts a stream on `device`.
    fn open(
        &self,
        device: &DeviceDescriptor,
        params: &StreamParams,
    ) -> Result<Box<dyn InputStream>, HardwareError>;
}

/// A running input stream. Dropping it releases the device.
pub trait InputStream {
    /// Blocks until `block_size` mono samples are available.
    ///
    /// Returns early with a short block once `cancel` is raised.
    fn read(
        &mut self,
        block_size: usize,
        cancel: &CancelSignal,
    ) -> Result<CapturedBlock, HardwareError>;
}

/// Lists the host's input devices.
///
/// Returns an empty list if the host cannot enumerate devices.
pub fn list_input_devices() -> Vec<DeviceDescriptor> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());
    let devices = match host.input_devices() {
        Ok(devices) => devices,
        Err(e) => {
            tracing::warn!("Failed to enumerate input devices: {}", e);
            return Vec::new();
        }
    };

    devices
        .enumerate()
        .map(|(index, device)| {
            let name = device.name().unwrap_or_else(|_| "unknown".to_string());
            let max_input_channels = device
                .supported_input_configs()
                .map(|configs| configs.map(|c| c.channels()).max().unwrap_or(0))
                .unwrap_or(0);
            let default_sample_rate = device
                .default_input_config()
                .map(|c| c.sample_rate().0)
                .unwrap_or(0);
            DeviceDescriptor {
                index,
                is_default: default_name.as_deref() == Some(name.as_str()),
                name,
                max_input_channels,
                default_sample_rate,
            }
        })
        .collect()
}

/// Index of the system default input device, if any.
pub fn default_input_index() -> Option<usize> {
    list_input_devices()
        .into_iter()
        .find(|d| d.is_default)
        .map(|d| d.index)
}

/// Resolves a device index (or the default) against the host.
///
/// # Errors
///
/// Returns `DeviceNotFound` for an unknown index and `NoDefaultDevice` when
/// no index is given and the host has no default input.
pub fn select_input_device(index: Option<usize>) -> Result<DeviceDescriptor, MeterError> {
    select_from(list_input_devices(), index)
}

/// First input device whose name contains `fragment`, ignoring case.
pub fn find_input_device(fragment: &str) -> Option<DeviceDescriptor> {
    find_in(list_input_devices(), fragment)
}

fn select_from(
    devices: Vec<DeviceDescriptor>,
    index: Option<usize>,
) -> Result<DeviceDescriptor, MeterError> {
    match index {
        Some(index) => devices
            .into_iter()
            .find(|d| d.index == index)
            .ok_or(MeterError::DeviceNotFound { index }),
        None => devices
            .into_iter()
            .find(|d| d.is_default)
            .ok_or(MeterError::NoDefaultDevice),
    }
}

fn find_in(devices: Vec<DeviceDescriptor>, fragment: &str) -> Option<DeviceDescriptor> {
    let needle = fragment.to_lowercase();
    devices
        .into_iter()
        .find(|d| d.name.to_lowercase().contains(&needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn devices() -> Vec<DeviceDescriptor> {
        vec![
            DeviceDescriptor {
                index: 0,
                name: "Built-in Microphone".to_string(),
                max_input_channels: 2,
                default_sample_rate: 44100,
                is_default: true,
            },
            DeviceDescriptor {
                index: 1,
                name: "Umik-1  Gain: 18dB".to_string(),
                max_input_channels: 2,
                default_sample_rate: 48000,
                is_default: false,
            },
        ]
    }

    #[test]
    fn test_select_by_index() {
        let device = select_from(devices(), Some(1)).unwrap();
        assert_eq!(device.name, "Umik-1  Gain: 18dB");
    }

    #[test]
    fn test_select_default() {
        let device = select_from(devices(), None).unwrap();
        assert!(device.is_default);
        assert_eq!(device.index, 0);
    }

    #[test]
    fn test_select_unknown_index() {
        let err = select_from(devices(), Some(9)).unwrap_err();
        assert!(matches!(err, MeterError::DeviceNotFound { index: 9 }));
    }

    #[test]
    fn test_select_without_default() {
        let mut list = devices();
        list[0].is_default = false;
        assert!(matches!(
            select_from(list, None),
            Err(MeterError::NoDefaultDevice)
        ));
    }

    #[test]
    fn test_find_by_name_ignores_case() {
        assert_eq!(find_in(devices(), "UMIK").map(|d| d.index), Some(1));
        assert!(find_in(devices(), "scarlett").is_none());
    }

    #[test]
    fn test_list_devices_doesnt_panic() {
        // This may return an empty list in CI, but shouldn't panic
        let _ = list_input_devices();
    }

    #[test]
    fn test_default_index_doesnt_panic() {
        let _ = default_input_index();
    }
}
