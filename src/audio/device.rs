//! Device capability layer: enumeration, access probing, hot-plug watching.
//!
//! Device identifiers are cpal device names — opaque and stable only within
//! one OS session. Labels can be empty until the platform grants audio
//! permission, so callers should run the warm-up probe before trusting
//! enumeration results.

use std::collections::BTreeSet;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::cpal::{is_loopback_name, map_device_error};
use crate::error::CaptureError;

#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    /// Opaque identifier, valid for this OS session only.
    pub id: String,
    /// Human-readable label; may be empty before permission is granted.
    pub label: String,
    pub is_default: bool,
    /// Whether this input is a loopback/monitor tap of output audio.
    pub is_loopback: bool,
}

/// Enumerate microphone-style input devices.
///
/// An empty result means "no devices found" — distinct from a permission
/// failure, which surfaces as `PermissionDenied` from the enumeration call.
pub fn list_input_devices() -> Result<Vec<DeviceInfo>, CaptureError> {
    let host = cpal::default_host();
    let default_name = host
        .default_input_device()
        .and_then(|d| d.name().ok())
        .unwrap_or_default();

    let mut out = Vec::new();
    let devices = host.input_devices().map_err(|e| map_device_error(&e))?;
    for device in devices {
        let name = device.name().unwrap_or_default();
        if is_loopback_name(&name) {
            continue;
        }
        out.push(DeviceInfo {
            id: name.clone(),
            label: name.clone(),
            is_default: !name.is_empty() && name == default_name,
            is_loopback: false,
        });
    }

    Ok(out)
}

/// Enumerate sources capable of yielding system/output audio — loopback and
/// monitor inputs. Often empty; system capture is best-effort by nature.
pub fn list_output_capable_sources() -> Result<Vec<DeviceInfo>, CaptureError> {
    let host = cpal::default_host();

    let mut out = Vec::new();
    let devices = host.input_devices().map_err(|e| map_device_error(&e))?;
    for device in devices {
        let name = device.name().unwrap_or_default();
        if !is_loopback_name(&name) {
            continue;
        }
        out.push(DeviceInfo {
            id: name.clone(),
            label: name,
            is_default: false,
            is_loopback: true,
        });
    }

    Ok(out)
}

/// Permission warm-up: briefly open a stream on the device, then drop it.
///
/// Distinguishes `PermissionDenied` from `DeviceUnavailable`, and primes the
/// platform permission prompt so later enumeration returns real labels.
pub fn probe_access(device_id: &str) -> Result<(), CaptureError> {
    let host = cpal::default_host();
    let devices = host.input_devices().map_err(|e| map_device_error(&e))?;

    let device = devices
        .into_iter()
        .find(|d| d.name().map(|n| n == device_id).unwrap_or(false))
        .ok_or_else(|| {
            CaptureError::DeviceUnavailable(format!("input device not found: {}", device_id))
        })?;

    let config = device
        .default_input_config()
        .map_err(|e| map_device_error(&e))?;

    let stream = device
        .build_input_stream_raw(
            &config.config(),
            config.sample_format(),
            |_data, _info| {},
            |e| warn!("Probe stream error: {}", e),
            None,
        )
        .map_err(|e| map_device_error(&e))?;

    stream.play().map_err(|e| CaptureError::Backend(e.to_string()))?;
    drop(stream);

    debug!("Access probe succeeded for {}", device_id);
    Ok(())
}

/// Watches the device set and bumps a generation counter when it changes.
///
/// cpal has no portable hot-plug callback, so this polls. Subscribers
/// re-enumerate when the generation moves.
pub struct DeviceWatcher {
    generation: watch::Sender<u64>,
    task: Option<JoinHandle<()>>,
}

impl DeviceWatcher {
    pub fn spawn(poll_interval: Duration) -> Self {
        let (tx, _rx) = watch::channel(0u64);
        let generation = tx.clone();

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            let mut known: Option<BTreeSet<String>> = None;
            loop {
                interval.tick().await;

                let names = tokio::task::spawn_blocking(current_device_set).await;
                let Ok(names) = names else { continue };

                match &known {
                    Some(prev) if *prev == names => {}
                    Some(_) => {
                        debug!("Audio device set changed ({} devices)", names.len());
                        generation.send_modify(|g| *g += 1);
                        known = Some(names);
                    }
                    None => known = Some(names),
                }
            }
        });

        Self {
            generation: tx,
            task: Some(task),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }
}

impl Drop for DeviceWatcher {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

fn current_device_set() -> BTreeSet<String> {
    let host = cpal::default_host();
    match host.input_devices() {
        Ok(devices) => devices.filter_map(|d| d.name().ok()).collect(),
        Err(e) => {
            warn!("Device enumeration failed during poll: {}", e);
            BTreeSet::new()
        }
    }
}
