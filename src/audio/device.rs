//! Capture device selection and sample rate negotiation
//!
//! Device choice is driven by an ordered list of name rules, and the rate is
//! found by probing candidate rates against the chosen device. Both run against
//! the [`CaptureBackend`] trait so they can be exercised without hardware.

use serde::{Deserialize, Serialize};

use crate::error::AudioError;

/// Input device as reported by a capture backend
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    pub index: usize,
    pub name: String,
    pub max_input_channels: u16,
    pub default_sample_rate: u32,
    pub is_default: bool,
}

/// Parameters of a capture stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParams {
    pub channels: u16,
    pub sample_rate: u32,
    pub chunk_size: usize,
}

/// A device name rule: devices whose name contains `name_contains`
/// (case-insensitive) get `score`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRule {
    pub name_contains: String,
    pub score: i32,
}

impl DeviceRule {
    pub fn new(name_contains: impl Into<String>, score: i32) -> Self {
        Self {
            name_contains: name_contains.into(),
            score,
        }
    }

    pub fn matches(&self, device_name: &str) -> bool {
        device_name
            .to_lowercase()
            .contains(&self.name_contains.to_lowercase())
    }
}

/// Device and rate preferences
#[derive(Debug, Clone, PartialEq)]
pub struct DevicePolicy {
    /// Highest priority first; the first matching rule decides the score
    pub rules: Vec<DeviceRule>,
    /// Added to the system default device
    pub default_bonus: i32,
    /// Rates tried after the target rate, in order
    pub fallback_rates: Vec<u32>,
}

impl Default for DevicePolicy {
    fn default() -> Self {
        Self {
            rules: default_device_rules(),
            default_bonus: 10,
            fallback_rates: vec![44100, 48000, 22050, 32000, 8000],
        }
    }
}

/// Virtual audio servers first, then vendor and device class keywords
pub fn default_device_rules() -> Vec<DeviceRule> {
    vec![
        DeviceRule::new("pipewire", 100),
        DeviceRule::new("pulse", 90),
        DeviceRule::new("Razer Seiren", 80),
        DeviceRule::new("USB Audio", 70),
        DeviceRule::new("Microphone", 60),
        DeviceRule::new("Line Input", 50),
    ]
}

impl DevicePolicy {
    pub fn score(&self, device: &DeviceInfo) -> i32 {
        let base = self
            .rules
            .iter()
            .find(|rule| rule.matches(&device.name))
            .map(|rule| rule.score)
            .unwrap_or(0);
        if device.is_default {
            base + self.default_bonus
        } else {
            base
        }
    }

    /// Highest scoring input device, if any scores above zero
    ///
    /// Ties keep the earlier device.
    pub fn select<'a>(&self, devices: &'a [DeviceInfo]) -> Option<&'a DeviceInfo> {
        let mut best: Option<(&DeviceInfo, i32)> = None;
        for device in devices.iter().filter(|d| d.max_input_channels > 0) {
            let score = self.score(device);
            if score > best.map(|(_, s)| s).unwrap_or(0) {
                best = Some((device, score));
            }
        }
        best.map(|(device, _)| device)
    }

    /// Target rate first, then the fallback list, without duplicates
    pub fn candidate_rates(&self, target_rate: u32) -> Vec<u32> {
        let mut rates = vec![target_rate];
        for &rate in &self.fallback_rates {
            if !rates.contains(&rate) {
                rates.push(rate);
            }
        }
        rates
    }
}

/// Capture device collaborator
pub trait CaptureBackend {
    type Stream: CaptureStream;

    /// Input-capable devices
    fn input_devices(&self) -> Result<Vec<DeviceInfo>, AudioError>;

    /// Whether a stream with `params` can be opened on the device (not started)
    fn probe(&self, device: &DeviceInfo, params: &StreamParams) -> bool;

    /// Channel counts the device offers at `sample_rate`, most preferred first
    fn channel_options(&self, _device: &DeviceInfo, _sample_rate: u32) -> Vec<u16> {
        Vec::new()
    }

    /// Open and start a capture stream
    fn open(&self, device: &DeviceInfo, params: &StreamParams) -> Result<Self::Stream, AudioError>;
}

/// An open capture stream
pub trait CaptureStream {
    /// Exactly one chunk of mono samples at the stream rate, or `None` if no
    /// chunk became available within the backend's read timeout
    fn read_chunk(&mut self) -> Result<Option<Vec<f32>>, AudioError>;

    /// Release the stream. Safe to call more than once.
    fn close(&mut self);
}

/// Outcome of device and rate negotiation
#[derive(Debug, Clone, PartialEq)]
pub struct NegotiatedDevice {
    pub device: DeviceInfo,
    pub params: StreamParams,
}

/// Pick a device and the rate it will actually capture at
pub fn negotiate<B: CaptureBackend>(
    backend: &B,
    policy: &DevicePolicy,
    target_rate: u32,
    channels: u16,
    chunk_size: usize,
) -> Result<NegotiatedDevice, AudioError> {
    let devices = backend.input_devices()?;
    for device in &devices {
        tracing::debug!(
            "Input device {}: {} (channels: {}, default rate: {}{}) score {}",
            device.index,
            device.name,
            device.max_input_channels,
            device.default_sample_rate,
            if device.is_default { ", system default" } else { "" },
            policy.score(device)
        );
    }

    let default_device = devices.iter().find(|d| d.is_default);
    let chosen = policy
        .select(&devices)
        .or(default_device)
        .ok_or_else(|| AudioError::Configuration("no input device available".to_string()))?;
    tracing::info!("Selected input device: {} (index {})", chosen.name, chosen.index);

    let probe_device = |device: &DeviceInfo| {
        find_stream_params(backend, device, policy, target_rate, channels, chunk_size).map(
            |params| NegotiatedDevice {
                device: device.clone(),
                params,
            },
        )
    };

    if let Some(negotiated) = probe_device(chosen) {
        return Ok(negotiated);
    }

    match default_device {
        Some(fallback) if fallback.index != chosen.index => {
            tracing::warn!(
                "No usable sample rate on {}, trying system default {}",
                chosen.name,
                fallback.name
            );
            probe_device(fallback).ok_or_else(|| {
                AudioError::Configuration("no usable sample rate on any input device".to_string())
            })
        }
        _ => Err(AudioError::Configuration(format!(
            "no usable sample rate on {}",
            chosen.name
        ))),
    }
}

fn find_stream_params<B: CaptureBackend>(
    backend: &B,
    device: &DeviceInfo,
    policy: &DevicePolicy,
    target_rate: u32,
    channels: u16,
    chunk_size: usize,
) -> Option<StreamParams> {
    let try_rate = |sample_rate: u32| {
        let mut counts = vec![channels];
        for count in backend.channel_options(device, sample_rate) {
            if count > 0 && !counts.contains(&count) {
                counts.push(count);
            }
        }
        counts.into_iter().find_map(|channels| {
            let params = StreamParams {
                channels,
                sample_rate,
                chunk_size,
            };
            backend.probe(device, &params).then_some(params)
        })
    };

    for rate in policy.candidate_rates(target_rate) {
        if let Some(params) = try_rate(rate) {
            tracing::info!(
                "{} supports {}Hz with {} channel(s)",
                device.name,
                rate,
                params.channels
            );
            return Some(params);
        }
    }

    let default_rate = device.default_sample_rate;
    if default_rate > 0 {
        if let Some(params) = try_rate(default_rate) {
            tracing::info!("{} falls back to its default rate {}Hz", device.name, default_rate);
            return Some(params);
        }
    }

    None
}

/// Flag the first device named `default_name` as the system default
///
/// Hosts may list several devices under one name; only one of them is the
/// default.
pub fn mark_default(devices: &mut [DeviceInfo], default_name: Option<&str>) {
    for device in devices.iter_mut() {
        device.is_default = false;
    }
    let Some(default_name) = default_name else {
        return;
    };
    if let Some(device) = devices.iter_mut().find(|d| d.name == default_name) {
        device.is_default = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Backend whose devices accept a fixed set of rates and channel counts
    pub struct FakeBackend {
        pub devices: Vec<DeviceInfo>,
        pub rates: HashMap<usize, Vec<u32>>,
        pub channels: Vec<u16>,
    }

    impl FakeBackend {
        fn new(devices: Vec<DeviceInfo>, rates: HashMap<usize, Vec<u32>>) -> Self {
            Self {
                devices,
                rates,
                channels: vec![1, 2],
            }
        }
    }

    pub struct NullStream;

    impl CaptureStream for NullStream {
        fn read_chunk(&mut self) -> Result<Option<Vec<f32>>, AudioError> {
            Ok(None)
        }
        fn close(&mut self) {}
    }

    impl CaptureBackend for FakeBackend {
        type Stream = NullStream;

        fn input_devices(&self) -> Result<Vec<DeviceInfo>, AudioError> {
            Ok(self.devices.clone())
        }

        fn probe(&self, device: &DeviceInfo, params: &StreamParams) -> bool {
            self.channels.contains(&params.channels)
                && self
                    .rates
                    .get(&device.index)
                    .map(|rates| rates.contains(&params.sample_rate))
                    .unwrap_or(false)
        }

        fn channel_options(&self, _: &DeviceInfo, _: u32) -> Vec<u16> {
            self.channels.clone()
        }

        fn open(&self, _: &DeviceInfo, _: &StreamParams) -> Result<NullStream, AudioError> {
            Ok(NullStream)
        }
    }

    pub fn device(index: usize, name: &str, is_default: bool) -> DeviceInfo {
        DeviceInfo {
            index,
            name: name.to_string(),
            max_input_channels: 2,
            default_sample_rate: 48000,
            is_default,
        }
    }

    #[test]
    fn keyword_beats_plain_default() {
        let devices = vec![
            device(0, "HDA Intel PCH: ALC", true),
            device(1, "pipewire", false),
        ];
        let chosen = DevicePolicy::default().select(&devices).unwrap();
        assert_eq!(chosen.index, 1);
    }

    #[test]
    fn default_with_higher_keyword_wins() {
        let devices = vec![
            device(0, "USB Audio Device", false),
            device(1, "PulseAudio Sound Server", true),
        ];
        let chosen = DevicePolicy::default().select(&devices).unwrap();
        assert_eq!(chosen.index, 1);
    }

    #[test]
    fn first_matching_rule_decides_score() {
        let policy = DevicePolicy::default();
        // "pulse" is listed before "Microphone"
        assert_eq!(policy.score(&device(0, "Pulse Microphone", false)), 90);
        assert_eq!(policy.score(&device(0, "Webcam", true)), 10);
    }

    #[test]
    fn output_only_devices_are_ignored() {
        let mut speaker = device(0, "pipewire output", false);
        speaker.max_input_channels = 0;
        assert!(DevicePolicy::default().select(&[speaker]).is_none());
    }

    #[test]
    fn target_rate_is_probed_first() {
        let backend = FakeBackend::new(
            vec![device(0, "pipewire", true)],
            HashMap::from([(0, vec![16000, 48000])]),
        );
        let negotiated = negotiate(&backend, &DevicePolicy::default(), 16000, 1, 1024).unwrap();
        assert_eq!(negotiated.params.sample_rate, 16000);
        assert_eq!(negotiated.params.chunk_size, 1024);
    }

    #[test]
    fn fallback_rates_follow_priority_order() {
        let backend = FakeBackend::new(
            vec![device(0, "pipewire", true)],
            HashMap::from([(0, vec![48000, 44100])]),
        );
        let negotiated = negotiate(&backend, &DevicePolicy::default(), 16000, 1, 1024).unwrap();
        assert_eq!(negotiated.params.sample_rate, 44100);
    }

    #[test]
    fn device_default_rate_is_last_resort() {
        let mut dev = device(0, "pipewire", true);
        dev.default_sample_rate = 96000;
        let backend = FakeBackend::new(
            vec![dev],
            HashMap::from([(0, vec![96000])]),
        );
        let negotiated = negotiate(&backend, &DevicePolicy::default(), 16000, 1, 1024).unwrap();
        assert_eq!(negotiated.params.sample_rate, 96000);
    }

    #[test]
    fn falls_back_to_system_default_once() {
        let backend = FakeBackend::new(
            vec![device(0, "Built-in", true), device(1, "pipewire", false)],
            HashMap::from([(0, vec![48000])]),
        );
        let negotiated = negotiate(&backend, &DevicePolicy::default(), 16000, 1, 1024).unwrap();
        assert_eq!(negotiated.device.index, 0);
        assert_eq!(negotiated.params.sample_rate, 48000);
    }

    #[test]
    fn no_usable_rate_is_a_configuration_error() {
        let backend = FakeBackend::new(
            vec![device(0, "Built-in", true), device(1, "pipewire", false)],
            HashMap::new(),
        );
        let err = negotiate(&backend, &DevicePolicy::default(), 16000, 1, 1024).unwrap_err();
        assert!(matches!(err, AudioError::Configuration(_)));

        let empty = FakeBackend::new(Vec::new(), HashMap::new());
        assert!(matches!(
            negotiate(&empty, &DevicePolicy::default(), 16000, 1, 1024),
            Err(AudioError::Configuration(_))
        ));
    }

    #[test]
    fn stereo_only_device_is_opened_with_two_channels() {
        let mut backend = FakeBackend::new(
            vec![device(0, "hw:0,0 USB Audio", true)],
            HashMap::from([(0, vec![48000])]),
        );
        backend.channels = vec![2];
        let negotiated = negotiate(&backend, &DevicePolicy::default(), 16000, 1, 1024).unwrap();
        assert_eq!(negotiated.params.channels, 2);
        assert_eq!(negotiated.params.sample_rate, 48000);
    }

    #[test]
    fn requested_channel_count_is_preferred() {
        let backend = FakeBackend::new(
            vec![device(0, "pipewire", true)],
            HashMap::from([(0, vec![16000])]),
        );
        let negotiated = negotiate(&backend, &DevicePolicy::default(), 16000, 1, 1024).unwrap();
        assert_eq!(negotiated.params.channels, 1);
    }

    #[test]
    fn only_first_twin_is_marked_default() {
        let mut devices = vec![
            device(0, "default", false),
            device(1, "sysdefault", false),
            device(2, "default", false),
        ];
        mark_default(&mut devices, Some("default"));
        let flags: Vec<bool> = devices.iter().map(|d| d.is_default).collect();
        assert_eq!(flags, vec![true, false, false]);

        let policy = DevicePolicy::default();
        assert_eq!(policy.score(&devices[0]), policy.default_bonus);
        assert_eq!(policy.score(&devices[2]), 0);

        mark_default(&mut devices, None);
        assert!(devices.iter().all(|d| !d.is_default));
    }
}
