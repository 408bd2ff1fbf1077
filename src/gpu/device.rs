// gpu/device.rs — wgpu device context shared by every test case.
//
// Responsibilities:
//   - Enumerate adapters on the configured backends and pick one.
//   - Request a device + queue with the small limits a single-invocation
//     kernel needs.
//   - Watch for device loss so a dispatch against a dead device is reported
//     as `DeviceError::Lost`, not as an empty readback.
//   - Explicit teardown via `GpuDevice::shutdown`.
//
// ADAPTER SELECTION:
// wgpu's default `request_adapter` uses power preference heuristics that
// may grab llvmpipe/softpipe on machines where a real GPU is also present.
// We enumerate explicitly and rank:
//
//   Tier 1  DiscreteGpu / IntegratedGpu   real hardware        <- ideal
//   Tier 2  VirtualGpu / Other            VM pass-through, dzn <- acceptable
//   Tier 3  Cpu                           llvmpipe, WARP       <- only if allowed
//
// Within tier 1 the power preference picks discrete (HighPerformance) or
// integrated (LowPower) first. The chosen adapter is logged at startup.
//
// LIFETIME:
// There is no global device. Tests create one `GpuDevice` (usually once per
// test binary) and pass `&GpuDevice` into every run. `shutdown` destroys the
// device explicitly; dropping without it is also fine.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{error, info, warn};

use crate::config::HarnessConfig;
use crate::error::{DeviceError, HarnessError};

/// Cached adapter information for logging and capability checks.
#[derive(Debug, Clone)]
pub struct AdapterInfo {
    pub name: String,
    pub vendor: u32,
    pub device: u32,
    pub device_type: wgpu::DeviceType,
    pub backend: wgpu::Backend,
    pub driver: String,
}

impl From<wgpu::AdapterInfo> for AdapterInfo {
    fn from(info: wgpu::AdapterInfo) -> Self {
        AdapterInfo {
            name: info.name,
            vendor: info.vendor,
            device: info.device,
            device_type: info.device_type,
            backend: info.backend,
            driver: info.driver,
        }
    }
}

impl AdapterInfo {
    /// True for CPU rasterizers (llvmpipe, WARP, SwiftShader).
    pub fn is_software(&self) -> bool {
        self.device_type == wgpu::DeviceType::Cpu
    }
}

impl fmt::Display for AdapterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({:?}, {:?})",
            self.name, self.backend, self.device_type
        )
    }
}

/// The GPU context: device, queue and the adapter it came from.
///
/// # Field drop order
/// Rust drops struct fields in declaration order (top → bottom).
/// `_instance` is declared last so the `wgpu::Instance` outlives `device`
/// and `queue`. Some Vulkan layers (dzn on WSL2) crash when the instance is
/// destroyed while device-level objects still reference it.
pub struct GpuDevice {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter_info: AdapterInfo,
    pub config: HarnessConfig,
    /// Set by the device-lost callback.
    lost: Arc<Mutex<Option<String>>>,
    /// Errors that escaped every error scope, oldest first.
    uncaptured: Arc<Mutex<Vec<String>>>,
    /// Error scopes are a per-device stack; push/pop pairs from concurrent
    /// test threads must not interleave.
    scope_lock: Mutex<()>,
    _instance: wgpu::Instance,
}

impl GpuDevice {
    /// Create a device from `HarnessConfig::from_env()`.
    ///
    /// # Errors
    /// Returns `Err` if the environment holds a malformed setting, no
    /// suitable adapter is found, or the device request fails.
    pub fn new() -> Result<Self, HarnessError> {
        let config = HarnessConfig::from_env()?;
        Ok(Self::with_config(&config)?)
    }

    /// Create a device with an explicit configuration.
    pub fn with_config(config: &HarnessConfig) -> Result<Self, DeviceError> {
        pollster::block_on(Self::init_async(config.clone()))
    }

    async fn init_async(config: HarnessConfig) -> Result<Self, DeviceError> {
        // Non-compliant adapters (dzn on WSL2) are enumerated too; we only
        // run compute kernels and never depend on rendering conformance.
        let mut flags = wgpu::InstanceFlags::ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER;
        if config.validation {
            flags |= wgpu::InstanceFlags::VALIDATION;
        }

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: config.backends,
            flags,
            ..Default::default()
        });

        let adapters = instance.enumerate_adapters(config.backends);
        let infos: Vec<wgpu::AdapterInfo> = adapters.iter().map(|a| a.get_info()).collect();
        for info in &infos {
            info!(
                adapter = %info.name,
                backend = ?info.backend,
                device_type = ?info.device_type,
                "found adapter"
            );
        }

        let index = select_adapter(&infos, &config)?;
        let adapter = adapters
            .into_iter()
            .nth(index)
            .ok_or_else(|| no_adapter(&config, false))?;
        let adapter_info = AdapterInfo::from(adapter.get_info());
        if adapter_info.is_software() {
            warn!(adapter = %adapter_info, "using a software adapter");
        }

        // A 1×1×1 kernel writing a few hundred bytes fits in the downlevel
        // limits, which every compute-capable backend supports.
        let (device, queue): (wgpu::Device, wgpu::Queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("wgsl-harness"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::downlevel_defaults(),
                    memory_hints: wgpu::MemoryHints::MemoryUsage,
                },
                None,
            )
            .await?;

        let lost: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        let lost_slot = Arc::clone(&lost);
        device.set_device_lost_callback(move |reason, message| {
            if let Ok(mut slot) = lost_slot.lock() {
                *slot = Some(format!("{reason:?}: {message}"));
            }
        });
        // Anything that escapes an error scope is recorded and surfaces as
        // `DeviceError::Uncaptured` at the next wait.
        let uncaptured: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let uncaptured_slot = Arc::clone(&uncaptured);
        device.on_uncaptured_error(Box::new(move |e: wgpu::Error| {
            error!("uncaptured wgpu error: {e}");
            if let Ok(mut errors) = uncaptured_slot.lock() {
                errors.push(e.to_string());
            }
        }));

        info!(adapter = %adapter_info, "GPU device ready");

        Ok(GpuDevice {
            device,
            queue,
            adapter_info,
            config,
            lost,
            uncaptured,
            scope_lock: Mutex::new(()),
            _instance: instance,
        })
    }

    /// The reason the device was lost, if it has been.
    pub fn lost_reason(&self) -> Option<String> {
        self.lost.lock().ok().and_then(|slot| slot.clone())
    }

    /// `Err(DeviceError::Lost)` once the device-lost callback has fired,
    /// otherwise `Err(DeviceError::Uncaptured)` if errors escaped every
    /// error scope since the last check. Reported uncaptured errors are
    /// cleared.
    pub fn check_alive(&self) -> Result<(), DeviceError> {
        if let Some(reason) = self.lost_reason() {
            return Err(DeviceError::Lost(reason));
        }
        drain_uncaptured(&self.uncaptured)
    }

    /// Limits granted by the device.
    pub fn limits(&self) -> wgpu::Limits {
        self.device.limits()
    }

    /// Held for the duration of a push/pop error-scope pair.
    pub(crate) fn lock_error_scopes(&self) -> MutexGuard<'_, ()> {
        // The guarded data is `()`, so a poisoned lock is still usable.
        self.scope_lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run `f` inside out-of-memory and validation error scopes.
    ///
    /// The scope lock is held throughout, so no other thread's device calls
    /// land in these scopes.
    pub(crate) fn with_error_scopes<T>(
        &self,
        f: impl FnOnce(&wgpu::Device) -> T,
    ) -> Result<T, DeviceError> {
        let _scopes = self.lock_error_scopes();
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let value = f(&self.device);

        let validation = pollster::block_on(self.device.pop_error_scope());
        let oom = pollster::block_on(self.device.pop_error_scope());
        if let Some(err) = oom {
            return Err(DeviceError::OutOfMemory(err.to_string()));
        }
        if let Some(err) = validation {
            return Err(DeviceError::Validation(err.to_string()));
        }
        Ok(value)
    }

    /// Block until `index` has finished executing, then confirm the device
    /// survived it.
    pub(crate) fn wait_for(&self, index: wgpu::SubmissionIndex) -> Result<(), DeviceError> {
        let _ = self.device.poll(wgpu::Maintain::wait_for(index));
        self.check_alive()
    }

    /// Destroy the device. Outstanding buffers become invalid.
    pub fn shutdown(self) {
        info!(adapter = %self.adapter_info, "shutting down GPU device");
        self.device.destroy();
    }
}

impl fmt::Display for GpuDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GpuDevice {{ adapter: {} }}", self.adapter_info)
    }
}

/// Report and clear every recorded uncaptured error.
fn drain_uncaptured(errors: &Mutex<Vec<String>>) -> Result<(), DeviceError> {
    let mut errors = errors.lock().unwrap_or_else(|e| e.into_inner());
    if errors.is_empty() {
        return Ok(());
    }
    let message = errors.drain(..).collect::<Vec<_>>().join("\n");
    Err(DeviceError::Uncaptured(message))
}

// ============================================================
// Adapter ranking
// ============================================================

/// Rank of an adapter type; lower is better, `None` is never chosen.
fn adapter_tier(
    device_type: wgpu::DeviceType,
    power: wgpu::PowerPreference,
    allow_software: bool,
) -> Option<u8> {
    use wgpu::DeviceType::*;
    let preferred_hw = match power {
        wgpu::PowerPreference::LowPower => IntegratedGpu,
        _ => DiscreteGpu,
    };
    match device_type {
        t if t == preferred_hw => Some(0),
        DiscreteGpu | IntegratedGpu => Some(1),
        VirtualGpu | Other => Some(2),
        Cpu if allow_software => Some(3),
        Cpu => None,
    }
}

/// Index of the best adapter in `infos` under `config`.
///
/// Ties keep enumeration order.
pub(crate) fn select_adapter(
    infos: &[wgpu::AdapterInfo],
    config: &HarnessConfig,
) -> Result<usize, DeviceError> {
    let wanted = config.adapter_name.as_ref().map(|n| n.to_ascii_lowercase());
    let mut software_rejected = false;

    let best = infos
        .iter()
        .enumerate()
        .filter(|(_, info)| {
            wanted
                .as_ref()
                .map_or(true, |w| info.name.to_ascii_lowercase().contains(w))
        })
        .filter_map(|(i, info)| {
            let tier = adapter_tier(info.device_type, config.power_preference, config.allow_software);
            if tier.is_none() {
                software_rejected = true;
            }
            tier.map(|t| (t, i))
        })
        .min();

    match best {
        Some((_, i)) => Ok(i),
        None => Err(no_adapter(config, software_rejected)),
    }
}

fn no_adapter(config: &HarnessConfig, software_rejected: bool) -> DeviceError {
    DeviceError::NoSuitableAdapter {
        backends: format!("{:?}", config.backends),
        software_rejected,
    }
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn info(name: &str, device_type: wgpu::DeviceType) -> wgpu::AdapterInfo {
        wgpu::AdapterInfo {
            name: name.to_string(),
            vendor: 0,
            device: 0,
            device_type,
            driver: String::new(),
            driver_info: String::new(),
            backend: wgpu::Backend::Vulkan,
        }
    }

    #[test]
    fn test_prefers_discrete_for_high_performance() {
        let infos = [
            info("llvmpipe", wgpu::DeviceType::Cpu),
            info("Intel UHD", wgpu::DeviceType::IntegratedGpu),
            info("RTX 4070", wgpu::DeviceType::DiscreteGpu),
        ];
        let cfg = HarnessConfig::default();
        assert_eq!(select_adapter(&infos, &cfg).unwrap(), 2);
    }

    #[test]
    fn test_prefers_integrated_for_low_power() {
        let infos = [
            info("RTX 4070", wgpu::DeviceType::DiscreteGpu),
            info("Intel UHD", wgpu::DeviceType::IntegratedGpu),
        ];
        let cfg = HarnessConfig {
            power_preference: wgpu::PowerPreference::LowPower,
            ..HarnessConfig::default()
        };
        assert_eq!(select_adapter(&infos, &cfg).unwrap(), 1);
    }

    #[test]
    fn test_virtual_before_software() {
        let infos = [
            info("llvmpipe", wgpu::DeviceType::Cpu),
            info("Microsoft Direct3D12 (dzn)", wgpu::DeviceType::Other),
        ];
        assert_eq!(select_adapter(&infos, &HarnessConfig::default()).unwrap(), 1);
    }

    #[test]
    fn test_software_fallback_when_allowed() {
        let infos = [info("llvmpipe", wgpu::DeviceType::Cpu)];
        assert_eq!(select_adapter(&infos, &HarnessConfig::default()).unwrap(), 0);
    }

    #[test]
    fn test_software_rejected_when_disallowed() {
        let infos = [info("llvmpipe", wgpu::DeviceType::Cpu)];
        let cfg = HarnessConfig {
            allow_software: false,
            ..HarnessConfig::default()
        };
        let err = select_adapter(&infos, &cfg).unwrap_err();
        assert!(matches!(err, DeviceError::NoSuitableAdapter { software_rejected: true, .. }));
    }

    #[test]
    fn test_name_filter() {
        let infos = [
            info("RTX 4070", wgpu::DeviceType::DiscreteGpu),
            info("Intel UHD", wgpu::DeviceType::IntegratedGpu),
        ];
        let cfg = HarnessConfig {
            adapter_name: Some("intel".into()),
            ..HarnessConfig::default()
        };
        assert_eq!(select_adapter(&infos, &cfg).unwrap(), 1);

        let cfg = HarnessConfig {
            adapter_name: Some("radeon".into()),
            ..HarnessConfig::default()
        };
        assert!(matches!(
            select_adapter(&infos, &cfg).unwrap_err(),
            DeviceError::NoSuitableAdapter { software_rejected: false, .. }
        ));
    }

    #[test]
    fn test_no_adapters() {
        let err = select_adapter(&[], &HarnessConfig::default()).unwrap_err();
        assert!(matches!(err, DeviceError::NoSuitableAdapter { .. }));
    }

    #[test]
    fn test_adapter_info_display() {
        let a = AdapterInfo::from(info("RTX 4070", wgpu::DeviceType::DiscreteGpu));
        assert_eq!(a.to_string(), "RTX 4070 (Vulkan, DiscreteGpu)");
        assert!(!a.is_software());
    }

    #[test]
    fn test_uncaptured_errors_reported_once() {
        let errors = Mutex::new(Vec::new());
        assert!(drain_uncaptured(&errors).is_ok());

        errors.lock().unwrap().push("Buffer size 68719476720 exceeds the limit".to_string());
        errors.lock().unwrap().push("Bind group is invalid".to_string());
        match drain_uncaptured(&errors) {
            Err(DeviceError::Uncaptured(msg)) => {
                assert!(msg.contains("exceeds the limit"), "{msg}");
                assert!(msg.contains("Bind group is invalid"), "{msg}");
            }
            other => panic!("expected Uncaptured, got {other:?}"),
        }
        assert!(drain_uncaptured(&errors).is_ok());
    }

    // ---- GPU integration tests -------------------------------------------
    //
    // Need a real adapter; run with:
    //   cargo test -- --include-ignored

    #[test]
    #[ignore = "requires a GPU adapter"]
    fn test_gpu_device_init_and_shutdown() {
        let gpu = GpuDevice::new().expect("should initialise a GPU device");
        println!("{gpu}");
        assert!(gpu.check_alive().is_ok());
        assert!(gpu.limits().max_storage_buffer_binding_size > 0);
        gpu.shutdown();
    }
}
