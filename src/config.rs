// config.rs — harness configuration.
//
// Defaults work on any machine with a GPU (or a software adapter). Every
// field can be overridden from the environment so CI and developers can pin
// a backend or adapter without touching test code:
//
//   WGSL_HARNESS_BACKENDS        comma list: vulkan,metal,dx12,gl,primary,all
//   WGSL_HARNESS_ADAPTER         case-insensitive substring of the adapter name
//   WGSL_HARNESS_ALLOW_SOFTWARE  1/0, true/false, yes/no
//   WGSL_HARNESS_POWER           low | high
//   WGSL_HARNESS_EPSILON         default absolute tolerance, > 0
//
// A malformed value is an error, never silently replaced by the default.

use crate::compare::Tolerance;
use crate::error::ConfigError;

pub const ENV_BACKENDS: &str = "WGSL_HARNESS_BACKENDS";
pub const ENV_ADAPTER: &str = "WGSL_HARNESS_ADAPTER";
pub const ENV_ALLOW_SOFTWARE: &str = "WGSL_HARNESS_ALLOW_SOFTWARE";
pub const ENV_POWER: &str = "WGSL_HARNESS_POWER";
pub const ENV_EPSILON: &str = "WGSL_HARNESS_EPSILON";

/// How the harness selects its device and judges results.
#[derive(Debug, Clone, PartialEq)]
pub struct HarnessConfig {
    /// Backends enumerated when looking for an adapter.
    pub backends: wgpu::Backends,
    /// Tie-breaker between several hardware adapters.
    pub power_preference: wgpu::PowerPreference,
    /// Only adapters whose name contains this (case-insensitive) are considered.
    pub adapter_name: Option<String>,
    /// Accept CPU/software adapters (llvmpipe, WARP, SwiftShader) as a last resort.
    pub allow_software: bool,
    /// Turn on backend validation layers.
    pub validation: bool,
    /// Tolerance used when a test does not give one.
    pub tolerance: Tolerance,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        HarnessConfig {
            backends: wgpu::Backends::PRIMARY,
            power_preference: wgpu::PowerPreference::HighPerformance,
            adapter_name: None,
            allow_software: true,
            validation: cfg!(debug_assertions),
            tolerance: Tolerance::default(),
        }
    }
}

impl HarnessConfig {
    /// Defaults overridden by `WGSL_HARNESS_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = HarnessConfig::default();

        if let Some(v) = lookup(ENV_BACKENDS) {
            cfg.backends = parse_backends(&v)
                .map_err(|reason| config_error(ENV_BACKENDS, &v, reason))?;
        }
        if let Some(v) = lookup(ENV_ADAPTER) {
            let name = v.trim();
            cfg.adapter_name = (!name.is_empty()).then(|| name.to_string());
        }
        if let Some(v) = lookup(ENV_ALLOW_SOFTWARE) {
            cfg.allow_software =
                parse_bool(&v).ok_or_else(|| config_error(ENV_ALLOW_SOFTWARE, &v, "expected a boolean".into()))?;
        }
        if let Some(v) = lookup(ENV_POWER) {
            cfg.power_preference = match v.trim().to_ascii_lowercase().as_str() {
                "low" => wgpu::PowerPreference::LowPower,
                "high" => wgpu::PowerPreference::HighPerformance,
                _ => return Err(config_error(ENV_POWER, &v, "expected `low` or `high`".into())),
            };
        }
        if let Some(v) = lookup(ENV_EPSILON) {
            let eps: f32 = v
                .trim()
                .parse()
                .map_err(|e| config_error(ENV_EPSILON, &v, format!("{e}")))?;
            if !(eps.is_finite() && eps > 0.0) {
                return Err(config_error(ENV_EPSILON, &v, "must be a positive finite number".into()));
            }
            cfg.tolerance = Tolerance::Absolute(eps);
        }
        Ok(cfg)
    }
}

fn config_error(var: &'static str, value: &str, reason: String) -> ConfigError {
    ConfigError {
        var,
        value: value.to_string(),
        reason,
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a comma-separated backend list. Unknown names are an error.
pub fn parse_backends(s: &str) -> Result<wgpu::Backends, String> {
    let mut backends = wgpu::Backends::empty();
    for name in s.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        backends |= match name.to_ascii_lowercase().as_str() {
            "vulkan" | "vk" => wgpu::Backends::VULKAN,
            "metal" | "mtl" => wgpu::Backends::METAL,
            "dx12" | "d3d12" => wgpu::Backends::DX12,
            "gl" | "gles" | "opengl" => wgpu::Backends::GL,
            "webgpu" => wgpu::Backends::BROWSER_WEBGPU,
            "primary" => wgpu::Backends::PRIMARY,
            "secondary" => wgpu::Backends::SECONDARY,
            "all" => wgpu::Backends::all(),
            other => return Err(format!("unknown backend `{other}`")),
        };
    }
    if backends.is_empty() {
        return Err("no backends given".into());
    }
    Ok(backends)
}
