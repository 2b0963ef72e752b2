pub mod descriptor;

pub use descriptor::*;

use crate::result::Result;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// A named platform from configuration, e.g. `x86_64-linux`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedPlatform {
    pub name: SmolStr,
    #[serde(flatten)]
    pub descriptor: PlatformDescriptor,
}

/// Short names accepted without a matching `[[platform]]` entry.
const PRESETS: &[(&str, &str, &str, &str, &str)] = &[
    ("x86_64-linux", "x86_64", "unknown", "linux", "gnu"),
    ("aarch64-linux", "aarch64", "unknown", "linux", "gnu"),
    ("x86_64-linux-musl", "x86_64", "unknown", "linux", "musl"),
    ("aarch64-linux-musl", "aarch64", "unknown", "linux", "musl"),
    ("riscv64-linux", "riscv64gc", "unknown", "linux", "gnu"),
];

pub fn preset(name: &str) -> Option<NamedPlatform> {
    PRESETS
        .iter()
        .find(|(preset, ..)| *preset == name)
        .map(|(name, cpu, vendor, kernel, abi)| NamedPlatform {
            name: SmolStr::new(name),
            descriptor: PlatformDescriptor::new(*cpu, *vendor, *kernel, *abi, *kernel == "linux"),
        })
}

/** Looks a platform up by name
 *
 * # Resolution order
 * 1. A `[[platform]]` entry from configuration with that name
 * 2. A built-in preset (`x86_64-linux`, `aarch64-linux-musl`, ...)
 * 3. A literal four-part target triple; linux triples are static capable
 */
pub fn lookup(name: &str, custom: &[NamedPlatform]) -> Result<NamedPlatform> {
    if let Some(found) = custom.iter().find(|p| p.name == name) {
        return Ok(found.clone());
    }

    if let Some(found) = preset(name) {
        return Ok(found);
    }

    let mut descriptor = TargetId::into_descriptor(name, false).map_err(|_| {
        crate::result::MatrixError::configuration(format!(
            "unknown platform `{}`: not a configured platform, preset, or cpu-vendor-kernel-abi triple",
            name
        ))
    })?;
    descriptor.static_capable = descriptor.kernel() == Some("linux");
    descriptor.resolve()?;

    Ok(NamedPlatform {
        name: SmolStr::new(name),
        descriptor,
    })
}
