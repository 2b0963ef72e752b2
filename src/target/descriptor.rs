use crate::result::{MatrixError, Result};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::fmt;

/** A target platform as written in configuration
 *
 * Every field is optional at the serde level so that a missing field is
 * reported as a configuration error naming the field, instead of a generic
 * TOML decoding failure.
 */
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlatformDescriptor {
    pub cpu: Option<SmolStr>,
    pub vendor: Option<SmolStr>,
    pub kernel: Option<SmolStr>,
    pub abi: Option<SmolStr>,
    #[serde(default)]
    pub static_capable: bool,
}

/// Canonical `{cpu}-{vendor}-{kernel}-{abi}` identifier of a compilation target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(SmolStr);

impl PlatformDescriptor {
    pub fn new(
        cpu: impl Into<SmolStr>,
        vendor: impl Into<SmolStr>,
        kernel: impl Into<SmolStr>,
        abi: impl Into<SmolStr>,
        static_capable: bool,
    ) -> Self {
        Self {
            cpu: Some(cpu.into()),
            vendor: Some(vendor.into()),
            kernel: Some(kernel.into()),
            abi: Some(abi.into()),
            static_capable,
        }
    }

    /** Resolves the descriptor into its canonical TargetId
     *
     * # Errors
     * - `MatrixError::Configuration` when a field is missing, empty, or
     *   contains `-` or whitespace (either would break the one-to-one mapping
     *   between descriptors and identifiers)
     */
    pub fn resolve(&self) -> Result<TargetId> {
        let cpu = required_field("cpu", self.cpu.as_ref())?;
        let vendor = required_field("vendor", self.vendor.as_ref())?;
        let kernel = required_field("kernel", self.kernel.as_ref())?;
        let abi = required_field("abi", self.abi.as_ref())?;

        Ok(TargetId(SmolStr::from(format!(
            "{}-{}-{}-{}",
            cpu, vendor, kernel, abi
        ))))
    }

    pub fn kernel(&self) -> Option<&str> {
        self.kernel.as_deref()
    }
}

fn required_field<'a>(name: &str, value: Option<&'a SmolStr>) -> Result<&'a str> {
    let value = value.ok_or_else(|| {
        MatrixError::configuration(format!("platform descriptor is missing `{}`", name))
    })?;

    if value.is_empty() {
        return Err(MatrixError::configuration(format!(
            "platform descriptor field `{}` is empty",
            name
        )));
    }

    if value.chars().any(|c| c == '-' || c.is_whitespace()) {
        return Err(MatrixError::configuration(format!(
            "platform descriptor field `{}` = `{}` may not contain '-' or whitespace",
            name, value
        )));
    }

    Ok(value.as_str())
}

impl TargetId {
    /// Parses a literal four-part triple, validating it the same way `resolve` does.
    pub fn parse(triple: &str) -> Result<Self> {
        Self::into_descriptor(triple, false)?.resolve()
    }

    /// Splits the identifier back into the descriptor it was resolved from.
    pub fn into_descriptor(triple: &str, static_capable: bool) -> Result<PlatformDescriptor> {
        let parts: Vec<&str> = triple.split('-').collect();
        match parts.as_slice() {
            [cpu, vendor, kernel, abi] => Ok(PlatformDescriptor::new(
                *cpu,
                *vendor,
                *kernel,
                *abi,
                static_capable,
            )),
            _ => Err(MatrixError::configuration(format!(
                "`{}` is not a cpu-vendor-kernel-abi target triple",
                triple
            ))),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn kernel(&self) -> &str {
        self.0.split('-').nth(2).unwrap_or_default()
    }

    /// Name of the binary the compiler emits for `stem` on this target.
    pub fn executable_name(&self, stem: &str) -> String {
        if self.kernel() == "windows" {
            format!("{}.exe", stem)
        } else {
            stem.to_string()
        }
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TargetId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linux_gnu() -> PlatformDescriptor {
        PlatformDescriptor::new("x86_64", "unknown", "linux", "gnu", true)
    }

    #[test]
    fn resolves_canonical_triple() {
        let target = linux_gnu().resolve().unwrap();
        assert_eq!(target.as_str(), "x86_64-unknown-linux-gnu");
        assert_eq!(target, linux_gnu().resolve().unwrap());
    }

    #[test]
    fn differing_fields_yield_differing_targets() {
        let base = linux_gnu().resolve().unwrap();
        let variants = [
            PlatformDescriptor::new("aarch64", "unknown", "linux", "gnu", true),
            PlatformDescriptor::new("x86_64", "pc", "linux", "gnu", true),
            PlatformDescriptor::new("x86_64", "unknown", "freebsd", "gnu", true),
            PlatformDescriptor::new("x86_64", "unknown", "linux", "musl", true),
        ];
        for variant in variants {
            assert_ne!(variant.resolve().unwrap(), base);
        }
    }

    #[test]
    fn static_capability_is_not_part_of_identity() {
        let mut other = linux_gnu();
        other.static_capable = false;
        assert_eq!(other.resolve().unwrap(), linux_gnu().resolve().unwrap());
    }

    #[test]
    fn identifier_round_trips_to_descriptor() {
        let target = linux_gnu().resolve().unwrap();
        let back = TargetId::into_descriptor(target.as_str(), true).unwrap();
        assert_eq!(back, linux_gnu());
    }

    #[test]
    fn missing_field_is_configuration_error() {
        let mut descriptor = linux_gnu();
        descriptor.abi = None;
        let err = descriptor.resolve().unwrap_err();
        assert!(matches!(err, MatrixError::Configuration(_)));
        assert!(err.to_string().contains("abi"));
    }

    #[test]
    fn dashes_inside_fields_are_rejected() {
        let descriptor = PlatformDescriptor::new("x86_64-unknown", "linux", "gnu", "x", false);
        assert!(matches!(
            descriptor.resolve(),
            Err(MatrixError::Configuration(_))
        ));
    }

    #[test]
    fn three_part_triples_do_not_parse() {
        assert!(TargetId::parse("aarch64-apple-darwin").is_err());
        assert_eq!(
            TargetId::parse("aarch64-unknown-linux-musl")
                .unwrap()
                .kernel(),
            "linux"
        );
    }

    #[test]
    fn windows_binaries_get_exe_suffix() {
        let target = TargetId::parse("x86_64-pc-windows-gnu").unwrap();
        assert_eq!(target.executable_name("benefice"), "benefice.exe");
    }
}
