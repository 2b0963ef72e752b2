use crate::build::{BuildConfig, Linkage, Profile};
use crate::result::{MatrixError, Result};
use crate::target::{NamedPlatform, TargetId};
use serde::Serialize;
use smol_str::SmolStr;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Packaging {
    Binary,
    Image,
}

/// Catalog key of one output: platform × linkage × profile × packaging.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct VariantKey {
    pub platform: SmolStr,
    pub linkage: Linkage,
    pub profile: Profile,
    pub packaging: Packaging,
}

impl VariantKey {
    /// The key the raw binary of this combination is recorded under.
    pub fn as_binary(&self) -> VariantKey {
        VariantKey {
            packaging: Packaging::Binary,
            ..self.clone()
        }
    }
}

impl fmt::Display for VariantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let packaging = match self.packaging {
            Packaging::Binary => "binary",
            Packaging::Image => "image",
        };
        write!(
            f,
            "{}/{}/{}/{}",
            self.platform, self.linkage, self.profile, packaging
        )
    }
}

/// One combination to build, with its build configuration already derived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    pub key: VariantKey,
    pub platform: NamedPlatform,
    pub config: BuildConfig,
}

impl Variant {
    /** A single explicitly requested combination
     *
     * # Errors
     * - `MatrixError::Configuration` for a malformed platform, or a static
     *   build of a platform that cannot link statically
     */
    pub fn single(
        platform: NamedPlatform,
        linkage: Linkage,
        profile: Profile,
        packaging: Packaging,
    ) -> Result<Self> {
        if linkage == Linkage::Static && !platform.descriptor.static_capable {
            return Err(MatrixError::configuration(format!(
                "platform `{}` does not support static linking",
                platform.name
            )));
        }
        Self::build(platform, linkage, profile, packaging)
    }

    fn build(
        platform: NamedPlatform,
        linkage: Linkage,
        profile: Profile,
        packaging: Packaging,
    ) -> Result<Self> {
        let config = BuildConfig::new(&platform.descriptor, linkage, profile)?;
        Ok(Self {
            key: VariantKey {
                platform: platform.name.clone(),
                linkage,
                profile,
                packaging,
            },
            platform,
            config,
        })
    }
}

/** Expands the matrix into the list of variants to build
 *
 * # Rules
 * - Repeated platforms, linkages or profiles produce one variant
 * - Platforms resolving to the same target triple are built once, under
 *   the first name listed
 * - Static variants of platforms that cannot link statically are skipped
 *   with a warning
 * - Any malformed platform fails the whole enumeration
 *
 * # Errors
 * - `MatrixError::Configuration` for malformed platforms or when nothing
 *   is left to build
 */
pub fn enumerate(
    platforms: &[NamedPlatform],
    linkages: &[Linkage],
    profiles: &[Profile],
    package: bool,
) -> Result<Vec<Variant>> {
    let packaging = if package {
        Packaging::Image
    } else {
        Packaging::Binary
    };

    let mut seen: BTreeMap<(TargetId, Linkage, Profile), SmolStr> = BTreeMap::new();
    let mut variants = Vec::new();

    for platform in platforms {
        platform.descriptor.resolve().map_err(|e| {
            MatrixError::configuration(format!("platform `{}`: {}", platform.name, e))
        })?;

        for &linkage in linkages {
            if linkage == Linkage::Static && !platform.descriptor.static_capable {
                log::warn!(
                    "skipping static builds for `{}`: platform is not static capable",
                    platform.name
                );
                continue;
            }

            for &profile in profiles {
                let variant = Variant::build(platform.clone(), linkage, profile, packaging)?;
                let identity = (variant.config.target.clone(), linkage, profile);
                match seen.get(&identity) {
                    Some(first) if *first != platform.name => log::warn!(
                        "platform `{}` resolves to {} like `{}`; building it once",
                        platform.name,
                        identity.0,
                        first
                    ),
                    Some(_) => {}
                    None => {
                        seen.insert(identity, platform.name.clone());
                        variants.push(variant);
                    }
                }
            }
        }
    }

    if variants.is_empty() {
        return Err(MatrixError::configuration(MatrixError::EMPTY_MATRIX));
    }

    Ok(variants)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::{self, PlatformDescriptor};
    use std::collections::BTreeSet;

    fn platforms(names: &[&str]) -> Vec<NamedPlatform> {
        names.iter().map(|n| target::lookup(n, &[]).unwrap()).collect()
    }

    #[test]
    fn full_cross_product() {
        let variants = enumerate(
            &platforms(&["x86_64-linux", "aarch64-linux"]),
            &[Linkage::Native, Linkage::Static],
            &[Profile::Release, Profile::Debug],
            true,
        )
        .unwrap();

        assert_eq!(variants.len(), 8);
        let keys: BTreeSet<_> = variants.iter().map(|v| v.key.clone()).collect();
        assert_eq!(keys.len(), 8);
        assert!(variants.iter().all(|v| v.key.packaging == Packaging::Image));
    }

    #[test]
    fn duplicates_collapse() {
        let variants = enumerate(
            &platforms(&["x86_64-linux", "x86_64-linux"]),
            &[Linkage::Native, Linkage::Native],
            &[Profile::Release],
            false,
        )
        .unwrap();
        assert_eq!(variants.len(), 1);
        assert_eq!(variants[0].key.to_string(), "x86_64-linux/native/release/binary");
    }

    #[test]
    fn aliases_of_one_triple_build_once() {
        let variants = enumerate(
            &platforms(&["x86_64-linux", "x86_64-unknown-linux-gnu"]),
            &[Linkage::Native, Linkage::Static],
            &[Profile::Release],
            false,
        )
        .unwrap();
        assert_eq!(variants.len(), 2);
        assert!(variants.iter().all(|v| v.key.platform == "x86_64-linux"));
        assert!(variants
            .iter()
            .all(|v| v.config.target.as_str() == "x86_64-unknown-linux-gnu"));
    }

    #[test]
    fn static_is_skipped_for_incapable_platforms() {
        let darwin = NamedPlatform {
            name: "mac".into(),
            descriptor: PlatformDescriptor::new("aarch64", "apple", "darwin", "none", false),
        };
        let variants = enumerate(
            &[darwin.clone()],
            &[Linkage::Native, Linkage::Static],
            &[Profile::Release],
            false,
        )
        .unwrap();
        assert_eq!(variants.len(), 1);
        assert_eq!(variants[0].config.linkage, Linkage::Native);

        let only_static = enumerate(&[darwin.clone()], &[Linkage::Static], &[Profile::Release], false);
        assert!(matches!(only_static, Err(MatrixError::Configuration(_))));

        let single = Variant::single(darwin, Linkage::Static, Profile::Release, Packaging::Binary);
        assert!(matches!(single, Err(MatrixError::Configuration(_))));
    }

    #[test]
    fn malformed_platform_aborts_enumeration() {
        let broken = NamedPlatform {
            name: "broken".into(),
            descriptor: PlatformDescriptor {
                cpu: Some("x86_64".into()),
                vendor: Some("unknown".into()),
                kernel: None,
                abi: Some("gnu".into()),
                static_capable: true,
            },
        };
        let mut all = platforms(&["x86_64-linux"]);
        all.push(broken);
        let err = enumerate(&all, &[Linkage::Native], &[Profile::Release], false).unwrap_err();
        assert!(err.is_run_level());
    }
}
