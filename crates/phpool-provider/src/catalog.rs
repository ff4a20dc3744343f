//! Static runtime catalog and package-name parsing shared by the backends.

use phpool_schema::PhpVersion;

/// Versions offered when no live repository query is possible. Approximate:
/// repositories add and retire versions independently of this list.
pub const FALLBACK_VERSIONS: [PhpVersion; 5] = [
    PhpVersion::new(8, 3),
    PhpVersion::new(8, 2),
    PhpVersion::new(8, 1),
    PhpVersion::new(8, 0),
    PhpVersion::new(7, 4),
];

pub fn fallback_versions() -> Vec<PhpVersion> {
    FALLBACK_VERSIONS.to_vec()
}

/// Extract a version from a package name of the form `<prefix><digits><suffix>`,
/// e.g. `php82-php-fpm` with prefix `php` and suffix `-php-fpm`.
pub fn compact_between(name: &str, prefix: &str, suffix: &str) -> Option<PhpVersion> {
    let rest = name.strip_prefix(prefix)?.strip_suffix(suffix)?;
    PhpVersion::from_compact(rest)
}

/// Extract a version from a package name of the form `<prefix><major.minor><suffix>`,
/// e.g. `php8.2-fpm`.
pub fn dotted_between(name: &str, prefix: &str, suffix: &str) -> Option<PhpVersion> {
    let rest = name.strip_prefix(prefix)?.strip_suffix(suffix)?;
    PhpVersion::parse(rest).ok()
}

/// Keep supported versions, newest first, without duplicates.
pub fn normalize(mut versions: Vec<PhpVersion>) -> Vec<PhpVersion> {
    versions.retain(|v| v.is_supported());
    versions.sort_unstable_by(|a, b| b.cmp(a));
    versions.dedup();
    versions
}
