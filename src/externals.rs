//! Environment-based toolchain configuration.
//!
//! Every knob of the external toolchain is taken from the environment once
//! at driver startup; nothing reads the environment afterwards.

use std::env;
use std::path::PathBuf;

/// Target platform variant for runtime/library path selection.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum PlatformVariant {
    #[default]
    Gnu,
    Musl,
    Freebsd,
    Openbsd,
    Netbsd,
}

impl PlatformVariant {
    fn prefix(self) -> &'static str {
        match self {
            PlatformVariant::Gnu => "KEFIR_GNU",
            PlatformVariant::Musl => "KEFIR_MUSL",
            PlatformVariant::Freebsd => "KEFIR_FREEBSD",
            PlatformVariant::Openbsd => "KEFIR_OPENBSD",
            PlatformVariant::Netbsd => "KEFIR_NETBSD",
        }
    }

    pub fn from_target(target: Option<&str>) -> Self {
        let Some(target) = target else {
            return PlatformVariant::Gnu;
        };
        if target.contains("musl") {
            PlatformVariant::Musl
        } else if target.contains("freebsd") {
            PlatformVariant::Freebsd
        } else if target.contains("openbsd") {
            PlatformVariant::Openbsd
        } else if target.contains("netbsd") {
            PlatformVariant::Netbsd
        } else {
            PlatformVariant::Gnu
        }
    }
}

/// Snapshot of the `KEFIR_*` environment.
#[derive(Clone, Debug)]
pub struct ExternalsConfig {
    pub assembler: String,
    pub linker: String,
    pub runtime_include: Option<PathBuf>,
    pub runtime_library: Option<PathBuf>,
    pub platform_include: Option<PathBuf>,
    pub platform_library: Option<PathBuf>,
    pub dynamic_linker: Option<PathBuf>,
    pub tmpdir: PathBuf,
    pub workdir: Option<PathBuf>,
}

fn env_path(name: &str) -> Option<PathBuf> {
    env::var_os(name).map(PathBuf::from)
}

impl ExternalsConfig {
    pub fn from_env(variant: PlatformVariant) -> Self {
        let prefix = variant.prefix();
        let tmpdir = env_path("KEFIR_TMPDIR")
            .or_else(|| env_path("TMPDIR"))
            .unwrap_or_else(|| PathBuf::from("/tmp"));
        Self {
            assembler: env::var("KEFIR_AS").unwrap_or_else(|_| "as".to_string()),
            linker: env::var("KEFIR_LD").unwrap_or_else(|_| "ld".to_string()),
            runtime_include: env_path("KEFIR_RTINC"),
            runtime_library: env_path("KEFIR_RTLIB"),
            platform_include: env_path(&format!("{prefix}_INCLUDE")),
            platform_library: env_path(&format!("{prefix}_LIB")),
            dynamic_linker: env_path(&format!("{prefix}_DYNAMIC_LINKER")),
            tmpdir,
            workdir: env_path("KEFIR_WORKDIR"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_variant_from_triple() {
        assert_eq!(
            PlatformVariant::from_target(Some("x86_64-linux-musl")),
            PlatformVariant::Musl
        );
        assert_eq!(
            PlatformVariant::from_target(Some("x86_64-unknown-freebsd")),
            PlatformVariant::Freebsd
        );
        assert_eq!(PlatformVariant::from_target(None), PlatformVariant::Gnu);
    }
}
