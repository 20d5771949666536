use serde::Serialize;

pub const DEFAULT_INSTANCE_TYPE: &str = "m1.small";

/// Flavor resources copied onto each instance at creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InstanceTypeSpec {
    pub name: &'static str,
    pub memory_mb: i32,
    pub vcpus: i32,
    pub local_gb: i32,
}

pub const INSTANCE_TYPES: &[InstanceTypeSpec] = &[
    InstanceTypeSpec { name: "m1.tiny", memory_mb: 512, vcpus: 1, local_gb: 0 },
    InstanceTypeSpec { name: "m1.small", memory_mb: 2048, vcpus: 1, local_gb: 20 },
    InstanceTypeSpec { name: "m1.medium", memory_mb: 4096, vcpus: 2, local_gb: 40 },
    InstanceTypeSpec { name: "m1.large", memory_mb: 8192, vcpus: 4, local_gb: 80 },
    InstanceTypeSpec { name: "m1.xlarge", memory_mb: 16384, vcpus: 8, local_gb: 160 },
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown instance type: {0}")]
pub struct UnknownInstanceType(pub String);

/// Exact, case-sensitive catalog lookup.
pub fn lookup(name: &str) -> Result<&'static InstanceTypeSpec, UnknownInstanceType> {
    INSTANCE_TYPES
        .iter()
        .find(|t| t.name == name)
        .ok_or_else(|| UnknownInstanceType(name.to_string()))
}
