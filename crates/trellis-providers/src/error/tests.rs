//! Unit tests for registry error formatting.

use rstest::rstest;

use super::*;

#[rstest]
#[case(
    RegistryError::UnknownCapability { name: "cache".into() },
    "unknown capability 'cache'"
)]
#[case(
    RegistryError::UnknownVariant { name: "database".into(), variant: "oracle".into() },
    "capability 'database' has no variant 'oracle'"
)]
#[case(
    RegistryError::CoreDependsOnOptional { core: "logging".into(), optional: "metrics".into() },
    "core provider 'logging' cannot depend on optional provider 'metrics'"
)]
#[case(
    RegistryError::DuplicateProvider { name: "auth".into(), variant: "jwt".into() },
    "provider 'auth' variant 'jwt' is already registered"
)]
fn messages_name_the_offending_provider(#[case] error: RegistryError, #[case] expected: &str) {
    assert_eq!(error.to_string(), expected);
}
