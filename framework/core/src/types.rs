/// Recommended error type for binaries and for glue code that crosses process or IO boundaries.
///
/// Library crates with a closed set of failure modes expose their own `thiserror` enums, which
/// convert into this type with `?`.
pub type SimCityResult<T> = anyhow::Result<T>;
