// SPDX-License-Identifier: Apache-2.0

use std::error::Error;
use std::path::PathBuf;

use crate::init::BoxError;

/// Parse a single KEY=value pair
pub(crate) fn parse_key_val<T, U>(s: &str) -> Result<(T, U), BoxError>
where
    T: std::str::FromStr,
    T::Err: Error + Send + Sync + 'static,
    U: std::str::FromStr,
    U::Err: Error + Send + Sync + 'static,
{
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=value: no `=` found in `{s}`"))?;
    Ok((s[..pos].parse()?, s[pos + 1..].parse()?))
}

/// Parse a hand-off mapping `PATH=NEXT`: when `PATH` is truncated, resume on `NEXT`.
pub(crate) fn parse_successor(s: &str) -> Result<(PathBuf, PathBuf), BoxError> {
    let (path, next): (PathBuf, PathBuf) = parse_key_val(s)?;
    if path.as_os_str().is_empty() || next.as_os_str().is_empty() {
        return Err(format!("invalid PATH=NEXT: empty path in `{s}`").into());
    }
    Ok((path, next))
}
