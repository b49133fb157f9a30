// Copyright 2020 Peter Williams <peter@newton.cx> and collaborators
// Licensed under the MIT License.

//! Helpers for environment variables.

use anyhow::anyhow;
use std::{collections::HashMap, env};

use crate::errors::Result;

/// Get an optional environment variable as a string.
///
/// If the variable is not present or is empty, return `Ok(None)`. If the
/// variable is present but cannot be converted into a string, return an `Err`.
pub fn maybe_var(key: &str) -> Result<Option<String>> {
    if let Some(os_str) = env::var_os(key) {
        if let Ok(s) = os_str.into_string() {
            if !s.is_empty() {
                Ok(Some(s))
            } else {
                Ok(None)
            }
        } else {
            Err(anyhow!(
                "could not parse environment variable {} as Unicode",
                key
            ))
        }
    } else {
        Ok(None)
    }
}

/// Take a snapshot of the process environment.
///
/// Variables whose names or values aren't Unicode are left out, since they
/// can't be substituted into text anyway.
pub fn snapshot() -> HashMap<String, String> {
    env::vars_os()
        .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_is_absent() {
        env::set_var("BUILDSTAMP_TEST_EMPTY_VAR", "");
        assert_eq!(maybe_var("BUILDSTAMP_TEST_EMPTY_VAR").unwrap(), None);
        assert_eq!(maybe_var("BUILDSTAMP_TEST_SURELY_UNSET_VAR").unwrap(), None);
    }

    #[test]
    fn snapshot_sees_variables() {
        env::set_var("BUILDSTAMP_TEST_SNAPSHOT_VAR", "hello");
        let snap = snapshot();
        assert_eq!(snap["BUILDSTAMP_TEST_SNAPSHOT_VAR"], "hello");
    }
}
