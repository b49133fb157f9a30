// Copyright 2021 Peter Williams <peter@newton.cx> and collaborators
// Licensed under the MIT License.

//! Deterministic derivation of Windows Installer product codes.
//!
//! Every MSI release needs a fresh `ProductCode` GUID, but for a reproducible
//! build the same version should always get the same one. We get both by
//! mixing the package family's stable `UpgradeCode` with a pseudo-random
//! stream seeded from the version number:
//!
//! 1. The upgrade code is parsed into its 16 raw bytes.
//! 2. The version is split into byte-sized components and a zero component
//!    is appended (and more zeros, if needed, to reach four bytes).
//! 3. The first four of those bytes, read as a little-endian `u32`, seed a
//!    [`rand::rngs::StdRng`] via [`SeedableRng::seed_from_u64`].
//! 4. Sixteen bytes drawn from that generator are XORed with the upgrade
//!    code bytes.
//! 5. The version-4 and RFC 4122 variant bits are forced on.
//!
//! The result depends on `rand`'s `StdRng` algorithm, so the same inputs give
//! the same code for any given build of this program, but not necessarily
//! across `rand` upgrades or other tools.

use rand::{rngs::StdRng, RngCore, SeedableRng};
use std::{fmt, str::FromStr};
use thiserror::Error as ThisError;
use uuid::Uuid;

use crate::version::{byte_components, NumericVersionError};

/// Why a product code couldn't be derived.
#[derive(Debug, ThisError)]
pub enum ProductCodeError {
    #[error("`{0}` is not a valid GUID")]
    BadSeed(String),

    #[error("version `{version}` can't be used to derive a product code")]
    BadVersion {
        version: String,
        #[source]
        source: NumericVersionError,
    },
}

/// A 128-bit installer identifier, rendered like
/// `{1B4E28BA-2FA1-41D2-883F-0016D3CCA427}`.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ProductIdentifier(Uuid);

impl ProductIdentifier {
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl fmt::Display for ProductIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut text = self.0.hyphenated().to_string();
        text.make_ascii_uppercase();
        write!(f, "{{{}}}", text)
    }
}

impl FromStr for ProductIdentifier {
    type Err = ProductCodeError;

    /// Accepts 32 hex digits, optionally hyphenated and optionally braced.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(ProductIdentifier)
            .map_err(|_| ProductCodeError::BadSeed(s.to_owned()))
    }
}

/// Derive the product code for `version` within the family identified by
/// `upgrade_code`.
pub fn derive(version: &str, upgrade_code: &ProductIdentifier) -> Result<ProductIdentifier, ProductCodeError> {
    let mut vbytes = byte_components(version).map_err(|source| ProductCodeError::BadVersion {
        version: version.to_owned(),
        source,
    })?;

    vbytes.push(0);

    while vbytes.len() < 4 {
        vbytes.push(0);
    }

    let seed = u32::from_le_bytes([vbytes[0], vbytes[1], vbytes[2], vbytes[3]]);
    let mut rng = StdRng::seed_from_u64(u64::from(seed));
    let mut bytes = [0u8; 16];
    rng.fill_bytes(&mut bytes);

    for (b, k) in bytes.iter_mut().zip(upgrade_code.as_bytes()) {
        *b ^= *k;
    }

    Ok(ProductIdentifier(
        uuid::Builder::from_random_bytes(bytes).into_uuid(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const UPGRADE: &str = "{6D2A1C43-9E0B-4F7A-8C55-1D3E2F4A5B6C}";

    fn upgrade() -> ProductIdentifier {
        UPGRADE.parse().unwrap()
    }

    #[test]
    fn deterministic() {
        let a = derive("1.2.3", &upgrade()).unwrap();
        let b = derive("1.2.3", &upgrade()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), b.to_string());
    }

    #[test]
    fn sensitive_to_inputs() {
        let base = derive("1.2.3", &upgrade()).unwrap();
        assert_ne!(base, derive("1.2.4", &upgrade()).unwrap());

        let other: ProductIdentifier = "0f8fad5b-d9cb-469f-a165-70867728950e".parse().unwrap();
        assert_ne!(base, derive("1.2.3", &other).unwrap());
    }

    #[test]
    fn version_and_variant_bits() {
        for v in &["0.0", "1.2.3", "255.255.255", "3.1.4.1", "9"] {
            let id = derive(v, &upgrade()).unwrap();
            let b = id.as_bytes();
            assert_eq!(b[6] >> 4, 0x4, "version nibble for {}", v);
            assert_eq!(b[8] >> 6, 0b10, "variant bits for {}", v);
        }
    }

    #[test]
    fn rendering() {
        let text = derive("1.2.3", &upgrade()).unwrap().to_string();
        assert_eq!(text.len(), 38);
        assert!(text.starts_with('{') && text.ends_with('}'));
        assert_eq!(&text[15..16], "4");
        assert!(!text.chars().any(|c| c.is_ascii_lowercase()));

        let dashes: Vec<usize> = text.match_indices('-').map(|(i, _)| i).collect();
        assert_eq!(dashes, vec![9, 14, 19, 24]);
    }

    #[test]
    fn seed_forms() {
        let braced: ProductIdentifier = UPGRADE.parse().unwrap();
        let bare: ProductIdentifier = "6d2a1c439e0b4f7a8c551d3e2f4a5b6c".parse().unwrap();
        assert_eq!(braced, bare);
        assert_eq!(braced.to_string(), UPGRADE);
        assert!("not-a-guid".parse::<ProductIdentifier>().is_err());
        assert!("{6D2A1C43-9E0B-4F7A-8C55}".parse::<ProductIdentifier>().is_err());
    }

    #[test]
    fn bad_versions() {
        assert!(matches!(
            derive("1.300.0", &upgrade()),
            Err(ProductCodeError::BadVersion { .. })
        ));
        assert!(derive("1.0.0-beta", &upgrade()).is_err());
    }
}
