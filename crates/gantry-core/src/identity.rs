//! Deterministic pseudo-identity minting.
//!
//! Anonymization substitutes patient-identifying fields with reproducible
//! stand-ins: the same input always mints the same guid, name and shifted
//! date of birth. All operations are pure; nothing here performs I/O.

use chrono::NaiveDate;
use sha2::{Digest, Sha256};

/// Mints deterministic pseudo-identities.
///
/// Implementations must be pure and side-effect-free: handlers call these
/// from inside dispatch loops and rely on identical output across processes
/// and restarts.
pub trait IdentityMinter: Send + Sync {
    /// A stable opaque identifier for `value`.
    fn guid(&self, value: &str) -> String;

    /// A reproducible human-plausible name for a guid.
    /// `gender` is an optional `F`/`M` code steering given-name choice.
    fn pseudonym(&self, guid: &str, gender: Option<&str>) -> String;

    /// A reproducible date of birth near the real one (±183 days), so age
    /// cohorts survive anonymization while the exact date does not.
    fn pseudo_dob(&self, guid: &str, dob: NaiveDate) -> NaiveDate;
}

const GIVEN_FEMALE: &[&str] = &[
    "Agnes", "Beatrix", "Clara", "Doris", "Edith", "Frieda", "Greta", "Hilda",
    "Irma", "Johanna", "Klara", "Luise", "Martha", "Nora", "Olga", "Paula",
];

const GIVEN_MALE: &[&str] = &[
    "Albert", "Bruno", "Carl", "Dieter", "Emil", "Fritz", "Gustav", "Hermann",
    "Isidor", "Jakob", "Konrad", "Ludwig", "Moritz", "Norbert", "Otto", "Paul",
];

const SURNAMES: &[&str] = &[
    "Achterberg", "Bachmann", "Claussen", "Dreyer", "Eberhardt", "Falkner",
    "Grünewald", "Hartmann", "Isenberg", "Jacobi", "Kellermann", "Lindner",
    "Mertens", "Neumann", "Obermaier", "Petersen", "Quandt", "Rosenow",
    "Steinbach", "Tannhäuser", "Ullmann", "Vogler", "Wendland", "Zöllner",
];

/// SHA-256 based [`IdentityMinter`].
///
/// The salt separates identity domains: two deployments with different salts
/// mint unrelated pseudonyms for the same patient.
#[derive(Debug, Clone)]
pub struct HashMinter {
    salt: String,
}

impl HashMinter {
    pub fn new(salt: impl Into<String>) -> Self {
        Self { salt: salt.into() }
    }

    fn digest(&self, value: &str) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.salt.as_bytes());
        hasher.update(b"\x00");
        hasher.update(value.as_bytes());
        hasher.finalize().into()
    }
}

impl Default for HashMinter {
    fn default() -> Self {
        Self::new("gantry")
    }
}

impl IdentityMinter for HashMinter {
    fn guid(&self, value: &str) -> String {
        hex::encode(self.digest(value))
    }

    fn pseudonym(&self, guid: &str, gender: Option<&str>) -> String {
        let d = self.digest(guid);
        let given = match gender.map(|g| g.to_ascii_uppercase()) {
            Some(g) if g.starts_with('F') => GIVEN_FEMALE[d[0] as usize % GIVEN_FEMALE.len()],
            Some(g) if g.starts_with('M') => GIVEN_MALE[d[0] as usize % GIVEN_MALE.len()],
            // Unknown gender alternates between the lists on a hash bit.
            _ => {
                if d[1] & 1 == 0 {
                    GIVEN_FEMALE[d[0] as usize % GIVEN_FEMALE.len()]
                } else {
                    GIVEN_MALE[d[0] as usize % GIVEN_MALE.len()]
                }
            }
        };
        let surname = SURNAMES[d[2] as usize % SURNAMES.len()];
        format!("{surname}^{given}")
    }

    fn pseudo_dob(&self, guid: &str, dob: NaiveDate) -> NaiveDate {
        let d = self.digest(guid);
        let raw = u16::from_be_bytes([d[3], d[4]]);
        let offset_days = i64::from(raw % 367) - 183;
        dob + chrono::Duration::days(offset_days)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guid_is_deterministic() {
        let minter = HashMinter::default();
        assert_eq!(minter.guid("ACC001"), minter.guid("ACC001"));
        assert_ne!(minter.guid("ACC001"), minter.guid("ACC002"));
        assert_eq!(minter.guid("ACC001").len(), 64);
    }

    #[test]
    fn salt_separates_domains() {
        let a = HashMinter::new("site-a");
        let b = HashMinter::new("site-b");
        assert_ne!(a.guid("ACC001"), b.guid("ACC001"));
    }

    #[test]
    fn pseudonym_is_stable_and_gender_aware() {
        let minter = HashMinter::default();
        let guid = minter.guid("ACC001");
        let female = minter.pseudonym(&guid, Some("F"));
        assert_eq!(female, minter.pseudonym(&guid, Some("F")));
        assert!(female.contains('^'));
        let given = female.split('^').nth(1).unwrap();
        assert!(GIVEN_FEMALE.contains(&given));

        let male = minter.pseudonym(&guid, Some("M"));
        let given = male.split('^').nth(1).unwrap();
        assert!(GIVEN_MALE.contains(&given));
    }

    #[test]
    fn pseudo_dob_stays_within_jitter() {
        let minter = HashMinter::default();
        let dob = NaiveDate::from_ymd_opt(1960, 3, 15).unwrap();
        for acc in ["ACC001", "ACC002", "ACC003", "ACC004"] {
            let guid = minter.guid(acc);
            let shifted = minter.pseudo_dob(&guid, dob);
            let delta = (shifted - dob).num_days();
            assert!((-183..=183).contains(&delta), "delta {delta} out of range");
            assert_eq!(shifted, minter.pseudo_dob(&guid, dob));
        }
    }
}
