//! MeasurementKey - Cheap-to-clone signal identifier
//!
//! Uses `Arc` internally so cloning a key into every frame only bumps a
//! reference count.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use crate::ContractError;

/// Identifies one signal: a source-scoped point id plus a global signal id.
///
/// Keys compare by value. Two keys built independently from the same
/// `(signal_id, source, id)` are equal and hash identically.
///
/// # Examples
/// ```
/// use contracts::MeasurementKey;
///
/// let key: MeasurementKey = "PPA:12".parse().unwrap();
/// let copy = key.clone(); // O(1) - just increments ref count
/// assert_eq!(key, copy);
/// assert_eq!(key.source(), "PPA");
/// assert_eq!(key.id(), 12);
/// ```
#[derive(Clone)]
pub struct MeasurementKey(Arc<KeyInner>);

#[derive(PartialEq, Eq, Hash)]
struct KeyInner {
    signal_id: Uuid,
    source: Box<str>,
    id: u32,
}

impl MeasurementKey {
    /// Create a key from all three components.
    pub fn new(signal_id: Uuid, source: &str, id: u32) -> Self {
        Self(Arc::new(KeyInner {
            signal_id,
            source: source.into(),
            id,
        }))
    }

    /// Create a key with a freshly generated signal id.
    pub fn generate(source: &str, id: u32) -> Self {
        Self::new(Uuid::new_v4(), source, id)
    }

    /// Global signal identifier (nil when the key was parsed from `SOURCE:ID`).
    #[inline]
    pub fn signal_id(&self) -> Uuid {
        self.0.signal_id
    }

    /// Source (historian / device acronym) the point id is scoped to.
    #[inline]
    pub fn source(&self) -> &str {
        &self.0.source
    }

    /// Numeric point id within the source.
    #[inline]
    pub fn id(&self) -> u32 {
        self.0.id
    }
}

impl fmt::Display for MeasurementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.0.source, self.0.id)
    }
}

impl fmt::Debug for MeasurementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MeasurementKey({}:{} {})", self.0.source, self.0.id, self.0.signal_id)
    }
}

impl FromStr for MeasurementKey {
    type Err = ContractError;

    /// Parse the `SOURCE:ID` form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (source, id) = s
            .rsplit_once(':')
            .ok_or_else(|| ContractError::invalid_key(s, "expected SOURCE:ID"))?;
        let id = id
            .trim()
            .parse::<u32>()
            .map_err(|e| ContractError::invalid_key(s, e.to_string()))?;
        let source = source.trim();
        if source.is_empty() {
            return Err(ContractError::invalid_key(s, "empty source"));
        }
        Ok(Self::new(Uuid::nil(), source, id))
    }
}

impl PartialEq for MeasurementKey {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        // Fast path: same Arc pointer
        Arc::ptr_eq(&self.0, &other.0) || self.0 == other.0
    }
}

impl Eq for MeasurementKey {}

impl Hash for MeasurementKey {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state)
    }
}

#[derive(Serialize, Deserialize)]
struct KeyRepr {
    #[serde(default)]
    signal_id: Uuid,
    source: String,
    id: u32,
}

impl Serialize for MeasurementKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        KeyRepr {
            signal_id: self.0.signal_id,
            source: self.0.source.to_string(),
            id: self.0.id,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for MeasurementKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let repr = KeyRepr::deserialize(deserializer)?;
        Ok(Self::new(repr.signal_id, &repr.source, repr.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_clone_is_cheap() {
        let k1 = MeasurementKey::generate("PPA", 1);
        let k2 = k1.clone();

        assert!(Arc::ptr_eq(&k1.0, &k2.0));
    }

    #[test]
    fn test_value_equality() {
        let signal = Uuid::new_v4();
        let a = MeasurementKey::new(signal, "PPA", 7);
        let b = MeasurementKey::new(signal, "PPA", 7);
        assert_eq!(a, b);
        assert_ne!(a, MeasurementKey::new(signal, "PPA", 8));
        assert_ne!(a, MeasurementKey::new(Uuid::new_v4(), "PPA", 7));
    }

    #[test]
    fn test_hashmap_key() {
        let signal = Uuid::new_v4();
        let mut map: HashMap<MeasurementKey, i32> = HashMap::new();
        map.insert(MeasurementKey::new(signal, "DEV", 1), 1);

        assert_eq!(map.get(&MeasurementKey::new(signal, "DEV", 1)), Some(&1));
    }

    #[test]
    fn test_parse() {
        let key: MeasurementKey = "SHELBY:42".parse().unwrap();
        assert_eq!(key.source(), "SHELBY");
        assert_eq!(key.id(), 42);
        assert!(key.signal_id().is_nil());
        assert_eq!(key.to_string(), "SHELBY:42");

        assert!("no-colon".parse::<MeasurementKey>().is_err());
        assert!(":5".parse::<MeasurementKey>().is_err());
        assert!("DEV:x".parse::<MeasurementKey>().is_err());
    }

    #[test]
    fn test_serde() {
        let key = MeasurementKey::generate("PPA", 3);
        let json = serde_json::to_string(&key).unwrap();
        assert!(json.contains("\"source\":\"PPA\""));

        let parsed: MeasurementKey = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, key);
    }
}
