//! Raw string holder with memoized typed parses

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::core::{ConfigError, ConfigResult};

// ---------------------------------------------------------------------------
// PropertyType
// ---------------------------------------------------------------------------

/// A type a raw property string can be parsed into.
pub trait PropertyType: Clone + Send + Sync + 'static {
    /// Name used in parse errors.
    const TYPE_NAME: &'static str;

    /// Parse a raw property string.
    fn parse_raw(raw: &str) -> ConfigResult<Self>;

    /// Whether `raw` holds no value of this type and reads as absent.
    fn is_blank(raw: &str) -> bool {
        raw.trim().is_empty()
    }
}

fn parse_failure<T: PropertyType>(raw: &str, message: impl fmt::Display) -> ConfigError {
    ConfigError::parse_error(raw, T::TYPE_NAME, message.to_string())
}

impl PropertyType for bool {
    const TYPE_NAME: &'static str = "bool";

    fn parse_raw(raw: &str) -> ConfigResult<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "yes" | "y" | "on" => Ok(true),
            "false" | "f" | "no" | "n" | "off" => Ok(false),
            _ => Err(parse_failure::<Self>(raw, "not a recognized boolean literal")),
        }
    }
}

macro_rules! impl_from_str_property {
    ($($ty:ty => $name:literal),* $(,)?) => {
        $(
            impl PropertyType for $ty {
                const TYPE_NAME: &'static str = $name;

                fn parse_raw(raw: &str) -> ConfigResult<Self> {
                    raw.trim()
                        .parse::<$ty>()
                        .map_err(|e| parse_failure::<Self>(raw, e))
                }
            }
        )*
    };
}

impl_from_str_property! {
    i32 => "i32",
    i64 => "i64",
    f32 => "f32",
    f64 => "f64",
}

impl PropertyType for String {
    const TYPE_NAME: &'static str = "string";

    fn parse_raw(raw: &str) -> ConfigResult<Self> {
        Ok(raw.to_owned())
    }

    fn is_blank(_raw: &str) -> bool {
        false
    }
}

/// Run-time handle to one of the primitive property types, resolved by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeHandle {
    name: &'static str,
    id: TypeId,
}

impl TypeHandle {
    /// Resolve a type name such as `"bool"`, `"long"` or `"f64"`.
    pub fn resolve(name: &str) -> Option<Self> {
        let (name, id) = match name.trim().to_ascii_lowercase().as_str() {
            "bool" | "boolean" => ("bool", TypeId::of::<bool>()),
            "i32" | "int" | "integer" => ("i32", TypeId::of::<i32>()),
            "i64" | "long" => ("i64", TypeId::of::<i64>()),
            "f32" | "float" => ("f32", TypeId::of::<f32>()),
            "f64" | "double" => ("f64", TypeId::of::<f64>()),
            "string" | "str" => ("string", TypeId::of::<String>()),
            _ => return None,
        };
        Some(Self { name, id })
    }

    /// Canonical type name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether this handle designates `T`.
    pub fn is<T: 'static>(&self) -> bool {
        self.id == TypeId::of::<T>()
    }
}

impl PropertyType for TypeHandle {
    const TYPE_NAME: &'static str = "type";

    fn parse_raw(raw: &str) -> ConfigResult<Self> {
        Self::resolve(raw).ok_or_else(|| parse_failure::<Self>(raw, "unknown type name"))
    }
}

// ---------------------------------------------------------------------------
// ValueCache
// ---------------------------------------------------------------------------

#[derive(Default)]
struct CacheState {
    raw: Option<String>,
    /// `TypeId` of `T` -> `ConfigResult<T>`
    parsed: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl CacheState {
    fn lookup<T: PropertyType>(&self) -> Option<ConfigResult<T>> {
        self.parsed
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.downcast_ref::<ConfigResult<T>>())
            .cloned()
    }
}

/// One raw string plus the memoized outcome of parsing it into each type
/// requested so far. Failures are memoized as well.
///
/// The raw value and its parses live under one lock, so a reader never sees
/// a parse computed from a different raw value than the current one.
#[derive(Default)]
pub struct ValueCache {
    state: RwLock<CacheState>,
}

impl ValueCache {
    /// Create a cache holding `raw`.
    pub fn new(raw: Option<String>) -> Self {
        Self {
            state: RwLock::new(CacheState {
                raw,
                parsed: HashMap::new(),
            }),
        }
    }

    /// Current raw string.
    pub fn raw(&self) -> Option<String> {
        self.state.read().raw.clone()
    }

    /// Parse the raw value as `T`, reusing an earlier outcome when cached.
    ///
    /// Returns `Ok(None)` when there is no raw value, or when it is blank
    /// and `T` is not a string.
    pub fn get<T: PropertyType>(&self) -> ConfigResult<Option<T>> {
        {
            let state = self.state.read();
            match state.raw.as_deref() {
                None => return Ok(None),
                Some(raw) if T::is_blank(raw) => return Ok(None),
                Some(_) => {}
            }
            if let Some(hit) = state.lookup::<T>() {
                return hit.map(Some);
            }
        }

        let mut state = self.state.write();
        let raw = match state.raw.as_deref() {
            Some(raw) if !T::is_blank(raw) => raw,
            _ => return Ok(None),
        };
        if let Some(hit) = state.lookup::<T>() {
            return hit.map(Some);
        }
        let outcome = T::parse_raw(raw);
        state
            .parsed
            .insert(TypeId::of::<T>(), Arc::new(outcome.clone()));
        outcome.map(Some)
    }

    /// Parsed value, or `default` when absent or unparsable.
    pub fn get_or_default<T: PropertyType>(&self, default: T) -> T {
        match self.get::<T>() {
            Ok(Some(value)) => value,
            Ok(None) | Err(_) => default,
        }
    }

    /// Replace the raw value. Returns `false`, keeping the cache, when the
    /// new value is identical.
    pub fn set(&self, raw: Option<String>) -> bool {
        let mut state = self.state.write();
        if state.raw == raw {
            return false;
        }
        state.raw = raw;
        state.parsed.clear();
        true
    }

    /// Drop every memoized parse.
    pub fn invalidate(&self) {
        self.state.write().parsed.clear();
    }

    /// Number of memoized parses.
    pub fn cached_types(&self) -> usize {
        self.state.read().parsed.len()
    }
}

impl fmt::Debug for ValueCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("ValueCache")
            .field("raw", &state.raw)
            .field("cached_types", &state.parsed.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("true", true)]
    #[case("T", true)]
    #[case("yes", true)]
    #[case("Y", true)]
    #[case("On", true)]
    #[case("false", false)]
    #[case("f", false)]
    #[case("NO", false)]
    #[case("n", false)]
    #[case("off", false)]
    fn boolean_literals(#[case] raw: &str, #[case] expected: bool) {
        assert_eq!(bool::parse_raw(raw).unwrap(), expected);
    }

    #[rstest]
    #[case("1")]
    #[case("enabled")]
    #[case("")]
    fn boolean_rejects(#[case] raw: &str) {
        assert!(matches!(
            bool::parse_raw(raw),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[rstest]
    #[case("int", "i32")]
    #[case("Long", "i64")]
    #[case("double", "f64")]
    #[case("boolean", "bool")]
    #[case("String", "string")]
    fn type_names_resolve(#[case] raw: &str, #[case] canonical: &str) {
        assert_eq!(TypeHandle::parse_raw(raw).unwrap().name(), canonical);
    }

    #[test]
    fn unknown_type_name_fails() {
        assert!(TypeHandle::parse_raw("com.example.Missing").is_err());
        assert!(TypeHandle::resolve("i64").unwrap().is::<i64>());
    }

    #[test]
    fn parses_are_memoized_per_type() {
        let cache = ValueCache::new(Some("42".into()));
        assert_eq!(cache.get::<i32>().unwrap(), Some(42));
        assert_eq!(cache.get::<i64>().unwrap(), Some(42));
        assert!(cache.get::<bool>().is_err());
        assert_eq!(cache.cached_types(), 3);

        // the cached failure does not disturb other conversions
        assert_eq!(cache.get::<i32>().unwrap(), Some(42));
        assert_eq!(cache.cached_types(), 3);
    }

    #[test]
    fn set_replaces_and_invalidates() {
        let cache = ValueCache::new(Some("1".into()));
        assert_eq!(cache.get::<i32>().unwrap(), Some(1));
        assert!(!cache.set(Some("1".into())));
        assert_eq!(cache.cached_types(), 1);

        assert!(cache.set(Some("2".into())));
        assert_eq!(cache.cached_types(), 0);
        assert_eq!(cache.get::<i32>().unwrap(), Some(2));
    }

    #[test]
    fn absent_raw_reads_as_none_or_default() {
        let cache = ValueCache::new(None);
        assert_eq!(cache.get::<f64>().unwrap(), None);
        assert_eq!(cache.get_or_default(7_i64), 7);

        cache.set(Some("x".into()));
        assert_eq!(cache.get_or_default(7_i64), 7);
        cache.invalidate();
        assert_eq!(cache.cached_types(), 0);
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    fn blank_raw_reads_as_absent_except_for_strings(#[case] raw: &str) {
        let cache = ValueCache::new(Some(raw.into()));
        assert_eq!(cache.get::<i32>().unwrap(), None);
        assert_eq!(cache.get::<bool>().unwrap(), None);
        assert_eq!(cache.get::<f64>().unwrap(), None);
        assert_eq!(cache.get_or_default(5_i64), 5);
        assert_eq!(cache.get::<String>().unwrap().as_deref(), Some(raw));
    }
}
