//! Typed module parameters

use super::kind::ModuleKind;
use crate::error::ModuleError;
use std::collections::BTreeMap;
use ziapi_protocol::Value;

/// Parameters of one module, keyed by relative name (`grid/cols`)
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ModuleParams {
    values: BTreeMap<String, Value>,
}

impl ModuleParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeded with the kind's defaults.
    pub fn defaults(kind: ModuleKind) -> Self {
        let mut params = Self::new();
        for (key, value) in kind.default_params() {
            params.values.insert(key.to_string(), value);
        }
        params
    }

    /// Canonical key: no leading slash, no `<kind>/` prefix, lower case.
    pub fn normalize(kind: ModuleKind, key: &str) -> String {
        let key = key.trim().trim_matches('/');
        let prefix_len = kind.name().len();
        let stripped = match key.get(..prefix_len) {
            Some(head)
                if head.eq_ignore_ascii_case(kind.name())
                    && key.as_bytes().get(prefix_len) == Some(&b'/') =>
            {
                &key[prefix_len + 1..]
            },
            _ => key,
        };
        stripped.to_ascii_lowercase()
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn f64(&self, key: &str) -> Result<f64, ModuleError> {
        let value = self.require(key)?;
        value.as_f64().ok_or_else(|| invalid(key, value, "a number"))
    }

    pub fn i64(&self, key: &str) -> Result<i64, ModuleError> {
        let value = self.require(key)?;
        value.as_i64().ok_or_else(|| invalid(key, value, "an integer"))
    }

    pub fn str(&self, key: &str) -> Result<&str, ModuleError> {
        let value = self.require(key)?;
        value.as_str().ok_or_else(|| invalid(key, value, "a string"))
    }

    /// Non-negative count.
    pub fn count(&self, key: &str) -> Result<usize, ModuleError> {
        let v = self.i64(key)?;
        usize::try_from(v).map_err(|_| ModuleError::InvalidParameter {
            name: key.to_string(),
            reason: format!("{} is negative", v),
        })
    }

    pub fn flag(&self, key: &str) -> Result<bool, ModuleError> {
        Ok(self.i64(key)? != 0)
    }

    fn require(&self, key: &str) -> Result<&Value, ModuleError> {
        self.values.get(key).ok_or_else(|| ModuleError::UnknownParameter {
            name: key.to_string(),
        })
    }
}

fn invalid(key: &str, value: &Value, expected: &str) -> ModuleError {
    ModuleError::InvalidParameter {
        name: key.to_string(),
        reason: format!("expected {}, got {:?}", expected, value.value_type()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_kind_prefix() {
        let k = ModuleKind::SpectrumZoomFft;
        assert_eq!(ModuleParams::normalize(k, "zoomFFT/grid/cols"), "grid/cols");
        assert_eq!(ModuleParams::normalize(k, "/zoomfft/Grid/Cols"), "grid/cols");
        assert_eq!(ModuleParams::normalize(k, "grid/cols"), "grid/cols");
        // Only a whole first segment counts as prefix.
        assert_eq!(ModuleParams::normalize(k, "zoomFFTx/a"), "zoomfftx/a");
        assert_eq!(ModuleParams::normalize(ModuleKind::Sweeper, "sweep/start"), "start");
    }

    #[test]
    fn test_typed_access() {
        let params = ModuleParams::defaults(ModuleKind::Sweeper);
        assert_eq!(params.f64("start").unwrap(), 1e3);
        assert_eq!(params.count("samplecount").unwrap(), 100);
        // Integers read as numbers, strings do not.
        assert_eq!(params.f64("samplecount").unwrap(), 100.0);
        assert!(matches!(
            params.f64("gridnode"),
            Err(ModuleError::InvalidParameter { .. })
        ));
        assert!(matches!(
            params.f64("nope"),
            Err(ModuleError::UnknownParameter { .. })
        ));
    }

    #[test]
    fn test_negative_count_rejected() {
        let mut params = ModuleParams::new();
        params.set("count", Value::Integer(-1));
        assert!(params.count("count").is_err());
    }
}
