//! String type helper for keys that are copied around a lot (flag keys, user keys).

use std::{borrow::Borrow, sync::Arc};

use serde::{Deserialize, Serialize};

/// `Str` is an immutable string that can be cloned cheaply.
///
/// Events, summaries and the user-key cache all hold on to the same flag and user keys, so they
/// share one allocation instead of copying.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct Str(Arc<str>);

impl Str {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Str {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<T: Into<Arc<str>>> From<T> for Str {
    fn from(value: T) -> Str {
        Str(value.into())
    }
}

impl AsRef<str> for Str {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Str {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl std::ops::Deref for Str {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.as_ref()
    }
}

impl log::kv::ToValue for Str {
    fn to_value(&self) -> log::kv::Value<'_> {
        log::kv::Value::from_display(self)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::Str;

    #[test]
    fn can_look_up_by_str() {
        let mut map = HashMap::new();
        map.insert(Str::from("user-key"), 1);

        assert_eq!(map.get("user-key"), Some(&1));
    }

    #[test]
    fn serializes_as_plain_string() {
        let value = serde_json::to_value(Str::from("flag")).unwrap();

        assert_eq!(value, serde_json::json!("flag"));
    }

    #[test]
    fn logs_as_kv_value() {
        use log::kv::ToValue;

        let key = Str::from("user-key");

        assert_eq!(key.to_value().to_string(), "user-key");
    }
}
