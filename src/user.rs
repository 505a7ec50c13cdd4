use std::collections::BTreeMap;

use derive_more::From;
use serde::{ser::Error as _, Deserialize, Serialize, Serializer};

use crate::Str;

/// A user (evaluation context) that events refer to.
///
/// Users are created by the caller and are never modified by the pipeline. Whenever a user is
/// sent to the collector, a filtered copy is produced (see [`UserFilter`](crate::UserFilter)).
///
/// # Examples
/// ```
/// # use flag_events::{User, UserBuilder};
/// let user: User = UserBuilder::new("user-key")
///     .name("Red")
///     .email("red@example.com")
///     .custom("plan", "premium")
///     .private_attribute_name("email")
///     .build();
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub key: Str,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anonymous: Option<bool>,
    /// Custom attributes. Kept in a sorted map so that output is deterministic.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom: BTreeMap<String, AttributeValue>,
    /// Names of attributes (built-in or custom) that must never be sent to the collector.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub private_attribute_names: Vec<String>,
}

impl User {
    /// Create a user with only a key.
    pub fn new(key: impl Into<Str>) -> User {
        UserBuilder::new(key).build()
    }
}

/// Builder for [`User`].
#[derive(Debug, Clone)]
pub struct UserBuilder {
    user: User,
}

impl UserBuilder {
    pub fn new(key: impl Into<Str>) -> UserBuilder {
        UserBuilder {
            user: User {
                key: key.into(),
                secondary: None,
                ip: None,
                country: None,
                email: None,
                first_name: None,
                last_name: None,
                avatar: None,
                name: None,
                anonymous: None,
                custom: BTreeMap::new(),
                private_attribute_names: Vec::new(),
            },
        }
    }

    pub fn secondary(mut self, value: impl Into<String>) -> Self {
        self.user.secondary = Some(value.into());
        self
    }

    pub fn ip(mut self, value: impl Into<String>) -> Self {
        self.user.ip = Some(value.into());
        self
    }

    pub fn country(mut self, value: impl Into<String>) -> Self {
        self.user.country = Some(value.into());
        self
    }

    pub fn email(mut self, value: impl Into<String>) -> Self {
        self.user.email = Some(value.into());
        self
    }

    pub fn first_name(mut self, value: impl Into<String>) -> Self {
        self.user.first_name = Some(value.into());
        self
    }

    pub fn last_name(mut self, value: impl Into<String>) -> Self {
        self.user.last_name = Some(value.into());
        self
    }

    pub fn avatar(mut self, value: impl Into<String>) -> Self {
        self.user.avatar = Some(value.into());
        self
    }

    pub fn name(mut self, value: impl Into<String>) -> Self {
        self.user.name = Some(value.into());
        self
    }

    pub fn anonymous(mut self, value: bool) -> Self {
        self.user.anonymous = Some(value);
        self
    }

    /// Set a custom attribute.
    pub fn custom(mut self, name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.user.custom.insert(name.into(), value.into());
        self
    }

    /// Mark an attribute (built-in or custom) as private for this user.
    pub fn private_attribute_name(mut self, name: impl Into<String>) -> Self {
        self.user.private_attribute_names.push(name.into());
        self
    }

    pub fn build(self) -> User {
        self.user
    }
}

/// Enum representing possible values of a custom user attribute.
///
/// Conveniently implements `From` conversions for `String`, `&str`, `f64`, and `bool` types.
///
/// Non-finite numbers (`NaN`, infinities) have no JSON representation. Serializing them fails,
/// which the output formatter treats as a per-user serialization fault.
#[derive(Debug, Deserialize, PartialEq, PartialOrd, From, Clone)]
#[serde(untagged)]
pub enum AttributeValue {
    /// A string value.
    String(String),
    /// A numerical value.
    Number(f64),
    /// A boolean value.
    Boolean(bool),
    /// A null value or absence of value.
    Null,
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl Serialize for AttributeValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            AttributeValue::String(s) => serializer.serialize_str(s),
            AttributeValue::Number(n) if n.is_finite() => serializer.serialize_f64(*n),
            AttributeValue::Number(n) => Err(S::Error::custom(format_args!(
                "number {n} cannot be represented in JSON"
            ))),
            AttributeValue::Boolean(b) => serializer.serialize_bool(*b),
            AttributeValue::Null => serializer.serialize_unit(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{AttributeValue, UserBuilder};

    #[test]
    fn builder_sets_attributes() {
        let user = UserBuilder::new("key")
            .first_name("Sue")
            .custom("age", 30.0)
            .private_attribute_name("age")
            .build();

        assert_eq!(&*user.key, "key");
        assert_eq!(user.first_name.as_deref(), Some("Sue"));
        assert_eq!(user.custom.get("age"), Some(&AttributeValue::Number(30.0)));
        assert_eq!(user.private_attribute_names, vec!["age".to_owned()]);
    }

    #[test]
    fn user_serializes_with_camel_case_names() {
        let user = UserBuilder::new("key").first_name("Sue").build();

        assert_eq!(
            serde_json::to_value(&user).unwrap(),
            json!({"key": "key", "firstName": "Sue"})
        );
    }

    #[test]
    fn non_finite_number_fails_to_serialize() {
        assert!(serde_json::to_value(AttributeValue::Number(f64::NAN)).is_err());
        assert!(serde_json::to_value(AttributeValue::Number(f64::INFINITY)).is_err());
        assert_eq!(
            serde_json::to_value(AttributeValue::Number(1.5)).unwrap(),
            json!(1.5)
        );
    }
}
