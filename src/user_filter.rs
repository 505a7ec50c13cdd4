//! Redaction of private user attributes before users leave the process.
use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use crate::{AttributeValue, Str, User};

/// Names of built-in user attributes that can be made private. `key` and `anonymous` are never
/// redacted.
pub const BUILTIN_ATTRIBUTES: [&str; 8] = [
    "avatar",
    "country",
    "email",
    "firstName",
    "ip",
    "lastName",
    "name",
    "secondary",
];

/// A copy of [`User`] that is safe to send: private attributes are removed and their names are
/// listed in `privateAttrs`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilteredUser {
    pub key: Str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anonymous: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom: Option<BTreeMap<String, AttributeValue>>,
    /// Names of the attributes that were redacted.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub private_attrs: Vec<String>,
}

impl FilteredUser {
    /// Drop custom attributes, keeping the key and every built-in attribute.
    pub(crate) fn without_custom(mut self) -> FilteredUser {
        self.custom = None;
        self
    }
}

/// Applies the global privacy settings together with per-user private attribute names.
#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    all_attributes_private: bool,
    private_attribute_names: HashSet<String>,
}

impl UserFilter {
    pub fn new<I, S>(all_attributes_private: bool, private_attribute_names: I) -> UserFilter
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        UserFilter {
            all_attributes_private,
            private_attribute_names: private_attribute_names.into_iter().map(Into::into).collect(),
        }
    }

    fn is_private(&self, user: &User, name: &str) -> bool {
        self.all_attributes_private
            || self.private_attribute_names.contains(name)
            || user.private_attribute_names.iter().any(|it| it == name)
    }

    /// Produce a filtered copy of `user`.
    pub fn filter(&self, user: &User) -> FilteredUser {
        let mut private_attrs = Vec::new();

        let mut keep = |name: &str, value: &Option<String>| -> Option<String> {
            let value = value.as_ref()?;
            if self.is_private(user, name) {
                private_attrs.push(name.to_owned());
                None
            } else {
                Some(value.clone())
            }
        };

        let secondary = keep("secondary", &user.secondary);
        let ip = keep("ip", &user.ip);
        let country = keep("country", &user.country);
        let email = keep("email", &user.email);
        let first_name = keep("firstName", &user.first_name);
        let last_name = keep("lastName", &user.last_name);
        let avatar = keep("avatar", &user.avatar);
        let name = keep("name", &user.name);

        let mut custom = BTreeMap::new();
        for (attr, value) in &user.custom {
            if self.is_private(user, attr) {
                private_attrs.push(attr.clone());
            } else {
                custom.insert(attr.clone(), value.clone());
            }
        }

        FilteredUser {
            key: user.key.clone(),
            secondary,
            ip,
            country,
            email,
            first_name,
            last_name,
            avatar,
            name,
            anonymous: user.anonymous,
            custom: (!custom.is_empty()).then_some(custom),
            private_attrs,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{UserFilter, BUILTIN_ATTRIBUTES};
    use crate::UserBuilder;

    fn user_with_all_attributes() -> crate::User {
        UserBuilder::new("abc")
            .secondary("xyz")
            .ip("127.0.0.1")
            .country("us")
            .email("test@example.com")
            .first_name("Sam")
            .last_name("Smith")
            .avatar("http://avatar")
            .name("Sam Smith")
            .anonymous(true)
            .custom("bizzle", "def")
            .custom("dizzle", "ghi")
            .build()
    }

    #[test]
    fn keeps_everything_without_private_settings() {
        let filtered = UserFilter::default().filter(&user_with_all_attributes());

        assert!(filtered.private_attrs.is_empty());
        assert_eq!(
            serde_json::to_value(&filtered).unwrap(),
            json!({
                "key": "abc",
                "secondary": "xyz",
                "ip": "127.0.0.1",
                "country": "us",
                "email": "test@example.com",
                "firstName": "Sam",
                "lastName": "Smith",
                "avatar": "http://avatar",
                "name": "Sam Smith",
                "anonymous": true,
                "custom": {"bizzle": "def", "dizzle": "ghi"},
            })
        );
    }

    #[test]
    fn all_attributes_private_keeps_key_and_anonymous() {
        let filtered = UserFilter::new(true, Vec::<String>::new()).filter(&user_with_all_attributes());

        let mut redacted = filtered.private_attrs.clone();
        redacted.sort();
        let mut expected: Vec<String> = BUILTIN_ATTRIBUTES
            .iter()
            .map(|it| it.to_string())
            .chain(["bizzle".to_owned(), "dizzle".to_owned()])
            .collect();
        expected.sort();

        assert_eq!(redacted, expected);
        assert_eq!(&*filtered.key, "abc");
        assert_eq!(filtered.anonymous, Some(true));
        assert_eq!(filtered.custom, None);
        assert_eq!(filtered.email, None);
    }

    #[test]
    fn globally_private_names_are_redacted() {
        let filtered = UserFilter::new(false, ["firstName", "bizzle"]).filter(&user_with_all_attributes());

        assert_eq!(filtered.private_attrs, vec!["firstName", "bizzle"]);
        assert_eq!(filtered.first_name, None);
        assert_eq!(filtered.last_name.as_deref(), Some("Smith"));
        assert_eq!(
            serde_json::to_value(&filtered.custom).unwrap(),
            json!({"dizzle": "ghi"})
        );
    }

    #[test]
    fn per_user_private_names_are_redacted() {
        let user = UserBuilder::new("abc")
            .email("test@example.com")
            .name("Sam")
            .private_attribute_name("email")
            .build();

        let filtered = UserFilter::default().filter(&user);

        assert_eq!(
            serde_json::to_value(&filtered).unwrap(),
            json!({"key": "abc", "name": "Sam", "privateAttrs": ["email"]})
        );
    }

    #[test]
    fn missing_attributes_are_not_reported_as_redacted() {
        let user = UserBuilder::new("abc").name("Sam").build();

        let filtered = UserFilter::new(true, Vec::<String>::new()).filter(&user);

        assert_eq!(filtered.private_attrs, vec!["name"]);
    }
}
