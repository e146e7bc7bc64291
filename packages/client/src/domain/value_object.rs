//! Value objects shared by every layer.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            pub fn value(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }
    };
}

id_newtype!(
    /// Server-assigned room identity.
    RoomId
);
id_newtype!(
    /// Server-assigned user identity.
    UserId
);
id_newtype!(
    /// Server-assigned message identity. Stable and immutable once assigned.
    MessageId
);

/// Unix timestamp in milliseconds (UTC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(i64);

impl Timestamp {
    pub fn new(millis: i64) -> Self {
        Self(millis)
    }

    pub fn value(self) -> i64 {
        self.0
    }
}

/// Bearer credential attached to the hub handshake and REST calls.
///
/// `Debug` never prints the token.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn token(&self) -> &str {
        &self.0
    }

    /// Value of the `Authorization` header.
    pub fn authorization(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_debug_hides_token() {
        // テスト項目: Credential の Debug 出力にトークンが含まれない
        // given (前提条件):
        let credential = Credential::bearer("secret-token");

        // when (操作):
        let debug = format!("{:?}", credential);

        // then (期待する結果):
        assert!(!debug.contains("secret-token"));
        assert_eq!(credential.authorization(), "Bearer secret-token");
    }

    #[test]
    fn test_ids_serialize_transparently() {
        // テスト項目: ID 型が数値としてシリアライズされる
        // given (前提条件):
        let room = RoomId(42);

        // when (操作):
        let json = serde_json::to_string(&room).unwrap();

        // then (期待する結果):
        assert_eq!(json, "42");
        assert_eq!(serde_json::from_str::<RoomId>("42").unwrap(), room);
    }
}
