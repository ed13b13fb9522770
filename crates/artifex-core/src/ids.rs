// SPDX-License-Identifier: BUSL-1.1
//! # Identifier Newtypes
//!
//! Every identifier that crosses a crate boundary is a distinct type: you
//! cannot pass a [`Machine`] where a filename is expected, or a raw `i64`
//! where a [`UserId`] is expected.
//!
//! The wire structs ([`UserMachineFile`]) use the field names of the HTTP
//! protocol (`UserID`, `Machine`, `Filename`).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Numeric identifier of a user. Shard assignment is `user_id mod N`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(i64);

impl UserId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque machine identifier reported by the client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Machine(String);

impl Machine {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Machine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Build identifier of a published artifact.
///
/// Always valid by construction: a fresh id is minted for every build
/// attempt, successful or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(Uuid);

impl ArtifactId {
    /// Mint a new random artifact id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ArtifactId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ArtifactId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// The (user, machine) pair that owns queue records, artifacts and client
/// contexts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserMachine {
    pub user_id: UserId,
    pub machine: Machine,
}

impl UserMachine {
    pub fn new(user_id: UserId, machine: Machine) -> Self {
        Self { user_id, machine }
    }

    /// Attach a filename, producing the wire request shape.
    pub fn with_file(&self, filename: impl Into<String>) -> UserMachineFile {
        UserMachineFile {
            user_id: self.user_id,
            machine: self.machine.clone(),
            filename: filename.into(),
        }
    }
}

impl fmt::Display for UserMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.user_id, self.machine)
    }
}

/// One element of the `submit-requests` and `find-matching` request bodies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserMachineFile {
    #[serde(rename = "UserID")]
    pub user_id: UserId,
    #[serde(rename = "Machine")]
    pub machine: Machine,
    #[serde(rename = "Filename")]
    pub filename: String,
}

impl UserMachineFile {
    pub fn new(user_id: UserId, machine: Machine, filename: impl Into<String>) -> Self {
        Self {
            user_id,
            machine,
            filename: filename.into(),
        }
    }

    pub fn user_machine(&self) -> UserMachine {
        UserMachine::new(self.user_id, self.machine.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_machine_file_uses_wire_field_names() {
        let umf = UserMachineFile::new(UserId::new(7), Machine::new("m"), "/a.py");
        let json = serde_json::to_value(&umf).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"UserID": 7, "Machine": "m", "Filename": "/a.py"})
        );
        let back: UserMachineFile = serde_json::from_value(json).unwrap();
        assert_eq!(back, umf);
    }

    #[test]
    fn artifact_id_parses_its_display_form() {
        let id = ArtifactId::new();
        let parsed: ArtifactId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<ArtifactId>().is_err());
    }

    #[test]
    fn with_file_keeps_user_and_machine() {
        let um = UserMachine::new(UserId::new(1), Machine::new("laptop"));
        let umf = um.with_file("/src/main.go");
        assert_eq!(umf.user_machine(), um);
        assert_eq!(umf.filename, "/src/main.go");
    }
}
