//! Roles, the capability catalog and the static role -> permission table
//!
//! Permissions are only ever granted through [`role_permissions`]; there is
//! no per-instance grant.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::types::Actor;

/// Actor roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Parent,
    Staff,
    Therapist,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Parent => "parent",
            Role::Staff => "staff",
            Role::Therapist => "therapist",
            Role::Admin => "admin",
        }
    }

    /// Parse a stored role name. Unknown names yield `None` (no permissions).
    pub fn parse(name: &str) -> Option<Self> {
        name.parse().ok()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "parent" => Ok(Role::Parent),
            "staff" => Ok(Role::Staff),
            "therapist" => Ok(Role::Therapist),
            "admin" => Ok(Role::Admin),
            _ => Err(UnknownRole(s.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown role: {0}")]
pub struct UnknownRole(pub String);

/// Coarse capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    ReadOwn,
    WriteOwn,
    ReadAssigned,
    WriteAssigned,
    ReadAll,
    WriteAll,
    ScheduleAppointments,
    ManageUsers,
    ManageRoles,
}

impl Permission {
    pub fn as_str(self) -> &'static str {
        match self {
            Permission::ReadOwn => "read_own",
            Permission::WriteOwn => "write_own",
            Permission::ReadAssigned => "read_assigned",
            Permission::WriteAssigned => "write_assigned",
            Permission::ReadAll => "read_all",
            Permission::WriteAll => "write_all",
            Permission::ScheduleAppointments => "schedule_appointments",
            Permission::ManageUsers => "manage_users",
            Permission::ManageRoles => "manage_roles",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The static role -> permission table
pub fn role_permissions(role: Role) -> &'static [Permission] {
    use Permission::*;

    match role {
        Role::Parent => &[ReadOwn, WriteOwn],
        // Staff write is declared "own only"; the resource check does not
        // enforce that yet (see DESIGN.md, staff scope).
        Role::Staff => &[ReadAll, WriteOwn, ScheduleAppointments],
        Role::Therapist => &[ReadAssigned, WriteAssigned],
        Role::Admin => &[ReadAll, WriteAll, ManageUsers, ManageRoles],
    }
}

/// Does the actor's role grant `permission`? False for anonymous or role-less actors.
pub fn can(actor: Option<&Actor>, permission: Permission) -> bool {
    actor
        .and_then(|a| a.role)
        .map(|role| role_permissions(role).contains(&permission))
        .unwrap_or(false)
}
