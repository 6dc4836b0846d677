//! Static role → capability table.
//!
//! Every account carries exactly one [`Role`]. The capability set of a role is
//! fixed at compile time; there is no grant or revoke. Role strings that do not
//! name a known role resolve to no capabilities at all.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    ViewBasicReport,
    ViewFullReport,
    PurchaseReport,
    BulkSearch,
    ViewTelemetry,
    ManageFleet,
    ViewAllReports,
    ViewAuditLogs,
    FullAccess,
}

impl Capability {
    pub fn as_str(self) -> &'static str {
        match self {
            Capability::ViewBasicReport => "view_basic_report",
            Capability::ViewFullReport => "view_full_report",
            Capability::PurchaseReport => "purchase_report",
            Capability::BulkSearch => "bulk_search",
            Capability::ViewTelemetry => "view_telemetry",
            Capability::ManageFleet => "manage_fleet",
            Capability::ViewAllReports => "view_all_reports",
            Capability::ViewAuditLogs => "view_audit_logs",
            Capability::FullAccess => "full_access",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Guest,
    VerifiedBuyer,
    Dealer,
    FleetAdmin,
    Auditor,
    SystemAdmin,
}

impl Role {
    pub const ALL: [Role; 6] = [
        Role::Guest,
        Role::VerifiedBuyer,
        Role::Dealer,
        Role::FleetAdmin,
        Role::Auditor,
        Role::SystemAdmin,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Guest => "guest",
            Role::VerifiedBuyer => "verified_buyer",
            Role::Dealer => "dealer",
            Role::FleetAdmin => "fleet_admin",
            Role::Auditor => "auditor",
            Role::SystemAdmin => "system_admin",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Role::Guest => "Guest",
            Role::VerifiedBuyer => "Verified Buyer",
            Role::Dealer => "Dealer",
            Role::FleetAdmin => "Fleet Administrator",
            Role::Auditor => "Auditor",
            Role::SystemAdmin => "System Administrator",
        }
    }

    /// The exact capability table entry for this role.
    pub fn capabilities(self) -> &'static [Capability] {
        use Capability::*;
        match self {
            Role::Guest => &[ViewBasicReport],
            Role::VerifiedBuyer => &[ViewBasicReport, ViewFullReport, PurchaseReport],
            Role::Dealer => &[ViewBasicReport, ViewFullReport, PurchaseReport, BulkSearch],
            Role::FleetAdmin => &[ViewBasicReport, ViewFullReport, ViewTelemetry, ManageFleet],
            Role::Auditor => &[ViewAllReports, ViewAuditLogs],
            Role::SystemAdmin => &[FullAccess],
        }
    }

    /// `full_access` satisfies every capability check.
    pub fn allows(self, capability: Capability) -> bool {
        let caps = self.capabilities();
        caps.contains(&capability) || caps.contains(&Capability::FullAccess)
    }

    /// Admin areas (dashboards, audit trail, moderation) are open to auditors
    /// and system admins.
    pub fn is_admin(self) -> bool {
        self.allows(Capability::ViewAuditLogs)
    }

    /// Roles a visitor may pick for themselves at registration.
    pub fn self_assignable(self) -> bool {
        !matches!(self, Role::Auditor | Role::SystemAdmin)
    }

    #[allow(clippy::result_large_err)]
    pub fn require_admin(self) -> AppResult<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(AppError::forbidden("ADMIN", "Administrator access required")
                .with_context("role", self.as_str()))
        }
    }

    #[allow(clippy::result_large_err)]
    pub fn require(self, capability: Capability) -> AppResult<()> {
        if self.allows(capability) {
            Ok(())
        } else {
            Err(AppError::forbidden(
                "CAPABILITY",
                "You do not have permission to perform this action",
            )
            .with_context("role", self.as_str())
            .with_context("capability", capability.as_str()))
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == value)
            .ok_or_else(|| {
                AppError::validation("ROLE", "Role not recognised")
                    .with_context("role", value.to_string())
            })
    }
}

/// Capability lookup by stored role string. Unknown roles fail closed.
pub fn capabilities_for(role: &str) -> &'static [Capability] {
    role.parse::<Role>()
        .map(Role::capabilities)
        .unwrap_or(&[])
}
