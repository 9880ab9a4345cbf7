//! Role-scoped access control.
//!
//! Every list/read narrows its query through [`loan_scope`] and every
//! privileged route checks [`can`]. Out-of-scope direct-id lookups are
//! answered with 404, never 403.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::AuthenticatedUser;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Lo,
    Loa,
    ProductionPartner,
    Admin,
}

impl Role {
    pub const ALL: &'static [Role] = &[Role::Lo, Role::Loa, Role::ProductionPartner, Role::Admin];

    pub fn parse(value: &str) -> Option<Role> {
        match value {
            "LO" => Some(Role::Lo),
            "LOA" => Some(Role::Loa),
            "PRODUCTION_PARTNER" => Some(Role::ProductionPartner),
            "ADMIN" => Some(Role::Admin),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Lo => "LO",
            Role::Loa => "LOA",
            Role::ProductionPartner => "PRODUCTION_PARTNER",
            Role::Admin => "ADMIN",
        }
    }
}

/// How far a caller may see into the loan book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoanScope {
    /// Unrestricted read access.
    All,
    /// Only loans whose loan_officer_id matches.
    Officer(Uuid),
    /// Unrecognized role: fail closed, match nothing.
    Nothing,
}

impl LoanScope {
    pub fn permits(&self, loan_officer_id: Uuid) -> bool {
        match self {
            LoanScope::All => true,
            LoanScope::Officer(id) => *id == loan_officer_id,
            LoanScope::Nothing => false,
        }
    }
}

pub fn loan_scope(user: &AuthenticatedUser) -> LoanScope {
    match user.role {
        Some(Role::Lo) => LoanScope::Officer(user.user_id),
        Some(Role::Loa) | Some(Role::ProductionPartner) | Some(Role::Admin) => LoanScope::All,
        None => LoanScope::Nothing,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    CreateLoan,
    DeleteLoan,
    ListExternalLeads,
    ImportLead,
    SyncLead,
    ViewLeadSources,
    ManageLeadSources,
    ManageUsers,
    SendNotifications,
}

pub fn can(user: &AuthenticatedUser, action: Action) -> bool {
    match action {
        Action::CreateLoan => user.has_any_role(&[Role::Lo, Role::Loa, Role::Admin]),
        Action::DeleteLoan => user.has_role(Role::Admin),
        Action::ListExternalLeads => {
            user.has_any_role(&[Role::Lo, Role::ProductionPartner, Role::Admin])
        }
        Action::ImportLead | Action::SyncLead => {
            user.has_any_role(&[Role::Lo, Role::Loa, Role::Admin])
        }
        Action::ViewLeadSources => user.has_any_role(&[Role::ProductionPartner, Role::Admin]),
        Action::ManageLeadSources => user.has_role(Role::Admin),
        Action::ManageUsers => user.has_role(Role::Admin),
        Action::SendNotifications => user.has_role(Role::Admin),
    }
}

/// May `user` mutate a row authored by `author_id`? Authors always may,
/// admins may regardless.
pub fn may_mutate_owned(user: &AuthenticatedUser, author_id: Uuid) -> bool {
    user.user_id == author_id || user.is_admin()
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn user_with(role: Option<Role>, permissions: Vec<Role>) -> AuthenticatedUser {
        AuthenticatedUser {
            user_id: Uuid::new_v4(),
            email: "officer@example.com".to_string(),
            name: "Officer".to_string(),
            role,
            permissions,
        }
    }

    #[test]
    fn lo_scope_is_officer_restricted() {
        let user = user_with(Some(Role::Lo), vec![Role::Lo]);
        assert_eq!(loan_scope(&user), LoanScope::Officer(user.user_id));
        assert!(loan_scope(&user).permits(user.user_id));
        assert!(!loan_scope(&user).permits(Uuid::new_v4()));
    }

    #[test]
    fn unknown_role_fails_closed() {
        let user = user_with(None, vec![]);
        assert_eq!(loan_scope(&user), LoanScope::Nothing);
        assert!(!loan_scope(&user).permits(user.user_id));
        assert!(!can(&user, Action::CreateLoan));
        assert!(!can(&user, Action::ManageUsers));
    }

    #[test]
    fn permissions_extend_primary_role() {
        let user = user_with(Some(Role::Loa), vec![Role::Loa, Role::Admin]);
        assert!(can(&user, Action::DeleteLoan));
        assert!(can(&user, Action::ManageUsers));
    }

    #[test]
    fn delete_loan_is_admin_only() {
        let lo = user_with(Some(Role::Lo), vec![Role::Lo]);
        let admin = user_with(Some(Role::Admin), vec![Role::Admin]);
        assert!(!can(&lo, Action::DeleteLoan));
        assert!(can(&admin, Action::DeleteLoan));
    }

    #[test]
    fn admin_may_mutate_rows_of_others() {
        let admin = user_with(Some(Role::Admin), vec![Role::Admin]);
        let lo = user_with(Some(Role::Lo), vec![Role::Lo]);
        let other = Uuid::new_v4();
        assert!(may_mutate_owned(&admin, other));
        assert!(!may_mutate_owned(&lo, other));
        assert!(may_mutate_owned(&lo, lo.user_id));
    }

    #[test]
    fn role_round_trips_through_strings() {
        for role in Role::ALL {
            assert_eq!(Role::parse(role.as_str()), Some(*role));
        }
        assert_eq!(Role::parse("SUPERUSER"), None);
    }
}
