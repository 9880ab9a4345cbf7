pub mod jwt;
pub mod password;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::headers::{authorization::Bearer, Authorization};
use axum_extra::TypedHeader;
use diesel::prelude::*;
use serde::Serialize;
use uuid::Uuid;

use crate::{
    access::Role,
    error::AppError,
    models::User,
    schema::users,
    state::AppState,
};

/// The bearer token only carries the user id; role, permissions, and the
/// active flag are resolved against the users table on every request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub email: String,
    pub name: String,
    pub role: Option<Role>,
    pub permissions: Vec<Role>,
}

impl AuthenticatedUser {
    pub fn from_user(user: &User) -> Self {
        Self {
            user_id: user.id,
            email: user.email.clone(),
            name: user.name.clone(),
            role: Role::parse(&user.primary_role),
            permissions: user
                .permissions
                .iter()
                .filter_map(|value| Role::parse(value))
                .collect(),
        }
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.role == Some(role) || self.permissions.contains(&role)
    }

    pub fn has_any_role(&self, roles: &[Role]) -> bool {
        roles.iter().any(|role| self.has_role(*role))
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(Role::Admin)
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| AppError::unauthorized())?;

        let claims = state
            .jwt
            .verify_token(bearer.token())
            .map_err(|_| AppError::unauthorized())?;

        let mut conn = state.db()?;
        let user: User = users::table
            .find(claims.sub)
            .first(&mut conn)
            .optional()?
            .ok_or_else(AppError::unauthorized)?;

        if !user.is_active {
            return Err(AppError::unauthorized());
        }

        Ok(AuthenticatedUser::from_user(&user))
    }
}
