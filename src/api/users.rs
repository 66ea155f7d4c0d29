//! User directory and profile endpoints

use axum::{extract::State, Json};
use axum_extra::extract::Multipart;

use crate::{
    error::{AppError, AppResult},
    models::{
        pagination::Paginated,
        user::{UpdateProfile, User, UserQuery, UserSummary},
    },
};

use super::{
    response::{ok, ApiResponse},
    AppJson, AppQuery, AuthenticatedUser, FormData,
};

/// List users with search and pagination
pub async fn list_users(
    State(state): State<crate::AppState>,
    AuthenticatedUser(_): AuthenticatedUser,
    AppQuery(query): AppQuery<UserQuery>,
) -> AppResult<Json<ApiResponse<Paginated<UserSummary>>>> {
    let users = state.services.users.search_users(&query).await?;
    Ok(ok("Users fetched successfully", users))
}

/// Get own profile
pub async fn get_profile(
    State(state): State<crate::AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
) -> AppResult<Json<ApiResponse<User>>> {
    let user = state.services.users.get_by_id(user_id).await?;
    Ok(ok("Profile fetched successfully", user))
}

/// Update own profile
pub async fn update_profile(
    State(state): State<crate::AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    AppJson(profile): AppJson<UpdateProfile>,
) -> AppResult<Json<ApiResponse<User>>> {
    let user = state.services.users.update_profile(user_id, profile).await?;
    Ok(ok("Profile updated successfully", user))
}

/// Upload a new avatar (multipart `avatar` file)
pub async fn upload_avatar(
    State(state): State<crate::AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    multipart: Multipart,
) -> AppResult<Json<ApiResponse<User>>> {
    let mut form = FormData::read(multipart).await?;
    let upload = form
        .take_file("avatar")
        .ok_or_else(|| AppError::BadRequest("Avatar file is required".to_string()))?;

    let user = state.services.users.set_avatar(user_id, &upload).await?;
    Ok(ok("Avatar updated successfully", user))
}

/// Remove own avatar
pub async fn remove_avatar(
    State(state): State<crate::AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
) -> AppResult<Json<ApiResponse<User>>> {
    let user = state.services.users.clear_avatar(user_id).await?;
    Ok(ok("Avatar removed successfully", user))
}
