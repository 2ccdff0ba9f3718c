//! User Management Handlers
//!
//! Staff accounts inside one pharmacy. Administrators manage everyone; other
//! users can only read and edit their own record and profile.

use std::path::Path as FsPath;

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use pharmy_database::{UserFilter, UserRepository};
use pharmy_models::{
    normalize_email, AuditAction, AuditEntry, CreateUser, Page, PageRequest, Profile, UpdateProfile,
    UpdateUser, User, UserRole,
};
use pharmy_utils::{sanitize_file_name, validate_file_size, validate_model, PharmyError, PharmyResult};

use super::{parse_field, record_audit, search_term};
use crate::middleware::{enforce_limit, load_tenant, AuthUser};
use crate::AppState;

const DEFAULT_USER_PAGE_SIZE: i64 = 10;
const MAX_PROFILE_IMAGE_SIZE: u64 = 5 * 1024 * 1024;
const PROFILE_IMAGE_DIR: &str = "profile-images";

#[derive(Debug, Deserialize)]
pub struct ListUsersQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub role: Option<String>,
    pub search: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ProfileImageResponse {
    pub success: bool,
    pub image_url: String,
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct UserWithProfile {
    #[serde(flatten)]
    pub user: User,
    pub profile: Option<Profile>,
}

/// GET /api/v1/users
pub async fn list_users(
    State(state): State<AppState>,
    caller: AuthUser,
    Query(query): Query<ListUsersQuery>,
) -> PharmyResult<Json<Page<User>>> {
    caller.require_admin()?;

    let page = PageRequest::new(query.page, query.limit, DEFAULT_USER_PAGE_SIZE);
    let filter = UserFilter {
        role: parse_field(query.role.as_deref(), "role", UserRole::from_str)?,
        search: search_term(query.search),
    };

    let (users, total) = UserRepository::new(state.pool.clone())
        .list(caller.tenant_id, &filter, page)
        .await?;
    Ok(Json(Page::new(users, page, total)))
}

/// POST /api/v1/users
pub async fn create_user(
    State(state): State<AppState>,
    caller: AuthUser,
    Json(request): Json<CreateUser>,
) -> PharmyResult<(StatusCode, Json<User>)> {
    caller.require_admin()?;
    validate_model(&request)?;

    let role = UserRole::from_str(&request.role)
        .ok_or_else(|| PharmyError::validation("role", "Role must be USER, PHARMACIST or ADMIN"))?;

    let users = UserRepository::new(state.pool.clone());
    let email = normalize_email(&request.email);
    if users.find_by_email(&email).await?.is_some() {
        return Err(PharmyError::conflict("A user with this email already exists"));
    }

    let context = load_tenant(&state, &caller).await?;
    if let Some(resource) = role.limited_resource() {
        let current = users.count_active_by_role(caller.tenant_id, role, None).await?;
        enforce_limit(&state, context.tier, resource, current)?;
    }

    let mut user = User::new(
        caller.tenant_id,
        request.name.trim().to_string(),
        email,
        role,
        state.hasher.hash(&request.password),
    );
    user.phone_number = request.phone_number;
    users.create(&user).await?;

    tracing::info!(user_id = %user.id, role = %role, created_by = %caller.user_id, "User created");
    Ok((StatusCode::CREATED, Json(user)))
}

/// GET /api/v1/users/:id
pub async fn get_user(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<Uuid>,
) -> PharmyResult<Json<UserWithProfile>> {
    if !caller.can_manage(id) {
        return Err(PharmyError::forbidden());
    }

    let users = UserRepository::new(state.pool.clone());
    let user = users
        .find_by_id(caller.tenant_id, id)
        .await?
        .ok_or_else(|| PharmyError::not_found("User"))?;
    let profile = users.find_profile(id).await?;

    Ok(Json(UserWithProfile { user, profile }))
}

/// Self-service edits cover name, phone and profile; role and activation
/// changes are administrator only.
///
/// PUT /api/v1/users/:id
pub async fn update_user(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateUser>,
) -> PharmyResult<Json<UserWithProfile>> {
    if !caller.can_manage(id) {
        return Err(PharmyError::forbidden());
    }
    if (request.role.is_some() || request.is_active.is_some()) && !caller.is_admin() {
        return Err(PharmyError::forbidden());
    }
    validate_model(&request)?;

    let new_role = parse_field(request.role.as_deref(), "role", UserRole::from_str)?;

    let users = UserRepository::new(state.pool.clone());
    let mut user = users
        .find_by_id(caller.tenant_id, id)
        .await?
        .ok_or_else(|| PharmyError::not_found("User"))?;
    let previous = user.clone();

    if let Some(profile) = &request.profile {
        if user.role == UserRole::User && profile.has_professional_fields() {
            return Err(PharmyError::forbidden());
        }
    }

    if let Some(name) = &request.name {
        user.name = name.trim().to_string();
    }
    if let Some(phone) = &request.phone_number {
        user.phone_number = Some(phone.clone());
    }
    if let Some(role) = new_role {
        user.role = role;
    }
    if let Some(is_active) = request.is_active {
        user.is_active = is_active;
    }

    guard_last_admin(&users, &previous, &user).await?;

    // A user who gains a seat (new role or reactivation) counts against the tier.
    let gains_seat = user.is_active && (!previous.is_active || previous.role != user.role);
    if gains_seat {
        if let Some(resource) = user.role.limited_resource() {
            let context = load_tenant(&state, &caller).await?;
            let current = users
                .count_active_by_role(caller.tenant_id, user.role, Some(user.id))
                .await?;
            enforce_limit(&state, context.tier, resource, current)?;
        }
    }

    users.update(&user).await?;

    let profile = match &request.profile {
        Some(update) => Some(save_profile(&users, user.id, update).await?),
        None => users.find_profile(user.id).await?,
    };

    if previous.role != user.role {
        record_audit(
            &state,
            AuditEntry::new(
                caller.tenant_id,
                AuditAction::UserRoleChanged,
                "user",
                user.id,
                Some(caller.user_id),
                json!({ "from": previous.role.as_str(), "to": user.role.as_str() }),
            ),
        )
        .await;
    }
    if previous.is_active && !user.is_active {
        record_audit(
            &state,
            AuditEntry::new(
                caller.tenant_id,
                AuditAction::UserDeactivated,
                "user",
                user.id,
                Some(caller.user_id),
                json!({ "email": user.email }),
            ),
        )
        .await;
    }

    Ok(Json(UserWithProfile { user, profile }))
}

/// Deactivates the account; history keeps pointing at it.
///
/// DELETE /api/v1/users/:id
pub async fn delete_user(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<Uuid>,
) -> PharmyResult<Json<serde_json::Value>> {
    caller.require_admin()?;
    if id == caller.user_id {
        return Err(PharmyError::validation("id", "You cannot delete your own account"));
    }

    let users = UserRepository::new(state.pool.clone());
    let user = users
        .find_by_id(caller.tenant_id, id)
        .await?
        .ok_or_else(|| PharmyError::not_found("User"))?;

    let mut deactivated = user.clone();
    deactivated.is_active = false;
    guard_last_admin(&users, &user, &deactivated).await?;

    if !users.deactivate(caller.tenant_id, id).await? {
        return Err(PharmyError::not_found("User"));
    }

    if user.is_active {
        record_audit(
            &state,
            AuditEntry::new(
                caller.tenant_id,
                AuditAction::UserDeactivated,
                "user",
                id,
                Some(caller.user_id),
                json!({ "email": user.email }),
            ),
        )
        .await;
    }

    tracing::info!(user_id = %id, by = %caller.user_id, "User deactivated");
    Ok(Json(json!({ "message": "User deactivated successfully" })))
}

/// GET /api/v1/users/profile
pub async fn get_profile(
    State(state): State<AppState>,
    caller: AuthUser,
) -> PharmyResult<Json<UserWithProfile>> {
    let users = UserRepository::new(state.pool.clone());
    let user = users
        .find_by_id(caller.tenant_id, caller.user_id)
        .await?
        .ok_or_else(|| PharmyError::not_found("User"))?;
    let profile = users.find_profile(caller.user_id).await?.unwrap_or(Profile {
        user_id: caller.user_id,
        ..Profile::default()
    });

    Ok(Json(UserWithProfile {
        user,
        profile: Some(profile),
    }))
}

/// PUT /api/v1/users/profile
pub async fn update_profile(
    State(state): State<AppState>,
    caller: AuthUser,
    Json(request): Json<UpdateProfile>,
) -> PharmyResult<Json<Profile>> {
    validate_model(&request)?;
    if caller.role == UserRole::User && request.has_professional_fields() {
        return Err(PharmyError::forbidden());
    }

    let users = UserRepository::new(state.pool.clone());
    let profile = save_profile(&users, caller.user_id, &request).await?;
    Ok(Json(profile))
}

/// Store a profile picture for the caller (multipart field `image`)
///
/// POST /api/v1/uploads/profile-image
pub async fn upload_profile_image(
    State(state): State<AppState>,
    caller: AuthUser,
    mut multipart: Multipart,
) -> PharmyResult<Json<ProfileImageResponse>> {
    let mut image = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| PharmyError::validation("image", format!("Failed to read upload: {}", e)))?
    {
        if field.name() != Some("image") {
            continue;
        }
        let file_name = field.file_name().unwrap_or("image").to_string();
        let content_type = field.content_type().unwrap_or_default().to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| PharmyError::validation("image", format!("Failed to read file data: {}", e)))?;
        image = Some((file_name, content_type, data));
    }

    let (file_name, content_type, data) =
        image.ok_or_else(|| PharmyError::validation("image", "No file uploaded"))?;
    check_profile_image(&content_type, data.len() as u64)?;

    let stored_name = format!(
        "{}-{}-{}",
        caller.user_id,
        Utc::now().timestamp_millis(),
        sanitize_file_name(&file_name)
    );
    let dir = FsPath::new(&state.config.uploads.storage_dir).join(PROFILE_IMAGE_DIR);
    let written = async {
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join(&stored_name), &data).await
    }
    .await;
    if let Err(err) = written {
        tracing::error!(error = %err, user_id = %caller.user_id, "Failed to store profile image");
        return Err(PharmyError::internal("Failed to store uploaded file"));
    }

    let image_url = format!("{}/{}", PROFILE_IMAGE_DIR, stored_name);
    let users = UserRepository::new(state.pool.clone());
    let mut profile = users.find_profile(caller.user_id).await?.unwrap_or(Profile {
        user_id: caller.user_id,
        ..Profile::default()
    });
    profile.image_url = Some(image_url.clone());
    users.upsert_profile(&profile).await?;

    tracing::info!(user_id = %caller.user_id, size = data.len(), "Profile image uploaded");
    Ok(Json(ProfileImageResponse {
        success: true,
        image_url,
        message: "Image uploaded successfully",
    }))
}

fn check_profile_image(content_type: &str, size: u64) -> PharmyResult<()> {
    if !content_type.starts_with("image/") {
        return Err(PharmyError::validation("image", "File must be an image"));
    }
    if size > MAX_PROFILE_IMAGE_SIZE {
        return Err(PharmyError::validation("image", "File size must be less than 5MB"));
    }
    validate_file_size(size, MAX_PROFILE_IMAGE_SIZE)
}

async fn save_profile(users: &UserRepository, user_id: Uuid, update: &UpdateProfile) -> PharmyResult<Profile> {
    let mut profile = users.find_profile(user_id).await?.unwrap_or(Profile {
        user_id,
        ..Profile::default()
    });
    update.apply_to(&mut profile);
    users.upsert_profile(&profile).await?;
    Ok(profile)
}

/// Refuses a change that would leave the tenant without an active administrator.
async fn guard_last_admin(users: &UserRepository, before: &User, after: &User) -> PharmyResult<()> {
    let was_admin = before.is_active && before.role == UserRole::Admin;
    let still_admin = after.is_active && after.role == UserRole::Admin;
    if was_admin && !still_admin {
        let others = users
            .count_active_by_role(before.tenant_id, UserRole::Admin, Some(before.id))
            .await?;
        if others == 0 {
            return Err(PharmyError::conflict(
                "The last active administrator cannot be demoted or deactivated",
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_image_checks() {
        assert!(check_profile_image("image/png", 1024).is_ok());
        assert!(check_profile_image("image/jpeg", MAX_PROFILE_IMAGE_SIZE).is_ok());

        let err = check_profile_image("application/pdf", 1024).unwrap_err();
        assert!(err.to_string().contains("File must be an image"));

        let err = check_profile_image("image/png", MAX_PROFILE_IMAGE_SIZE + 1).unwrap_err();
        assert!(err.to_string().contains("less than 5MB"));

        assert!(check_profile_image("image/png", 0).is_err());
    }
}
