//! User Repository
//!
//! Users and their profiles. Lookups by id are always tenant-scoped; email is
//! globally unique so login can resolve the tenant from it.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use pharmy_models::{normalize_email, PageRequest, Profile, User, UserRole};

const USER_COLUMNS: &str = "id, tenant_id, name, email, phone_number, role, is_active, \
                            password_hash, last_login_at, created_at, updated_at";

/// Filters for the user listing.
#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    pub role: Option<UserRole>,
    pub search: Option<String>,
}

pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<User>> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            "SELECT {} FROM users WHERE tenant_id = $1 AND id = $2",
            USER_COLUMNS
        ))
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch user by ID")?;

        Ok(row.map(|r| r.into()))
    }

    /// Not tenant-scoped: used by login and the duplicate-email check.
    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            "SELECT {} FROM users WHERE email = $1",
            USER_COLUMNS
        ))
        .bind(normalize_email(email))
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch user by email")?;

        Ok(row.map(|r| r.into()))
    }

    pub async fn create(&self, user: &User) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, tenant_id, name, email, phone_number, role, is_active,
                               password_hash, last_login_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(user.id)
        .bind(user.tenant_id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.phone_number)
        .bind(user.role.as_str())
        .bind(user.is_active)
        .bind(&user.password_hash)
        .bind(user.last_login_at)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert user")?;

        Ok(())
    }

    /// Writes name, phone, role and active flag back.
    pub async fn update(&self, user: &User) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET name = $3, phone_number = $4, role = $5, is_active = $6, updated_at = NOW()
            WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(user.tenant_id)
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.phone_number)
        .bind(user.role.as_str())
        .bind(user.is_active)
        .execute(&self.pool)
        .await
        .context("Failed to update user")?;

        Ok(())
    }

    pub async fn list(
        &self,
        tenant_id: Uuid,
        filter: &UserFilter,
        page: PageRequest,
    ) -> Result<(Vec<User>, i64)> {
        let role = filter.role.map(|r| r.as_str());
        let search = filter.search.as_deref().map(like_pattern);

        let rows: Vec<UserRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM users
            WHERE tenant_id = $1
              AND ($2::text IS NULL OR role = $2)
              AND ($3::text IS NULL OR name ILIKE $3 OR email ILIKE $3)
            ORDER BY created_at DESC
            LIMIT $4 OFFSET $5
            "#,
            USER_COLUMNS
        ))
        .bind(tenant_id)
        .bind(role)
        .bind(&search)
        .bind(page.limit)
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list users")?;

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM users
            WHERE tenant_id = $1
              AND ($2::text IS NULL OR role = $2)
              AND ($3::text IS NULL OR name ILIKE $3 OR email ILIKE $3)
            "#,
        )
        .bind(tenant_id)
        .bind(role)
        .bind(&search)
        .fetch_one(&self.pool)
        .await
        .context("Failed to count users")?;

        Ok((rows.into_iter().map(|r| r.into()).collect(), total))
    }

    /// Active users holding `role`, optionally not counting one user.
    pub async fn count_active_by_role(
        &self,
        tenant_id: Uuid,
        role: UserRole,
        excluding: Option<Uuid>,
    ) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM users
            WHERE tenant_id = $1 AND role = $2 AND is_active = TRUE
              AND ($3::uuid IS NULL OR id <> $3)
            "#,
        )
        .bind(tenant_id)
        .bind(role.as_str())
        .bind(excluding)
        .fetch_one(&self.pool)
        .await
        .context("Failed to count users by role")?;

        Ok(count)
    }

    pub async fn list_active_admins(&self, tenant_id: Uuid) -> Result<Vec<User>> {
        let rows: Vec<UserRow> = sqlx::query_as(&format!(
            "SELECT {} FROM users WHERE tenant_id = $1 AND role = 'ADMIN' AND is_active = TRUE ORDER BY created_at",
            USER_COLUMNS
        ))
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list tenant administrators")?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    /// Returns false when the user does not exist in the tenant.
    pub async fn update_password(&self, tenant_id: Uuid, id: Uuid, password_hash: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE users SET password_hash = $3, updated_at = NOW() WHERE tenant_id = $1 AND id = $2",
        )
        .bind(tenant_id)
        .bind(id)
        .bind(password_hash)
        .execute(&self.pool)
        .await
        .context("Failed to update password")?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn touch_last_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE users SET last_login_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await
            .context("Failed to record last login")?;
        Ok(())
    }

    /// Soft delete. Returns false when the user does not exist in the tenant.
    pub async fn deactivate(&self, tenant_id: Uuid, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE users SET is_active = FALSE, updated_at = NOW() WHERE tenant_id = $1 AND id = $2",
        )
        .bind(tenant_id)
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to deactivate user")?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn find_profile(&self, user_id: Uuid) -> Result<Option<Profile>> {
        let row: Option<ProfileRow> = sqlx::query_as(
            r#"
            SELECT user_id, phone, specialization, address, license_number,
                   qualifications, experience, bio, image_url
            FROM profiles
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch profile")?;

        Ok(row.map(|r| r.into()))
    }

    pub async fn upsert_profile(&self, profile: &Profile) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO profiles (user_id, phone, specialization, address, license_number,
                                  qualifications, experience, bio, image_url, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW())
            ON CONFLICT (user_id) DO UPDATE SET
                phone = EXCLUDED.phone,
                specialization = EXCLUDED.specialization,
                address = EXCLUDED.address,
                license_number = EXCLUDED.license_number,
                qualifications = EXCLUDED.qualifications,
                experience = EXCLUDED.experience,
                bio = EXCLUDED.bio,
                image_url = EXCLUDED.image_url,
                updated_at = NOW()
            "#,
        )
        .bind(profile.user_id)
        .bind(&profile.phone)
        .bind(&profile.specialization)
        .bind(&profile.address)
        .bind(&profile.license_number)
        .bind(&profile.qualifications)
        .bind(&profile.experience)
        .bind(&profile.bio)
        .bind(&profile.image_url)
        .execute(&self.pool)
        .await
        .context("Failed to save profile")?;

        Ok(())
    }
}

/// `%term%` for ILIKE, with LIKE wildcards in the term escaped.
pub fn like_pattern(term: &str) -> String {
    let escaped = term
        .trim()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

#[derive(Debug, FromRow)]
struct UserRow {
    id: Uuid,
    tenant_id: Uuid,
    name: String,
    email: String,
    phone_number: Option<String>,
    role: String,
    is_active: bool,
    password_hash: String,
    last_login_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            tenant_id: row.tenant_id,
            name: row.name,
            email: row.email,
            phone_number: row.phone_number,
            role: UserRole::from_str(&row.role).unwrap_or(UserRole::User),
            is_active: row.is_active,
            password_hash: row.password_hash,
            last_login_at: row.last_login_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct ProfileRow {
    user_id: Uuid,
    phone: Option<String>,
    specialization: Option<String>,
    address: Option<String>,
    license_number: Option<String>,
    qualifications: Option<String>,
    experience: Option<String>,
    bio: Option<String>,
    image_url: Option<String>,
}

impl From<ProfileRow> for Profile {
    fn from(row: ProfileRow) -> Self {
        Self {
            user_id: row.user_id,
            phone: row.phone,
            specialization: row.specialization,
            address: row.address,
            license_number: row.license_number,
            qualifications: row.qualifications,
            experience: row.experience,
            bio: row.bio,
            image_url: row.image_url,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern(" para "), "%para%");
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
    }

    proptest! {
        #[test]
        fn prop_like_pattern_has_no_bare_wildcards(term in "[a-z%_\\\\ ]{0,20}") {
            let pattern = like_pattern(&term);
            let inner = &pattern[1..pattern.len() - 1];
            let mut chars = inner.chars();
            while let Some(c) = chars.next() {
                if c == '\\' {
                    let next = chars.next();
                    prop_assert!(matches!(next, Some('\\' | '%' | '_')));
                } else {
                    prop_assert!(c != '%' && c != '_');
                }
            }
        }
    }

    #[test]
    fn test_unknown_role_reads_as_user() {
        let now = Utc::now();
        let row = UserRow {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            name: "Asha".to_string(),
            email: "asha@example.com".to_string(),
            phone_number: None,
            role: "OWNER".to_string(),
            is_active: true,
            password_hash: "x".to_string(),
            last_login_at: None,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(User::from(row).role, UserRole::User);
    }
}
