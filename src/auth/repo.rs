use crate::auth::repo_types::User;
use sqlx::PgPool;
use uuid::Uuid;

/// Fields required to insert a user.
pub struct NewUser<'a> {
    pub username: &'a str,
    pub name: &'a str,
    pub student_id: &'a str,
    pub class_name: &'a str,
    pub grade: &'a str,
    pub email: &'a str,
    pub phone: &'a str,
    pub password_hash: &'a str,
    pub is_member: bool,
}

impl User {
    /// Find a user by email.
    pub async fn find_by_email(db: &PgPool, email: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, name, student_id, class_name, grade, email, phone,
                   password_hash, is_admin, is_super_admin, is_member, points, created_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    /// Find a user by username.
    pub async fn find_by_username(db: &PgPool, username: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, name, student_id, class_name, grade, email, phone,
                   password_hash, is_admin, is_super_admin, is_member, points, created_at
            FROM users
            WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    /// Find a user by id.
    pub async fn find_by_id(db: &PgPool, id: Uuid) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, name, student_id, class_name, grade, email, phone,
                   password_hash, is_admin, is_super_admin, is_member, points, created_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    /// Any existing user already holding one of the unique identity fields.
    pub async fn find_conflicting(
        db: &PgPool,
        username: &str,
        email: &str,
        student_id: &str,
    ) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, name, student_id, class_name, grade, email, phone,
                   password_hash, is_admin, is_super_admin, is_member, points, created_at
            FROM users
            WHERE username = $1 OR email = $2 OR student_id = $3
            "#,
        )
        .bind(username)
        .bind(email)
        .bind(student_id)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    /// Create a new user with hashed password.
    pub async fn create(db: &PgPool, new: &NewUser<'_>) -> anyhow::Result<User> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (username, name, student_id, class_name, grade, email, phone,
                               password_hash, is_member)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id, username, name, student_id, class_name, grade, email, phone,
                      password_hash, is_admin, is_super_admin, is_member, points, created_at
            "#,
        )
        .bind(new.username)
        .bind(new.name)
        .bind(new.student_id)
        .bind(new.class_name)
        .bind(new.grade)
        .bind(new.email)
        .bind(new.phone)
        .bind(new.password_hash)
        .bind(new.is_member)
        .fetch_one(db)
        .await?;
        Ok(user)
    }

    /// Overwrite the stored credential for `id`.
    pub async fn update_password(db: &PgPool, id: Uuid, password_hash: &str) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE users SET password_hash = $1
            WHERE id = $2
            "#,
        )
        .bind(password_hash)
        .bind(id)
        .execute(db)
        .await?;
        Ok(())
    }
}
