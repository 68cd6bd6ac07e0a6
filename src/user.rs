use crate::time::Timestamp;

#[derive(Debug, Clone)]
#[cfg_attr(feature = "backend-sql", derive(sqlx::FromRow))]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub pwhash: String,
    pub remember_me: bool,
    pub created_at: Timestamp,
    /// Only set while a remembered login is active
    pub session_id: Option<String>,
}
