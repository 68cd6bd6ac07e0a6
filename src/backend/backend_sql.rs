use std::path::{Path, PathBuf};

use log::{error, info};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};
use sqlx::{query, query_as, query_scalar, Pool, Sqlite};

use crate::backend::FindError;
use crate::note::Note;
use crate::user::User;

type Result<T> = std::result::Result<T, ()>;

pub struct Backend(pub Pool<Sqlite>);

const USER_COLUMNS: &str = "id, username, email, pwhash, remember_me, created_at, session_id";
const NOTE_COLUMNS: &str = "id, user_id, title, content, created_at, updated_at";

fn into_sql(path: &Path) -> PathBuf {
    path.join("notes.sql")
}

impl Backend {
    pub async fn new(data_dir: &Path) -> Result<Self> {
        let db_path = into_sql(data_dir);
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true);

        let pool = SqlitePool::connect_with(options).await.map_err(|e| {
            error!("couldn't open {db_path:?}: {e}");
        })?;
        info!("Using {db_path:?}");

        Self::migrated(pool).await
    }

    pub async fn migrated(pool: Pool<Sqlite>) -> Result<Self> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| {
                error!("migration: {e}");
            })?;

        Ok(Self(pool))
    }
}

fn find_error(e: sqlx::Error) -> FindError {
    if matches!(e, sqlx::Error::RowNotFound) {
        FindError::NotFound
    } else {
        error!("find user: {e}");
        FindError::Internal
    }
}

impl Backend {
    async fn find_user(
        &self,
        column: &str,
        value: &str,
        case_insensitive: bool,
    ) -> std::result::Result<User, FindError> {
        let sql = if case_insensitive {
            format!("SELECT {USER_COLUMNS} FROM users WHERE lower({column}) = lower(?)")
        } else {
            format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = ?")
        };

        query_as::<_, User>(&sql)
            .bind(value)
            .fetch_one(&self.0)
            .await
            .map_err(find_error)
    }

    pub async fn find_user_by_email(
        &self,
        email: &str,
        case_insensitive: bool,
    ) -> std::result::Result<User, FindError> {
        self.find_user("email", email, case_insensitive).await
    }

    pub async fn find_user_by_username(
        &self,
        username: &str,
        case_insensitive: bool,
    ) -> std::result::Result<User, FindError> {
        self.find_user("username", username, case_insensitive).await
    }

    pub async fn insert_user(&self, user: &User) -> Result<()> {
        query(
            "
            INSERT INTO users
            (id, username, email, pwhash, remember_me, created_at, session_id)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(&user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.pwhash)
        .bind(user.remember_me)
        .bind(user.created_at)
        .bind(&user.session_id)
        .execute(&self.0)
        .await
        .map(|_| ())
        .map_err(|e| {
            error!("insert user {}: {e}", user.username);
        })
    }

    pub async fn update_password(&self, user_id: &str, pwhash: &str) -> Result<()> {
        let result = query("UPDATE users SET pwhash = ? WHERE id = ?")
            .bind(pwhash)
            .bind(user_id)
            .execute(&self.0)
            .await
            .map_err(|e| {
                error!("update password for {user_id}: {e}");
            })?;

        if result.rows_affected() == 0 {
            error!("update password: no user {user_id}");
            return Err(());
        }
        Ok(())
    }

    /// session_id: set to None to forget a remembered login / make NULL
    pub async fn update_session(
        &self,
        user_id: &str,
        session_id: Option<&str>,
        remember_me: bool,
    ) -> bool {
        query(
            "
            UPDATE users
            SET session_id = ?, remember_me = ?
            WHERE id = ?
            ",
        )
        .bind(session_id)
        .bind(remember_me)
        .bind(user_id)
        .execute(&self.0)
        .await
        .map_err(|e| {
            error!("update session: {e}");
            e
        })
        .map(|result| result.rows_affected() == 1)
        .unwrap_or(false)
    }

    pub async fn users_with_session(&self, session_id: &str) -> Result<Vec<User>> {
        query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE session_id = ?"
        ))
        .bind(session_id)
        .fetch_all(&self.0)
        .await
        .map_err(|e| {
            error!("couldn't query for session {session_id}: {e:?}");
        })
    }

    pub async fn user_count(&self) -> Result<usize> {
        query_scalar::<_, i64>("SELECT COUNT(*) FROM users")
            .fetch_one(&self.0)
            .await
            .map(|n| n as usize)
            .map_err(|e| {
                error!("count users: {e}");
            })
    }
}

impl Backend {
    pub async fn notes_for_user(&self, user_id: &str) -> Result<Vec<Note>> {
        query_as::<_, Note>(&format!(
            "SELECT {NOTE_COLUMNS} FROM notes WHERE user_id = ?"
        ))
        .bind(user_id)
        .fetch_all(&self.0)
        .await
        .map_err(|e| {
            error!("notes for {user_id}: {e}");
        })
    }

    /// Inserts `note`, or replaces the note with the same id.
    pub async fn upsert_note(&self, note: &Note) -> Result<()> {
        query(
            "
            INSERT INTO notes
            (id, user_id, title, content, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                title = excluded.title,
                content = excluded.content,
                updated_at = excluded.updated_at
            WHERE notes.user_id = excluded.user_id
            ",
        )
        .bind(&note.id)
        .bind(&note.user_id)
        .bind(&note.title)
        .bind(&note.content)
        .bind(note.created_at)
        .bind(note.updated_at)
        .execute(&self.0)
        .await
        .map(|_| ())
        .map_err(|e| {
            error!("upsert note {}: {e}", note.id);
        })
    }

    /// Returns false if there was no such note.
    pub async fn delete_note(&self, user_id: &str, note_id: &str) -> Result<bool> {
        query("DELETE FROM notes WHERE id = ? AND user_id = ?")
            .bind(note_id)
            .bind(user_id)
            .execute(&self.0)
            .await
            .map(|result| result.rows_affected() > 0)
            .map_err(|e| {
                error!("delete note {note_id}: {e}");
            })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::backend::test::create_backend;
    use crate::time::Timestamp;

    fn user(id: &str, username: &str, email: &str) -> User {
        User {
            id: id.into(),
            username: username.into(),
            email: email.into(),
            pwhash: "salt$hash".into(),
            remember_me: false,
            created_at: Timestamp::from_millis(1_000),
            session_id: None,
        }
    }

    fn note(id: &str, user_id: &str, title: &str) -> Note {
        Note {
            id: id.into(),
            user_id: user_id.into(),
            title: title.into(),
            content: "content".into(),
            created_at: Timestamp::from_millis(1),
            updated_at: Timestamp::from_millis(1),
        }
    }

    #[tokio::test]
    async fn find_users() {
        let (_dir, backend) = create_backend().await;

        backend.insert_user(&user("u1", "John Doe", "john@example.com")).await.unwrap();
        backend.insert_user(&user("u2", "Jane Smith", "jane@example.com")).await.unwrap();

        let found = backend.find_user_by_email("jane@example.com", false).await.unwrap();
        assert_eq!(found.id, "u2");
        assert_eq!(found.created_at, Timestamp::from_millis(1_000));

        assert!(matches!(
            backend.find_user_by_email("JANE@example.com", false).await,
            Err(FindError::NotFound)
        ));
        assert!(backend.find_user_by_email("JANE@example.com", true).await.is_ok());
        assert!(backend.find_user_by_username("john doe", true).await.is_ok());

        assert_eq!(backend.user_count().await, Ok(2));
    }

    #[tokio::test]
    async fn duplicate_email_is_refused() {
        let (_dir, backend) = create_backend().await;

        backend.insert_user(&user("u1", "John Doe", "john@example.com")).await.unwrap();
        assert!(backend.insert_user(&user("u2", "Other", "john@example.com")).await.is_err());
    }

    #[tokio::test]
    async fn remembered_sessions() {
        let (_dir, backend) = create_backend().await;
        backend.insert_user(&user("u1", "John Doe", "john@example.com")).await.unwrap();

        assert!(backend.update_session("u1", Some("s1"), true).await);
        let users = backend.users_with_session("s1").await.unwrap();
        assert_eq!(users.len(), 1);
        assert!(users[0].remember_me);

        assert!(backend.update_session("u1", None, false).await);
        assert!(backend.users_with_session("s1").await.unwrap().is_empty());

        assert!(!backend.update_session("nobody", Some("s2"), true).await);
    }

    #[tokio::test]
    async fn notes_are_per_user() {
        let (_dir, backend) = create_backend().await;
        backend.insert_user(&user("u1", "John Doe", "john@example.com")).await.unwrap();
        backend.insert_user(&user("u2", "Jane Smith", "jane@example.com")).await.unwrap();

        backend.upsert_note(&note("n1", "u1", "first")).await.unwrap();
        backend.upsert_note(&note("n2", "u2", "second")).await.unwrap();
        backend.upsert_note(&note("n1", "u1", "first, edited")).await.unwrap();

        // another user's id can't overwrite the note
        backend.upsert_note(&note("n1", "u2", "hijacked")).await.unwrap();

        let notes = backend.notes_for_user("u1").await.unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].title, "first, edited");

        assert_eq!(backend.delete_note("u1", "n2").await, Ok(false));
        assert_eq!(backend.delete_note("u2", "n2").await, Ok(true));
        assert!(backend.notes_for_user("u2").await.unwrap().is_empty());
    }
}
