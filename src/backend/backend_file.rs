use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};

use log::{error, info, warn};

use crate::backend::FindError;
use crate::note::Note;
use crate::policy::same_key;
use crate::time::Timestamp;
use crate::user::User;

mod kv;
use kv::KeyValues;

const USER_KEYS: &[&str] = &["username", "email", "pwhash", "remember_me", "created_at"];

macro_rules! path {
    ($root: expr, $($components: expr),*) => {
        {
            let mut p = $root.clone();
            path!(@internal, p, $($components),*);
            p
        }
    };
    (@internal, $p:expr, $next:expr, $($rest: expr),*) => {
        $p.push($next);
        path!(@internal, $p, $($rest),*);
    };
    (@internal, $p:expr, $next:expr) => {
        $p.push($next);
    };
}

pub struct Backend {
    root: PathBuf,
}

impl Backend {
    pub async fn new(data_dir: &Path) -> Result<Self, ()> {
        let root = data_dir.to_path_buf();

        fs::create_dir_all(path!(root, "users")).map_err(|e| {
            error!("couldn't create {data_dir:?}: {e:?}");
        })?;
        info!("Using {data_dir:?}");

        Ok(Self { root })
    }
}

impl Backend {
    fn read(&self, path: PathBuf, keys: &[&str]) -> Result<KeyValues, FindError> {
        let file = File::open(&path).map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                return FindError::NotFound;
            }
            error!("open \"{path:?}\": {e:?}");
            FindError::Internal
        })?;

        kv::read(file, keys)
    }

    fn read_user(&self, user_id: &str) -> Result<User, FindError> {
        let path = path!(self.root, "users", user_id, "creds.txt");
        let mut user = self.read(path, USER_KEYS)?;

        let mut take = |k: &str| user.remove(k).ok_or(FindError::Internal);
        let username = take("username")?;
        let email = take("email")?;
        let pwhash = take("pwhash")?;

        let remember_me = take("remember_me")?.parse::<bool>().map_err(|e| {
            error!("couldn't parse remember_me for {user_id}: {e:?}");
            FindError::Internal
        })?;
        let created_at = take("created_at")?.parse::<Timestamp>().map_err(|e| {
            error!("couldn't parse created_at for {user_id}: {e:?}");
            FindError::Internal
        })?;
        let session_id = user.remove("session_id");

        Ok(User {
            id: user_id.into(),
            username,
            email,
            pwhash,
            remember_me,
            created_at,
            session_id,
        })
    }

    fn write_user(&self, user: &User) -> Result<(), ()> {
        let dir = path!(self.root, "users", &user.id);
        let emap = |e: std::io::Error| {
            error!("write user \"{}\": {e:?}", user.id);
        };

        let mut kv = KeyValues::new();
        kv.insert("username".into(), user.username.clone());
        kv.insert("email".into(), user.email.clone());
        kv.insert("pwhash".into(), user.pwhash.clone());
        kv.insert("remember_me".into(), user.remember_me.to_string());
        kv.insert("created_at".into(), user.created_at.millis().to_string());
        if let Some(ref id) = user.session_id {
            kv.insert("session_id".into(), id.clone());
        }

        // nothing touches the disk until the record serialises
        let mut creds = Vec::new();
        kv::write(&mut creds, &kv).map_err(emap)?;

        fs::create_dir_all(&dir).map_err(emap)?;
        fs::write(path!(dir, "creds.txt"), creds).map_err(emap)
    }

    fn users(&self) -> Result<Vec<User>, ()> {
        let path = path!(self.root, "users");
        let mut users = vec![];

        let emap = |e: &dyn std::fmt::Debug| {
            error!("error listing users: {e:?}");
        };

        for ent in fs::read_dir(path).map_err(|e| emap(&e))? {
            let ent = ent.map_err(|e| emap(&e))?;

            let fname = ent.file_name();
            let fname = match fname.into_string() {
                Ok(x) => x,
                Err(e) => {
                    warn!("couldn't convert path into string: {e:?}");
                    continue;
                }
            };

            match self.read_user(&fname) {
                Ok(u) => users.push(u),
                Err(FindError::NotFound) => {
                    warn!("user directory \"{fname}\" has no credentials");
                }
                Err(FindError::Internal) => {
                    error!("skipping user \"{fname}\", unreadable credentials");
                }
            }
        }

        Ok(users)
    }

    fn find_user(&self, matches: impl Fn(&User) -> bool) -> Result<User, FindError> {
        self.users()
            .map_err(|()| FindError::Internal)?
            .into_iter()
            .find(matches)
            .ok_or(FindError::NotFound)
    }
}

impl Backend {
    pub async fn find_user_by_email(
        &self,
        email: &str,
        case_insensitive: bool,
    ) -> Result<User, FindError> {
        self.find_user(|u| same_key(&u.email, email, case_insensitive))
    }

    pub async fn find_user_by_username(
        &self,
        username: &str,
        case_insensitive: bool,
    ) -> Result<User, FindError> {
        self.find_user(|u| same_key(&u.username, username, case_insensitive))
    }

    pub async fn insert_user(&self, user: &User) -> Result<(), ()> {
        match self.read_user(&user.id) {
            Err(FindError::NotFound) => self.write_user(user),
            Ok(_) => {
                error!("user id {} already exists", user.id);
                Err(())
            }
            Err(FindError::Internal) => Err(()),
        }
    }

    pub async fn update_password(&self, user_id: &str, pwhash: &str) -> Result<(), ()> {
        let mut user = self.read_user(user_id).map_err(|e| {
            error!("read \"{user_id}\": {e:?}");
        })?;

        user.pwhash = pwhash.into();
        self.write_user(&user)
    }

    /// session_id: set to None to forget a remembered login
    pub async fn update_session(
        &self,
        user_id: &str,
        session_id: Option<&str>,
        remember_me: bool,
    ) -> bool {
        let mut user = match self.read_user(user_id) {
            Ok(u) => u,
            Err(e) => {
                error!("read \"{user_id}\": {e:?}");
                return false;
            }
        };

        user.session_id = session_id.map(Into::into);
        user.remember_me = remember_me;

        self.write_user(&user).is_ok()
    }

    pub async fn users_with_session(&self, session_id: &str) -> Result<Vec<User>, ()> {
        Ok(self
            .users()?
            .into_iter()
            .filter(|u| u.session_id.as_deref() == Some(session_id))
            .collect())
    }

    pub async fn user_count(&self) -> Result<usize, ()> {
        self.users().map(|users| users.len())
    }
}

impl Backend {
    fn notes_path(&self, user_id: &str) -> PathBuf {
        path!(self.root, "users", user_id, "notes.txt")
    }

    fn read_notes(&self, user_id: &str) -> Result<Vec<Note>, ()> {
        let path = self.notes_path(user_id);
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => {
                error!("open \"{path:?}\": {e:?}");
                return Err(());
            }
        };

        let mut notes = vec![];

        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| {
                error!("read \"{path:?}\": {e:?}");
            })?;
            if line.is_empty() {
                continue;
            }

            match serde_json::from_str(&line) {
                Ok(note) => notes.push(note),
                Err(e) => {
                    error!("corrupt notes for {user_id}, resetting: {e}");
                    self.write_notes(user_id, &[])?;
                    return Ok(vec![]);
                }
            }
        }

        Ok(notes)
    }

    fn write_notes(&self, user_id: &str, notes: &[Note]) -> Result<(), ()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(self.notes_path(user_id))
            .map_err(|e| {
                error!("couldn't open \"{user_id}\"'s notes: {e:?}");
            })?;

        for note in notes {
            let json = serde_json::to_string(note).map_err(|e| {
                error!("couldn't convert note to json: {e:?}");
            })?;

            writeln!(file, "{}", json).map_err(|e| {
                error!("writing \"{user_id}\" notes: {e:?}");
            })?;
        }

        Ok(())
    }

    pub async fn notes_for_user(&self, user_id: &str) -> Result<Vec<Note>, ()> {
        self.read_notes(user_id)
    }

    /// Inserts `note`, or replaces the note with the same id.
    pub async fn upsert_note(&self, note: &Note) -> Result<(), ()> {
        let mut notes = self.read_notes(&note.user_id)?;

        match notes.iter_mut().find(|n| n.id == note.id) {
            Some(existing) => *existing = note.clone(),
            None => notes.push(note.clone()),
        }

        self.write_notes(&note.user_id, &notes)
    }

    /// Returns false if there was no such note.
    pub async fn delete_note(&self, user_id: &str, note_id: &str) -> Result<bool, ()> {
        let mut notes = self.read_notes(user_id)?;
        let before = notes.len();

        notes.retain(|n| n.id != note_id);
        if notes.len() == before {
            return Ok(false);
        }

        self.write_notes(user_id, &notes).map(|()| true)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::backend::test::create_backend;

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
        assert!(!found.remember_me);

        assert!(matches!(
            backend.find_user_by_email("JANE@example.com", false).await,
            Err(FindError::NotFound)
        ));
        assert!(backend.find_user_by_email("JANE@example.com", true).await.is_ok());

        assert!(backend.find_user_by_username("john doe", true).await.is_ok());
        assert!(backend.find_user_by_username("john doe", false).await.is_err());

        assert_eq!(backend.user_count().await, Ok(2));
    }

    #[tokio::test]
    async fn duplicate_id_is_refused() {
        let (_dir, backend) = create_backend().await;

        backend.insert_user(&user("u1", "John Doe", "john@example.com")).await.unwrap();
        assert!(backend.insert_user(&user("u1", "Other", "o@example.com")).await.is_err());
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

        let notes = backend.notes_for_user("u1").await.unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].title, "first, edited");

        assert_eq!(backend.delete_note("u1", "n2").await, Ok(false));
        assert_eq!(backend.delete_note("u2", "n2").await, Ok(true));
        assert!(backend.notes_for_user("u2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_notes_are_reset() {
        let (dir, backend) = create_backend().await;
        backend.insert_user(&user("u1", "John Doe", "john@example.com")).await.unwrap();
        backend.upsert_note(&note("n1", "u1", "first")).await.unwrap();

        let path = dir.path().join("users").join("u1").join("notes.txt");
        fs::write(&path, "{ not json\n").unwrap();

        assert_eq!(backend.notes_for_user("u1").await, Ok(vec![]));
        assert_eq!(fs::read_to_string(&path).unwrap(), "");
    }

    #[tokio::test]
    async fn corrupt_credentials_only_affect_their_user() {
        let (dir, backend) = create_backend().await;
        backend.insert_user(&user("u1", "John Doe", "john@example.com")).await.unwrap();
        backend.insert_user(&user("u2", "Jane Smith", "jane@example.com")).await.unwrap();

        let path = dir.path().join("users").join("u2").join("creds.txt");
        fs::write(&path, "username: Jane Smith\n").unwrap();

        assert_eq!(
            backend.find_user_by_email("john@example.com", false).await.unwrap().id,
            "u1"
        );
        assert!(matches!(
            backend.find_user_by_email("jane@example.com", false).await,
            Err(FindError::NotFound)
        ));
        assert_eq!(backend.user_count().await, Ok(1));

        // updating the broken record itself still reports the failure
        assert!(!backend.update_session("u2", Some("s1"), true).await);
    }

    #[tokio::test]
    async fn unstorable_user_leaves_nothing_behind() {
        let (dir, backend) = create_backend().await;

        let bad = user("u1", "John\nemail: x@y.z", "john@example.com");
        assert!(backend.insert_user(&bad).await.is_err());

        let entries = fs::read_dir(dir.path().join("users")).unwrap().count();
        assert_eq!(entries, 0);
    }
}
