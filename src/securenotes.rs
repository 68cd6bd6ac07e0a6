use std::{fmt, result, sync::Arc};

use log::{debug, error, info, trace, warn};
use serde::Serialize;
use uuid::Uuid;
use warp::http;

use crate::auth::{self, LoginAttempt, PasswordReset, Registration, SessionId};
use crate::backend::{Backend, FindError};
use crate::note::{self, Note, NoteDraft};
use crate::policy::Policy;
use crate::session::{Session, SessionStore};
use crate::strength::Strength;
use crate::time::Timestamp;
use crate::user::User;

pub struct SecureNotes {
    backend: Backend,
    sessions: SessionStore,
    policy: Policy,
}

pub struct SecureNotesAuthed {
    sync: Arc<SecureNotes>,
    session_id: SessionId,
    session: Session,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Error {
    Invalid(Invalid),
    Conflict(Conflict),
    Unauthorized,
    NotLoggedIn,
    NotFound,
    Internal,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Invalid {
    MissingFields,
    BadEmail,
    ControlCharacters,
    PasswordMismatch,
    PasswordTooShort(usize),
    PasswordUnchanged,
    MissingTitle,
    MissingContent,
    TitleTooLong,
    ContentTooLong,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Conflict {
    Email,
    Username,
}

pub type Result<T> = result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid(invalid) => write!(fmt, "{invalid}"),
            Self::Conflict(Conflict::Email) => write!(fmt, "Email already registered"),
            Self::Conflict(Conflict::Username) => write!(fmt, "Username already taken"),
            Self::Unauthorized => write!(fmt, "Invalid email or password"),
            Self::NotLoggedIn => write!(fmt, "Please log in"),
            Self::NotFound => write!(fmt, "Not found"),
            Self::Internal => write!(fmt, "Something went wrong, please try again"),
        }
    }
}

impl fmt::Display for Invalid {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingFields => write!(fmt, "Please fill in all fields"),
            Self::BadEmail => write!(fmt, "Please enter a valid email address"),
            Self::ControlCharacters => {
                write!(fmt, "Username and email can't contain control characters")
            }
            Self::PasswordMismatch => write!(fmt, "Passwords do not match"),
            Self::PasswordTooShort(min) => {
                write!(fmt, "Password must be at least {min} characters long")
            }
            Self::PasswordUnchanged => {
                write!(fmt, "New password must be different from old password")
            }
            Self::MissingTitle => write!(fmt, "Please enter a title for your note"),
            Self::MissingContent => write!(fmt, "Please enter content for your note"),
            Self::TitleTooLong => write!(
                fmt,
                "Title must be at most {} characters",
                note::MAX_TITLE_CHARS
            ),
            Self::ContentTooLong => write!(
                fmt,
                "Content must be at most {} characters",
                note::MAX_CONTENT_CHARS
            ),
        }
    }
}

impl From<Invalid> for Error {
    fn from(invalid: Invalid) -> Self {
        Self::Invalid(invalid)
    }
}

impl Into<http::StatusCode> for Error {
    fn into(self) -> http::StatusCode {
        match self {
            Self::Invalid(_) => http::StatusCode::BAD_REQUEST,
            Self::Conflict(_) => http::StatusCode::CONFLICT,
            Self::Unauthorized | Self::NotLoggedIn => http::StatusCode::UNAUTHORIZED,
            Self::NotFound => http::StatusCode::NOT_FOUND,
            Self::Internal => http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl warp::reject::Reject for Error {}

#[derive(Debug, Serialize)]
pub struct Registered {
    pub id: String,
    pub username: String,
    pub email: String,
    pub strength: Option<Strength>,
}

/// The account a password reset will apply to.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct ResetTarget {
    pub username: String,
    pub email: String,
}

/// Turns "not found" into `None`, anything else into an internal error.
fn optional(found: result::Result<User, FindError>, what: &str) -> Result<Option<User>> {
    match found {
        Ok(user) => Ok(Some(user)),
        Err(FindError::NotFound) => Ok(None),
        Err(e) => {
            error!("couldn't look up {what}: {e:?}");
            Err(Error::Internal)
        }
    }
}

impl SecureNotes {
    pub fn new(backend: Backend, policy: Policy) -> Self {
        Self {
            backend,
            sessions: SessionStore::default(),
            policy,
        }
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    fn check_password_len(&self, password: &str) -> Result<()> {
        if self.policy.password_long_enough(password) {
            Ok(())
        } else {
            Err(Invalid::PasswordTooShort(self.policy.min_password_len).into())
        }
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>> {
        optional(
            self.backend
                .find_user_by_email(email, self.policy.email_case_insensitive)
                .await,
            email,
        )
    }

    async fn user_by_username(&self, username: &str) -> Result<Option<User>> {
        optional(
            self.backend
                .find_user_by_username(username, self.policy.username_case_insensitive)
                .await,
            username,
        )
    }

    pub async fn register(&self, registration: Registration) -> Result<Registered> {
        let username = registration.username.trim();
        let email = registration.email.trim();
        let password = &registration.password;

        if username.is_empty()
            || email.is_empty()
            || password.is_empty()
            || registration.confirm_password.is_empty()
        {
            return Err(Invalid::MissingFields.into());
        }
        if username.chars().chain(email.chars()).any(char::is_control) {
            return Err(Invalid::ControlCharacters.into());
        }
        if !auth::valid_email(email) {
            return Err(Invalid::BadEmail.into());
        }
        if *password != registration.confirm_password {
            return Err(Invalid::PasswordMismatch.into());
        }
        self.check_password_len(password)?;

        if self.user_by_email(email).await?.is_some() {
            info!("registration for {email} rejected: email already registered");
            return Err(Error::Conflict(Conflict::Email));
        }
        if self.user_by_username(username).await?.is_some() {
            info!("registration for {email} rejected: username {username} taken");
            return Err(Error::Conflict(Conflict::Username));
        }

        let user = User {
            id: Uuid::new_v4().to_string(),
            username: username.into(),
            email: email.into(),
            pwhash: auth::hash_password(password),
            remember_me: false,
            created_at: now()?,
            session_id: None,
        };

        self.backend
            .insert_user(&user)
            .await
            .map_err(|()| Error::Internal)?;

        info!("{username} registered");

        Ok(Registered {
            id: user.id,
            username: user.username,
            email: user.email,
            strength: Strength::of(password),
        })
    }

    pub async fn login(
        self: &Arc<Self>,
        attempt: LoginAttempt,
        client_session_id: Option<SessionId>,
    ) -> Result<SecureNotesAuthed> {
        let email = attempt.email.trim();

        if email.is_empty() || attempt.password.is_empty() {
            return Err(Invalid::MissingFields.into());
        }
        if !auth::valid_email(email) {
            return Err(Invalid::BadEmail.into());
        }

        let Some(user) = self.user_by_email(email).await? else {
            error!("rejecting login for unknown email {email}");
            return Err(Error::Unauthorized);
        };

        if !auth::verify_password(&attempt.password, &user.pwhash) {
            error!("wrong password for {}", user.username);
            return Err(Error::Unauthorized);
        }

        // a client still holding a live session for this user keeps it
        let session_id = match client_session_id {
            Some(id) => match self.sessions.get(&id).await {
                Some(existing) if existing.user_id == user.id => {
                    info!("{} login: session check passed", user.username);
                    id
                }
                _ => SessionId::new(),
            },
            None => SessionId::new(),
        };

        let remembered = attempt.remember_me.then(|| session_id.to_string());
        if !self
            .backend
            .update_session(&user.id, remembered.as_deref(), attempt.remember_me)
            .await
        {
            error!("couldn't login user {}", user.username);
            return Err(Error::Internal);
        }

        let session = session_for(&user);
        self.sessions.replace_for_user(session_id, session.clone()).await;

        info!(
            "{} login: session created{}",
            user.username,
            if attempt.remember_me { ", remembered" } else { "" }
        );

        Ok(SecureNotesAuthed {
            sync: Arc::clone(self),
            session_id,
            session,
        })
    }

    pub async fn authenticate(self: &Arc<Self>, session_id: SessionId) -> Result<SecureNotesAuthed> {
        let authed = |session| SecureNotesAuthed {
            sync: Arc::clone(self),
            session_id,
            session,
        };

        if let Some(session) = self.sessions.get(&session_id).await {
            trace!("found session {session_id}");
            return Ok(authed(session));
        }

        let session_str = session_id.to_string();
        let users = self
            .backend
            .users_with_session(&session_str)
            .await
            .map_err(|()| Error::Internal)?;

        match &users[..] {
            [] => {
                debug!("no user found for session {session_id}");
                Err(Error::NotLoggedIn)
            }
            [user] if user.remember_me => {
                info!("{} restored from remembered session", user.username);

                let session = session_for(user);
                self.sessions.replace_for_user(session_id, session.clone()).await;
                Ok(authed(session))
            }
            [user] => {
                warn!("{} has a stored session but didn't ask to be remembered", user.username);
                Err(Error::NotLoggedIn)
            }
            _ => {
                error!("multiple users found for session {session_id}");
                Err(Error::Internal)
            }
        }
    }

    pub async fn forgot_password(&self, email: &str) -> Result<ResetTarget> {
        let email = email.trim();

        if email.is_empty() {
            return Err(Invalid::MissingFields.into());
        }
        if !auth::valid_email(email) {
            return Err(Invalid::BadEmail.into());
        }

        match self.user_by_email(email).await? {
            Some(user) => Ok(ResetTarget {
                username: user.username,
                email: user.email,
            }),
            None => {
                info!("password reset requested for unknown email {email}");
                Err(Error::NotFound)
            }
        }
    }

    pub async fn reset_password(&self, reset: PasswordReset) -> Result<()> {
        let email = reset.email.trim();

        if email.is_empty()
            || reset.old_password.is_empty()
            || reset.new_password.is_empty()
            || reset.confirm_new_password.is_empty()
        {
            return Err(Invalid::MissingFields.into());
        }
        if reset.new_password != reset.confirm_new_password {
            return Err(Invalid::PasswordMismatch.into());
        }
        self.check_password_len(&reset.new_password)?;
        if reset.old_password == reset.new_password {
            return Err(Invalid::PasswordUnchanged.into());
        }

        let Some(user) = self.user_by_email(email).await? else {
            error!("password reset for unknown email {email}");
            return Err(Error::NotFound);
        };

        if !auth::verify_password(&reset.old_password, &user.pwhash) {
            error!("password reset for {}: current password incorrect", user.username);
            return Err(Error::Unauthorized);
        }

        self.backend
            .update_password(&user.id, &auth::hash_password(&reset.new_password))
            .await
            .map_err(|()| Error::Internal)?;

        info!("{} changed their password", user.username);
        Ok(())
    }

    /// Creates the two demo accounts if nobody has registered yet.
    pub async fn seed_demo_users(&self) -> Result<usize> {
        let count = self
            .backend
            .user_count()
            .await
            .map_err(|()| Error::Internal)?;
        if count > 0 {
            debug!("{count} users exist, not seeding demo accounts");
            return Ok(0);
        }

        let created_at = now()?;
        let demo = [
            ("John Doe", "john@example.com"),
            ("Jane Smith", "jane@example.com"),
        ];

        for (username, email) in demo {
            let user = User {
                id: Uuid::new_v4().to_string(),
                username: username.into(),
                email: email.into(),
                pwhash: auth::hash_password("password123"),
                remember_me: false,
                created_at,
                session_id: None,
            };

            self.backend
                .insert_user(&user)
                .await
                .map_err(|()| Error::Internal)?;
        }

        info!("seeded {} demo accounts", demo.len());
        Ok(demo.len())
    }
}

fn session_for(user: &User) -> Session {
    Session {
        user_id: user.id.clone(),
        logged_in: true,
        username: user.username.clone(),
        user_email: user.email.clone(),
    }
}

impl SecureNotesAuthed {
    pub fn username(&self) -> &str {
        &self.session.username
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    fn user_id(&self) -> &str {
        &self.session.user_id
    }

    pub async fn logout(&self) -> Result<()> {
        let username = self.username();
        info!("{username} logout");

        self.sync.sessions.remove(&self.session_id).await;

        // unlike closing the tab, an explicit logout also forgets "remember me"
        self.sync
            .backend
            .update_session(self.user_id(), None, false)
            .await
            .then_some(())
            .ok_or(Error::Internal)
    }

    async fn load_notes(&self) -> Result<Vec<Note>> {
        self.sync
            .backend
            .notes_for_user(self.user_id())
            .await
            .map_err(|()| Error::Internal)
    }

    /// Most recently updated first.
    pub async fn notes(&self) -> Result<Vec<Note>> {
        let username = self.username();
        trace!("{username} listing notes");

        let mut notes = self.load_notes().await?;
        notes.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

        debug!("{username}, {} notes", notes.len());
        Ok(notes)
    }

    pub async fn note(&self, id: &str) -> Result<Note> {
        self.load_notes()
            .await?
            .into_iter()
            .find(|n| n.id == id)
            .ok_or(Error::NotFound)
    }

    pub async fn save_note(&self, draft: NoteDraft) -> Result<Note> {
        let username = self.username();
        let (title, content) = draft.validate()?;

        let notes = self.load_notes().await?;

        // keep this user's notes strictly ordered by their last change
        let now = now()?;
        let stamp = match notes.iter().map(|n| n.updated_at).max() {
            Some(latest) if latest >= now => latest.next(),
            _ => now,
        };

        let note = match draft.id {
            Some(ref id) => {
                let Some(existing) = notes.into_iter().find(|n| &n.id == id) else {
                    error!("{username} editing unknown note {id}");
                    return Err(Error::NotFound);
                };

                Note {
                    title: title.into(),
                    content: content.into(),
                    updated_at: stamp,
                    ..existing
                }
            }
            None => Note {
                id: Uuid::new_v4().to_string(),
                user_id: self.user_id().into(),
                title: title.into(),
                content: content.into(),
                created_at: stamp,
                updated_at: stamp,
            },
        };

        self.sync
            .backend
            .upsert_note(&note)
            .await
            .map_err(|()| Error::Internal)?;

        info!(
            "{username} {} note {}",
            if draft.id.is_some() { "updated" } else { "added" },
            note.id
        );
        Ok(note)
    }

    pub async fn delete_note(&self, id: &str) -> Result<()> {
        let username = self.username();

        let deleted = self
            .sync
            .backend
            .delete_note(self.user_id(), id)
            .await
            .map_err(|()| Error::Internal)?;

        if deleted {
            info!("{username} deleted note {id}");
            Ok(())
        } else {
            error!("{username} deleting unknown note {id}");
            Err(Error::NotFound)
        }
    }

    /// Notes whose title or content contain `term`, ignoring case. A blank
    /// term lists everything.
    pub async fn search(&self, term: &str) -> Result<Vec<Note>> {
        let term = term.trim().to_lowercase();
        if term.is_empty() {
            return self.notes().await;
        }

        let mut found = self.notes().await?;
        found.retain(|n| note::matches(n, &term));

        debug!("{}, {} notes matching \"{term}\"", self.username(), found.len());
        Ok(found)
    }
}

pub(crate) fn now() -> Result<Timestamp> {
    Timestamp::now().map_err(|()| Error::Internal)
}
