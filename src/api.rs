use std::convert::Infallible;
use std::str::FromStr;
use std::sync::Arc;

use cookie::{time::Duration, Cookie, SameSite};
use log::{debug, error};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use warp::http::{header, StatusCode};
use warp::{Filter, Rejection, Reply};

use crate::auth::{LoginAttempt, PasswordReset, Registration, SessionId};
use crate::note::{self, NoteDraft};
use crate::securenotes::{self, Error, SecureNotes, SecureNotesAuthed};
use crate::strength::Strength;

const SESSION_COOKIE: &str = "sessionid";
const REMEMBER_FOR_DAYS: i64 = 30;
const MAX_BODY: u64 = 16 * 1024;

pub fn routes(
    sync: Arc<SecureNotes>,
    secure: bool,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let with_sync = warp::any().map(move || Arc::clone(&sync));
    let with_secure = warp::any().map(move || secure);
    let session_cookie = warp::cookie::optional::<String>(SESSION_COOKIE);

    let authed = with_sync
        .clone()
        .and(session_cookie.clone())
        .and_then(authenticate);

    let accounts = {
        let register = warp::path!("api" / "register")
            .and(warp::post())
            .and(with_sync.clone())
            .and(json_body())
            .and_then(register);

        let login = warp::path!("api" / "login")
            .and(warp::post())
            .and(with_sync.clone())
            .and(session_cookie)
            .and(with_secure.clone())
            .and(json_body())
            .and_then(login);

        let logout = warp::path!("api" / "logout")
            .and(warp::post())
            .and(authed.clone())
            .and(with_secure)
            .and_then(logout);

        let session = warp::path!("api" / "session")
            .and(warp::get())
            .and(authed.clone())
            .map(|authed: SecureNotesAuthed| warp::reply::json(authed.session()));

        register.or(login).or(logout).or(session)
    };

    let passwords = {
        let forgot = warp::path!("api" / "password" / "forgot")
            .and(warp::post())
            .and(with_sync.clone())
            .and(json_body())
            .and_then(forgot_password);

        let reset = warp::path!("api" / "password" / "reset")
            .and(warp::post())
            .and(with_sync.clone())
            .and(json_body())
            .and_then(reset_password);

        let strength = warp::path!("api" / "password" / "strength")
            .and(warp::post())
            .and(with_sync)
            .and(json_body())
            .map(password_strength);

        forgot.or(reset).or(strength)
    };

    let notes = {
        let list = warp::path!("api" / "notes")
            .and(warp::get())
            .and(authed.clone())
            .and(warp::query::<NotesQuery>())
            .and_then(list_notes);

        let get = warp::path!("api" / "notes" / String)
            .and(warp::get())
            .and(authed.clone())
            .and_then(get_note);

        let save = warp::path!("api" / "notes")
            .and(warp::post())
            .and(authed.clone())
            .and(json_body())
            .and_then(save_note);

        let delete = warp::path!("api" / "notes" / String)
            .and(warp::delete())
            .and(authed)
            .and_then(delete_note);

        list.or(get).or(save).or(delete)
    };

    accounts
        .or(passwords)
        .or(notes)
        .recover(recover)
        .with(warp::log("securenotes"))
}

fn json_body<T: DeserializeOwned + Send>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone
{
    warp::body::content_length_limit(MAX_BODY).and(warp::body::json())
}

fn reject(e: Error) -> Rejection {
    warp::reject::custom(e)
}

fn parse_session(cookie: Option<&str>) -> Option<SessionId> {
    cookie.and_then(|c| SessionId::from_str(c).ok())
}

async fn authenticate(
    sync: Arc<SecureNotes>,
    cookie: Option<String>,
) -> Result<SecureNotesAuthed, Rejection> {
    let Some(session_id) = parse_session(cookie.as_deref()) else {
        debug!("request without a valid session cookie");
        return Err(reject(Error::NotLoggedIn));
    };

    sync.authenticate(session_id).await.map_err(reject)
}

fn session_cookie(session_id: &SessionId, secure: bool, remember_me: bool) -> String {
    let cookie = Cookie::build((SESSION_COOKIE, session_id.to_string()))
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Strict);

    // without a max-age the cookie goes when the browser session does
    let cookie = if remember_me {
        cookie.max_age(Duration::days(REMEMBER_FOR_DAYS))
    } else {
        cookie
    };

    cookie.build().to_string()
}

async fn register(
    sync: Arc<SecureNotes>,
    registration: Registration,
) -> Result<impl Reply, Rejection> {
    let registered = sync.register(registration).await.map_err(reject)?;

    Ok(warp::reply::with_status(
        warp::reply::json(&registered),
        StatusCode::CREATED,
    ))
}

async fn login(
    sync: Arc<SecureNotes>,
    cookie: Option<String>,
    secure: bool,
    attempt: LoginAttempt,
) -> Result<impl Reply, Rejection> {
    let remember_me = attempt.remember_me;
    let authed = sync
        .login(attempt, parse_session(cookie.as_deref()))
        .await
        .map_err(reject)?;

    Ok(warp::reply::with_header(
        warp::reply::json(authed.session()),
        header::SET_COOKIE,
        session_cookie(authed.session_id(), secure, remember_me),
    ))
}

async fn logout(authed: SecureNotesAuthed, secure: bool) -> Result<impl Reply, Rejection> {
    authed.logout().await.map_err(reject)?;

    let expired = Cookie::build((SESSION_COOKIE, ""))
        .path("/")
        .http_only(true)
        .secure(secure)
        .max_age(Duration::ZERO)
        .build();

    Ok(warp::reply::with_header(
        warp::reply::with_status(warp::reply(), StatusCode::NO_CONTENT),
        header::SET_COOKIE,
        expired.to_string(),
    ))
}

#[derive(Debug, Deserialize)]
struct ForgotPassword {
    #[serde(default)]
    email: String,
}

async fn forgot_password(
    sync: Arc<SecureNotes>,
    body: ForgotPassword,
) -> Result<impl Reply, Rejection> {
    let target = sync.forgot_password(&body.email).await.map_err(reject)?;

    Ok(warp::reply::json(&target))
}

async fn reset_password(
    sync: Arc<SecureNotes>,
    reset: PasswordReset,
) -> Result<impl Reply, Rejection> {
    sync.reset_password(reset).await.map_err(reject)?;

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct StrengthQuery {
    #[serde(default)]
    password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StrengthReply {
    strength: Option<Strength>,
    description: &'static str,
    long_enough: bool,
}

fn password_strength(sync: Arc<SecureNotes>, query: StrengthQuery) -> impl Reply {
    let strength = Strength::of(&query.password);

    warp::reply::json(&StrengthReply {
        strength,
        description: strength.map_or("Password strength", Strength::describe),
        long_enough: sync.policy().password_long_enough(&query.password),
    })
}

#[derive(Debug, Deserialize)]
struct NotesQuery {
    q: Option<String>,
}

async fn list_notes(authed: SecureNotesAuthed, query: NotesQuery) -> Result<impl Reply, Rejection> {
    let notes = match query.q {
        Some(ref term) => authed.search(term).await,
        None => authed.notes().await,
    }
    .map_err(reject)?;

    let now = securenotes::now().map_err(reject)?;

    Ok(warp::reply::json(&note::listings(notes, now)))
}

async fn get_note(id: String, authed: SecureNotesAuthed) -> Result<impl Reply, Rejection> {
    let note = authed.note(&id).await.map_err(reject)?;

    Ok(warp::reply::json(&note))
}

async fn save_note(authed: SecureNotesAuthed, draft: NoteDraft) -> Result<impl Reply, Rejection> {
    let status = if draft.id.is_some() {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    let note = authed.save_note(draft).await.map_err(reject)?;

    Ok(warp::reply::with_status(warp::reply::json(&note), status))
}

async fn delete_note(id: String, authed: SecureNotesAuthed) -> Result<impl Reply, Rejection> {
    authed.delete_note(&id).await.map_err(reject)?;

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

async fn recover(rejection: Rejection) -> Result<impl Reply, Infallible> {
    let (status, message): (StatusCode, String) = if let Some(e) = rejection.find::<Error>() {
        ((*e).into(), e.to_string())
    } else if rejection.is_not_found() {
        (StatusCode::NOT_FOUND, Error::NotFound.to_string())
    } else if let Some(e) = rejection.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, e.to_string())
    } else if rejection.find::<warp::reject::InvalidQuery>().is_some() {
        (StatusCode::BAD_REQUEST, "Invalid query string".into())
    } else if rejection.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "Request too large".into())
    } else if rejection.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed".into())
    } else {
        error!("unhandled rejection: {rejection:?}");
        (StatusCode::INTERNAL_SERVER_ERROR, Error::Internal.to_string())
    };

    Ok(warp::reply::with_status(
        warp::reply::json(&ErrorBody { error: message }),
        status,
    ))
}
