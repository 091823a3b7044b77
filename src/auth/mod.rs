use axum::{routing::get, Router};
use rand::seq::IndexedRandom;

use crate::AppState;

mod clients;
mod login;
mod lockin;
mod logout;

pub use clients::{ClientProvider, Clients};
pub use login::{login, login_page};
pub use lockin::lockin;
pub use logout::logout;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login", get(login_page))
        .route("/login/{provider}", get(login))
        .route("/lockin/{provider}", get(lockin))
        .route("/logout", get(logout))
}

/// Name for accounts whose provider shares none.
pub(crate) fn random_alias() -> String {
    let adjectives = [
        "Quick", "Lazy", "Mysterious", "Jolly", "Brave", "Silent", "Witty", "Fierce",
        "Clever", "Gentle", "Wild", "Calm", "Bold", "Shy", "Proud", "Happy",
        "Eager", "Fancy", "Rusty", "Golden", "Silver", "Bright", "Lucky",
    ];
    let nouns = [
        "Fox", "Bear", "Eagle", "Wolf", "Dragon", "Tiger", "Lion", "Owl", "Rabbit",
        "Falcon", "Hawk", "Shark", "Panda", "Kitten", "Puppy", "Phoenix", "Griffin",
        "Unicorn", "Turtle", "Dolphin", "Whale", "Elephant", "Giraffe", "Zebra",
    ];

    let mut rng = rand::rng();
    match (adjectives.choose(&mut rng), nouns.choose(&mut rng)) {
        (Some(adjective), Some(noun)) => format!("{adjective} {noun}"),
        _ => "Nameless User".to_owned(),
    }
}

/// Only same-origin paths are followed after login or logout.
pub(crate) fn safe_return_url(return_url: Option<String>, fallback: &str) -> String {
    match return_url {
        Some(url) if url.starts_with('/') && !url.starts_with("//") => url,
        _ => fallback.to_owned(),
    }
}
