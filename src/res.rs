use axum::{debug_handler, http::header, response::IntoResponse};

#[macro_export]
macro_rules! include_res {
    (bytes, $p:expr) => {
        include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), "/res", $p))
    };
    (str, $p:expr) => {
        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/res", $p))
    };
}

/// Placeholder for senders without a picture.
#[debug_handler]
pub async fn avatar() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "image/svg+xml")], include_res!(bytes, "/static/avatar.svg"))
}
