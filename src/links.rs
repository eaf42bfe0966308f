//! Public URL construction for stored files.
//!
//! The bot layer replies to an upload with a watch link and a direct
//! download link; both embed the message id and the 6-character hash gate.

/// Build the browser watch-page URL for a stored message.
pub fn watch_url(public_url: &str, msg_id: i64, hash: &str) -> String {
    format!("{}watch/{hash}/{msg_id}", with_trailing_slash(public_url))
}

/// Build the direct download URL for a stored message.
pub fn download_url(public_url: &str, msg_id: i64, hash: &str) -> String {
    format!("{}{hash}/{msg_id}", with_trailing_slash(public_url))
}

fn with_trailing_slash(prefix: &str) -> String {
    if prefix.ends_with('/') {
        prefix.to_string()
    } else {
        format!("{prefix}/")
    }
}
