//! # Audio Module
//!
//! Playback decisions for a single guild, independent of any transport.
//!
//! ## Architecture
//!
//! ### [`queue`] - Queue Management
//! - FIFO track queue with 1-indexed, validated positions
//! - Shuffle, move, skip-to and per-requester removal
//!
//! ### [`repeat`] - Repeat Policy
//! - Single-track, whole-queue and counted repeats
//! - Fixed precedence: track, then playlist, then counter
//!
//! ### [`scheduler`] - Playback Schedulers
//! - Queued playback and continuous radio streams
//! - Reacts to node start, end, stuck and exception events
//!
//! ### [`fault`] - Fault Classification
//! - Maps node error messages to user-facing causes
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use guild_playback::audio::{queue::TrackQueue, track::Track};
//!
//! let mut queue = TrackQueue::new();
//! queue.append(Track::new("dQw4w9WgXcQ", "QAAA...", "Never Gonna Give You Up"));
//! assert!(!queue.position_out_of_bounds(1));
//! ```

pub mod fault;
pub mod queue;
pub mod repeat;
pub mod scheduler;
pub mod track;

use regex::Regex;
use std::sync::LazyLock;
use url::Url;

static SEARCH_QUERY: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"^[a-z]{2,}search:").ok());

/// Convierte lo que escribió el usuario en un identificador para el nodo.
///
/// Las URLs http(s) y las búsquedas que ya traen prefijo se usan tal cual;
/// cualquier otro texto se busca con `search_prefix`.
pub fn resolve_identifier(query: &str, search_prefix: &str) -> String {
    let query = query.trim();

    let is_url = Url::parse(query).is_ok_and(|url| matches!(url.scheme(), "http" | "https"));
    let has_prefix = SEARCH_QUERY.as_ref().is_some_and(|re| re.is_match(query));

    if is_url || has_prefix {
        query.to_string()
    } else {
        format!("{}{}", search_prefix, query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_and_prefixed_searches_pass_through() {
        assert_eq!(
            resolve_identifier(" https://youtu.be/dQw4w9WgXcQ ", "ytsearch:"),
            "https://youtu.be/dQw4w9WgXcQ"
        );
        assert_eq!(resolve_identifier("scsearch:lofi", "ytsearch:"), "scsearch:lofi");
    }

    #[test]
    fn plain_text_gets_the_search_prefix() {
        assert_eq!(resolve_identifier("daft punk", "ytsearch:"), "ytsearch:daft punk");
        assert_eq!(resolve_identifier("mailto:someone", "ytsearch:"), "ytsearch:mailto:someone");
    }
}
