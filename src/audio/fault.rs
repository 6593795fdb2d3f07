use regex::Regex;
use std::sync::LazyLock;

/// Causa conocida de un fallo de reproducción, derivada del mensaje del nodo
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackFault {
    RegionBlocked,
    AgeRestricted,
    Unavailable,
    Stuck,
    IssueWhilePlaying,
}

static KNOWN_CAUSES: LazyLock<Vec<(Regex, PlaybackFault)>> = LazyLock::new(|| {
    [
        (
            r"(?i)not (made )?(this video )?available in your country|blocked in your (country|region)",
            PlaybackFault::RegionBlocked,
        ),
        (
            r"(?i)age.?restricted|confirm your age|inappropriate for some users",
            PlaybackFault::AgeRestricted,
        ),
        (
            r"(?i)video unavailable|private video|has been removed|no longer available",
            PlaybackFault::Unavailable,
        ),
    ]
    .into_iter()
    .filter_map(|(pattern, fault)| Regex::new(pattern).ok().map(|re| (re, fault)))
    .collect()
});

/// Clasifica el mensaje de error de un nodo
pub fn classify(message: Option<&str>) -> PlaybackFault {
    let Some(message) = message else {
        return PlaybackFault::IssueWhilePlaying;
    };
    KNOWN_CAUSES
        .iter()
        .find(|(re, _)| re.is_match(message))
        .map(|(_, fault)| *fault)
        .unwrap_or(PlaybackFault::IssueWhilePlaying)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_messages_are_classified() {
        assert_eq!(
            classify(Some("The uploader has not made this video available in your country")),
            PlaybackFault::RegionBlocked
        );
        assert_eq!(
            classify(Some("Sign in to confirm your age")),
            PlaybackFault::AgeRestricted
        );
        assert_eq!(classify(Some("Video unavailable")), PlaybackFault::Unavailable);
    }

    #[test]
    fn unknown_or_missing_messages_fall_back() {
        assert_eq!(classify(Some("socket reset")), PlaybackFault::IssueWhilePlaying);
        assert_eq!(classify(None), PlaybackFault::IssueWhilePlaying);
    }
}
