use serenity::model::id::UserId;
use std::time::Duration;

/// Canción resuelta por un nodo de audio.
///
/// No se modifica una vez encolada; las repeticiones reproducen una copia
/// obtenida con [`Track::make_clone`].
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub identifier: String,
    /// Identificador opaco que el nodo necesita para volver a reproducirla
    pub encoded: String,
    pub title: String,
    pub author: String,
    pub duration: Duration,
    pub uri: Option<String>,
    pub thumbnail_url: Option<String>,
    pub is_stream: bool,
    pub position: Duration,
    /// Usuario que pidió la canción
    pub audio_sender: Option<UserId>,
}

impl Track {
    pub fn new(identifier: impl Into<String>, encoded: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            encoded: encoded.into(),
            title: title.into(),
            author: String::new(),
            duration: Duration::ZERO,
            uri: None,
            thumbnail_url: None,
            is_stream: false,
            position: Duration::ZERO,
            audio_sender: None,
        }
    }

    // Setters

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    pub fn with_thumbnail(mut self, thumbnail: impl Into<String>) -> Self {
        self.thumbnail_url = Some(thumbnail.into());
        self
    }

    pub fn with_sender(mut self, sender: UserId) -> Self {
        self.audio_sender = Some(sender);
        self
    }

    pub fn as_stream(mut self) -> Self {
        self.is_stream = true;
        self
    }

    /// Copia reproducible con la posición reiniciada
    pub fn make_clone(&self) -> Self {
        Self {
            position: Duration::ZERO,
            ..self.clone()
        }
    }

    pub fn is_sent_by(&self, user_id: UserId) -> bool {
        self.audio_sender == Some(user_id)
    }

    /// Descripción corta para los logs
    pub fn qualifier(&self) -> String {
        format!("\"{}\" ({})", self.title, self.identifier)
    }
}

/// Fuente continua (estación de radio por internet)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioStation {
    pub name: String,
    pub stream_url: String,
    pub thumbnail_url: Option<String>,
}

impl RadioStation {
    pub fn new(name: impl Into<String>, stream_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stream_url: stream_url.into(),
            thumbnail_url: None,
        }
    }
}
