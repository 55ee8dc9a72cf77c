//! Inbound message classification
//!
//! The provider's type tag plus its loosely-typed sub-objects are folded into
//! [`InboundContent`] once; everything downstream matches on that.

use serde::Serialize;

use crate::channels::WhatsAppMessage;
use crate::channels::whatsapp::WhatsAppMedia;
use crate::db::MediaClass;

/// Declared content kind of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Text,
    Image,
    Audio,
    Video,
    Document,
    Location,
    Contacts,
    Sticker,
    Reaction,
    Button,
    Interactive,
    Unknown,
}

impl ContentKind {
    /// Stable storage tag (matches the provider's `type` values)
    #[must_use]
    pub const fn as_tag(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Document => "document",
            Self::Location => "location",
            Self::Contacts => "contacts",
            Self::Sticker => "sticker",
            Self::Reaction => "reaction",
            Self::Button => "button",
            Self::Interactive => "interactive",
            Self::Unknown => "unknown",
        }
    }

    /// Parse a storage or provider tag; anything unrecognized is `Unknown`
    #[must_use]
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "text" => Self::Text,
            "image" => Self::Image,
            "audio" => Self::Audio,
            "video" => Self::Video,
            "document" => Self::Document,
            "location" => Self::Location,
            "contacts" | "contact" => Self::Contacts,
            "sticker" => Self::Sticker,
            "reaction" => Self::Reaction,
            "button" => Self::Button,
            "interactive" => Self::Interactive,
            _ => Self::Unknown,
        }
    }

    /// Media class for kinds whose bytes are stored and analyzed
    #[must_use]
    pub const fn media_class(self) -> Option<MediaClass> {
        match self {
            Self::Image => Some(MediaClass::Image),
            Self::Document => Some(MediaClass::Document),
            _ => None,
        }
    }

    /// Bracketed placeholder shown in place of media content
    #[must_use]
    pub const fn placeholder(self) -> &'static str {
        match self {
            Self::Image => "[Imagen]",
            Self::Audio => "[Audio]",
            Self::Video => "[Video]",
            Self::Document => "[Documento]",
            Self::Sticker => "[Sticker]",
            Self::Location => "[Ubicación]",
            Self::Contacts => "[Contacto]",
            Self::Reaction => "[Reaccion]",
            Self::Button => "[button]",
            Self::Interactive => "[interactive]",
            Self::Text | Self::Unknown => "[unknown]",
        }
    }
}

/// Reference to provider-hosted media
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef {
    /// Opaque provider content id, resolved later
    pub id: String,
    pub mime_type: Option<String>,
    pub caption: Option<String>,
    pub filename: Option<String>,
}

/// Typed payload of one inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum InboundContent {
    Text(String),
    Image(MediaRef),
    Audio(MediaRef),
    Video(MediaRef),
    Document(MediaRef),
    Sticker(MediaRef),
    Location {
        latitude: f64,
        longitude: f64,
        name: Option<String>,
    },
    Contacts(Vec<String>),
    Reaction {
        emoji: Option<String>,
    },
    Button {
        label: Option<String>,
    },
    Interactive {
        label: Option<String>,
    },
    /// Unrecognized type tag, or a known tag whose payload was missing
    Unknown {
        tag: String,
    },
}

impl InboundContent {
    /// Fold a provider message into its typed payload
    #[must_use]
    pub fn from_message(message: &WhatsAppMessage) -> Self {
        let tag = message.message_type.as_str();
        let unknown = || Self::Unknown {
            tag: tag.to_string(),
        };

        match ContentKind::from_tag(tag) {
            ContentKind::Text => message
                .text
                .as_ref()
                .and_then(|t| t.body.clone())
                .map_or_else(unknown, Self::Text),
            ContentKind::Image => media(message.image.as_ref()).map_or_else(unknown, Self::Image),
            ContentKind::Audio => media(message.audio.as_ref()).map_or_else(unknown, Self::Audio),
            ContentKind::Video => media(message.video.as_ref()).map_or_else(unknown, Self::Video),
            ContentKind::Sticker => media(message.sticker.as_ref())
                .map_or_else(unknown, |m| Self::Sticker(MediaRef { caption: None, ..m })),
            ContentKind::Document => message
                .document
                .as_ref()
                .and_then(|d| {
                    Some(media_ref(
                        d.id.as_deref()?,
                        d.mime_type.as_ref(),
                        d.caption.as_ref(),
                        d.filename.as_ref(),
                    ))
                })
                .map_or_else(unknown, Self::Document),
            ContentKind::Location => {
                message
                    .location
                    .as_ref()
                    .and_then(|l| {
                        Some(Self::Location {
                            latitude: l.latitude?,
                            longitude: l.longitude?,
                            name: l.name.clone(),
                        })
                    })
                    .unwrap_or_else(unknown)
            }
            ContentKind::Contacts => message.contacts.as_ref().map_or_else(unknown, |contacts| {
                Self::Contacts(
                    contacts
                        .iter()
                        .filter_map(|c| c.name.as_ref()?.formatted_name.clone())
                        .collect(),
                )
            }),
            ContentKind::Reaction => message
                .reaction
                .as_ref()
                .map_or_else(unknown, |r| Self::Reaction {
                    emoji: r.emoji.clone(),
                }),
            ContentKind::Button => message.button.as_ref().map_or_else(unknown, |b| Self::Button {
                label: b.text.clone().or_else(|| b.payload.clone()),
            }),
            ContentKind::Interactive => {
                message
                    .interactive
                    .as_ref()
                    .map_or_else(unknown, |i| Self::Interactive {
                        label: i
                            .button_reply
                            .as_ref()
                            .or(i.list_reply.as_ref())
                            .and_then(|r| r.title.clone()),
                    })
            }
            ContentKind::Unknown => unknown(),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> ContentKind {
        match self {
            Self::Text(_) => ContentKind::Text,
            Self::Image(_) => ContentKind::Image,
            Self::Audio(_) => ContentKind::Audio,
            Self::Video(_) => ContentKind::Video,
            Self::Document(_) => ContentKind::Document,
            Self::Sticker(_) => ContentKind::Sticker,
            Self::Location { .. } => ContentKind::Location,
            Self::Contacts(_) => ContentKind::Contacts,
            Self::Reaction { .. } => ContentKind::Reaction,
            Self::Button { .. } => ContentKind::Button,
            Self::Interactive { .. } => ContentKind::Interactive,
            Self::Unknown { .. } => ContentKind::Unknown,
        }
    }

    /// Provider media reference, for every media-bearing kind
    #[must_use]
    pub const fn media(&self) -> Option<&MediaRef> {
        match self {
            Self::Image(m) | Self::Audio(m) | Self::Video(m) | Self::Document(m) | Self::Sticker(m) => {
                Some(m)
            }
            _ => None,
        }
    }

    /// Human-readable content stored on the message record
    #[must_use]
    pub fn display(&self) -> String {
        match self {
            Self::Text(body) => body.clone(),
            Self::Image(m) | Self::Audio(m) | Self::Video(m) | Self::Document(m) | Self::Sticker(m) => {
                let placeholder = self.kind().placeholder();
                match m.caption.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
                    Some(caption) => format!("{placeholder} {caption}"),
                    None => placeholder.to_string(),
                }
            }
            Self::Location {
                latitude,
                longitude,
                ..
            } => format!("[Ubicación: {latitude}, {longitude}]"),
            Self::Contacts(names) if names.is_empty() => "[Contacto]".to_string(),
            Self::Contacts(names) => format!("[Contacto: {}]", names.join(", ")),
            Self::Reaction { emoji } => match emoji.as_deref().filter(|e| !e.is_empty()) {
                Some(emoji) => format!("[Reaccion: {emoji}]"),
                None => "[Reaccion]".to_string(),
            },
            Self::Button { label } | Self::Interactive { label } => label
                .as_deref()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map_or_else(|| self.kind().placeholder().to_string(), String::from),
            Self::Unknown { tag } if tag.is_empty() => "[unknown]".to_string(),
            Self::Unknown { tag } => format!("[{tag}]"),
        }
    }
}

/// Media payload with a usable content id
fn media(media: Option<&WhatsAppMedia>) -> Option<MediaRef> {
    let m = media?;
    Some(media_ref(m.id.as_deref()?, m.mime_type.as_ref(), m.caption.as_ref(), None))
}

fn media_ref(
    id: &str,
    mime_type: Option<&String>,
    caption: Option<&String>,
    filename: Option<&String>,
) -> MediaRef {
    MediaRef {
        id: id.to_string(),
        mime_type: mime_type.cloned(),
        caption: caption.cloned(),
        filename: filename.cloned(),
    }
}

/// Whether an inbound message should get an automated reply
///
/// Reactions never do, and neither does content that is blank after
/// trimming. Media placeholders are eligible.
#[must_use]
pub fn is_eligible(kind: ContentKind, display: &str) -> bool {
    kind != ContentKind::Reaction && !display.trim().is_empty()
}
