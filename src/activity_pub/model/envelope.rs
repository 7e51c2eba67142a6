//! Inbound activity envelopes and the closed set of activities this node
//! knows how to apply.

use anyhow::{Error, Result, bail};
use serde_json::Value;
use thiserror::Error as ThisError;

use super::Object;

const VIDEO_MIME_TYPES: [&str; 3] = ["video/mp4", "video/webm", "video/ogg"];
const MAGNET_MIME_TYPE: &str = "application/x-bittorrent;x-scheme-handler/magnet";

#[derive(Debug, ThisError)]
#[error("malformed {kind} activity: {reason}")]
pub(crate) struct MalformedActivity {
    pub(crate) kind: String,
    pub(crate) reason: String,
}

impl MalformedActivity {
    fn new(kind: &str, reason: impl Into<String>) -> MalformedActivity {
        MalformedActivity {
            kind: kind.to_string(),
            reason: reason.into(),
        }
    }
}

/// A signed activity as received from a peer. Only its side effects are
/// persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Envelope(Object<'static>);

impl TryFrom<Value> for Envelope {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        let object = Object::from(value);
        if object.get_first_type().is_none() {
            bail!("activity should have type property");
        }
        if object.get_node_iri("actor").is_none() {
            bail!("activity should have actor property");
        }
        Ok(Envelope(object))
    }
}

impl Envelope {
    pub(crate) fn id(&self) -> Option<&str> {
        self.0.id()
    }
    pub(crate) fn kind(&self) -> &str {
        self.0.get_first_type().unwrap_or_default()
    }
    pub(crate) fn actor(&self) -> &str {
        self.0.get_node_iri("actor").unwrap_or_default()
    }
    /// Addressing of the activity, `to` followed by `cc`.
    pub(crate) fn audience(&self) -> Vec<&str> {
        let mut audience = self.0.get_iri_array("to");
        audience.extend(self.0.get_iri_array("cc"));
        audience
    }
    pub(crate) fn to_value(&self) -> Value {
        self.0.to_value()
    }

    pub(crate) fn classify(&self) -> Result<Activity, MalformedActivity> {
        let envelope = &self.0;
        match self.kind() {
            "Create" => {
                let Some(object) = envelope.get_node_object("object") else {
                    return Err(MalformedActivity::new("Create", "object must be embedded"));
                };
                let object_type = object.get_first_type().unwrap_or_default();
                match object_type {
                    "Video" => VideoObject::try_from(&object).map(Activity::Video),
                    "Like" => RateObject::try_from(&object).map(Activity::Like),
                    "Dislike" => RateObject::try_from(&object).map(Activity::Dislike),
                    "View" => RateObject::try_from(&object)
                        .map(|rate| Activity::View(ViewObject { video: rate.video })),
                    "Flag" => FlagObject::try_from(&object).map(Activity::Flag),
                    other => Ok(Activity::Unknown(format!("Create/{other}"))),
                }
            }
            "Like" => RateObject::try_from(envelope).map(Activity::Like),
            "Dislike" => RateObject::try_from(envelope).map(Activity::Dislike),
            "Follow" => {
                let object = envelope
                    .get_node_iri("object")
                    .ok_or_else(|| MalformedActivity::new("Follow", "object must reference an actor"))?;
                Ok(Activity::Follow(FollowObject {
                    object: object.to_string(),
                }))
            }
            "Announce" => {
                let id = self
                    .id()
                    .ok_or_else(|| MalformedActivity::new("Announce", "announce must have an id"))?;
                let video = envelope
                    .get_node_iri("object")
                    .ok_or_else(|| MalformedActivity::new("Announce", "object must reference a video"))?;
                Ok(Activity::Announce(AnnounceObject {
                    id: id.to_string(),
                    video: video.to_string(),
                }))
            }
            other => Ok(Activity::Unknown(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Activity {
    Video(VideoObject),
    Like(RateObject),
    Dislike(RateObject),
    View(ViewObject),
    Flag(FlagObject),
    Follow(FollowObject),
    Announce(AnnounceObject),
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct VideoObject {
    pub(crate) id: String,
    pub(crate) uuid: String,
    pub(crate) name: String,
    pub(crate) channel: String,
    pub(crate) published: Option<String>,
    pub(crate) files: Vec<VideoFileObject>,
    pub(crate) tags: Vec<String>,
    pub(crate) likes: Vec<String>,
    pub(crate) dislikes: Vec<String>,
    pub(crate) shares: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct VideoFileObject {
    pub(crate) url: String,
    pub(crate) mime_type: String,
    pub(crate) resolution: u32,
    pub(crate) size: u64,
    pub(crate) info_hash: Option<String>,
}

impl TryFrom<&Object<'_>> for VideoObject {
    type Error = MalformedActivity;

    fn try_from(object: &Object<'_>) -> Result<Self, Self::Error> {
        let malformed = |reason: &str| MalformedActivity::new("Video", reason);
        let id = object.id().ok_or_else(|| malformed("video must have an id"))?;
        let uuid = object
            .get_str("uuid")
            .ok_or_else(|| malformed("video must have a uuid"))?;
        let channel = object
            .get_value("attributedTo")
            .and_then(Value::as_array)
            .and_then(|attributed_to| {
                attributed_to
                    .iter()
                    .map(Object::from)
                    .find(|actor| actor.type_is("Group"))
                    .and_then(|actor| actor.id().map(str::to_string))
            })
            .ok_or_else(|| malformed(&format!("cannot find associated video channel to video {id}")))?;
        let files = video_files(object);
        if files.is_empty() {
            return Err(malformed(&format!("cannot find valid files for video {id}")));
        }
        let tags = object
            .get_value("tag")
            .and_then(Value::as_array)
            .map(|tags| {
                tags.iter()
                    .filter_map(|tag| tag.get("name").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let owned = |items: Vec<&str>| -> Vec<String> {
            items.into_iter().map(str::to_string).collect()
        };

        Ok(VideoObject {
            id: id.to_string(),
            uuid: uuid.to_string(),
            name: object.get_str("name").unwrap_or_default().to_string(),
            channel,
            published: object.get_str("published").map(str::to_string),
            files,
            tags,
            likes: owned(object.get_collection_items("likes")),
            dislikes: owned(object.get_collection_items("dislikes")),
            shares: owned(object.get_collection_items("shares")),
        })
    }
}

fn video_files(object: &Object<'_>) -> Vec<VideoFileObject> {
    let links: Vec<Object<'_>> = object
        .get_value("url")
        .and_then(Value::as_array)
        .map(|urls| urls.iter().map(Object::from).collect())
        .unwrap_or_default();
    let width = |link: &Object<'_>| {
        link.get_value("width")
            .and_then(Value::as_u64)
            .and_then(|width| u32::try_from(width).ok())
            .unwrap_or_default()
    };

    let mut files = vec![];
    for link in &links {
        let Some(mime_type) = link.get_str("mimeType") else {
            continue;
        };
        if !VIDEO_MIME_TYPES.contains(&mime_type) {
            continue;
        }
        let Some(href) = link.get_str("href") else {
            continue;
        };
        let resolution = width(link);
        let info_hash = links
            .iter()
            .filter(|&l| l.get_str("mimeType") == Some(MAGNET_MIME_TYPE) && width(l) == resolution)
            .find_map(|l| l.get_str("href").and_then(magnet_info_hash));
        files.push(VideoFileObject {
            url: href.to_string(),
            mime_type: mime_type.to_string(),
            resolution,
            size: link.get_value("size").and_then(Value::as_u64).unwrap_or_default(),
            info_hash,
        });
    }
    files
}

fn magnet_info_hash(magnet: &str) -> Option<String> {
    let query = magnet.strip_prefix("magnet:?")?;
    query
        .split('&')
        .find_map(|param| param.strip_prefix("xt=urn:btih:"))
        .map(str::to_string)
}

/// Like, dislike, or view of a video.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RateObject {
    pub(crate) video: String,
}

impl TryFrom<&Object<'_>> for RateObject {
    type Error = MalformedActivity;

    fn try_from(object: &Object<'_>) -> Result<Self, Self::Error> {
        let kind = object.get_first_type().unwrap_or_default();
        let video = object
            .get_node_iri("object")
            .ok_or_else(|| MalformedActivity::new(kind, "object must reference a video"))?;
        Ok(RateObject {
            video: video.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ViewObject {
    pub(crate) video: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FlagObject {
    pub(crate) video: String,
    pub(crate) reason: String,
}

impl TryFrom<&Object<'_>> for FlagObject {
    type Error = MalformedActivity;

    fn try_from(object: &Object<'_>) -> Result<Self, Self::Error> {
        let video = object
            .get_node_iri("object")
            .ok_or_else(|| MalformedActivity::new("Flag", "object must reference a video"))?;
        Ok(FlagObject {
            video: video.to_string(),
            reason: object.get_str("content").unwrap_or_default().to_string(),
        })
    }
}

/// Follow of a local actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FollowObject {
    pub(crate) object: String,
}

/// Share of a video, `id` is the announce url.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AnnounceObject {
    pub(crate) id: String,
    pub(crate) video: String,
}
