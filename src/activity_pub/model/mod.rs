mod envelope;
mod object;

pub(crate) use envelope::{
    Activity, AnnounceObject, Envelope, FlagObject, FollowObject, MalformedActivity, RateObject,
    VideoFileObject, VideoObject, ViewObject,
};
pub(crate) use object::Object;

#[cfg(test)]
pub(crate) use envelope::tests::video_json;
