use anyhow::Result;
use minicbor::{Decode, Encode};

use crate::store::{PairKey, Part, Record, Tx};

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub(crate) struct Video {
    #[n(0)]
    pub(crate) uuid: String,
    /// Canonical url, the ActivityPub id of the video.
    #[n(1)]
    pub(crate) url: String,
    #[n(2)]
    pub(crate) name: String,
    #[n(3)]
    pub(crate) channel: String,
    /// Actor whose followers hear about activity on this video.
    #[n(4)]
    pub(crate) owner: String,
    /// Host the video is mirrored from, this node's host for local videos.
    #[n(5)]
    pub(crate) host: String,
    #[n(6)]
    pub(crate) local: bool,
    #[n(7)]
    pub(crate) published: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub(crate) struct VideoFile {
    #[n(0)]
    pub(crate) url: String,
    #[n(1)]
    pub(crate) mime_type: String,
    #[n(2)]
    pub(crate) resolution: u32,
    #[n(3)]
    pub(crate) size: u64,
    #[n(4)]
    pub(crate) info_hash: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Counter {
    Likes,
    Dislikes,
    Views,
}

impl Counter {
    const ALL: [Counter; 3] = [Counter::Likes, Counter::Dislikes, Counter::Views];

    fn name(self) -> &'static str {
        match self {
            Counter::Likes => "likes",
            Counter::Dislikes => "dislikes",
            Counter::Views => "views",
        }
    }
    pub(crate) fn key(self, video_uuid: &str) -> PairKey {
        PairKey::new(video_uuid, self.name())
    }
}

pub(crate) struct VideoRepo;

impl VideoRepo {
    /// Inserts the video with its files and tags.
    pub(crate) fn insert(
        tx: &mut Tx<'_>,
        video: &Video,
        files: &[VideoFile],
        tags: &[String],
    ) -> Result<()> {
        tx.insert_record(Part::Videos, &video.uuid, video)?;
        tx.insert(Part::VideoUrls, &video.url, video.uuid.as_bytes().to_vec());
        for file in files {
            tx.insert_record(Part::VideoFiles, PairKey::new(&video.uuid, &file.url), file)?;
        }
        for tag in tags {
            tx.insert(Part::Tags, tag, vec![]);
            tx.insert(Part::VideoTags, PairKey::new(&video.uuid, tag), vec![]);
        }
        Ok(())
    }
    pub(crate) fn find_by_uuid(tx: &mut Tx<'_>, uuid: &str) -> Result<Option<Video>> {
        tx.get_record(Part::Videos, uuid)
    }
    pub(crate) fn find_by_url(tx: &mut Tx<'_>, url: &str) -> Result<Option<Video>> {
        let Some(uuid) = tx.get(Part::VideoUrls, url)? else {
            return Ok(None);
        };
        tx.get_record(Part::Videos, uuid)
    }
    pub(crate) fn find_by_uuid_or_url(
        tx: &mut Tx<'_>,
        uuid: &str,
        url: &str,
    ) -> Result<Option<Video>> {
        if let Some(video) = Self::find_by_uuid(tx, uuid)? {
            return Ok(Some(video));
        }
        Self::find_by_url(tx, url)
    }
    #[cfg(test)]
    pub(crate) fn files(tx: &mut Tx<'_>, uuid: &str) -> Result<Vec<VideoFile>> {
        tx.scan(Part::VideoFiles, PairKey::prefix(uuid))?
            .into_iter()
            .map(|(_, bytes)| VideoFile::from_bytes(&bytes))
            .collect()
    }
    #[cfg(test)]
    pub(crate) fn tags(tx: &mut Tx<'_>, uuid: &str) -> Result<Vec<String>> {
        let tags = tx
            .scan(Part::VideoTags, PairKey::prefix(uuid))?
            .into_iter()
            .map(|(key, _)| PairKey::from(key.as_slice()).tail_str().to_string())
            .collect();
        Ok(tags)
    }
    pub(crate) fn add_counter(
        tx: &mut Tx<'_>,
        uuid: &str,
        counter: Counter,
        delta: i64,
    ) -> Result<()> {
        tx.add(Part::VideoCounters, counter.key(uuid), delta)
    }
    /// Removes every video mirrored from one of `hosts` along with its files,
    /// tags, counters, rates and shares. Returns the number of videos removed.
    pub(crate) fn remove_all_from_hosts(tx: &mut Tx<'_>, hosts: &[&str]) -> Result<usize> {
        let mut removed = 0;
        for (key, bytes) in tx.scan(Part::Videos, b"")? {
            let video = Video::from_bytes(&bytes)?;
            if video.local || !hosts.contains(&video.host.as_str()) {
                continue;
            }
            tx.remove(Part::Videos, &key);
            tx.remove(Part::VideoUrls, &video.url);
            for part in [Part::VideoFiles, Part::VideoTags, Part::Rates, Part::Shares] {
                for (key, _) in tx.scan(part, PairKey::prefix(&video.uuid))? {
                    tx.remove(part, key);
                }
            }
            for counter in Counter::ALL {
                tx.remove(Part::VideoCounters, counter.key(&video.uuid));
            }
            removed += 1;
        }
        Ok(removed)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use anyhow::Result;

    use super::{Counter, Video, VideoFile, VideoRepo};
    use crate::activity_pub::repo::{RateKind, RateRepo};
    use crate::store::{Part, Store, temp_store};

    pub(crate) fn video(host: &str, uuid: &str, local: bool) -> Video {
        Video {
            uuid: uuid.to_string(),
            url: format!("https://{host}/video/{uuid}"),
            name: format!("video {uuid}"),
            channel: format!("https://{host}/video-channels/main"),
            owner: format!("https://{host}/accounts/owner"),
            host: host.to_string(),
            local,
            published: None,
        }
    }

    pub(crate) fn insert_video(store: &Store, video: &Video) -> Result<()> {
        let file = VideoFile {
            url: format!("{}-720.mp4", video.url),
            mime_type: "video/mp4".to_string(),
            resolution: 720,
            size: 1024,
            info_hash: None,
        };
        let mut tx = store.begin()?;
        VideoRepo::insert(&mut tx, video, &[file], &["music".to_string()])?;
        tx.commit()?;
        Ok(())
    }

    #[test]
    fn lookup_by_uuid_or_url() -> Result<()> {
        let (_dir, store) = temp_store()?;
        let v = video("peer-a.example", "u1", false);
        insert_video(&store, &v)?;

        let mut tx = store.begin()?;
        assert_eq!(VideoRepo::find_by_uuid_or_url(&mut tx, "u1", "x")?, Some(v.clone()));
        assert_eq!(VideoRepo::find_by_uuid_or_url(&mut tx, "u9", &v.url)?, Some(v.clone()));
        assert_eq!(VideoRepo::find_by_uuid_or_url(&mut tx, "u9", "x")?, None);
        assert_eq!(VideoRepo::files(&mut tx, "u1")?.len(), 1);
        assert_eq!(VideoRepo::tags(&mut tx, "u1")?, vec!["music"]);
        Ok(())
    }

    #[test]
    fn removing_a_host_keeps_other_videos() -> Result<()> {
        let (_dir, store) = temp_store()?;
        let gone = video("bad.example", "u1", false);
        let kept = video("good.example", "u2", false);
        insert_video(&store, &gone)?;
        insert_video(&store, &kept)?;
        let mut tx = store.begin()?;
        RateRepo::find_or_create(&mut tx, "u1", "https://x.example/a", RateKind::Like)?;
        VideoRepo::add_counter(&mut tx, "u1", Counter::Likes, 1)?;
        tx.commit()?;

        let mut tx = store.begin()?;
        assert_eq!(VideoRepo::remove_all_from_hosts(&mut tx, &["bad.example"])?, 1);
        tx.commit()?;

        assert_eq!(store.len(Part::Videos)?, 1);
        assert_eq!(store.len(Part::VideoUrls)?, 1);
        assert_eq!(store.len(Part::VideoFiles)?, 1);
        assert_eq!(store.len(Part::Rates)?, 0);
        assert_eq!(store.counter(Part::VideoCounters, Counter::Likes.key("u1"))?, 0);
        assert!(store.get_record::<Video>(Part::Videos, "u2")?.is_some());
        Ok(())
    }
}
