//! Typed access to the store partitions. Repos are stateless; every method
//! works inside the caller's transaction.

mod abuse_repo;
mod actor_repo;
mod crypto_repo;
mod follower_repo;
mod rate_repo;
mod share_repo;
mod video_repo;

pub(crate) use abuse_repo::{AbuseRepo, VideoAbuse};
pub(crate) use actor_repo::ActorRepo;
pub(crate) use crypto_repo::CryptoRepo;
pub(crate) use follower_repo::FollowerRepo;
pub(crate) use rate_repo::{RateKind, RateRepo};
pub(crate) use share_repo::ShareRepo;
pub(crate) use video_repo::{Counter, Video, VideoFile, VideoRepo};

#[cfg(test)]
pub(crate) use video_repo::tests::{insert_video, video};
