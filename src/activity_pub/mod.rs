pub(crate) mod actor;
pub(crate) mod dispatcher;
pub(crate) mod forward;
pub(crate) mod hs2019;
pub(crate) mod mailman;
pub(crate) mod model;
pub(crate) mod process;
pub(crate) mod repo;
