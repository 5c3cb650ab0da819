mod avatar;
mod checkpoint;

pub use avatar::AvatarRecord;
pub use checkpoint::SyncCheckpoint;
