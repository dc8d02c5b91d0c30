mod changefeed;
mod delete;
mod key;
mod metadata;
mod publish;

pub use changefeed::changefeed;
pub use delete::delete_gun;
pub use key::{get_key, rotate_key};
pub use metadata::{get_checksum, get_current, get_version, view_for};
pub use publish::publish;
