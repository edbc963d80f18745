pub mod disk;
pub mod memory;
pub mod multipart;
pub mod traits;

pub use disk::LocalDiskStore;
pub use memory::InMemoryStore;
pub use traits::{CompletedPart, ListOptions, ListPage, MultipartUploadInfo, ObjectStore};
