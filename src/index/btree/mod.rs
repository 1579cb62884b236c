pub mod error;
pub mod iterator;
pub mod key;
pub mod page;
pub mod tree;

pub use error::BTreeError;
pub use iterator::TreeIterator;
pub use key::{FixedKey, IndexKey};
pub use tree::BPlusTree;
