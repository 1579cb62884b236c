mod header_page;

pub use header_page::{HeaderPageMut, HeaderPageRef, MAX_NAME_LEN, MAX_RECORDS};
