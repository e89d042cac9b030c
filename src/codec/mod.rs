pub mod record;

pub use record::{read_document, write_document, Record};
