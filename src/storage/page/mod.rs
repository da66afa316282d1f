mod meta_page;

pub use meta_page::*;
