pub mod fs;
pub mod payload;
