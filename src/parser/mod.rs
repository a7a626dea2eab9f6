pub mod dumps;
pub mod record;

pub use dumps::*;
pub use record::*;
