pub mod answers;
pub mod questions;
pub mod report;
pub mod session;

pub use answers::*;
pub use questions::*;
pub use report::*;
pub use session::*;
