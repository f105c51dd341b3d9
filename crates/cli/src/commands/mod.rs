pub mod decode;
pub mod instrument;
pub mod util;
pub mod validate;

pub use decode::*;
pub use instrument::*;
pub use util::*;
pub use validate::*;
