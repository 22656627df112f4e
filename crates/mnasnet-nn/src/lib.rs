pub mod layers;
pub mod conv;
pub mod sequential;

pub use layers::*;
pub use conv::*;
pub use sequential::*;
