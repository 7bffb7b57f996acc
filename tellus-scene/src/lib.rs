#![warn(
    clippy::unwrap_used,
    clippy::cast_lossless,
    clippy::unimplemented,
    clippy::expect_used
)]

mod extent;
mod lat_lon;
mod sector;

pub use extent::*;
pub use lat_lon::*;
pub use sector::*;
