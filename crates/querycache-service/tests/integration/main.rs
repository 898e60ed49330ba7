// See <https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html>

pub mod background;
pub mod scenarios;
pub mod utils;
pub mod validation;

pub use utils::*;
