//! Policy shared by the workspace's command-line tools.

mod color;

pub use color::{ColorEnv, ColorWhen};
